//! File read/write.
//!
use std::fs;
use std::io::{self, ErrorKind};
use std::sync::Arc;

use memmap::{Mmap, MmapOptions};

use crate::serialize::{AtomBytes, ReadBytes, ToBytes, WriteBytes};

/// Reads a movie file.
///
/// The whole file is mapped into memory. Implements `ReadBytes`,
/// so it can be passed to `Movie::read`.
pub struct MovieFile {
    mmap: Arc<Mmap>,
    pos:  u64,
    size: u64,
}

impl MovieFile {
    /// Open a movie file.
    pub fn open(path: impl AsRef<str>) -> io::Result<MovieFile> {
        let path = path.as_ref();
        let file = fs::File::open(path)?;
        let size = file.metadata()?.len();
        let mmap = unsafe { MmapOptions::new().map(&file)? };
        Ok(MovieFile {
            mmap: Arc::new(mmap),
            pos: 0,
            size,
        })
    }
}

impl ReadBytes for MovieFile {
    #[inline]
    fn read(&mut self, amount: u64) -> io::Result<&[u8]> {
        if self.pos + amount > self.size {
            return Err(ioerr!(UnexpectedEof, "tried to read past eof"));
        }
        let pos = self.pos as usize;
        self.pos += amount;
        Ok(&self.mmap[pos..pos + amount as usize])
    }

    #[inline]
    fn peek(&mut self, amount: u64) -> io::Result<&[u8]> {
        let amount = std::cmp::min(amount, self.size - self.pos);
        let pos = self.pos as usize;
        Ok(&self.mmap[pos..pos + amount as usize])
    }

    #[inline]
    fn skip(&mut self, amount: u64) -> io::Result<()> {
        if self.pos + amount > self.size {
            return Err(ioerr!(UnexpectedEof, "tried to seek past eof"));
        }
        self.pos += amount;
        Ok(())
    }

    #[inline]
    fn left(&self) -> u64 {
        if self.pos > self.size {
            0
        } else {
            self.size - self.pos
        }
    }
}

impl AtomBytes for MovieFile {
    #[inline]
    fn pos(&self) -> u64 {
        self.pos
    }

    #[inline]
    fn seek(&mut self, pos: u64) -> io::Result<()> {
        if pos > self.size {
            return Err(ioerr!(UnexpectedEof, "tried to seek past eof"));
        }
        self.pos = pos;
        Ok(())
    }

    #[inline]
    fn size(&self) -> u64 {
        self.size
    }

    fn data_ref(&self, size: u64) -> io::Result<DataRef> {
        if self.pos + size > self.size {
            return Err(ioerr!(UnexpectedEof, "data_ref past eof"));
        }
        Ok(DataRef::Map {
            mmap:  self.mmap.clone(),
            start: self.pos as usize,
            end:   (self.pos + size) as usize,
        })
    }
}

/// Reference to a chunk of source data: either a range in a mapped
/// file, or an owned buffer.
#[derive(Clone)]
pub enum DataRef {
    Mem(Arc<Vec<u8>>),
    Map {
        mmap:  Arc<Mmap>,
        start: usize,
        end:   usize,
    },
}

impl DataRef {
    pub fn from_vec(data: Vec<u8>) -> DataRef {
        DataRef::Mem(Arc::new(data))
    }

    /// Take a data reference at the current stream position, then
    /// skip over the data.
    pub fn from_bytes<R: ReadBytes>(stream: &mut R, data_size: u64) -> io::Result<DataRef> {
        let data_ref = stream.data_ref(data_size)?;
        stream.skip(data_size)?;
        Ok(data_ref)
    }

    pub fn len(&self) -> u64 {
        match self {
            DataRef::Mem(v) => v.len() as u64,
            DataRef::Map { start, end, .. } => (end - start) as u64,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ToBytes for DataRef {
    fn to_bytes<W: WriteBytes>(&self, stream: &mut W) -> io::Result<()> {
        stream.write(&self[..])
    }
}

impl std::ops::Deref for DataRef {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        match self {
            DataRef::Mem(v) => &v[..],
            DataRef::Map { mmap, start, end } => &mmap[*start..*end],
        }
    }
}

impl std::fmt::Debug for DataRef {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "[u8; {}]", self.len())
    }
}

/// In-memory writer. Implements `WriteBytes`, so serialized atoms
/// can be collected into a buffer and then written out in one go.
#[derive(Debug, Default)]
pub struct MemWriter {
    data: Vec<u8>,
    pos:  usize,
}

impl MemWriter {
    pub fn new() -> MemWriter {
        MemWriter::default()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }
}

impl WriteBytes for MemWriter {
    fn write(&mut self, newdata: &[u8]) -> io::Result<()> {
        let end = self.pos + newdata.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[self.pos..end].copy_from_slice(newdata);
        self.pos = end;
        Ok(())
    }

    fn skip(&mut self, amount: u64) -> io::Result<()> {
        let end = self.pos + amount as usize;
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.pos = end;
        Ok(())
    }
}

impl AtomBytes for MemWriter {
    fn pos(&self) -> u64 {
        self.pos as u64
    }
    fn seek(&mut self, pos: u64) -> io::Result<()> {
        if pos as usize > self.data.len() {
            return Err(io::Error::new(ErrorKind::UnexpectedEof, "seek past end of buffer"));
        }
        self.pos = pos as usize;
        Ok(())
    }
    fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Count bytes, don't actually write.
#[derive(Debug, Default)]
pub struct CountBytes {
    pos: usize,
    max: usize,
}

impl CountBytes {
    pub fn new() -> CountBytes {
        CountBytes::default()
    }
}

impl WriteBytes for CountBytes {
    fn write(&mut self, newdata: &[u8]) -> io::Result<()> {
        self.pos += newdata.len();
        if self.max < self.pos {
            self.max = self.pos;
        }
        Ok(())
    }

    fn skip(&mut self, amount: u64) -> io::Result<()> {
        self.pos += amount as usize;
        if self.max < self.pos {
            self.max = self.pos;
        }
        Ok(())
    }
}

impl AtomBytes for CountBytes {
    fn pos(&self) -> u64 {
        self.pos as u64
    }
    fn seek(&mut self, pos: u64) -> io::Result<()> {
        self.pos = pos as usize;
        Ok(())
    }
    fn size(&self) -> u64 {
        self.max as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serialize::ToBytes;

    #[test]
    fn memwriter_backpatch() {
        let mut w = MemWriter::new();
        0u32.to_bytes(&mut w).unwrap();
        w.write(b"abcd").unwrap();
        let end = w.pos();
        w.seek(0).unwrap();
        8u32.to_bytes(&mut w).unwrap();
        w.seek(end).unwrap();
        assert_eq!(w.into_vec(), vec![0, 0, 0, 8, b'a', b'b', b'c', b'd']);
    }

    #[test]
    fn countbytes() {
        let mut c = CountBytes::new();
        c.write(b"abcdef").unwrap();
        c.skip(10).unwrap();
        assert_eq!(c.size(), 16);
    }
}
