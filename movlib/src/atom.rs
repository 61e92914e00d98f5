//! Classic atom framing.
//!
//! Every atom in a movie file starts with a 32 bit size and a FourCC
//! type. A size of 1 means a 64 bit size follows, a size of 0 means
//! "to end of file". Full atoms carry an extra version byte and 24
//! bits of flags; records that need those read them through
//! `AtomReader::read_version_flags`.
//!
use std::fmt::Debug;
use std::io;

use crate::io::DataRef;
use crate::serialize::{AtomBytes, FromBytes, ReadBytes, ToBytes, WriteBytes};
use crate::types::FourCC;

/// Parsed atom header: the FourCC plus the payload size.
#[derive(Debug, Clone)]
pub struct AtomHeader {
    pub size:    u64,
    pub fourcc:  FourCC,
    pub version: Option<u8>,
    pub flags:   u32,
}

impl AtomHeader {
    pub fn read(stream: &mut impl ReadBytes) -> io::Result<AtomHeader> {
        let size1 = u32::from_bytes(stream)?;
        let fourcc = FourCC::from_bytes(stream)?;
        let size = match size1 {
            0 => stream.size() - stream.pos(),
            1 => u64::from_bytes(stream)?.saturating_sub(16),
            x => x.saturating_sub(8) as u64,
        };
        Ok(AtomHeader {
            size,
            fourcc,
            version: None,
            flags: 0,
        })
    }

    pub fn peek(stream: &mut impl ReadBytes) -> io::Result<AtomHeader> {
        let size = std::cmp::min(stream.left(), 16);
        let mut data = stream.peek(size)?;
        AtomHeader::read(&mut data)
    }
}

/// Limited reader that reads no further than the atom size.
pub struct AtomReader<'a> {
    pub header: AtomHeader,
    maxsize:    u64,
    pos:        u64,
    inner:      &'a mut dyn ReadBytes,
}

impl<'a> AtomReader<'a> {
    /// Read the atom header, then return a size-limited reader.
    pub fn new(stream: &'a mut impl ReadBytes) -> io::Result<AtomReader<'a>> {
        let header = AtomHeader::read(stream)?;
        let maxsize = std::cmp::min(stream.size(), stream.pos() + header.size);
        log::trace!("AtomReader: header {:?} maxsize {}", header, maxsize);
        Ok(AtomReader {
            header,
            maxsize,
            pos: stream.pos(),
            inner: stream,
        })
    }

    /// Read the version byte and 24 bit flags of a full atom.
    pub fn read_version_flags(&mut self) -> io::Result<(u8, u32)> {
        let version = u8::from_bytes(self)?;
        let data = self.read(3)?;
        let mut buf = [0u8; 4];
        (&mut buf[1..]).copy_from_slice(data);
        let flags = u32::from_be_bytes(buf);
        self.header.version = Some(version);
        self.header.flags = flags;
        Ok((version, flags))
    }
}

impl Drop for AtomReader<'_> {
    fn drop(&mut self) {
        if self.pos < self.maxsize {
            log::trace!(
                "AtomReader {} drop: skipping {}",
                self.header.fourcc,
                self.maxsize - self.pos
            );
            let _ = ReadBytes::skip(self, self.maxsize - self.pos);
        }
    }
}

// Delegate ReadBytes to the inner reader.
impl ReadBytes for AtomReader<'_> {
    #[inline]
    fn read(&mut self, amount: u64) -> io::Result<&[u8]> {
        if self.pos + amount > self.maxsize {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        let res = self.inner.read(amount)?;
        self.pos += amount;
        Ok(res)
    }
    #[inline]
    fn peek(&mut self, amount: u64) -> io::Result<&[u8]> {
        if self.pos + amount > self.maxsize {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        self.inner.peek(amount)
    }
    #[inline]
    fn skip(&mut self, amount: u64) -> io::Result<()> {
        if self.pos + amount > self.maxsize {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        self.inner.skip(amount)?;
        self.pos += amount;
        Ok(())
    }
    #[inline]
    fn left(&self) -> u64 {
        if self.pos > self.maxsize {
            0
        } else {
            self.maxsize - self.pos
        }
    }
}

// Delegate AtomBytes to the inner reader.
impl AtomBytes for AtomReader<'_> {
    #[inline]
    fn pos(&self) -> u64 {
        self.pos
    }
    #[inline]
    fn seek(&mut self, pos: u64) -> io::Result<()> {
        if pos > self.maxsize {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        self.inner.seek(pos)?;
        self.pos = pos;
        Ok(())
    }
    #[inline]
    fn size(&self) -> u64 {
        self.maxsize
    }
    fn version(&self) -> u8 {
        self.header.version.unwrap_or(0)
    }
    fn flags(&self) -> u32 {
        self.header.flags
    }
    fn fourcc(&self) -> FourCC {
        self.header.fourcc
    }
    fn data_ref(&self, size: u64) -> io::Result<DataRef> {
        self.inner.data_ref(size)
    }
}

/// Writes the atom header, back-patching the size on finalize.
pub struct AtomWriter<'a> {
    offset:    u64,
    fourcc:    FourCC,
    finalized: bool,
    inner:     Box<dyn WriteBytes + 'a>,
}

impl<'a> AtomWriter<'a> {
    /// Write a provisional atom header, then return a new stream. When
    /// the stream is finalized, the atom header is updated.
    pub fn new(stream: &'a mut impl WriteBytes, fourcc: FourCC) -> io::Result<AtomWriter<'a>> {
        let offset = stream.pos();
        0u32.to_bytes(stream)?;
        fourcc.to_bytes(stream)?;
        Ok(AtomWriter {
            offset,
            fourcc,
            finalized: false,
            inner: Box::new(stream),
        })
    }

    /// Like `new`, but also writes the version/flags of a full atom.
    pub fn new_full(
        stream: &'a mut impl WriteBytes,
        fourcc: FourCC,
        version: u8,
        flags: u32,
    ) -> io::Result<AtomWriter<'a>> {
        let mut writer = AtomWriter::new(stream, fourcc)?;
        let vflags = (version as u32) << 24 | (flags & 0x00ff_ffff);
        vflags.to_bytes(&mut writer)?;
        Ok(writer)
    }

    /// Finalize the atom: seek back to the header and write the size.
    ///
    /// If you don't call this explicitly, it is done automatically when
    /// the AtomWriter is dropped. Any I/O errors will result in panics.
    pub fn finalize(&mut self) -> io::Result<()> {
        self.finalized = true;
        let pos = self.inner.pos();
        self.inner.seek(self.offset)?;
        let sz = (pos - self.offset) as u32;
        sz.to_bytes(&mut self.inner)?;
        self.inner.seek(pos)?;
        Ok(())
    }
}

impl<'a> Drop for AtomWriter<'a> {
    fn drop(&mut self) {
        if !self.finalized {
            self.finalize().unwrap();
        }
    }
}

// Delegate WriteBytes to the inner writer.
impl<'a> WriteBytes for AtomWriter<'a> {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.inner.write(data)
    }
    fn skip(&mut self, amount: u64) -> io::Result<()> {
        self.inner.skip(amount)
    }
}

// Delegate AtomBytes to the inner writer.
impl<'a> AtomBytes for AtomWriter<'a> {
    fn pos(&self) -> u64 {
        self.inner.pos()
    }
    fn seek(&mut self, pos: u64) -> io::Result<()> {
        self.inner.seek(pos)
    }
    fn size(&self) -> u64 {
        self.inner.size()
    }
    fn fourcc(&self) -> FourCC {
        self.fourcc
    }
}

/// Any unknown atoms we encounter are put into a GenericAtom.
#[derive(Clone)]
pub struct GenericAtom {
    fourcc:   FourCC,
    data:     Option<Vec<u8>>,
    data_ref: Option<DataRef>,
    size:     u64,
}

impl GenericAtom {
    pub fn new(fourcc: FourCC, data: Vec<u8>) -> GenericAtom {
        let size = data.len() as u64;
        GenericAtom {
            fourcc,
            data: Some(data),
            data_ref: None,
            size,
        }
    }

    pub fn fourcc(&self) -> FourCC {
        self.fourcc
    }

    /// The payload, without the atom header.
    pub fn data(&self) -> &[u8] {
        if let Some(ref data) = self.data {
            return &data[..];
        }
        if let Some(ref data_ref) = self.data_ref {
            return &data_ref[..];
        }
        &[]
    }
}

impl PartialEq for GenericAtom {
    fn eq(&self, other: &GenericAtom) -> bool {
        self.fourcc == other.fourcc && self.data() == other.data()
    }
}

impl FromBytes for GenericAtom {
    fn from_bytes<R: ReadBytes>(stream: &mut R) -> io::Result<GenericAtom> {
        let mut reader = AtomReader::new(stream)?;
        let stream = &mut reader;

        let size = stream.left();
        let mut data = None;
        let mut data_ref = None;
        if size == 0 {
            data = Some(vec![]);
        } else if size < 65536 {
            data = Some(stream.read(size)?.to_vec());
        } else {
            data_ref = Some(DataRef::from_bytes(stream, size)?);
        }
        Ok(GenericAtom {
            fourcc: stream.fourcc(),
            data,
            data_ref,
            size,
        })
    }
    fn min_size() -> usize {
        8
    }
}

impl ToBytes for GenericAtom {
    fn to_bytes<W: WriteBytes>(&self, stream: &mut W) -> io::Result<()> {
        let mut writer = AtomWriter::new(stream, self.fourcc)?;
        if let Some(ref data) = self.data {
            writer.write(data)?;
        }
        if let Some(ref data_ref) = self.data_ref {
            data_ref.to_bytes(&mut writer)?;
        }
        writer.finalize()
    }
}

impl Debug for GenericAtom {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let mut dbg = f.debug_struct("GenericAtom");
        dbg.field("fourcc", &self.fourcc);
        dbg.field("data", &format!("[u8; {}]", self.size));
        dbg.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemWriter;

    #[test]
    fn header_roundtrip() {
        let mut w = MemWriter::new();
        {
            let mut atom = AtomWriter::new(&mut w, FourCC::new(b"test")).unwrap();
            atom.write(b"payload").unwrap();
            atom.finalize().unwrap();
        }
        let buf = w.into_vec();
        assert_eq!(buf.len(), 15);
        assert_eq!(&buf[..4], &[0, 0, 0, 15]);

        let mut rd = &buf[..];
        let header = AtomHeader::read(&mut rd).unwrap();
        assert_eq!(header.fourcc, FourCC::new(b"test"));
        assert_eq!(header.size, 7);
    }

    #[test]
    fn full_atom_version_flags() {
        let mut w = MemWriter::new();
        {
            let mut atom = AtomWriter::new_full(&mut w, FourCC::new(b"full"), 1, 7).unwrap();
            atom.write(b"x").unwrap();
        }
        let buf = w.into_vec();
        let mut rd = &buf[..];
        let mut reader = AtomReader::new(&mut rd).unwrap();
        let (version, flags) = reader.read_version_flags().unwrap();
        assert_eq!(version, 1);
        assert_eq!(flags, 7);
        assert_eq!(reader.left(), 1);
    }

    #[test]
    fn reader_skips_unread_payload_on_drop() {
        let mut w = MemWriter::new();
        {
            let mut atom = AtomWriter::new(&mut w, FourCC::new(b"one ")).unwrap();
            atom.write(b"0123456789").unwrap();
        }
        {
            let mut atom = AtomWriter::new(&mut w, FourCC::new(b"two ")).unwrap();
            atom.write(b"ab").unwrap();
        }
        let buf = w.into_vec();
        let mut rd = &buf[..];
        {
            let reader = AtomReader::new(&mut rd).unwrap();
            assert_eq!(reader.header.fourcc, FourCC::new(b"one "));
            // drop without reading the payload
        }
        let reader = AtomReader::new(&mut rd).unwrap();
        assert_eq!(reader.header.fourcc, FourCC::new(b"two "));
    }
}
