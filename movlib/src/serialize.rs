//! Basic serializer / deserializer.
//!
//! The FromBytes/ToBytes traits and the def_struct! macro are defined here.
//!
//! It also contains the FromBytes/ToBytes implementations for the
//! primitive types, and the sized-array wrappers used by records
//! that are prefixed with an element count on the wire.
//!
use std::convert::TryInto;
use std::io::{self, ErrorKind::UnexpectedEof};

use auto_impl::auto_impl;

use crate::types::FourCC;

/// Byte reader in a stream.
#[auto_impl(&mut)]
pub trait ReadBytes: AtomBytes {
    /// Read an exact number of bytes, return a reference to the buffer.
    fn read(&mut self, amount: u64) -> io::Result<&[u8]>;
    /// Look ahead without advancing the stream.
    fn peek(&mut self, amount: u64) -> io::Result<&[u8]>;
    /// Skip some bytes in the input.
    fn skip(&mut self, amount: u64) -> io::Result<()>;
    /// How much data is left?
    fn left(&self) -> u64;
}

/// Byte writer in a stream.
#[auto_impl(&mut)]
pub trait WriteBytes: AtomBytes {
    /// Write an exact number of bytes.
    fn write(&mut self, data: &[u8]) -> io::Result<()>;
    /// Zero-fill some bytes in the output.
    fn skip(&mut self, amount: u64) -> io::Result<()>;
}

/// A bunch of optional methods for reading/writing atoms rather than
/// simple records. All the methods have defaults.
#[auto_impl(&mut)]
pub trait AtomBytes {
    /// Get current position in the stream.
    fn pos(&self) -> u64 {
        unimplemented!()
    }
    /// Seek to a position in the stream.
    fn seek(&mut self, _pos: u64) -> io::Result<()> {
        unimplemented!()
    }
    /// Size of the stream.
    fn size(&self) -> u64 {
        unimplemented!()
    }
    /// Get version metadata of the enclosing full atom.
    fn version(&self) -> u8 {
        0
    }
    /// Get flags metadata of the enclosing full atom.
    fn flags(&self) -> u32 {
        0
    }
    /// Get last FourCC we read.
    fn fourcc(&self) -> FourCC {
        unimplemented!()
    }
    /// Get a reference to `size` bytes of source data at the current
    /// position, without advancing the stream.
    fn data_ref(&self, _size: u64) -> io::Result<crate::io::DataRef> {
        Err(crate::ioerr!(InvalidInput, "data_ref not supported on this stream"))
    }
}

/// Implementation of ReadBytes on a byte slice.
impl ReadBytes for &[u8] {
    fn read(&mut self, amount: u64) -> io::Result<&[u8]> {
        let mut amount = amount as usize;
        if amount > self.len() {
            return Ok(&b""[..]);
        }
        if amount == 0 {
            amount = self.len();
        }
        let res = &self[0..amount];
        (*self) = &self[amount..];
        Ok(res)
    }

    fn peek(&mut self, amount: u64) -> io::Result<&[u8]> {
        let amount = std::cmp::min(amount as usize, self.len());
        Ok(&self[..amount])
    }

    fn skip(&mut self, amount: u64) -> io::Result<()> {
        let amount = std::cmp::min(amount as usize, self.len());
        (*self) = &self[amount..];
        Ok(())
    }

    #[inline]
    fn left(&self) -> u64 {
        self.len() as u64
    }
}

// Uses defaults, except for `size` and `data_ref` which we do know.
impl AtomBytes for &[u8] {
    // The slice shrinks as we read, so the position is always 0 and
    // `size` is what is left.
    fn pos(&self) -> u64 {
        0
    }
    fn size(&self) -> u64 {
        self.len() as u64
    }
    fn data_ref(&self, size: u64) -> io::Result<crate::io::DataRef> {
        if size > self.len() as u64 {
            return Err(crate::ioerr!(UnexpectedEof, "data_ref past end of slice"));
        }
        Ok(crate::io::DataRef::from_vec(self[..size as usize].to_vec()))
    }
}

impl<'a, B: ?Sized + ReadBytes + 'a> ReadBytes for Box<B> {
    fn read(&mut self, amount: u64) -> io::Result<&[u8]> {
        B::read(&mut *self, amount)
    }
    fn peek(&mut self, amount: u64) -> io::Result<&[u8]> {
        B::peek(&mut *self, amount)
    }
    fn skip(&mut self, amount: u64) -> io::Result<()> {
        B::skip(&mut *self, amount)
    }
    fn left(&self) -> u64 {
        B::left(&*self)
    }
}

impl<'a, B: ?Sized + WriteBytes + 'a> WriteBytes for Box<B> {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        B::write(&mut *self, data)
    }
    fn skip(&mut self, amount: u64) -> io::Result<()> {
        B::skip(&mut *self, amount)
    }
}

impl<'a, B: ?Sized + AtomBytes + 'a> AtomBytes for Box<B> {
    fn pos(&self) -> u64 {
        B::pos(&*self)
    }
    fn seek(&mut self, pos: u64) -> io::Result<()> {
        B::seek(&mut *self, pos)
    }
    fn size(&self) -> u64 {
        B::size(&*self)
    }
    fn version(&self) -> u8 {
        B::version(&*self)
    }
    fn flags(&self) -> u32 {
        B::flags(&*self)
    }
    fn fourcc(&self) -> FourCC {
        B::fourcc(&*self)
    }
    fn data_ref(&self, size: u64) -> io::Result<crate::io::DataRef> {
        B::data_ref(&*self, size)
    }
}

/// Trait to deserialize a type.
pub trait FromBytes {
    fn from_bytes<R: ReadBytes>(bytes: &mut R) -> io::Result<Self>
    where
        Self: Sized;
    fn min_size() -> usize;
}

/// Trait to serialize a type.
pub trait ToBytes {
    fn to_bytes<W: WriteBytes>(&self, bytes: &mut W) -> io::Result<()>;
}

// Convenience macro to implement FromBytes/ToBytes for numeric types.
macro_rules! def_from_to_bytes {
    ($type:ident) => {
        impl FromBytes for $type {
            fn from_bytes<R: ReadBytes>(bytes: &mut R) -> io::Result<Self> {
                let sz = std::mem::size_of::<$type>();
                let data = bytes.read(sz as u64)?;
                let data = data.try_into().map_err(|_| UnexpectedEof)?;
                Ok($type::from_be_bytes(data))
            }
            fn min_size() -> usize {
                std::mem::size_of::<$type>()
            }
        }
        impl ToBytes for $type {
            fn to_bytes<W: WriteBytes>(&self, bytes: &mut W) -> io::Result<()> {
                bytes.write(&self.to_be_bytes()[..])
            }
        }
    };
}

def_from_to_bytes!(u8);
def_from_to_bytes!(i8);
def_from_to_bytes!(u16);
def_from_to_bytes!(i16);
def_from_to_bytes!(u32);
def_from_to_bytes!(i32);
def_from_to_bytes!(u64);
def_from_to_bytes!(i64);
def_from_to_bytes!(u128);
def_from_to_bytes!(f64);

/// Generic implementation for Vec<T>: read until the end of the stream.
impl<T> FromBytes for Vec<T>
where
    T: FromBytes,
{
    fn from_bytes<R: ReadBytes>(stream: &mut R) -> io::Result<Self> {
        let mut v = Vec::new();
        let min_size = T::min_size() as u64;
        while stream.left() >= min_size && stream.left() > 0 {
            v.push(T::from_bytes(stream)?);
        }
        Ok(v)
    }
    fn min_size() -> usize {
        0
    }
}

impl<T> ToBytes for Vec<T>
where
    T: ToBytes,
{
    fn to_bytes<W: WriteBytes>(&self, stream: &mut W) -> io::Result<()> {
        for elem in self {
            elem.to_bytes(stream)?;
        }
        Ok(())
    }
}

// Convenience macro to define the count-prefixed array wrappers.
macro_rules! def_sized_array {
    ($name:ident, $count:ident) => {
        /// Array with an element count on the wire.
        #[derive(Clone, Default)]
        pub struct $name<T>(pub Vec<T>);

        impl<T> $name<T> {
            pub fn new() -> $name<T> {
                $name(Vec::new())
            }
            pub fn push(&mut self, elem: T) {
                self.0.push(elem)
            }
        }

        impl<T> std::ops::Deref for $name<T> {
            type Target = Vec<T>;
            fn deref(&self) -> &Vec<T> {
                &self.0
            }
        }

        impl<T> std::ops::DerefMut for $name<T> {
            fn deref_mut(&mut self) -> &mut Vec<T> {
                &mut self.0
            }
        }

        impl<T: FromBytes> FromBytes for $name<T> {
            fn from_bytes<R: ReadBytes>(stream: &mut R) -> io::Result<Self> {
                let count = $count::from_bytes(stream)? as usize;
                let min_size = T::min_size() as u64;
                let mut v = Vec::new();
                while v.len() < count && stream.left() >= min_size {
                    v.push(T::from_bytes(stream)?);
                }
                Ok($name(v))
            }
            fn min_size() -> usize {
                std::mem::size_of::<$count>()
            }
        }

        impl<T: ToBytes> ToBytes for $name<T> {
            fn to_bytes<W: WriteBytes>(&self, stream: &mut W) -> io::Result<()> {
                (self.0.len() as $count).to_bytes(stream)?;
                for elem in &self.0 {
                    elem.to_bytes(stream)?;
                }
                Ok(())
            }
        }

        impl<T: std::fmt::Debug> std::fmt::Debug for $name<T> {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                if self.0.len() > 8 {
                    write!(f, "[{} entries]", self.0.len())
                } else {
                    std::fmt::Debug::fmt(&self.0, f)
                }
            }
        }

        impl<'a, T> IntoIterator for &'a $name<T> {
            type Item = &'a T;
            type IntoIter = std::slice::Iter<'a, T>;
            fn into_iter(self) -> Self::IntoIter {
                self.0.iter()
            }
        }
    };
}

def_sized_array!(ArraySized16, u16);
def_sized_array!(ArraySized32, u32);

/// A macro to define a record and implement the FromBytes/ToBytes traits for it.
///
/// Usage:
///
/// ```text
/// def_struct! { Name,
///     field1:     u32,        // primitive type
///     field3:     Time,       // struct that also implements FromBytes/ToBytes
///     skip:       8,          // skip 8 bytes here while serializing / deserializing.
///     ....
/// }
/// ```
#[macro_export]
macro_rules! def_struct {
    // minimum size for a certain type. we hard-code u* here.
    (@min_size u8) => { 1 };
    (@min_size u16) => { 2 };
    (@min_size i16) => { 2 };
    (@min_size u32) => { 4 };
    (@min_size i32) => { 4 };
    (@min_size u64) => { 8 };
    (@min_size i64) => { 8 };
    (@min_size u128) => { 16 };
    (@min_size [ $type:ty, sized ]) => { 4 };
    (@min_size [ $type:ty, sized16 ]) => { 2 };
    (@min_size [ $_type:ty ]) => { 0 };
    (@min_size $type:ident) => {
        $type::min_size()
    };
    (@min_size $amount:expr) => { $amount };

    // @def_struct: Define a struct line by line using accumulation and recursion.
    (@def_struct $(#[$outer:meta])* $name:ident, $( $field:tt: $type:tt $(as $as:tt)? ),* $(,)?) => {
        def_struct!(@def_struct_ [$(#[$outer])* $name], [ $( $field: $type $(as $as)?, )* ] -> []);
    };
    // During definition of the struct, we skip all the "skip" definitions.
    (@def_struct_ $info:tt, [ skip: $amount:tt, $($tt:tt)*] -> [ $($res:tt)* ]) => {
        def_struct!(@def_struct_ $info, [$($tt)*] -> [ $($res)* ]);
    };
    // Add normal field (as).
    (@def_struct_ $info:tt, [ $field:ident: $_type:ident as $type:ident, $($tt:tt)*] -> [ $($res:tt)* ]) => {
        def_struct!(@def_struct_ $info, [$($tt)*] -> [ $($res)* pub $field: $type, ]);
    };
    // Add normal field (ArraySized16)
    (@def_struct_ $info:tt, [ $field:ident: [ $type:ty, sized16 ], $($tt:tt)*] -> [ $($res:tt)* ]) => {
        def_struct!(@def_struct_ $info, [$($tt)*] -> [ $($res)* pub $field: $crate::serialize::ArraySized16<$type>, ]);
    };
    // Add normal field (ArraySized32)
    (@def_struct_ $info:tt, [ $field:ident: [ $type:ty, sized ], $($tt:tt)*] -> [ $($res:tt)* ]) => {
        def_struct!(@def_struct_ $info, [$($tt)*] -> [ $($res)* pub $field: $crate::serialize::ArraySized32<$type>, ]);
    };
    // Add normal field (Vec)
    (@def_struct_ $info:tt, [ $field:ident: [ $type:ty ], $($tt:tt)*] -> [ $($res:tt)* ]) => {
        def_struct!(@def_struct_ $info, [$($tt)*] -> [ $($res)* pub $field: Vec<$type>, ]);
    };
    // Add normal field.
    (@def_struct_ $info:tt, [ $field:ident: $type:ident, $($tt:tt)*] -> [ $($res:tt)* ]) => {
        def_struct!(@def_struct_ $info, [$($tt)*] -> [ $($res)* pub $field: $type, ]);
    };
    // Final.
    (@def_struct_ [$(#[$outer:meta])* $name:ident], [] -> [ $($res:tt)* ]) => {
        $(#[$outer])*
        pub struct $name { $(
            $res
        )* }
    };

    // @from_bytes: Generate the from_bytes details for a struct.
    (@from_bytes $name:ident, $base:tt, $stream:tt, $( $field:tt: $type:tt $(as $as:tt)? ),* $(,)?) => {
        def_struct!(@from_bytes_ $name, $base, $stream, [ $( $field: $type $(as $as)?, )* ] -> [] [])
    };
    // Insert a skip instruction.
    (@from_bytes_ $name:ident, $base:tt, $stream:ident, [ skip: $amount:tt, $($tt:tt)*]
        -> [ $($set:tt)* ] [ $($fields:tt)* ] ) => {
        def_struct!(@from_bytes_ $name, $base, $stream, [ $($tt)* ] ->
            [ $($set)* [ $stream.skip($amount)?; ] ] [$($fields)*])
    };
    // Set a field (as)
    (@from_bytes_ $name:ident, $base:tt, $stream:ident, [ $field:tt: $in:tt as $out:tt, $($tt:tt)*]
        -> [ $($set:tt)* ] [ $($fields:tt)* ]) => {
        def_struct!(@from_bytes_ $name, $base, $stream, [ $($tt)* ] ->
            [ $($set)* [ let $field: $out = $in::from_bytes($stream)?.into(); ] ] [ $($fields)* $field ])
    };
    // Set a field (ArraySized16)
    (@from_bytes_ $name:ident, $base:tt, $stream:ident, [ $field:tt: [ $type:ty, sized16 ], $($tt:tt)*]
        -> [ $($set:tt)* ] [ $($fields:tt)* ]) => {
        def_struct!(@from_bytes_ $name, $base, $stream, [ $($tt)* ] ->
            [ $($set)* [ let $field = $crate::serialize::ArraySized16::<$type>::from_bytes($stream)?; ] ] [ $($fields)* $field ])
    };
    // Set a field (ArraySized32)
    (@from_bytes_ $name:ident, $base:tt, $stream:ident, [ $field:tt: [ $type:ty, sized ], $($tt:tt)*]
        -> [ $($set:tt)* ] [ $($fields:tt)* ]) => {
        def_struct!(@from_bytes_ $name, $base, $stream, [ $($tt)* ] ->
            [ $($set)* [ let $field = $crate::serialize::ArraySized32::<$type>::from_bytes($stream)?; ] ] [ $($fields)* $field ])
    };
    // Set a field (Vec)
    (@from_bytes_ $name:ident, $base:tt, $stream:ident, [ $field:tt: [ $type:ty ], $($tt:tt)*]
        -> [ $($set:tt)* ] [ $($fields:tt)* ]) => {
        def_struct!(@from_bytes_ $name, $base, $stream, [ $($tt)* ] ->
            [ $($set)* [ let $field = Vec::<$type>::from_bytes($stream)?; ] ] [ $($fields)* $field ])
    };
    // Set a field.
    (@from_bytes_ $name:ident, $base:tt, $stream:ident, [ $field:tt: $type:tt, $($tt:tt)*]
        -> [ $($set:tt)* ] [ $($fields:tt)* ]) => {
        def_struct!(@from_bytes_ $name, $base, $stream, [ $($tt)* ] ->
            [ $($set)* [ let $field = $type::from_bytes($stream)?; ] ] [ $($fields)* $field ])
    };
    // Final.
    (@from_bytes_ $name:ident, [ $($base:tt)* ], $_stream:tt, [] -> [ $([$($set:tt)*])* ] [ $($field:tt)* ]) => {
        Ok({
        $(
            $($set)*
        )*
        $name {
            $($base)*
            $(
                $field,
            )*
        } })
    };

    // @to_bytes: Generate the to_bytes details for a struct.
    (@to_bytes $struct:expr, $stream:ident, $( $field:tt: $type:tt $(as $as:tt)? ),* $(,)?) => {
        {
            $(
                def_struct!(@to_bytes_ $struct, $stream, $field: $type $(as $as)?);
            )*
            Ok(())
        }
    };
    // Insert a skip instruction.
    (@to_bytes_ $struct:expr, $stream:ident, skip: $amount:tt) => {
        $stream.skip($amount)?;
    };
    // Write a field value (as)
    (@to_bytes_ $struct:expr, $stream:ident, $field:tt: $type:tt as $_type:tt) => {
        $type::from($struct.$field).to_bytes($stream)?;
    };
    // Write a field value.
    (@to_bytes_ $struct:expr, $stream:ident, $field:tt: $type:tt) => {
        $struct.$field.to_bytes($stream)?;
    };

    // Helper.
    (@filter_skip skip, $($tt:tt)*) => {};
    (@filter_skip $field:ident, $($tt:tt)*) => { $($tt)* };

    // Main entry point to define just one struct.
    ($(#[$outer:meta])* $name:ident, $($field:tt: $type:tt $(as $as:tt)?),* $(,)?) => {
        def_struct!(@def_struct $(#[$outer])* $name,
            $(
                $field: $type $(as $as)?,
            )*
        );

        // Debug implementation that skips "skip"
        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                let mut dbg = f.debug_struct(stringify!($name));
                $(
                    def_struct!(@filter_skip $field, dbg.field(stringify!($field), &self.$field););
                )*
                dbg.finish()
            }
        }

        impl $crate::serialize::FromBytes for $name {
            fn from_bytes<R: $crate::serialize::ReadBytes>(stream: &mut R) -> std::io::Result<Self> {
                def_struct!(@from_bytes $name, [], stream, $(
                    $field: $type $(as $as)?,
                )*)
            }

            fn min_size() -> usize {
                $( def_struct!(@min_size $type) +)* 0
            }
        }

        impl $crate::serialize::ToBytes for $name {
            fn to_bytes<W: $crate::serialize::WriteBytes>(&self, stream: &mut W) -> std::io::Result<()> {
                def_struct!(@to_bytes self, stream, $(
                    $field: $type $(as $as)?,
                )*)
            }
        }
    }
}
