//! Common types used throughout the movie toolbox.
//!
//! This module contains the fundamental scalar types (FourCC, Time,
//! TimeRecord, fixed-point numbers, language codes) that appear in
//! atoms and in the movie/track/media model.
//!
use std::io;
use std::time::SystemTime;

use chrono::offset::{Local, TimeZone};

use crate::serialize::{FromBytes, ReadBytes, ToBytes, WriteBytes};

/// A time value expressed in some time scale.
pub type TimeValue = i32;
/// A 64 bit time value expressed in some time scale.
pub type TimeValue64 = i64;
/// Units per second.
pub type TimeScale = u32;

/// A time value paired with the scale it is expressed in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TimeRecord {
    pub value: TimeValue64,
    pub scale: TimeScale,
}

impl TimeRecord {
    pub fn new(value: TimeValue64, scale: TimeScale) -> TimeRecord {
        TimeRecord { value, scale }
    }

    /// Value of this record in seconds.
    pub fn as_secs_f64(&self) -> f64 {
        if self.scale == 0 {
            return 0f64;
        }
        self.value as f64 / self.scale as f64
    }
}

// Convenience macro to implement FromBytes/ToBytes for newtypes.
macro_rules! def_from_to_bytes_newtype {
    ($newtype:ident, $type:ident) => {
        impl FromBytes for $newtype {
            fn from_bytes<R: ReadBytes>(bytes: &mut R) -> io::Result<Self> {
                Ok($newtype($type::from_bytes(bytes)?))
            }
            fn min_size() -> usize {
                $type::min_size()
            }
        }
        impl ToBytes for $newtype {
            fn to_bytes<W: WriteBytes>(&self, bytes: &mut W) -> io::Result<()> {
                self.0.to_bytes(bytes)
            }
        }
    };
}

/// FourCC is the 4-byte name of an atom, a data format, or a key
/// namespace. Usually four bytes of ASCII, but it could be anything.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FourCC(pub u32);
def_from_to_bytes_newtype!(FourCC, u32);

impl FourCC {
    pub const fn new(b: &[u8; 4]) -> FourCC {
        FourCC(u32::from_be_bytes(*b))
    }

    pub fn to_be_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }
}

fn fmt_fourcc(fourcc: u32) -> String {
    let c = fourcc.to_be_bytes();
    for i in 0..4 {
        // The classic user-data tags start with 0xa9 ('©').
        if (c[i] < 32 || c[i] > 126) && !(i == 0 && c[i] == 0xa9) {
            return format!("0x{:08x}", fourcc);
        }
    }
    let mut s = String::new();
    for &b in &c[..] {
        s.push(if b == 0xa9 { '©' } else { b as char });
    }
    s
}

impl std::fmt::Display for FourCC {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", fmt_fourcc(self.0))
    }
}

impl std::fmt::Debug for FourCC {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "\"{}\"", fmt_fourcc(self.0))
    }
}

/// Time is a 32 bit value, measured in seconds since 01-01-1904 00:00:00
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct Time(pub u32);
def_from_to_bytes_newtype!(Time, u32);

// TZ=UTC date +%s -d "1904-01-01 00:00:00"
const OFFSET_TO_UNIX: i64 = 2082844800;

impl Time {
    /// The current wall-clock time.
    pub fn now() -> Time {
        let unix = match SystemTime::now().duration_since(SystemTime::UNIX_EPOCH) {
            Ok(d) => d.as_secs() as i64,
            Err(_) => 0,
        };
        Time((unix + OFFSET_TO_UNIX) as u32)
    }

    pub fn to_unixtime(&self) -> i64 {
        (self.0 as i64) - OFFSET_TO_UNIX
    }

    fn to_rfc3339(&self) -> String {
        Local.timestamp(self.to_unixtime(), 0).to_rfc3339()
    }
}

impl std::fmt::Debug for Time {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self.to_rfc3339())
    }
}

/// 32 bit fixed point number, 16.16.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct Fixed16_16(pub u32);
def_from_to_bytes_newtype!(Fixed16_16, u32);

impl Fixed16_16 {
    /// 1.0
    pub const ONE: Fixed16_16 = Fixed16_16(0x0001_0000);

    pub fn from_f64(v: f64) -> Fixed16_16 {
        Fixed16_16((v * 65536f64) as i32 as u32)
    }

    pub fn as_f64(&self) -> f64 {
        self.0 as i32 as f64 / 65536f64
    }
}

impl std::fmt::Debug for Fixed16_16 {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.as_f64())
    }
}

/// Unsigned 32 bit fixed point number, 16.16. Used for audio sample
/// rates, which exceed the signed 16.16 range above 32767 Hz.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct UFixed16_16(pub u32);
def_from_to_bytes_newtype!(UFixed16_16, u32);

impl UFixed16_16 {
    /// 1.0
    pub const ONE: UFixed16_16 = UFixed16_16(0x0001_0000);

    pub fn from_f64(v: f64) -> UFixed16_16 {
        UFixed16_16((v * 65536f64) as u32)
    }

    pub fn as_f64(&self) -> f64 {
        self.0 as f64 / 65536f64
    }
}

impl std::fmt::Debug for UFixed16_16 {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.as_f64())
    }
}

/// 16 bit fixed point number, 8.8. Used for volume levels.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct Fixed8_8(pub u16);
def_from_to_bytes_newtype!(Fixed8_8, u16);

impl Fixed8_8 {
    /// 1.0 (full volume).
    pub const ONE: Fixed8_8 = Fixed8_8(0x0100);

    pub fn as_f64(&self) -> f64 {
        self.0 as f64 / 256f64
    }
}

impl std::fmt::Debug for Fixed8_8 {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.as_f64())
    }
}

/// Transformation matrix.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Matrix([[u32; 3]; 3]);

impl Matrix {
    pub fn identity() -> Matrix {
        Matrix([
            [0x0001_0000, 0, 0],
            [0, 0x0001_0000, 0],
            [0, 0, 0x4000_0000],
        ])
    }
}

impl Default for Matrix {
    fn default() -> Matrix {
        Matrix::identity()
    }
}

impl FromBytes for Matrix {
    fn from_bytes<R: ReadBytes>(bytes: &mut R) -> io::Result<Self> {
        let mut m = [[0u32; 3]; 3];
        for x in 0..3 {
            for y in 0..3 {
                m[x][y] = u32::from_bytes(bytes)?;
            }
        }
        Ok(Matrix(m))
    }
    fn min_size() -> usize {
        36
    }
}

impl ToBytes for Matrix {
    fn to_bytes<W: WriteBytes>(&self, bytes: &mut W) -> io::Result<()> {
        for x in 0..3 {
            for y in 0..3 {
                (self.0)[x][y].to_bytes(bytes)?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Matrix {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if *self == Matrix::identity() {
            return write!(f, "Matrix(identity)");
        }
        write!(
            f,
            "Matrix([{:x}][{:x}][{:x}] [{:x}][{:x}][{:x}] [{:x}][{:x}][{:x}])",
            (self.0)[0][0],
            (self.0)[0][1],
            (self.0)[0][2],
            (self.0)[1][0],
            (self.0)[1][1],
            (self.0)[1][2],
            (self.0)[2][0],
            (self.0)[2][1],
            (self.0)[2][2],
        )
    }
}

// Classic language codes, as stored in the media header. Codes >= 0x800
// are three 5-bit letters packed into 16 bits (an ISO-639-2T code).
const CLASSIC_LANGUAGES: &[(u16, &str)] = &[
    (0, "eng"),
    (1, "fra"),
    (2, "deu"),
    (3, "ita"),
    (4, "nld"),
    (5, "swe"),
    (6, "spa"),
    (7, "dan"),
    (8, "por"),
    (9, "nor"),
    (10, "heb"),
    (11, "jpn"),
    (12, "ara"),
    (13, "fin"),
    (14, "ell"),
    (23, "tur"),
    (24, "hrv"),
    (25, "zho"),
    (32, "rus"),
];

/// Language code as stored in the media header: either one of the
/// classic QuickTime codes, or a packed ISO-639-2T code.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct MacLanguage(pub u16);
def_from_to_bytes_newtype!(MacLanguage, u16);

impl MacLanguage {
    /// The "unspecified" language code.
    pub const UNSPECIFIED: MacLanguage = MacLanguage(32767);

    /// Build from an ISO-639-2T code such as "eng".
    pub fn from_iso639(code: &str) -> Option<MacLanguage> {
        let b = code.as_bytes();
        if b.len() != 3 {
            return None;
        }
        let mut v = 0u16;
        for i in 0..3 {
            if b[i] < b'a' || b[i] > b'z' {
                return None;
            }
            v = v << 5 | (b[i] - 0x60) as u16;
        }
        Some(MacLanguage(v))
    }

    /// The ISO-639-2T code, if we can map it.
    pub fn to_iso639(&self) -> Option<String> {
        if self.0 >= 0x800 && self.0 != Self::UNSPECIFIED.0 {
            let mut s = String::new();
            s.push((((self.0 >> 10) & 0x1f) as u8 + 0x60) as char);
            s.push((((self.0 >> 5) & 0x1f) as u8 + 0x60) as char);
            s.push(((self.0 & 0x1f) as u8 + 0x60) as char);
            return Some(s);
        }
        CLASSIC_LANGUAGES
            .iter()
            .find(|&&(code, _)| code == self.0)
            .map(|&(_, iso)| iso.to_string())
    }

    /// Human readable language name.
    pub fn name(&self) -> Option<&'static str> {
        let iso = self.to_iso639()?;
        isolang::Language::from_639_3(&iso).map(|l| l.to_name())
    }
}

impl std::fmt::Display for MacLanguage {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self.to_iso639() {
            Some(iso) => write!(f, "{}", iso),
            None => write!(f, "und"),
        }
    }
}

impl std::fmt::Debug for MacLanguage {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

/// Counted ("pascal") string: a length byte followed by the bytes.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct PString(pub String);

impl PString {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromBytes for PString {
    fn from_bytes<R: ReadBytes>(bytes: &mut R) -> io::Result<Self> {
        let len = u8::from_bytes(bytes)? as u64;
        let data = if len > 0 { bytes.read(len)? } else { &b""[..] };
        let mut s = String::new();
        for &b in data {
            // Treat as MacRoman-ish: pass ASCII through.
            s.push(if b < 128 { b as char } else { '?' });
        }
        Ok(PString(s))
    }
    fn min_size() -> usize {
        1
    }
}

impl ToBytes for PString {
    fn to_bytes<W: WriteBytes>(&self, bytes: &mut W) -> io::Result<()> {
        let len = std::cmp::min(self.0.len(), 255);
        (len as u8).to_bytes(bytes)?;
        let mut v = Vec::with_capacity(len);
        for c in self.0.chars().take(len) {
            v.push(if (c as u32) < 256 { c as u8 } else { b'?' });
        }
        bytes.write(&v)
    }
}

impl std::fmt::Debug for PString {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

def_struct! {
    /// 16-bit RGB color.
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    RgbColor,
        red:    u16,
        green:  u16,
        blue:   u16,
}

def_struct! {
    /// Classic rectangle, in (top, left, bottom, right) order.
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    Rect16,
        top:    i16,
        left:   i16,
        bottom: i16,
        right:  i16,
}

/// Track header flags.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackFlags(pub u32);

impl TrackFlags {
    fn get(&self, bit: u32) -> bool {
        (self.0 & bit) > 0
    }
    pub fn set(&mut self, bit: u32, on: bool) {
        if on {
            self.0 |= bit;
        } else {
            self.0 &= !bit;
        }
    }
    pub fn get_enabled(&self) -> bool {
        self.get(0x0001)
    }
    pub fn set_enabled(&mut self, on: bool) {
        self.set(0x0001, on)
    }
    pub fn get_in_movie(&self) -> bool {
        self.get(0x0002)
    }
    pub fn set_in_movie(&mut self, on: bool) {
        self.set(0x0002, on)
    }
    pub fn get_in_preview(&self) -> bool {
        self.get(0x0004)
    }
    pub fn set_in_preview(&mut self, on: bool) {
        self.set(0x0004, on)
    }
    pub fn get_in_poster(&self) -> bool {
        self.get(0x0008)
    }
    pub fn set_in_poster(&mut self, on: bool) {
        self.set(0x0008, on)
    }
}

impl std::fmt::Debug for TrackFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let mut v = vec!["["];
        if self.get_enabled() {
            v.push("enabled");
        }
        if self.get_in_movie() {
            v.push("in_movie");
        }
        if self.get_in_preview() {
            v.push("in_preview");
        }
        if self.get_in_poster() {
            v.push("in_poster");
        }
        v.push("]");
        write!(f, "TrackFlags({})", v.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fourcc_formatting() {
        assert_eq!(FourCC::new(b"moov").to_string(), "moov");
        assert_eq!(format!("{:?}", FourCC::new(b"trak")), "\"trak\"");
        assert_eq!(FourCC(1).to_string(), "0x00000001");
    }

    #[test]
    fn fourcc_userdata_tag() {
        let tag = FourCC::new(b"\xa9nam");
        assert_eq!(tag.to_string(), "©nam");
    }

    #[test]
    fn language_codes() {
        let l = MacLanguage::from_iso639("nld").unwrap();
        assert!(l.0 >= 0x800);
        assert_eq!(l.to_iso639().unwrap(), "nld");
        assert_eq!(MacLanguage(0).to_iso639().unwrap(), "eng");
        assert_eq!(MacLanguage::UNSPECIFIED.to_iso639(), None);
    }

    #[test]
    fn fixed_point() {
        assert_eq!(Fixed16_16::ONE.as_f64(), 1.0);
        assert_eq!(Fixed16_16::from_f64(-1.0).as_f64(), -1.0);
        assert_eq!(Fixed8_8::ONE.as_f64(), 1.0);
    }

    #[test]
    fn unsigned_fixed_point_covers_audio_rates() {
        assert_eq!(UFixed16_16::ONE.as_f64(), 1.0);
        // Above the signed 16.16 range.
        assert_eq!(UFixed16_16::from_f64(44100.0).as_f64(), 44100.0);
        assert_eq!(UFixed16_16::from_f64(48000.0).as_f64(), 48000.0);
    }

    #[test]
    fn track_flags() {
        let mut f = TrackFlags::default();
        f.set_enabled(true);
        f.set_in_movie(true);
        assert_eq!(f.0, 3);
        f.set_enabled(false);
        assert!(!f.get_enabled());
        assert!(f.get_in_movie());
    }
}
