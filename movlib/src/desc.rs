//! Sample descriptions.
//!
//! Every sample in a sample table refers to a sample description that
//! tells you how to interpret the sample data. On the wire a description
//! is a little atom of its own: 32 bit size, data format FourCC, six
//! reserved bytes, and a 16 bit data reference index, followed by a
//! format-specific body.
//!
//! Which body to expect depends on the kind of the enclosing media, and
//! for sound descriptions additionally on the version field. Unknown
//! formats are preserved byte-exactly.
//!
use std::fmt::Debug;
use std::io;

use crate::atom::{AtomReader, AtomWriter, GenericAtom};
use crate::serialize::{FromBytes, ReadBytes, ToBytes, WriteBytes};
use crate::types::{FourCC, PString, Rect16, RgbColor, UFixed16_16};

/// What kind of media a track holds, from the media handler FourCC.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaKind {
    Sound,
    Video,
    Text,
    Sprite,
    Flash,
    Music,
    ThreeDee,
    Timecode,
    Other(FourCC),
}

impl MediaKind {
    pub fn from_fourcc(fourcc: FourCC) -> MediaKind {
        match &fourcc.to_be_bytes() {
            b"soun" => MediaKind::Sound,
            b"vide" => MediaKind::Video,
            b"text" => MediaKind::Text,
            b"sprt" => MediaKind::Sprite,
            b"flsh" => MediaKind::Flash,
            b"musi" => MediaKind::Music,
            b"qd3d" => MediaKind::ThreeDee,
            b"tmcd" => MediaKind::Timecode,
            _ => MediaKind::Other(fourcc),
        }
    }

    pub fn fourcc(&self) -> FourCC {
        match self {
            MediaKind::Sound => FourCC::new(b"soun"),
            MediaKind::Video => FourCC::new(b"vide"),
            MediaKind::Text => FourCC::new(b"text"),
            MediaKind::Sprite => FourCC::new(b"sprt"),
            MediaKind::Flash => FourCC::new(b"flsh"),
            MediaKind::Music => FourCC::new(b"musi"),
            MediaKind::ThreeDee => FourCC::new(b"qd3d"),
            MediaKind::Timecode => FourCC::new(b"tmcd"),
            MediaKind::Other(fourcc) => *fourcc,
        }
    }
}

impl Default for MediaKind {
    fn default() -> MediaKind {
        MediaKind::Other(FourCC::default())
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let name = match self {
            MediaKind::Sound => "sound",
            MediaKind::Video => "video",
            MediaKind::Text => "text",
            MediaKind::Sprite => "sprite",
            MediaKind::Flash => "flash",
            MediaKind::Music => "music",
            MediaKind::ThreeDee => "3d",
            MediaKind::Timecode => "timecode",
            MediaKind::Other(fourcc) => return write!(f, "{}", fourcc),
        };
        write!(f, "{}", name)
    }
}

/// A sample description: the data format plus a format-specific body.
#[derive(Clone, Debug, PartialEq)]
pub struct SampleDescription {
    pub data_format: FourCC,
    pub body:        DescriptionBody,
}

/// Format-specific part of a sample description.
#[derive(Clone, Debug, PartialEq)]
pub enum DescriptionBody {
    Sound(SoundDescription),
    SoundV2(SoundDescriptionV2),
    Text(TextDescription),
    Sprite(SpriteDescription),
    Flash(FlashDescription),
    Music(MusicDescription),
    ThreeDee(ThreeDeeDescription),
    Generic(Vec<u8>),
}

impl SampleDescription {
    /// Read one description. The media kind selects the body layout.
    pub fn read(kind: MediaKind, stream: &mut impl ReadBytes) -> io::Result<SampleDescription> {
        let mut reader = AtomReader::new(stream)?;
        let data_format = reader.header.fourcc;
        let body = match kind {
            MediaKind::Sound => read_sound_body(&mut reader)?,
            MediaKind::Text => DescriptionBody::Text(TextDescription::from_bytes(&mut reader)?),
            MediaKind::Sprite => DescriptionBody::Sprite(SpriteDescription::from_bytes(&mut reader)?),
            MediaKind::Flash => DescriptionBody::Flash(FlashDescription::from_bytes(&mut reader)?),
            MediaKind::Music => DescriptionBody::Music(MusicDescription::from_bytes(&mut reader)?),
            MediaKind::ThreeDee => {
                DescriptionBody::ThreeDee(ThreeDeeDescription::from_bytes(&mut reader)?)
            },
            _ => {
                let size = reader.left();
                let data = if size > 0 { reader.read(size)?.to_vec() } else { Vec::new() };
                DescriptionBody::Generic(data)
            },
        };
        Ok(SampleDescription { data_format, body })
    }

    /// The number of audio channels, for sound descriptions.
    pub fn channel_count(&self) -> Option<u32> {
        match &self.body {
            DescriptionBody::Sound(s) => Some(s.num_channels as u32),
            DescriptionBody::SoundV2(s) => Some(s.num_audio_channels),
            _ => None,
        }
    }

    /// The audio sample rate in Hz, for sound descriptions.
    pub fn sample_rate(&self) -> Option<f64> {
        match &self.body {
            DescriptionBody::Sound(s) => Some(s.sample_rate.as_f64()),
            DescriptionBody::SoundV2(s) => Some(s.audio_sample_rate),
            _ => None,
        }
    }
}

impl ToBytes for SampleDescription {
    fn to_bytes<W: WriteBytes>(&self, stream: &mut W) -> io::Result<()> {
        let mut writer = AtomWriter::new(stream, self.data_format)?;
        match &self.body {
            DescriptionBody::Sound(s) => s.to_bytes(&mut writer)?,
            DescriptionBody::SoundV2(s) => s.to_bytes(&mut writer)?,
            DescriptionBody::Text(t) => t.to_bytes(&mut writer)?,
            DescriptionBody::Sprite(s) => s.to_bytes(&mut writer)?,
            DescriptionBody::Flash(f) => f.to_bytes(&mut writer)?,
            DescriptionBody::Music(m) => m.to_bytes(&mut writer)?,
            DescriptionBody::ThreeDee(t) => t.to_bytes(&mut writer)?,
            DescriptionBody::Generic(d) => writer.write(d)?,
        }
        writer.finalize()
    }
}

fn read_sound_body(reader: &mut AtomReader) -> io::Result<DescriptionBody> {
    reader.skip(6)?;
    let data_ref_index = u16::from_bytes(reader)?;
    let version = u16::from_bytes(reader)?;
    match version {
        0 | 1 => {
            let mut desc = SoundDescription {
                data_ref_index,
                revision: u16::from_bytes(reader)?,
                vendor: FourCC::from_bytes(reader)?,
                num_channels: u16::from_bytes(reader)?,
                sample_size: u16::from_bytes(reader)?,
                compression_id: i16::from_bytes(reader)?,
                packet_size: u16::from_bytes(reader)?,
                sample_rate: UFixed16_16::from_bytes(reader)?,
                v1: None,
                extensions: Vec::new(),
            };
            if version == 1 {
                desc.v1 = Some(SoundExtensionV1::from_bytes(reader)?);
            }
            desc.extensions = Vec::<GenericAtom>::from_bytes(reader)?;
            Ok(DescriptionBody::Sound(desc))
        },
        2 => {
            let desc = SoundDescriptionV2 {
                data_ref_index,
                revision: u16::from_bytes(reader)?,
                vendor: u32::from_bytes(reader)?,
                always3: i16::from_bytes(reader)?,
                always16: i16::from_bytes(reader)?,
                always_minus2: i16::from_bytes(reader)?,
                always0: i16::from_bytes(reader)?,
                always65536: u32::from_bytes(reader)?,
                size_of_struct_only: u32::from_bytes(reader)?,
                audio_sample_rate: f64::from_bytes(reader)?,
                num_audio_channels: u32::from_bytes(reader)?,
                always_7f000000: i32::from_bytes(reader)?,
                const_bits_per_channel: u32::from_bytes(reader)?,
                format_specific_flags: u32::from_bytes(reader)?,
                const_bytes_per_audio_packet: u32::from_bytes(reader)?,
                const_lpcm_frames_per_audio_packet: u32::from_bytes(reader)?,
                extensions: Vec::<GenericAtom>::from_bytes(reader)?,
            };
            Ok(DescriptionBody::SoundV2(desc))
        },
        x => Err(ioerr!(
            InvalidData,
            "{}: unknown sound description version {}",
            reader.header.fourcc,
            x
        )),
    }
}

/// Classic sound description, version 0 or 1.
///
/// Version 1 adds the four compression fields; `v1` being set makes the
/// description serialize as version 1.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SoundDescription {
    pub data_ref_index: u16,
    pub revision:       u16,
    pub vendor:         FourCC,
    pub num_channels:   u16,
    pub sample_size:    u16,
    pub compression_id: i16,
    pub packet_size:    u16,
    pub sample_rate:    UFixed16_16,
    pub v1:             Option<SoundExtensionV1>,
    pub extensions:     Vec<GenericAtom>,
}

impl ToBytes for SoundDescription {
    fn to_bytes<W: WriteBytes>(&self, stream: &mut W) -> io::Result<()> {
        stream.skip(6)?;
        self.data_ref_index.to_bytes(stream)?;
        let version: u16 = if self.v1.is_some() { 1 } else { 0 };
        version.to_bytes(stream)?;
        self.revision.to_bytes(stream)?;
        self.vendor.to_bytes(stream)?;
        self.num_channels.to_bytes(stream)?;
        self.sample_size.to_bytes(stream)?;
        self.compression_id.to_bytes(stream)?;
        self.packet_size.to_bytes(stream)?;
        self.sample_rate.to_bytes(stream)?;
        if let Some(ref v1) = self.v1 {
            v1.to_bytes(stream)?;
        }
        self.extensions.to_bytes(stream)
    }
}

def_struct! {
    /// Version 1 sound description extension.
    #[derive(Clone, Copy, Default, PartialEq)]
    SoundExtensionV1,
        samples_per_packet: u32,
        bytes_per_packet:   u32,
        bytes_per_frame:    u32,
        bytes_per_sample:   u32,
}

/// Version 2 sound description.
///
/// The layout has a fixed 72 byte core with a number of fields that
/// hold a required constant value, a 64 bit float sample rate, and a
/// 32 bit channel count.
#[derive(Clone, Debug, PartialEq)]
pub struct SoundDescriptionV2 {
    pub data_ref_index:                     u16,
    pub revision:                           u16,
    pub vendor:                             u32,
    pub always3:                            i16,
    pub always16:                           i16,
    pub always_minus2:                      i16,
    pub always0:                            i16,
    pub always65536:                        u32,
    pub size_of_struct_only:                u32,
    pub audio_sample_rate:                  f64,
    pub num_audio_channels:                 u32,
    pub always_7f000000:                    i32,
    pub const_bits_per_channel:             u32,
    pub format_specific_flags:              u32,
    pub const_bytes_per_audio_packet:       u32,
    pub const_lpcm_frames_per_audio_packet: u32,
    pub extensions:                         Vec<GenericAtom>,
}

impl SoundDescriptionV2 {
    pub const ALWAYS_3: i16 = 3;
    pub const ALWAYS_16: i16 = 0x0010;
    pub const ALWAYS_MINUS_2: i16 = -2;
    pub const ALWAYS_0: i16 = 0;
    pub const ALWAYS_65536: u32 = 0x0001_0000;
    pub const ALWAYS_7F000000: i32 = 0x7f00_0000;
    // Size of the core, from the size field up to and including
    // const_lpcm_frames_per_audio_packet.
    pub const SIZE_OF_STRUCT_ONLY: u32 = 72;

    /// New description with the constant fields filled in.
    pub fn new(audio_sample_rate: f64, num_audio_channels: u32, bits_per_channel: u32) -> SoundDescriptionV2 {
        SoundDescriptionV2 {
            data_ref_index: 1,
            revision: 0,
            vendor: 0,
            always3: SoundDescriptionV2::ALWAYS_3,
            always16: SoundDescriptionV2::ALWAYS_16,
            always_minus2: SoundDescriptionV2::ALWAYS_MINUS_2,
            always0: SoundDescriptionV2::ALWAYS_0,
            always65536: SoundDescriptionV2::ALWAYS_65536,
            size_of_struct_only: SoundDescriptionV2::SIZE_OF_STRUCT_ONLY,
            audio_sample_rate,
            num_audio_channels,
            always_7f000000: SoundDescriptionV2::ALWAYS_7F000000,
            const_bits_per_channel: bits_per_channel,
            format_specific_flags: 0,
            const_bytes_per_audio_packet: 0,
            const_lpcm_frames_per_audio_packet: 0,
            extensions: Vec::new(),
        }
    }

    /// Do the constant fields hold their required values?
    pub fn is_valid(&self) -> bool {
        self.always3 == SoundDescriptionV2::ALWAYS_3
            && self.always16 == SoundDescriptionV2::ALWAYS_16
            && self.always_minus2 == SoundDescriptionV2::ALWAYS_MINUS_2
            && self.always0 == SoundDescriptionV2::ALWAYS_0
            && self.always65536 == SoundDescriptionV2::ALWAYS_65536
            && self.always_7f000000 == SoundDescriptionV2::ALWAYS_7F000000
            && self.size_of_struct_only == SoundDescriptionV2::SIZE_OF_STRUCT_ONLY
    }
}

impl ToBytes for SoundDescriptionV2 {
    fn to_bytes<W: WriteBytes>(&self, stream: &mut W) -> io::Result<()> {
        stream.skip(6)?;
        self.data_ref_index.to_bytes(stream)?;
        2u16.to_bytes(stream)?;
        self.revision.to_bytes(stream)?;
        self.vendor.to_bytes(stream)?;
        self.always3.to_bytes(stream)?;
        self.always16.to_bytes(stream)?;
        self.always_minus2.to_bytes(stream)?;
        self.always0.to_bytes(stream)?;
        self.always65536.to_bytes(stream)?;
        self.size_of_struct_only.to_bytes(stream)?;
        self.audio_sample_rate.to_bytes(stream)?;
        self.num_audio_channels.to_bytes(stream)?;
        self.always_7f000000.to_bytes(stream)?;
        self.const_bits_per_channel.to_bytes(stream)?;
        self.format_specific_flags.to_bytes(stream)?;
        self.const_bytes_per_audio_packet.to_bytes(stream)?;
        self.const_lpcm_frames_per_audio_packet.to_bytes(stream)?;
        self.extensions.to_bytes(stream)
    }
}

def_struct! {
    /// Classic text sample description.
    #[derive(Clone, Default, PartialEq)]
    TextDescription,
        skip:             6,
        data_ref_index:   u16,
        display_flags:    u32,
        justification:    i32,
        background_color: RgbColor,
        default_text_box: Rect16,
        skip:             8,
        font_number:      i16,
        font_face:        u16,
        font_size:        i16,
        foreground_color: RgbColor,
        font_name:        PString,
}

def_struct! {
    /// Sprite media sample description.
    #[derive(Clone, Default, PartialEq)]
    SpriteDescription,
        skip:              6,
        data_ref_index:    u16,
        version:           u32,
        decompressor_type: FourCC,
        sample_flags:      u32,
}

def_struct! {
    /// Flash media sample description.
    #[derive(Clone, Default, PartialEq)]
    FlashDescription,
        skip:              6,
        data_ref_index:    u16,
        version:           u32,
        decompressor_type: FourCC,
        flags:             u32,
}

def_struct! {
    /// Music media sample description.
    #[derive(Clone, Default, PartialEq)]
    MusicDescription,
        skip:           6,
        data_ref_index: u16,
        flags:          u32,
}

def_struct! {
    /// QuickDraw 3D media sample description.
    #[derive(Clone, Default, PartialEq)]
    ThreeDeeDescription,
        skip:              6,
        data_ref_index:    u16,
        version:           u32,
        renderer_type:     FourCC,
        decompressor_type: FourCC,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemWriter;

    #[test]
    fn sound_v0_roundtrip() {
        let desc = SampleDescription {
            data_format: FourCC::new(b"twos"),
            body:        DescriptionBody::Sound(SoundDescription {
                data_ref_index: 1,
                num_channels: 2,
                sample_size: 16,
                sample_rate: UFixed16_16::from_f64(44100.0),
                ..SoundDescription::default()
            }),
        };
        let mut w = MemWriter::new();
        desc.to_bytes(&mut w).unwrap();
        let buf = w.into_vec();
        assert_eq!(buf.len(), 36);

        let desc2 = SampleDescription::read(MediaKind::Sound, &mut &buf[..]).unwrap();
        assert_eq!(desc, desc2);
        assert_eq!(desc2.channel_count(), Some(2));
        assert_eq!(desc2.sample_rate(), Some(44100.0));
    }

    #[test]
    fn sound_v1_roundtrip() {
        let desc = SampleDescription {
            data_format: FourCC::new(b"ima4"),
            body:        DescriptionBody::Sound(SoundDescription {
                data_ref_index: 1,
                num_channels: 1,
                sample_size: 16,
                sample_rate: UFixed16_16::from_f64(22050.0),
                v1: Some(SoundExtensionV1 {
                    samples_per_packet: 64,
                    bytes_per_packet:   34,
                    bytes_per_frame:    34,
                    bytes_per_sample:   2,
                }),
                ..SoundDescription::default()
            }),
        };
        let mut w = MemWriter::new();
        desc.to_bytes(&mut w).unwrap();
        let buf = w.into_vec();
        assert_eq!(buf.len(), 52);
        // version field is at offset 16.
        assert_eq!(&buf[16..18], &[0, 1]);

        let desc2 = SampleDescription::read(MediaKind::Sound, &mut &buf[..]).unwrap();
        assert_eq!(desc, desc2);
    }

    #[test]
    fn sound_v2_constants() {
        let desc = SoundDescriptionV2::new(96000.0, 6, 24);
        assert!(desc.is_valid());

        let desc = SampleDescription {
            data_format: FourCC::new(b"lpcm"),
            body:        DescriptionBody::SoundV2(desc),
        };
        let mut w = MemWriter::new();
        desc.to_bytes(&mut w).unwrap();
        let buf = w.into_vec();
        assert_eq!(buf.len(), 72);
        assert_eq!(&buf[..4], &[0, 0, 0, 72]);
        // version 2 at offset 16, always3/always16 right after 20.
        assert_eq!(&buf[16..18], &[0, 2]);
        assert_eq!(&buf[24..32], &[0, 3, 0, 0x10, 0xff, 0xfe, 0, 0]);

        let desc2 = SampleDescription::read(MediaKind::Sound, &mut &buf[..]).unwrap();
        assert_eq!(desc, desc2);
        assert_eq!(desc2.channel_count(), Some(6));
        assert_eq!(desc2.sample_rate(), Some(96000.0));
    }

    #[test]
    fn sound_v2_invalid_constants_detected() {
        let mut desc = SoundDescriptionV2::new(48000.0, 2, 16);
        desc.always3 = 4;
        assert!(!desc.is_valid());
    }

    #[test]
    fn text_roundtrip() {
        let desc = SampleDescription {
            data_format: FourCC::new(b"text"),
            body:        DescriptionBody::Text(TextDescription {
                data_ref_index: 1,
                display_flags: 0x4000,
                justification: 1,
                background_color: RgbColor { red: 0xffff, green: 0, blue: 0 },
                default_text_box: Rect16 { top: 0, left: 0, bottom: 40, right: 320 },
                font_number: 21,
                font_face: 1,
                font_size: 12,
                foreground_color: RgbColor::default(),
                font_name: PString("Helvetica".to_string()),
            }),
        };
        let mut w = MemWriter::new();
        desc.to_bytes(&mut w).unwrap();
        let buf = w.into_vec();

        let desc2 = SampleDescription::read(MediaKind::Text, &mut &buf[..]).unwrap();
        assert_eq!(desc, desc2);
    }

    #[test]
    fn unknown_format_preserved() {
        let mut payload = vec![0u8; 8];
        payload.extend_from_slice(b"anything at all");
        let desc = SampleDescription {
            data_format: FourCC::new(b"zzzz"),
            body:        DescriptionBody::Generic(payload.clone()),
        };
        let mut w = MemWriter::new();
        desc.to_bytes(&mut w).unwrap();
        let buf = w.into_vec();

        let desc2 = SampleDescription::read(MediaKind::Video, &mut &buf[..]).unwrap();
        assert_eq!(desc2.data_format, FourCC::new(b"zzzz"));
        match &desc2.body {
            DescriptionBody::Generic(d) => assert_eq!(d, &payload),
            other => panic!("expected generic body, got {:?}", other),
        }
    }
}
