//! Get some general information about a movie and its tracks.
//!
use std::fmt::{self, Debug, Display};
use std::time::Duration;

use serde::{Serialize, Serializer};

use crate::desc::MediaKind;
use crate::movie::{Movie, Track};

/// General movie information.
#[derive(Debug, Default, Serialize)]
pub struct MovieInfo {
    pub time_scale: u32,
    #[serde(serialize_with = "seconds")]
    pub duration:   Duration,
    pub tracks:     Vec<TrackInfo>,
}

/// General track information.
#[derive(Debug, Default, Serialize)]
pub struct TrackInfo {
    pub id:            u32,
    pub track_type:    String,
    #[serde(serialize_with = "seconds")]
    pub duration:      Duration,
    pub size:          u64,
    pub sample_count:  u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name:          Option<String>,
    #[serde(serialize_with = "display")]
    pub language:      crate::types::MacLanguage,
    pub specific_info: SpecificTrackInfo,
}

/// Track-type specific info.
#[derive(Serialize)]
#[serde(untagged)]
pub enum SpecificTrackInfo {
    SoundTrackInfo(SoundTrackInfo),
    VideoTrackInfo(VideoTrackInfo),
    TextTrackInfo(TextTrackInfo),
    UnknownTrackInfo(UnknownTrackInfo),
}

impl Default for SpecificTrackInfo {
    fn default() -> SpecificTrackInfo {
        SpecificTrackInfo::UnknownTrackInfo(UnknownTrackInfo {
            codec_id: "und".to_string(),
        })
    }
}

impl Debug for SpecificTrackInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            &SpecificTrackInfo::SoundTrackInfo(ref i) => Debug::fmt(i, f),
            &SpecificTrackInfo::VideoTrackInfo(ref i) => Debug::fmt(i, f),
            &SpecificTrackInfo::TextTrackInfo(ref i) => Debug::fmt(i, f),
            &SpecificTrackInfo::UnknownTrackInfo(ref i) => Debug::fmt(i, f),
        }
    }
}

impl Display for SpecificTrackInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            &SpecificTrackInfo::SoundTrackInfo(ref i) => Display::fmt(i, f),
            &SpecificTrackInfo::VideoTrackInfo(ref i) => Display::fmt(i, f),
            &SpecificTrackInfo::TextTrackInfo(ref i) => Display::fmt(i, f),
            &SpecificTrackInfo::UnknownTrackInfo(ref i) => Display::fmt(i, f),
        }
    }
}

/// Sound track details.
#[derive(Debug, Default, Serialize)]
pub struct SoundTrackInfo {
    pub codec_id:      String,
    pub channel_count: Option<u32>,
    pub sample_rate:   Option<f64>,
    pub avg_bitrate:   Option<u32>,
}

impl Display for SoundTrackInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.codec_id)?;
        if let Some(ch) = self.channel_count {
            write!(f, " ({} ch)", ch)?;
        }
        Ok(())
    }
}

/// Video track details.
#[derive(Debug, Default, Serialize)]
pub struct VideoTrackInfo {
    pub codec_id: String,
    pub width:    f64,
    pub height:   f64,
}

impl Display for VideoTrackInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}x{}", self.codec_id, self.width, self.height)
    }
}

/// Text track details.
#[derive(Debug, Default, Serialize)]
pub struct TextTrackInfo {
    pub codec_id: String,
}

impl Display for TextTrackInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.codec_id)
    }
}

/// Unknown track type.
#[derive(Debug, Default, Serialize)]
pub struct UnknownTrackInfo {
    pub codec_id: String,
}

impl Display for UnknownTrackInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.codec_id)
    }
}

/// Extract general information for the movie and all of its tracks.
pub fn movie_info(movie: &Movie) -> MovieInfo {
    let scale = std::cmp::max(1, movie.time_scale()) as u64;
    MovieInfo {
        time_scale: movie.time_scale(),
        duration:   Duration::from_millis(1000 * movie.duration().max(0) as u64 / scale),
        tracks:     movie.tracks().iter().map(|t| track_info(movie, t)).collect(),
    }
}

/// Extract general information for one track.
pub fn track_info(movie: &Movie, track: &Track) -> TrackInfo {
    let mut info = TrackInfo::default();
    let media = track.media();
    let table = media.sample_table();

    info.id = track.id();
    info.track_type = media.kind.to_string();
    let scale = std::cmp::max(1, movie.time_scale()) as u64;
    info.duration = Duration::from_millis(1000 * track.duration(movie.time_scale()).max(0) as u64 / scale);
    info.size = table.sample_info_iter().map(|s| s.size as u64).sum();
    info.sample_count = table.sample_count();
    info.language = media.language;
    if !media.handler_name.is_empty() {
        info.name = Some(media.handler_name.clone());
    }

    let codec_id = match table.description(1) {
        Some(desc) => desc.data_format.to_string(),
        None => "und".to_string(),
    };
    info.specific_info = match media.kind {
        MediaKind::Sound => {
            let desc = table.description(1);
            let avg_bitrate = match info.duration.as_secs() {
                0 => None,
                secs => Some((8 * info.size / secs) as u32),
            };
            SpecificTrackInfo::SoundTrackInfo(SoundTrackInfo {
                codec_id,
                channel_count: desc.and_then(|d| d.channel_count()),
                sample_rate: desc.and_then(|d| d.sample_rate()),
                avg_bitrate,
            })
        },
        MediaKind::Video => SpecificTrackInfo::VideoTrackInfo(VideoTrackInfo {
            codec_id,
            width: track.width.as_f64(),
            height: track.height.as_f64(),
        }),
        MediaKind::Text => SpecificTrackInfo::TextTrackInfo(TextTrackInfo { codec_id }),
        _ => SpecificTrackInfo::UnknownTrackInfo(UnknownTrackInfo { codec_id }),
    };

    info
}

// Serialize helper.
fn display<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
where
    T: Display,
    S: Serializer,
{
    serializer.collect_str(value)
}

// Serialize helper.
fn seconds<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(value.as_millis() as f64 / 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desc::{DescriptionBody, SampleDescription, SoundDescriptionV2};
    use crate::sample_table::SampleFlags;
    use crate::types::{Fixed16_16, FourCC, MacLanguage};

    fn movie() -> Movie {
        let mut movie = Movie::new(600);
        let track = movie
            .new_track(Fixed16_16::default(), Fixed16_16::default(), MediaKind::Sound, 48000)
            .unwrap();
        track.media_mut().language = MacLanguage::from_iso639("eng").unwrap();
        let table = track.media_mut().sample_table_mut();
        let desc = table.add_sample_description(SampleDescription {
            data_format: FourCC::new(b"lpcm"),
            body:        DescriptionBody::SoundV2(SoundDescriptionV2::new(48000.0, 2, 16)),
        });
        table.add_sample_references(48000, 0, 4, 1, 0, desc, SampleFlags::default());
        movie
    }

    #[test]
    fn sound_track_info() {
        let movie = movie();
        let info = movie_info(&movie);
        assert_eq!(info.time_scale, 600);
        assert_eq!(info.duration, Duration::from_secs(1));
        assert_eq!(info.tracks.len(), 1);

        let t = &info.tracks[0];
        assert_eq!(t.id, 1);
        assert_eq!(t.track_type, "sound");
        assert_eq!(t.size, 4 * 48000);
        assert_eq!(t.sample_count, 48000);
        match &t.specific_info {
            SpecificTrackInfo::SoundTrackInfo(s) => {
                assert_eq!(s.codec_id, "lpcm");
                assert_eq!(s.channel_count, Some(2));
                assert_eq!(s.sample_rate, Some(48000.0));
                assert_eq!(s.avg_bitrate, Some(8 * 4 * 48000));
            },
            other => panic!("expected sound info, got {}", other),
        }
    }

    #[test]
    fn video_track_dimensions() {
        let mut movie = Movie::new(600);
        movie
            .new_track(Fixed16_16::from_f64(640.0), Fixed16_16::from_f64(480.0), MediaKind::Video, 600)
            .unwrap();
        let info = movie_info(&movie);
        match &info.tracks[0].specific_info {
            SpecificTrackInfo::VideoTrackInfo(v) => {
                assert_eq!(v.width, 640.0);
                assert_eq!(v.height, 480.0);
            },
            other => panic!("expected video info, got {}", other),
        }
    }

    #[test]
    fn info_serializes_to_json() {
        let movie = movie();
        let info = movie_info(&movie);
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("\"track_type\":\"sound\""));
        assert!(json.contains("\"language\":\"eng\""));
        assert!(json.contains("\"duration\":1.0"));
    }
}
