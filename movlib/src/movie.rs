//! The movie / track / media hierarchy.
//!
//! A `Movie` owns its `Track`s, a track owns exactly one `Media`, and
//! a media owns its `SampleTable`. Durations are derived bottom-up:
//! the media duration comes from the sample table, the track duration
//! from its edit list (or the media if there are no edits), and the
//! movie duration is the maximum over its tracks.
//!
//! A movie can be attached to a thread: after `attach_to_current_thread`
//! all mutating calls have to come from that thread until the movie is
//! detached again.
//!
use std::io;
use std::thread::{self, ThreadId};

use crate::desc::MediaKind;
use crate::meta::MetadataStore;
use crate::sample_table::SampleTable;
use crate::timebase::{rescale, TimeBase};
use crate::types::{Fixed16_16, Fixed8_8, MacLanguage, Matrix, Time, TimeScale, TimeValue64, TrackFlags};
use crate::udta::UserData;

/// One entry in a track's edit list: play `media_time` (or silence,
/// for an empty edit) for `duration` movie-scale units at `rate`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Edit {
    pub duration:   TimeValue64,
    pub media_time: Option<TimeValue64>,
    pub rate:       Fixed16_16,
}

impl Edit {
    pub fn empty(duration: TimeValue64) -> Edit {
        Edit {
            duration,
            media_time: None,
            rate: Fixed16_16::ONE,
        }
    }

    pub fn media(duration: TimeValue64, media_time: TimeValue64, rate: Fixed16_16) -> Edit {
        Edit {
            duration,
            media_time: Some(media_time),
            rate,
        }
    }
}

/// The media of a track: what kind of data it holds, in which
/// language, and the sample table that locates the data.
#[derive(Clone, Debug)]
pub struct Media {
    time_scale:            TimeScale,
    pub kind:              MediaKind,
    pub handler_name:      String,
    pub language:          MacLanguage,
    pub creation_time:     Time,
    pub modification_time: Time,
    sample_table:          SampleTable,
}

impl Media {
    pub fn new(kind: MediaKind, time_scale: TimeScale) -> Media {
        let now = Time::now();
        Media {
            time_scale,
            kind,
            handler_name: String::new(),
            language: MacLanguage::UNSPECIFIED,
            creation_time: now,
            modification_time: now,
            sample_table: SampleTable::new(time_scale),
        }
    }

    pub fn time_scale(&self) -> TimeScale {
        self.time_scale
    }

    /// Change the media time scale, rescaling the sample table.
    pub fn set_time_scale(&mut self, time_scale: TimeScale) {
        self.sample_table.set_time_scale(time_scale);
        self.time_scale = time_scale;
    }

    pub fn sample_table(&self) -> &SampleTable {
        &self.sample_table
    }

    pub fn sample_table_mut(&mut self) -> &mut SampleTable {
        self.modification_time = Time::now();
        &mut self.sample_table
    }

    /// Media duration in media time scale units.
    pub fn duration(&self) -> TimeValue64 {
        rescale(
            self.sample_table.total_duration(),
            self.sample_table.time_scale(),
            self.time_scale,
        )
    }
}

/// A movie track.
#[derive(Clone, Debug)]
pub struct Track {
    id:                    u32,
    pub flags:             TrackFlags,
    pub layer:             i16,
    pub alternate_group:   i16,
    pub volume:            Fixed8_8,
    pub matrix:            Matrix,
    pub width:             Fixed16_16,
    pub height:            Fixed16_16,
    pub creation_time:     Time,
    pub modification_time: Time,
    pub user_data:         UserData,
    edits:                 Vec<Edit>,
    media:                 Media,
}

impl Track {
    fn new(id: u32, width: Fixed16_16, height: Fixed16_16, media: Media) -> Track {
        let now = Time::now();
        let mut flags = TrackFlags::default();
        flags.set_enabled(true);
        flags.set_in_movie(true);
        Track {
            id,
            flags,
            layer: 0,
            alternate_group: 0,
            volume: Fixed8_8::ONE,
            matrix: Matrix::identity(),
            width,
            height,
            creation_time: now,
            modification_time: now,
            user_data: UserData::new(),
            edits: Vec::new(),
            media,
        }
    }

    // Used when reading a movie from a file.
    pub(crate) fn from_parts(id: u32, media: Media) -> Track {
        Track::new(id, Fixed16_16::default(), Fixed16_16::default(), media)
    }

    pub(crate) fn set_edits(&mut self, edits: Vec<Edit>) {
        self.edits = edits;
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn media(&self) -> &Media {
        &self.media
    }

    pub fn media_mut(&mut self) -> &mut Media {
        self.modification_time = Time::now();
        &mut self.media
    }

    /// The edit list. Empty means the track plays its media 1:1.
    pub fn edits(&self) -> &[Edit] {
        &self.edits
    }

    /// Insert an empty (silent) segment before edit `index`.
    pub fn insert_empty_edit(&mut self, index: usize, duration: TimeValue64) -> io::Result<()> {
        self.insert_edit(index, Edit::empty(duration))
    }

    /// Insert a media segment before edit `index`.
    pub fn insert_media_edit(
        &mut self,
        index: usize,
        duration: TimeValue64,
        media_time: TimeValue64,
        rate: Fixed16_16,
    ) -> io::Result<()> {
        self.insert_edit(index, Edit::media(duration, media_time, rate))
    }

    fn insert_edit(&mut self, index: usize, edit: Edit) -> io::Result<()> {
        if index > self.edits.len() {
            return Err(ioerr!(InvalidInput, "edit index {} out of bounds", index));
        }
        if edit.duration < 0 {
            return Err(ioerr!(InvalidInput, "negative edit duration"));
        }
        self.modification_time = Time::now();
        self.edits.insert(index, edit);
        Ok(())
    }

    pub fn delete_edit(&mut self, index: usize) -> io::Result<Edit> {
        if index >= self.edits.len() {
            return Err(ioerr!(InvalidInput, "edit index {} out of bounds", index));
        }
        self.modification_time = Time::now();
        Ok(self.edits.remove(index))
    }

    /// Track duration in movie time scale units: the sum of the edit
    /// durations, or the media duration if there are no edits.
    pub fn duration(&self, movie_time_scale: TimeScale) -> TimeValue64 {
        if self.edits.is_empty() {
            return rescale(self.media.duration(), self.media.time_scale(), movie_time_scale);
        }
        self.edits.iter().map(|e| e.duration).sum()
    }

    /// Map a track time (movie time scale) to the media display time
    /// it presents. `None` for times inside an empty edit and for
    /// times at or past the end of the track.
    pub fn track_time_to_media_display_time(
        &self,
        time: TimeValue64,
        movie_time_scale: TimeScale,
    ) -> Option<TimeValue64> {
        if time < 0 {
            return None;
        }
        let media_scale = self.media.time_scale();
        if self.edits.is_empty() {
            if time >= self.duration(movie_time_scale) {
                return None;
            }
            return Some(rescale(time, movie_time_scale, media_scale));
        }
        let mut seg_start = 0;
        for edit in &self.edits {
            if time < seg_start + edit.duration {
                let media_time = edit.media_time?;
                let offset = rescale(time - seg_start, movie_time_scale, media_scale);
                // Scale by the edit's rate, rounding to nearest.
                let advance =
                    ((offset as i128 * edit.rate.0 as i32 as i128 + 0x8000) >> 16) as TimeValue64;
                return Some(media_time + advance);
            }
            seg_start += edit.duration;
        }
        None
    }
}

/// A movie.
pub struct Movie {
    time_scale:             TimeScale,
    pub creation_time:      Time,
    pub modification_time:  Time,
    pub matrix:             Matrix,
    pub preferred_rate:     Fixed16_16,
    pub preferred_volume:   Fixed8_8,
    pub poster_time:        TimeValue64,
    pub preview_time:       TimeValue64,
    pub preview_duration:   TimeValue64,
    pub selection_time:     TimeValue64,
    pub selection_duration: TimeValue64,
    pub user_data:          UserData,
    pub metadata:           MetadataStore,
    next_track_id:          u32,
    tracks:                 Vec<Track>,
    timebase:               TimeBase,
    thread:                 Option<ThreadId>,
}

impl Movie {
    pub fn new(time_scale: TimeScale) -> Movie {
        let now = Time::now();
        Movie {
            time_scale,
            creation_time: now,
            modification_time: now,
            matrix: Matrix::identity(),
            preferred_rate: Fixed16_16::ONE,
            preferred_volume: Fixed8_8::ONE,
            poster_time: 0,
            preview_time: 0,
            preview_duration: 0,
            selection_time: 0,
            selection_duration: 0,
            user_data: UserData::new(),
            metadata: MetadataStore::new(),
            next_track_id: 1,
            tracks: Vec::new(),
            timebase: TimeBase::new(time_scale),
            thread: None,
        }
    }

    fn check_thread(&self) -> io::Result<()> {
        if let Some(thread) = self.thread {
            if thread != thread::current().id() {
                return Err(ioerr!(WouldBlock, "movie is attached to another thread"));
            }
        }
        Ok(())
    }

    /// Restrict mutations to the current thread.
    pub fn attach_to_current_thread(&mut self) -> io::Result<()> {
        self.check_thread()?;
        self.thread = Some(thread::current().id());
        Ok(())
    }

    /// Remove the thread restriction so another thread can attach.
    pub fn detach_from_thread(&mut self) -> io::Result<()> {
        self.check_thread()?;
        self.thread = None;
        Ok(())
    }

    pub fn time_scale(&self) -> TimeScale {
        self.time_scale
    }

    /// Change the movie time scale. Edit lists and the poster,
    /// preview and selection times are rescaled.
    pub fn set_time_scale(&mut self, time_scale: TimeScale) -> io::Result<()> {
        self.check_thread()?;
        let old = self.time_scale;
        for track in &mut self.tracks {
            for edit in &mut track.edits {
                edit.duration = rescale(edit.duration, old, time_scale);
            }
        }
        self.poster_time = rescale(self.poster_time, old, time_scale);
        self.preview_time = rescale(self.preview_time, old, time_scale);
        self.preview_duration = rescale(self.preview_duration, old, time_scale);
        self.selection_time = rescale(self.selection_time, old, time_scale);
        self.selection_duration = rescale(self.selection_duration, old, time_scale);
        self.time_scale = time_scale;
        self.modification_time = Time::now();
        Ok(())
    }

    pub fn timebase(&self) -> &TimeBase {
        &self.timebase
    }

    /// Create a new track with a new `Media` of `kind`. Track ids come
    /// from the movie's next-track-id counter and are never reused.
    pub fn new_track(
        &mut self,
        width: Fixed16_16,
        height: Fixed16_16,
        kind: MediaKind,
        media_time_scale: TimeScale,
    ) -> io::Result<&mut Track> {
        self.check_thread()?;
        let id = self.next_track_id;
        self.next_track_id += 1;
        self.modification_time = Time::now();
        let media = Media::new(kind, media_time_scale);
        self.tracks.push(Track::new(id, width, height, media));
        Ok(self.tracks.last_mut().unwrap())
    }

    // Used when reading a movie from a file.
    pub(crate) fn add_track(&mut self, track: Track) {
        if track.id >= self.next_track_id {
            self.next_track_id = track.id + 1;
        }
        self.tracks.push(track);
    }

    /// The id the next new track will get.
    pub fn next_track_id(&self) -> u32 {
        self.next_track_id
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track_by_id(&self, id: u32) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == id)
    }

    pub fn track_by_id_mut(&mut self, id: u32) -> io::Result<&mut Track> {
        self.check_thread()?;
        match self.tracks.iter_mut().find(|t| t.id == id) {
            Some(track) => Ok(track),
            None => Err(ioerr!(NotFound, "no track with id {}", id)),
        }
    }

    /// Get a track by index. Indexes start at 1.
    pub fn track_by_index(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index.checked_sub(1)?)
    }

    /// Remove a track. The returned track is gone from the movie; drop
    /// it to dispose of it.
    pub fn remove_track(&mut self, id: u32) -> io::Result<Track> {
        self.check_thread()?;
        match self.tracks.iter().position(|t| t.id == id) {
            Some(pos) => {
                self.modification_time = Time::now();
                Ok(self.tracks.remove(pos))
            },
            None => Err(ioerr!(NotFound, "no track with id {}", id)),
        }
    }

    /// Movie duration in movie time scale units.
    pub fn duration(&self) -> TimeValue64 {
        self.tracks
            .iter()
            .map(|t| t.duration(self.time_scale))
            .max()
            .unwrap_or(0)
    }

    pub fn track_time_to_media_display_time(
        &self,
        track_id: u32,
        time: TimeValue64,
    ) -> Option<TimeValue64> {
        self.track_by_id(track_id)?
            .track_time_to_media_display_time(time, self.time_scale)
    }
}

impl std::fmt::Debug for Movie {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Movie")
            .field("time_scale", &self.time_scale)
            .field("duration", &self.duration())
            .field("tracks", &self.tracks)
            .field("user_data", &self.user_data)
            .field("metadata", &self.metadata)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample_table::SampleFlags;

    // A movie at scale 600 with one sound track; the media holds 100
    // samples of 60 units at scale 600.
    fn movie() -> Movie {
        let mut movie = Movie::new(600);
        let track = movie
            .new_track(Fixed16_16::default(), Fixed16_16::default(), MediaKind::Sound, 600)
            .unwrap();
        track.media_mut().sample_table_mut().add_sample_references(
            100,
            0,
            64,
            60,
            0,
            1,
            SampleFlags::default(),
        );
        movie
    }

    #[test]
    fn track_ids_are_never_reused() {
        let mut movie = movie();
        let dims = Fixed16_16::default();
        let id2 = movie.new_track(dims, dims, MediaKind::Text, 600).unwrap().id();
        assert_eq!(id2, 2);
        movie.remove_track(id2).unwrap();
        let id3 = movie.new_track(dims, dims, MediaKind::Text, 600).unwrap().id();
        assert_eq!(id3, 3);
        assert!(movie.track_by_id(id2).is_none());
        assert!(movie.remove_track(id2).is_err());
    }

    #[test]
    fn durations_derive_bottom_up() {
        let movie = movie();
        let track = movie.track_by_index(1).unwrap();
        assert_eq!(track.media().duration(), 6000);
        assert_eq!(track.duration(600), 6000);
        assert_eq!(movie.duration(), 6000);
    }

    #[test]
    fn track_duration_follows_edits() {
        let mut movie = movie();
        let track = movie.track_by_id_mut(1).unwrap();
        track.insert_empty_edit(0, 300).unwrap();
        track.insert_media_edit(1, 1200, 0, Fixed16_16::ONE).unwrap();
        assert_eq!(track.duration(600), 1500);
        assert_eq!(movie.duration(), 1500);
    }

    #[test]
    fn time_mapping_without_edits() {
        let mut movie = movie();
        movie.track_by_id_mut(1).unwrap().media_mut().set_time_scale(1200);
        assert_eq!(movie.track_time_to_media_display_time(1, 0), Some(0));
        assert_eq!(movie.track_time_to_media_display_time(1, 300), Some(600));
        // At or past the end of the track.
        assert_eq!(movie.track_time_to_media_display_time(1, 6000), None);
        assert_eq!(movie.track_time_to_media_display_time(1, -1), None);
    }

    #[test]
    fn time_mapping_with_edits() {
        let mut movie = movie();
        {
            let track = movie.track_by_id_mut(1).unwrap();
            track.insert_empty_edit(0, 300).unwrap();
            track.insert_media_edit(1, 600, 1000, Fixed16_16::ONE).unwrap();
            track
                .insert_media_edit(2, 600, 0, Fixed16_16::from_f64(2.0))
                .unwrap();
        }
        // Inside the empty edit.
        assert_eq!(movie.track_time_to_media_display_time(1, 100), None);
        // Start and middle of the first media edit.
        assert_eq!(movie.track_time_to_media_display_time(1, 300), Some(1000));
        assert_eq!(movie.track_time_to_media_display_time(1, 450), Some(1150));
        // The second media edit runs at rate 2.
        assert_eq!(movie.track_time_to_media_display_time(1, 1000), Some(200));
        // Past the last edit.
        assert_eq!(movie.track_time_to_media_display_time(1, 1500), None);
    }

    #[test]
    fn time_mapping_with_negative_rate() {
        let mut movie = movie();
        {
            let track = movie.track_by_id_mut(1).unwrap();
            // Play backwards from media time 1000.
            track
                .insert_media_edit(0, 600, 1000, Fixed16_16::from_f64(-1.0))
                .unwrap();
        }
        assert_eq!(movie.track_time_to_media_display_time(1, 0), Some(1000));
        assert_eq!(movie.track_time_to_media_display_time(1, 100), Some(900));
    }

    #[test]
    fn edit_index_bounds() {
        let mut movie = movie();
        let track = movie.track_by_id_mut(1).unwrap();
        assert!(track.insert_empty_edit(1, 100).is_err());
        assert!(track.delete_edit(0).is_err());
        track.insert_empty_edit(0, 100).unwrap();
        assert_eq!(track.delete_edit(0).unwrap(), Edit::empty(100));
    }

    #[test]
    fn movie_time_scale_rescales_edits() {
        let mut movie = movie();
        movie
            .track_by_id_mut(1)
            .unwrap()
            .insert_media_edit(0, 600, 0, Fixed16_16::ONE)
            .unwrap();
        movie.poster_time = 300;
        movie.set_time_scale(1200).unwrap();
        assert_eq!(movie.poster_time, 600);
        let track = movie.track_by_id(1).unwrap();
        assert_eq!(track.edits()[0].duration, 1200);
        // Media scale is untouched.
        assert_eq!(track.media().time_scale(), 600);
    }

    #[test]
    fn thread_affinity_checked() {
        let mut movie = movie();
        movie.attach_to_current_thread().unwrap();
        movie.set_time_scale(1200).unwrap();

        let res = std::thread::spawn(move || {
            let err = movie.set_time_scale(600).unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
            assert!(movie.new_track(Fixed16_16::default(), Fixed16_16::default(), MediaKind::Text, 600).is_err());
            // Detach also has to happen on the owning thread, which
            // this is not.
            assert!(movie.detach_from_thread().is_err());
            movie
        })
        .join()
        .unwrap();

        // Back on the owning thread everything works again.
        let mut movie = res;
        movie.set_time_scale(600).unwrap();
        movie.detach_from_thread().unwrap();
    }

    #[test]
    fn detach_allows_reattach() {
        let mut movie = movie();
        movie.attach_to_current_thread().unwrap();
        movie.detach_from_thread().unwrap();
        let mut movie = std::thread::spawn(move || {
            movie.attach_to_current_thread().unwrap();
            movie.set_time_scale(1200).unwrap();
            movie
        })
        .join()
        .unwrap();
        assert_eq!(movie.time_scale(), 1200);
        assert!(movie.set_time_scale(600).is_err());
        movie
            .track_by_id(1)
            .map(|t| t.duration(1200))
            .unwrap();
    }
}
