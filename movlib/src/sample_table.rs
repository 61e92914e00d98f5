//! Mutable sample table.
//!
//! The sample table of a media: for every sample its data location,
//! size, decode duration, display offset, sample description and
//! flags. Samples are numbered from 1, contiguously.
//!
//! Storage is run-length: `add_sample_references` appends a run of
//! samples that share their attributes, laid out back to back in the
//! data starting at the run's offset. Most tables compress to a
//! handful of runs this way, and all per-sample accessors stay cheap.
//!
use std::io;

use crate::desc::SampleDescription;
use crate::timebase::rescale;
use crate::types::{TimeScale, TimeValue};

/// Per-sample flags.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleFlags(pub u32);

impl SampleFlags {
    pub const NOT_SYNC: u32 = 0x0001;
    pub const SHADOW_SYNC: u32 = 0x0002;
    pub const DROPPABLE: u32 = 0x0004;
    pub const PARTIAL_SYNC: u32 = 0x0008;

    pub fn get(&self, bit: u32) -> bool {
        self.0 & bit > 0
    }

    pub fn set(&mut self, bit: u32, on: bool) {
        if on {
            self.0 |= bit;
        } else {
            self.0 &= !bit;
        }
    }

    /// A sync sample does not depend on other samples.
    pub fn is_sync(&self) -> bool {
        !self.get(SampleFlags::NOT_SYNC)
    }
}

impl std::fmt::Debug for SampleFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let mut v = Vec::new();
        if self.get(SampleFlags::NOT_SYNC) {
            v.push("not_sync");
        }
        if self.get(SampleFlags::SHADOW_SYNC) {
            v.push("shadow_sync");
        }
        if self.get(SampleFlags::DROPPABLE) {
            v.push("droppable");
        }
        if self.get(SampleFlags::PARTIAL_SYNC) {
            v.push("partial_sync");
        }
        write!(f, "SampleFlags({})", v.join("|"))
    }
}

/// Attribute mask for `next_attribute_change`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AttributeMask(pub u32);

impl AttributeMask {
    pub const DECODE_DURATION: u32 = 0x0001;
    pub const DISPLAY_OFFSET: u32 = 0x0002;
    pub const DESCRIPTION_ID: u32 = 0x0004;
    pub const FLAGS: u32 = 0x0008;
    pub const SIZE: u32 = 0x0010;
    pub const DATA_DISCONTINUITY: u32 = 0x0020;
    pub const ALL: u32 = 0x003f;

    pub fn get(&self, bit: u32) -> bool {
        self.0 & bit > 0
    }
}

/// Everything the table knows about one sample.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SampleInfo {
    /// 1-based sample number.
    pub sample:          u64,
    pub data_offset:     u64,
    pub size:            u32,
    pub decode_duration: TimeValue,
    pub display_offset:  TimeValue,
    /// 1-based id into the table's sample description list.
    pub description_id:  u32,
    pub flags:           SampleFlags,
}

// A run of samples sharing their attributes, back to back in the data.
#[derive(Clone, Copy, Debug, PartialEq)]
struct SampleRun {
    count:           u64,
    data_offset:     u64,
    size:            u32,
    decode_duration: TimeValue,
    display_offset:  TimeValue,
    description_id:  u32,
    flags:           SampleFlags,
}

impl SampleRun {
    fn info(&self, index: u64, sample: u64) -> SampleInfo {
        SampleInfo {
            sample,
            data_offset: self.data_offset + index * self.size as u64,
            size: self.size,
            decode_duration: self.decode_duration,
            display_offset: self.display_offset,
            description_id: self.description_id,
            flags: self.flags,
        }
    }

    fn end_offset(&self) -> u64 {
        self.data_offset + self.count * self.size as u64
    }

    // Attributes equal under the mask.
    fn matches(&self, other: &SampleRun, mask: AttributeMask) -> bool {
        (!mask.get(AttributeMask::DECODE_DURATION) || self.decode_duration == other.decode_duration)
            && (!mask.get(AttributeMask::DISPLAY_OFFSET) || self.display_offset == other.display_offset)
            && (!mask.get(AttributeMask::DESCRIPTION_ID) || self.description_id == other.description_id)
            && (!mask.get(AttributeMask::FLAGS) || self.flags == other.flags)
            && (!mask.get(AttributeMask::SIZE) || self.size == other.size)
    }
}

/// The sample table of one media.
#[derive(Clone, Debug, Default)]
pub struct SampleTable {
    time_scale:   TimeScale,
    runs:         Vec<SampleRun>,
    descriptions: Vec<SampleDescription>,
}

impl SampleTable {
    pub fn new(time_scale: TimeScale) -> SampleTable {
        SampleTable {
            time_scale,
            runs: Vec::new(),
            descriptions: Vec::new(),
        }
    }

    pub fn time_scale(&self) -> TimeScale {
        self.time_scale
    }

    /// Change the time scale. Stored durations and display offsets are
    /// rescaled.
    pub fn set_time_scale(&mut self, time_scale: TimeScale) {
        if time_scale == self.time_scale || self.time_scale == 0 {
            self.time_scale = time_scale;
            return;
        }
        for run in &mut self.runs {
            run.decode_duration =
                rescale(run.decode_duration as i64, self.time_scale, time_scale) as TimeValue;
            run.display_offset =
                rescale(run.display_offset as i64, self.time_scale, time_scale) as TimeValue;
        }
        self.time_scale = time_scale;
    }

    pub fn sample_count(&self) -> u64 {
        self.runs.iter().map(|r| r.count).sum()
    }

    /// Total decode duration, in the table's time scale.
    pub fn total_duration(&self) -> i64 {
        self.runs
            .iter()
            .map(|r| r.count as i64 * r.decode_duration as i64)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Add a sample description. Returns its 1-based id. An equal
    /// description that is already in the table is reused.
    pub fn add_sample_description(&mut self, desc: SampleDescription) -> u32 {
        if let Some(idx) = self.descriptions.iter().position(|d| d == &desc) {
            return (idx + 1) as u32;
        }
        self.descriptions.push(desc);
        self.descriptions.len() as u32
    }

    /// Look up a sample description by its 1-based id.
    pub fn description(&self, id: u32) -> Option<&SampleDescription> {
        self.descriptions.get((id as usize).checked_sub(1)?)
    }

    pub fn description_count(&self) -> u32 {
        self.descriptions.len() as u32
    }

    pub fn descriptions(&self) -> &[SampleDescription] {
        &self.descriptions
    }

    /// Append a run of `count` samples that share their attributes,
    /// laid out back to back starting at `data_offset`. Returns the
    /// sample number of the first new sample.
    pub fn add_sample_references(
        &mut self,
        count: u64,
        data_offset: u64,
        size: u32,
        decode_duration: TimeValue,
        display_offset: TimeValue,
        description_id: u32,
        flags: SampleFlags,
    ) -> u64 {
        let first = self.sample_count() + 1;
        if count == 0 {
            return first;
        }
        let run = SampleRun {
            count,
            data_offset,
            size,
            decode_duration,
            display_offset,
            description_id,
            flags,
        };
        // Coalesce with the previous run if it simply continues.
        if let Some(last) = self.runs.last_mut() {
            if last.matches(&run, AttributeMask(AttributeMask::ALL))
                && last.end_offset() == run.data_offset
            {
                last.count += count;
                return first;
            }
        }
        self.runs.push(run);
        first
    }

    // Locate sample `sample` (1-based): run index plus index in the run.
    fn locate(&self, sample: u64) -> Option<(usize, u64)> {
        if sample == 0 {
            return None;
        }
        let mut base = 0u64;
        for (idx, run) in self.runs.iter().enumerate() {
            if sample <= base + run.count {
                return Some((idx, sample - base - 1));
            }
            base += run.count;
        }
        None
    }

    /// All attributes of one sample. A sample number that is not in
    /// the table returns a zeroed `SampleInfo`.
    pub fn sample_info(&self, sample: u64) -> SampleInfo {
        match self.locate(sample) {
            Some((idx, index)) => self.runs[idx].info(index, sample),
            None => SampleInfo::default(),
        }
    }

    pub fn sample_size(&self, sample: u64) -> u32 {
        self.sample_info(sample).size
    }

    pub fn sample_decode_duration(&self, sample: u64) -> TimeValue {
        self.sample_info(sample).decode_duration
    }

    /// Decode time at which `sample` starts, in the table's time scale.
    pub fn sample_decode_time(&self, sample: u64) -> i64 {
        let mut time = 0i64;
        let mut base = 0u64;
        for run in &self.runs {
            if sample <= base + run.count {
                return time + (sample - base - 1) as i64 * run.decode_duration as i64;
            }
            time += run.count as i64 * run.decode_duration as i64;
            base += run.count;
        }
        time
    }

    /// The sample whose decode time span contains `time`. Zero if the
    /// table is empty or the time is past the end.
    pub fn sample_for_time(&self, time: i64) -> u64 {
        if time < 0 {
            return 0;
        }
        let mut t = 0i64;
        let mut base = 0u64;
        for run in &self.runs {
            let run_dur = run.count as i64 * run.decode_duration as i64;
            if time < t + run_dur && run.decode_duration > 0 {
                return base + ((time - t) / run.decode_duration as i64) as u64 + 1;
            }
            t += run_dur;
            base += run.count;
        }
        0
    }

    /// The next sample after `start` whose masked attributes differ
    /// from those of `start`, or where the data offset is not
    /// contiguous with the previous sample. `None` if there is no
    /// such sample.
    pub fn next_attribute_change(&self, start: u64, mask: AttributeMask) -> Option<u64> {
        let (start_idx, _) = self.locate(start)?;
        let start_run = &self.runs[start_idx];

        // Within a run attributes are constant and the data is
        // contiguous, so changes happen at run boundaries only.
        let mut base: u64 = self.runs[..start_idx].iter().map(|r| r.count).sum();
        base += start_run.count;
        let mut prev = start_run;
        for run in &self.runs[start_idx + 1..] {
            if !run.matches(start_run, mask) {
                return Some(base + 1);
            }
            if mask.get(AttributeMask::DATA_DISCONTINUITY) && prev.end_offset() != run.data_offset {
                return Some(base + 1);
            }
            base += run.count;
            prev = run;
        }
        None
    }

    /// Replace `dest_count` samples starting at `dest_start` with a
    /// copy of `src_count` samples starting at `src_start` in another
    /// table. Either count may be zero (pure delete, pure insert).
    /// Sample descriptions are copied over and their ids remapped;
    /// durations are rescaled when the time scales differ.
    pub fn replace_range(
        &mut self,
        dest_start: u64,
        dest_count: u64,
        src: &SampleTable,
        src_start: u64,
        src_count: u64,
    ) -> io::Result<()> {
        let own_count = self.sample_count();
        if dest_start == 0 || dest_start + dest_count > own_count + 1 {
            return Err(ioerr!(
                InvalidInput,
                "destination range {}..{} out of bounds",
                dest_start,
                dest_start + dest_count
            ));
        }
        if src_count > 0 && (src_start == 0 || src_start + src_count > src.sample_count() + 1) {
            return Err(ioerr!(
                InvalidInput,
                "source range {}..{} out of bounds",
                src_start,
                src_start + src_count
            ));
        }

        let head = self.runs_slice(1, dest_start - 1);
        let tail = self.runs_slice(dest_start + dest_count, own_count + 1 - dest_start - dest_count);

        let mut middle = src.runs_slice(src_start, src_count);
        for run in &mut middle {
            // Remap the description id into our own list.
            if let Some(desc) = src.description(run.description_id) {
                run.description_id = self.add_sample_description(desc.clone());
            }
            if src.time_scale != self.time_scale && src.time_scale != 0 {
                run.decode_duration =
                    rescale(run.decode_duration as i64, src.time_scale, self.time_scale) as TimeValue;
                run.display_offset =
                    rescale(run.display_offset as i64, src.time_scale, self.time_scale) as TimeValue;
            }
        }

        let mut runs = head;
        runs.extend(middle);
        runs.extend(tail);
        self.runs = runs;
        Ok(())
    }

    // Copy out `count` samples starting at `start` as runs, splitting
    // partial runs at the edges.
    fn runs_slice(&self, start: u64, count: u64) -> Vec<SampleRun> {
        let mut res = Vec::new();
        if count == 0 {
            return res;
        }
        let end = start + count;
        let mut base = 0u64;
        for run in &self.runs {
            let run_start = base + 1;
            let run_end = base + run.count + 1;
            let s = std::cmp::max(start, run_start);
            let e = std::cmp::min(end, run_end);
            if s < e {
                let skip = s - run_start;
                let mut part = *run;
                part.data_offset += skip * run.size as u64;
                part.count = e - s;
                res.push(part);
            }
            base += run.count;
        }
        res
    }

    /// Iterator over all samples.
    pub fn sample_info_iter(&self) -> SampleInfoIterator<'_> {
        SampleInfoIterator {
            table:   self,
            run_idx: 0,
            index:   0,
            sample:  1,
        }
    }
}

/// Iterator over the samples of a table, with `seek`.
pub struct SampleInfoIterator<'a> {
    table:   &'a SampleTable,
    run_idx: usize,
    index:   u64,
    sample:  u64,
}

impl<'a> SampleInfoIterator<'a> {
    /// Position the iterator so that the next sample returned is
    /// `sample`.
    pub fn seek(&mut self, sample: u64) -> io::Result<()> {
        match self.table.locate(sample) {
            Some((run_idx, index)) => {
                self.run_idx = run_idx;
                self.index = index;
                self.sample = sample;
                Ok(())
            },
            None => Err(ioerr!(InvalidInput, "sample {} not in table", sample)),
        }
    }
}

impl<'a> Iterator for SampleInfoIterator<'a> {
    type Item = SampleInfo;

    fn next(&mut self) -> Option<SampleInfo> {
        let run = self.table.runs.get(self.run_idx)?;
        let info = run.info(self.index, self.sample);
        self.sample += 1;
        self.index += 1;
        if self.index >= run.count {
            self.run_idx += 1;
            self.index = 0;
        }
        Some(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desc::{DescriptionBody, SoundDescriptionV2};
    use crate::types::FourCC;

    fn sound_desc(rate: f64) -> SampleDescription {
        SampleDescription {
            data_format: FourCC::new(b"lpcm"),
            body:        DescriptionBody::SoundV2(SoundDescriptionV2::new(rate, 2, 16)),
        }
    }

    fn table() -> SampleTable {
        let mut t = SampleTable::new(600);
        let desc = t.add_sample_description(sound_desc(48000.0));
        // 10 samples of 100 bytes at offset 1000, then 5 of 200 bytes
        // at a discontiguous offset.
        let first = t.add_sample_references(10, 1000, 100, 60, 0, desc, SampleFlags::default());
        assert_eq!(first, 1);
        let first = t.add_sample_references(5, 4000, 200, 60, 0, desc, SampleFlags::default());
        assert_eq!(first, 11);
        t
    }

    #[test]
    fn counts_and_durations() {
        let t = table();
        assert_eq!(t.sample_count(), 15);
        assert_eq!(t.total_duration(), 15 * 60);
        assert_eq!(t.sample_decode_time(1), 0);
        assert_eq!(t.sample_decode_time(11), 600);
        assert_eq!(t.sample_for_time(0), 1);
        assert_eq!(t.sample_for_time(659), 11);
        assert_eq!(t.sample_for_time(15 * 60), 0);
    }

    #[test]
    fn contiguous_runs_coalesce() {
        let mut t = SampleTable::new(600);
        t.add_sample_references(4, 0, 100, 60, 0, 1, SampleFlags::default());
        t.add_sample_references(4, 400, 100, 60, 0, 1, SampleFlags::default());
        assert_eq!(t.sample_count(), 8);
        assert_eq!(t.runs.len(), 1);
        assert_eq!(t.sample_info(8).data_offset, 700);
    }

    #[test]
    fn out_of_range_is_default() {
        let t = table();
        assert_eq!(t.sample_info(0), SampleInfo::default());
        assert_eq!(t.sample_info(16), SampleInfo::default());
        assert_eq!(t.sample_size(999), 0);
    }

    #[test]
    fn sample_offsets_within_run() {
        let t = table();
        assert_eq!(t.sample_info(1).data_offset, 1000);
        assert_eq!(t.sample_info(10).data_offset, 1900);
        assert_eq!(t.sample_info(11).data_offset, 4000);
        assert_eq!(t.sample_info(12).size, 200);
    }

    #[test]
    fn description_dedup() {
        let mut t = SampleTable::new(600);
        let a = t.add_sample_description(sound_desc(48000.0));
        let b = t.add_sample_description(sound_desc(48000.0));
        let c = t.add_sample_description(sound_desc(44100.0));
        assert_eq!(a, 1);
        assert_eq!(b, 1);
        assert_eq!(c, 2);
        assert_eq!(t.description_count(), 2);
    }

    #[test]
    fn attribute_change_scan() {
        let t = table();
        // Size changes between run 1 and run 2.
        assert_eq!(
            t.next_attribute_change(1, AttributeMask(AttributeMask::SIZE)),
            Some(11)
        );
        // Duration never changes.
        assert_eq!(
            t.next_attribute_change(1, AttributeMask(AttributeMask::DECODE_DURATION)),
            None
        );
        // The second run is discontiguous in the data.
        assert_eq!(
            t.next_attribute_change(5, AttributeMask(AttributeMask::DATA_DISCONTINUITY)),
            Some(11)
        );
        assert_eq!(t.next_attribute_change(11, AttributeMask(AttributeMask::ALL)), None);
        assert_eq!(t.next_attribute_change(0, AttributeMask(AttributeMask::ALL)), None);
    }

    #[test]
    fn iterator_with_seek() {
        let t = table();
        let mut iter = t.sample_info_iter();
        let first = iter.next().unwrap();
        assert_eq!(first.sample, 1);
        assert_eq!(first.data_offset, 1000);

        iter.seek(10).unwrap();
        let s10 = iter.next().unwrap();
        assert_eq!(s10.sample, 10);
        let s11 = iter.next().unwrap();
        assert_eq!(s11.sample, 11);
        assert_eq!(s11.data_offset, 4000);

        assert_eq!(t.sample_info_iter().count(), 15);
        assert!(iter.seek(99).is_err());
    }

    #[test]
    fn replace_range_delete() {
        let mut t = table();
        let src = SampleTable::new(600);
        // Delete samples 3..=7.
        t.replace_range(3, 5, &src, 0, 0).unwrap();
        assert_eq!(t.sample_count(), 10);
        // Sample 3 is now what used to be sample 8.
        assert_eq!(t.sample_info(3).data_offset, 1700);
    }

    #[test]
    fn replace_range_insert_remaps_descriptions() {
        let mut t = table();
        let mut src = SampleTable::new(1200);
        let desc = src.add_sample_description(sound_desc(44100.0));
        src.add_sample_references(4, 0, 50, 240, 0, desc, SampleFlags::default());

        // Insert before sample 11, deleting nothing.
        t.replace_range(11, 0, &src, 1, 4).unwrap();
        assert_eq!(t.sample_count(), 19);
        let info = t.sample_info(11);
        assert_eq!(info.size, 50);
        // 240 units at scale 1200 is 120 units at scale 600.
        assert_eq!(info.decode_duration, 120);
        // The 44.1k description came over under a new id.
        assert_eq!(info.description_id, 2);
        assert_eq!(t.description_count(), 2);
        assert_eq!(t.description(2).unwrap().sample_rate(), Some(44100.0));
    }

    #[test]
    fn replace_range_appends_past_the_end() {
        let mut t = table();
        let mut src = SampleTable::new(600);
        let desc = src.add_sample_description(sound_desc(48000.0));
        src.add_sample_references(4, 8000, 100, 60, 0, desc, SampleFlags::default());

        // Insert at sample_count + 1, deleting nothing.
        t.replace_range(16, 0, &src, 1, 4).unwrap();
        assert_eq!(t.sample_count(), 19);
        assert_eq!(t.sample_info(16).data_offset, 8000);
        assert_eq!(t.sample_info(19).data_offset, 8300);
        // The old last sample is untouched.
        assert_eq!(t.sample_info(15).size, 200);
    }

    #[test]
    fn replace_range_bounds_checked() {
        let mut t = table();
        let src = SampleTable::new(600);
        assert!(t.replace_range(0, 1, &src, 0, 0).is_err());
        assert!(t.replace_range(14, 5, &src, 0, 0).is_err());
        assert!(t.replace_range(1, 0, &src, 1, 1).is_err());
    }

    #[test]
    fn rescale_on_set_time_scale() {
        let mut t = table();
        t.set_time_scale(1200);
        assert_eq!(t.time_scale(), 1200);
        assert_eq!(t.sample_decode_duration(1), 120);
        assert_eq!(t.total_duration(), 15 * 120);
    }
}
