//! Reading and writing movie files.
//!
//! A movie file is a sequence of top-level atoms: the `moov` atom
//! holds the movie structure, `mdat` the sample data, and anything
//! else (`free`, `wide`, `ftyp`, ...) is carried along opaquely so it
//! survives a read/write cycle.
//!
//! On read, the chunked sample layout (`stsc`/`stco`/`stsz`) is
//! flattened into per-sample data offsets in the sample table. On
//! write, the sample data is laid out again, one chunk per run of
//! samples that share a description, and the `moov` tree is generated
//! from scratch.
//!
use std::fs;
use std::io;

use crate::atom::{AtomReader, AtomWriter, GenericAtom};
use crate::desc::{MediaKind, SampleDescription};
use crate::io::{DataRef, MemWriter, MovieFile};
use crate::movie::{Edit, Media, Movie, Track};
use crate::sample_table::{SampleFlags, SampleInfo, SampleTable};
use crate::serialize::{ArraySized32, AtomBytes, FromBytes, ReadBytes, ToBytes, WriteBytes};
use crate::types::{Fixed16_16, Fixed8_8, FourCC, MacLanguage, Matrix, PString, Time, TimeValue, TrackFlags};

const FOURCC_MOOV: FourCC = FourCC::new(b"moov");
const FOURCC_MDAT: FourCC = FourCC::new(b"mdat");

def_struct! {
    // 'mvhd' payload, version 0.
    Mvhd,
        creation_time:      Time,
        modification_time:  Time,
        time_scale:         u32,
        duration:           u32,
        preferred_rate:     Fixed16_16,
        preferred_volume:   Fixed8_8,
        skip:               10,
        matrix:             Matrix,
        preview_time:       u32,
        preview_duration:   u32,
        poster_time:        u32,
        selection_time:     u32,
        selection_duration: u32,
        current_time:       u32,
        next_track_id:      u32,
}

def_struct! {
    // 'tkhd' payload, version 0. The track flags live in the full
    // atom flags.
    Tkhd,
        creation_time:     Time,
        modification_time: Time,
        track_id:          u32,
        skip:              4,
        duration:          u32,
        skip:              8,
        layer:             i16,
        alternate_group:   i16,
        volume:            Fixed8_8,
        skip:              2,
        matrix:            Matrix,
        width:             Fixed16_16,
        height:            Fixed16_16,
}

def_struct! {
    // 'mdhd' payload, version 0.
    Mdhd,
        creation_time:     Time,
        modification_time: Time,
        time_scale:        u32,
        duration:          u32,
        language:          MacLanguage,
        quality:           u16,
}

def_struct! {
    // One 'elst' entry. A media_time of -1 is an empty edit.
    ElstEntry,
        duration:   u32,
        media_time: i32,
        rate:       Fixed16_16,
}

def_struct! {
    // One 'stts' entry: a run of samples with the same duration.
    SttsEntry,
        count: u32,
        delta: u32,
}

def_struct! {
    // One 'ctts' entry: a run of samples with the same display offset.
    CttsEntry,
        count:  u32,
        offset: i32,
}

def_struct! {
    // One 'stsc' entry: from chunk `first_chunk` on, every chunk
    // holds `samples_per_chunk` samples of `description_id`.
    StscEntry,
        first_chunk:       u32,
        samples_per_chunk: u32,
        description_id:    u32,
}

/// A movie plus the opaque top-level atoms around it.
#[derive(Debug)]
pub struct MovieResource {
    pub movie:  Movie,
    pub extras: Vec<GenericAtom>,
    source:     Option<DataRef>,
}

impl MovieResource {
    /// Wrap a movie that was built in memory.
    pub fn new(movie: Movie) -> MovieResource {
        MovieResource {
            movie,
            extras: Vec::new(),
            source: None,
        }
    }

    /// Where the sample data lives. Sample table data offsets index
    /// into this.
    pub fn set_source(&mut self, source: DataRef) {
        self.source = Some(source);
    }

    pub fn source(&self) -> Option<&DataRef> {
        self.source.as_ref()
    }

    /// Read a movie file.
    pub fn open(path: impl AsRef<str>) -> io::Result<MovieResource> {
        let mut file = MovieFile::open(path)?;
        MovieResource::read_from(&mut file)
    }

    /// Read a movie from a stream positioned at the start of the file.
    pub fn read_from(stream: &mut impl ReadBytes) -> io::Result<MovieResource> {
        let source = stream.data_ref(stream.left())?;
        let mut movie = None;
        let mut extras = Vec::new();

        while stream.left() >= 8 {
            let header = crate::atom::AtomHeader::peek(stream)?;
            match header.fourcc {
                f if f == FOURCC_MOOV => {
                    let mut reader = AtomReader::new(stream)?;
                    movie = Some(read_moov(&mut reader)?);
                },
                f if f == FOURCC_MDAT => {
                    // Regenerated on write; the samples reference the
                    // source data directly.
                    let mut reader = AtomReader::new(stream)?;
                    let left = reader.left();
                    reader.skip(left)?;
                },
                _ => {
                    extras.push(GenericAtom::from_bytes(stream)?);
                },
            }
        }

        let movie = movie.ok_or_else(|| ioerr!(InvalidData, "no moov atom in file"))?;
        Ok(MovieResource {
            movie,
            extras,
            source: Some(source),
        })
    }

    /// Write the movie to a file.
    pub fn write(&self, path: impl AsRef<str>) -> io::Result<()> {
        let mut writer = MemWriter::new();
        self.write_to(&mut writer)?;
        fs::write(path.as_ref(), writer.into_vec())
    }

    /// Write the movie: extra atoms, then `mdat`, then `moov`.
    pub fn write_to(&self, stream: &mut impl WriteBytes) -> io::Result<()> {
        for extra in &self.extras {
            extra.to_bytes(stream)?;
        }

        // Lay out the sample data, remembering the new offsets.
        let mut laid_out: Vec<Vec<SampleInfo>> = Vec::new();
        {
            let mut writer = AtomWriter::new(stream, FOURCC_MDAT)?;
            for track in self.movie.tracks() {
                laid_out.push(self.copy_track_data(track, &mut writer)?);
            }
            writer.finalize()?;
        }

        let mut writer = AtomWriter::new(stream, FOURCC_MOOV)?;
        write_mvhd(&mut writer, &self.movie)?;
        for (track, infos) in self.movie.tracks().iter().zip(&laid_out) {
            write_trak(&mut writer, &self.movie, track, infos)?;
        }
        let mut udta = self.movie.user_data.clone();
        self.movie.metadata.export_user_data(&mut udta);
        if !udta.is_empty() {
            let mut child = AtomWriter::new(&mut writer, FourCC::new(b"udta"))?;
            udta.to_bytes(&mut child)?;
            child.finalize()?;
        }
        writer.finalize()
    }

    // Copy one track's samples into the mdat being written. Returns
    // the samples with their new data offsets.
    fn copy_track_data(&self, track: &Track, writer: &mut AtomWriter) -> io::Result<Vec<SampleInfo>> {
        let table = track.media().sample_table();
        let mut infos = Vec::with_capacity(table.sample_count() as usize);
        if table.sample_count() == 0 {
            return Ok(infos);
        }
        let source = self
            .source
            .as_ref()
            .ok_or_else(|| ioerr!(InvalidInput, "movie has sample references but no source data"))?;

        for mut info in table.sample_info_iter() {
            let start = info.data_offset as usize;
            let end = start + info.size as usize;
            if end as u64 > source.len() {
                return Err(ioerr!(
                    UnexpectedEof,
                    "track {}: sample {} data {}..{} outside the source",
                    track.id(),
                    info.sample,
                    start,
                    end
                ));
            }
            info.data_offset = writer.pos();
            writer.write(&source[start..end])?;
            infos.push(info);
        }
        Ok(infos)
    }
}

// ---- reading ----

fn read_moov(reader: &mut AtomReader) -> io::Result<Movie> {
    let mut mvhd = None;
    let mut tracks = Vec::new();
    let mut udta = None;

    while reader.left() >= 8 {
        let mut child = AtomReader::new(reader)?;
        match &child.header.fourcc.to_be_bytes() {
            b"mvhd" => {
                expect_version_0(&mut child)?;
                mvhd = Some(Mvhd::from_bytes(&mut child)?);
            },
            b"trak" => tracks.push(read_trak(&mut child)?),
            b"udta" => {
                let size = child.left();
                let data = if size > 0 { child.read(size)?.to_vec() } else { Vec::new() };
                udta = Some(crate::udta::UserData::from_bytes(&mut &data[..])?);
            },
            _ => {
                log::debug!("moov: skipping {} atom", child.header.fourcc);
            },
        }
    }

    let mvhd = mvhd.ok_or_else(|| ioerr!(InvalidData, "moov has no mvhd atom"))?;
    let mut movie = Movie::new(mvhd.time_scale);
    movie.creation_time = mvhd.creation_time;
    movie.modification_time = mvhd.modification_time;
    movie.matrix = mvhd.matrix;
    movie.preferred_rate = mvhd.preferred_rate;
    movie.preferred_volume = mvhd.preferred_volume;
    movie.poster_time = mvhd.poster_time as i64;
    movie.preview_time = mvhd.preview_time as i64;
    movie.preview_duration = mvhd.preview_duration as i64;
    movie.selection_time = mvhd.selection_time as i64;
    movie.selection_duration = mvhd.selection_duration as i64;
    for track in tracks {
        movie.add_track(track);
    }
    if let Some(udta) = udta {
        movie.metadata.import_user_data(&udta);
        movie.user_data = udta;
    }
    Ok(movie)
}

fn expect_version_0(reader: &mut AtomReader) -> io::Result<()> {
    let (version, _) = reader.read_version_flags()?;
    if version != 0 {
        return Err(ioerr!(
            InvalidData,
            "{}: unsupported version {}",
            reader.header.fourcc,
            version
        ));
    }
    Ok(())
}

fn read_trak(reader: &mut AtomReader) -> io::Result<Track> {
    let mut tkhd = None;
    let mut track_flags = TrackFlags::default();
    let mut edits = Vec::new();
    let mut mdia = None;
    let mut udta = None;

    while reader.left() >= 8 {
        let mut child = AtomReader::new(reader)?;
        match &child.header.fourcc.to_be_bytes() {
            b"tkhd" => {
                expect_version_0(&mut child)?;
                track_flags = TrackFlags(child.header.flags);
                tkhd = Some(Tkhd::from_bytes(&mut child)?);
            },
            b"edts" => edits = read_edts(&mut child)?,
            b"mdia" => mdia = Some(read_mdia(&mut child)?),
            b"udta" => {
                let size = child.left();
                let data = if size > 0 { child.read(size)?.to_vec() } else { Vec::new() };
                udta = Some(crate::udta::UserData::from_bytes(&mut &data[..])?);
            },
            _ => {
                log::debug!("trak: skipping {} atom", child.header.fourcc);
            },
        }
    }

    let tkhd = tkhd.ok_or_else(|| ioerr!(InvalidData, "trak has no tkhd atom"))?;
    let media = mdia.ok_or_else(|| ioerr!(InvalidData, "trak has no mdia atom"))?;
    let mut track = Track::from_parts(tkhd.track_id, media);
    track.flags = track_flags;
    track.layer = tkhd.layer;
    track.alternate_group = tkhd.alternate_group;
    track.volume = tkhd.volume;
    track.matrix = tkhd.matrix;
    track.width = tkhd.width;
    track.height = tkhd.height;
    track.creation_time = tkhd.creation_time;
    track.modification_time = tkhd.modification_time;
    track.set_edits(edits);
    if let Some(udta) = udta {
        track.user_data = udta;
    }
    Ok(track)
}

fn read_edts(reader: &mut AtomReader) -> io::Result<Vec<Edit>> {
    let mut edits = Vec::new();
    while reader.left() >= 8 {
        let mut child = AtomReader::new(reader)?;
        if &child.header.fourcc.to_be_bytes() != b"elst" {
            continue;
        }
        expect_version_0(&mut child)?;
        let entries = ArraySized32::<ElstEntry>::from_bytes(&mut child)?;
        for e in &entries {
            edits.push(Edit {
                duration:   e.duration as i64,
                media_time: if e.media_time < 0 { None } else { Some(e.media_time as i64) },
                rate:       e.rate,
            });
        }
    }
    Ok(edits)
}

fn read_mdia(reader: &mut AtomReader) -> io::Result<Media> {
    let mut mdhd = None;
    let mut kind = MediaKind::Other(FourCC::default());
    let mut handler_name = String::new();
    let mut minf_data: Option<Vec<u8>> = None;

    while reader.left() >= 8 {
        let mut child = AtomReader::new(reader)?;
        match &child.header.fourcc.to_be_bytes() {
            b"mdhd" => {
                expect_version_0(&mut child)?;
                mdhd = Some(Mdhd::from_bytes(&mut child)?);
            },
            b"hdlr" => {
                child.read_version_flags()?;
                // component type 'mhlr', then the media kind.
                let _component_type = FourCC::from_bytes(&mut child)?;
                kind = MediaKind::from_fourcc(FourCC::from_bytes(&mut child)?);
                child.skip(12)?;
                if child.left() > 0 {
                    handler_name = PString::from_bytes(&mut child)?.0;
                }
            },
            // The media kind might come after minf in a damaged file,
            // so buffer it and parse below.
            b"minf" => {
                let size = child.left();
                if size > 0 {
                    minf_data = Some(child.read(size)?.to_vec());
                }
            },
            _ => {
                log::debug!("mdia: skipping {} atom", child.header.fourcc);
            },
        }
    }

    let mdhd = mdhd.ok_or_else(|| ioerr!(InvalidData, "mdia has no mdhd atom"))?;
    let mut media = Media::new(kind, mdhd.time_scale);
    if let Some(data) = minf_data {
        *media.sample_table_mut() = read_minf(&mut &data[..], kind, mdhd.time_scale)?;
    }
    media.language = mdhd.language;
    media.handler_name = handler_name;
    media.creation_time = mdhd.creation_time;
    media.modification_time = mdhd.modification_time;
    Ok(media)
}

fn read_minf(stream: &mut impl ReadBytes, kind: MediaKind, time_scale: u32) -> io::Result<SampleTable> {
    while stream.left() >= 8 {
        let mut child = AtomReader::new(stream)?;
        if &child.header.fourcc.to_be_bytes() == b"stbl" {
            return read_stbl(&mut child, kind, time_scale);
        }
    }
    Ok(SampleTable::new(time_scale))
}

fn read_stbl(reader: &mut AtomReader, kind: MediaKind, time_scale: u32) -> io::Result<SampleTable> {
    let mut descriptions: Vec<SampleDescription> = Vec::new();
    let mut stts: Vec<SttsEntry> = Vec::new();
    let mut ctts: Vec<CttsEntry> = Vec::new();
    let mut stsc: Vec<StscEntry> = Vec::new();
    let mut chunk_offsets: Vec<u64> = Vec::new();
    let mut sync: Option<Vec<u32>> = None;
    let mut uniform_size = 0u32;
    let mut sample_count = 0u64;
    let mut sizes: Vec<u32> = Vec::new();

    while reader.left() >= 8 {
        let mut child = AtomReader::new(reader)?;
        match &child.header.fourcc.to_be_bytes() {
            b"stsd" => {
                child.read_version_flags()?;
                let count = u32::from_bytes(&mut child)?;
                for _ in 0..count {
                    descriptions.push(SampleDescription::read(kind, &mut child)?);
                }
            },
            b"stts" => {
                child.read_version_flags()?;
                stts = ArraySized32::<SttsEntry>::from_bytes(&mut child)?.0;
            },
            b"ctts" => {
                child.read_version_flags()?;
                ctts = ArraySized32::<CttsEntry>::from_bytes(&mut child)?.0;
            },
            b"stsz" => {
                child.read_version_flags()?;
                uniform_size = u32::from_bytes(&mut child)?;
                sample_count = u32::from_bytes(&mut child)? as u64;
                if uniform_size == 0 {
                    sizes = Vec::with_capacity(sample_count as usize);
                    for _ in 0..sample_count {
                        sizes.push(u32::from_bytes(&mut child)?);
                    }
                }
            },
            b"stsc" => {
                child.read_version_flags()?;
                stsc = ArraySized32::<StscEntry>::from_bytes(&mut child)?.0;
            },
            b"stco" => {
                child.read_version_flags()?;
                chunk_offsets = ArraySized32::<u32>::from_bytes(&mut child)?
                    .iter()
                    .map(|&o| o as u64)
                    .collect();
            },
            b"co64" => {
                child.read_version_flags()?;
                chunk_offsets = ArraySized32::<u64>::from_bytes(&mut child)?.0;
            },
            b"stss" => {
                child.read_version_flags()?;
                sync = Some(ArraySized32::<u32>::from_bytes(&mut child)?.0);
            },
            _ => {
                log::debug!("stbl: skipping {} atom", child.header.fourcc);
            },
        }
    }

    let mut table = SampleTable::new(time_scale);
    // Descriptions may deduplicate, so remap the ids.
    let ids: Vec<u32> = descriptions
        .into_iter()
        .map(|d| table.add_sample_description(d))
        .collect();

    let mut durations = stts
        .iter()
        .flat_map(|e| std::iter::repeat(e.delta as TimeValue).take(e.count as usize));
    let mut display_offsets = ctts
        .iter()
        .flat_map(|e| std::iter::repeat(e.offset as TimeValue).take(e.count as usize));

    let mut sample = 0u64;
    'chunks: for (chunk_idx, &chunk_offset) in chunk_offsets.iter().enumerate() {
        let chunk_no = chunk_idx as u32 + 1;
        let entry = stsc
            .iter()
            .take_while(|e| e.first_chunk <= chunk_no)
            .last()
            .ok_or_else(|| ioerr!(InvalidData, "chunk {} has no stsc entry", chunk_no))?;
        let mut offset = chunk_offset;
        for _ in 0..entry.samples_per_chunk {
            if sample >= sample_count {
                break 'chunks;
            }
            let size = if uniform_size > 0 {
                uniform_size
            } else {
                *sizes.get(sample as usize).unwrap_or(&0)
            };
            let mut flags = SampleFlags::default();
            if let Some(ref sync) = sync {
                if !sync.contains(&(sample as u32 + 1)) {
                    flags.set(SampleFlags::NOT_SYNC, true);
                }
            }
            let description_id = entry
                .description_id
                .checked_sub(1)
                .and_then(|i| ids.get(i as usize))
                .copied()
                .unwrap_or(1);
            table.add_sample_references(
                1,
                offset,
                size,
                durations.next().unwrap_or(0),
                display_offsets.next().unwrap_or(0),
                description_id,
                flags,
            );
            offset += size as u64;
            sample += 1;
        }
    }
    if sample < sample_count {
        return Err(ioerr!(
            InvalidData,
            "sample table ends early: {} of {} samples",
            sample,
            sample_count
        ));
    }
    Ok(table)
}

// ---- writing ----

fn write_mvhd(stream: &mut impl WriteBytes, movie: &Movie) -> io::Result<()> {
    let mut writer = AtomWriter::new_full(stream, FourCC::new(b"mvhd"), 0, 0)?;
    let mvhd = Mvhd {
        creation_time:      movie.creation_time,
        modification_time:  movie.modification_time,
        time_scale:         movie.time_scale(),
        duration:           movie.duration() as u32,
        preferred_rate:     movie.preferred_rate,
        preferred_volume:   movie.preferred_volume,
        matrix:             movie.matrix,
        preview_time:       movie.preview_time as u32,
        preview_duration:   movie.preview_duration as u32,
        poster_time:        movie.poster_time as u32,
        selection_time:     movie.selection_time as u32,
        selection_duration: movie.selection_duration as u32,
        current_time:       0,
        next_track_id:      movie.next_track_id(),
    };
    mvhd.to_bytes(&mut writer)?;
    writer.finalize()
}

fn write_trak(
    stream: &mut impl WriteBytes,
    movie: &Movie,
    track: &Track,
    infos: &[SampleInfo],
) -> io::Result<()> {
    let mut writer = AtomWriter::new(stream, FourCC::new(b"trak"))?;

    {
        let mut tkhd_writer =
            AtomWriter::new_full(&mut writer, FourCC::new(b"tkhd"), 0, track.flags.0)?;
        let tkhd = Tkhd {
            creation_time:     track.creation_time,
            modification_time: track.modification_time,
            track_id:          track.id(),
            duration:          track.duration(movie.time_scale()) as u32,
            layer:             track.layer,
            alternate_group:   track.alternate_group,
            volume:            track.volume,
            matrix:            track.matrix,
            width:             track.width,
            height:            track.height,
        };
        tkhd.to_bytes(&mut tkhd_writer)?;
        tkhd_writer.finalize()?;
    }

    if !track.edits().is_empty() {
        let mut edts_writer = AtomWriter::new(&mut writer, FourCC::new(b"edts"))?;
        {
            let mut elst_writer =
                AtomWriter::new_full(&mut edts_writer, FourCC::new(b"elst"), 0, 0)?;
            let mut entries = ArraySized32::new();
            for edit in track.edits() {
                entries.push(ElstEntry {
                    duration:   edit.duration as u32,
                    media_time: edit.media_time.map(|t| t as i32).unwrap_or(-1),
                    rate:       edit.rate,
                });
            }
            entries.to_bytes(&mut elst_writer)?;
            elst_writer.finalize()?;
        }
        edts_writer.finalize()?;
    }

    write_mdia(&mut writer, track, infos)?;

    if !track.user_data.is_empty() {
        let mut child = AtomWriter::new(&mut writer, FourCC::new(b"udta"))?;
        track.user_data.to_bytes(&mut child)?;
        child.finalize()?;
    }

    writer.finalize()
}

fn write_mdia(stream: &mut impl WriteBytes, track: &Track, infos: &[SampleInfo]) -> io::Result<()> {
    let media = track.media();
    let mut writer = AtomWriter::new(stream, FourCC::new(b"mdia"))?;

    {
        let mut mdhd_writer = AtomWriter::new_full(&mut writer, FourCC::new(b"mdhd"), 0, 0)?;
        let mdhd = Mdhd {
            creation_time:     media.creation_time,
            modification_time: media.modification_time,
            time_scale:        media.time_scale(),
            duration:          media.duration() as u32,
            language:          media.language,
            quality:           0,
        };
        mdhd.to_bytes(&mut mdhd_writer)?;
        mdhd_writer.finalize()?;
    }

    {
        let mut hdlr_writer = AtomWriter::new_full(&mut writer, FourCC::new(b"hdlr"), 0, 0)?;
        FourCC::new(b"mhlr").to_bytes(&mut hdlr_writer)?;
        media.kind.fourcc().to_bytes(&mut hdlr_writer)?;
        hdlr_writer.skip(12)?;
        PString(media.handler_name.clone()).to_bytes(&mut hdlr_writer)?;
        hdlr_writer.finalize()?;
    }

    {
        let mut minf_writer = AtomWriter::new(&mut writer, FourCC::new(b"minf"))?;
        write_media_header(&mut minf_writer, media.kind)?;
        write_dinf(&mut minf_writer)?;
        write_stbl(&mut minf_writer, media.sample_table(), infos)?;
        minf_writer.finalize()?;
    }

    writer.finalize()
}

fn write_media_header(stream: &mut impl WriteBytes, kind: MediaKind) -> io::Result<()> {
    match kind {
        MediaKind::Sound => {
            let mut writer = AtomWriter::new_full(stream, FourCC::new(b"smhd"), 0, 0)?;
            // balance, reserved.
            0u32.to_bytes(&mut writer)?;
            writer.finalize()
        },
        MediaKind::Video => {
            let mut writer = AtomWriter::new_full(stream, FourCC::new(b"vmhd"), 0, 1)?;
            // graphics mode, opcolor.
            0u16.to_bytes(&mut writer)?;
            writer.skip(6)?;
            writer.finalize()
        },
        _ => {
            let mut writer = AtomWriter::new(stream, FourCC::new(b"gmhd"))?;
            {
                let mut gmin = AtomWriter::new_full(&mut writer, FourCC::new(b"gmin"), 0, 0)?;
                // graphics mode, opcolor, balance, reserved.
                0x40u16.to_bytes(&mut gmin)?;
                gmin.skip(10)?;
                gmin.finalize()?;
            }
            writer.finalize()
        },
    }
}

fn write_dinf(stream: &mut impl WriteBytes) -> io::Result<()> {
    let mut writer = AtomWriter::new(stream, FourCC::new(b"dinf"))?;
    {
        let mut dref = AtomWriter::new_full(&mut writer, FourCC::new(b"dref"), 0, 0)?;
        1u32.to_bytes(&mut dref)?;
        {
            // Self-referencing data entry.
            let mut alis = AtomWriter::new_full(&mut dref, FourCC::new(b"alis"), 0, 1)?;
            alis.finalize()?;
        }
        dref.finalize()?;
    }
    writer.finalize()
}

fn write_stbl(stream: &mut impl WriteBytes, table: &SampleTable, infos: &[SampleInfo]) -> io::Result<()> {
    let mut writer = AtomWriter::new(stream, FourCC::new(b"stbl"))?;

    {
        let mut stsd = AtomWriter::new_full(&mut writer, FourCC::new(b"stsd"), 0, 0)?;
        (table.description_count()).to_bytes(&mut stsd)?;
        for desc in table.descriptions() {
            desc.to_bytes(&mut stsd)?;
        }
        stsd.finalize()?;
    }

    {
        // Run-length encode the decode durations.
        let mut entries: ArraySized32<SttsEntry> = ArraySized32::new();
        for info in infos {
            match entries.last_mut() {
                Some(e) if e.delta == info.decode_duration as u32 => e.count += 1,
                _ => entries.push(SttsEntry {
                    count: 1,
                    delta: info.decode_duration as u32,
                }),
            }
        }
        let mut stts = AtomWriter::new_full(&mut writer, FourCC::new(b"stts"), 0, 0)?;
        entries.to_bytes(&mut stts)?;
        stts.finalize()?;
    }

    if infos.iter().any(|i| i.display_offset != 0) {
        let mut entries: ArraySized32<CttsEntry> = ArraySized32::new();
        for info in infos {
            match entries.last_mut() {
                Some(e) if e.offset == info.display_offset => e.count += 1,
                _ => entries.push(CttsEntry {
                    count:  1,
                    offset: info.display_offset,
                }),
            }
        }
        let mut ctts = AtomWriter::new_full(&mut writer, FourCC::new(b"ctts"), 0, 0)?;
        entries.to_bytes(&mut ctts)?;
        ctts.finalize()?;
    }

    {
        let uniform = match infos.first() {
            Some(first) if infos.iter().all(|i| i.size == first.size) => first.size,
            _ => 0,
        };
        let mut stsz = AtomWriter::new_full(&mut writer, FourCC::new(b"stsz"), 0, 0)?;
        uniform.to_bytes(&mut stsz)?;
        (infos.len() as u32).to_bytes(&mut stsz)?;
        if uniform == 0 {
            for info in infos {
                info.size.to_bytes(&mut stsz)?;
            }
        }
        stsz.finalize()?;
    }

    // One chunk per run of samples with the same description.
    let mut chunks: Vec<(u64, u32, u32)> = Vec::new();
    for info in infos {
        match chunks.last_mut() {
            Some(c) if c.2 == info.description_id => c.1 += 1,
            _ => chunks.push((info.data_offset, 1, info.description_id)),
        }
    }

    {
        let mut entries: ArraySized32<StscEntry> = ArraySized32::new();
        for (idx, &(_, samples, desc)) in chunks.iter().enumerate() {
            let matches_last = entries
                .last()
                .map(|e: &StscEntry| e.samples_per_chunk == samples && e.description_id == desc)
                .unwrap_or(false);
            if !matches_last {
                entries.push(StscEntry {
                    first_chunk:       idx as u32 + 1,
                    samples_per_chunk: samples,
                    description_id:    desc,
                });
            }
        }
        let mut stsc = AtomWriter::new_full(&mut writer, FourCC::new(b"stsc"), 0, 0)?;
        entries.to_bytes(&mut stsc)?;
        stsc.finalize()?;
    }

    {
        let large = chunks.iter().any(|&(offset, _, _)| offset > u32::MAX as u64);
        if large {
            let mut co64 = AtomWriter::new_full(&mut writer, FourCC::new(b"co64"), 0, 0)?;
            let mut entries: ArraySized32<u64> = ArraySized32::new();
            for &(offset, _, _) in &chunks {
                entries.push(offset);
            }
            entries.to_bytes(&mut co64)?;
            co64.finalize()?;
        } else {
            let mut stco = AtomWriter::new_full(&mut writer, FourCC::new(b"stco"), 0, 0)?;
            let mut entries: ArraySized32<u32> = ArraySized32::new();
            for &(offset, _, _) in &chunks {
                entries.push(offset as u32);
            }
            entries.to_bytes(&mut stco)?;
            stco.finalize()?;
        }
    }

    if infos.iter().any(|i| !i.flags.is_sync()) {
        let mut entries: ArraySized32<u32> = ArraySized32::new();
        for info in infos {
            if info.flags.is_sync() {
                entries.push(info.sample as u32);
            }
        }
        let mut stss = AtomWriter::new_full(&mut writer, FourCC::new(b"stss"), 0, 0)?;
        entries.to_bytes(&mut stss)?;
        stss.finalize()?;
    }

    writer.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desc::{DescriptionBody, SoundDescriptionV2};
    use crate::meta::{CommonKey, StorageFormat};

    fn sound_movie() -> (MovieResource, Vec<u8>) {
        // 8 samples of 4 bytes each.
        let data: Vec<u8> = (0..32).collect();
        let mut movie = Movie::new(600);
        let track = movie
            .new_track(Fixed16_16::default(), Fixed16_16::default(), MediaKind::Sound, 600)
            .unwrap();
        let table = track.media_mut().sample_table_mut();
        let desc = table.add_sample_description(SampleDescription {
            data_format: FourCC::new(b"lpcm"),
            body:        DescriptionBody::SoundV2(SoundDescriptionV2::new(48000.0, 2, 16)),
        });
        table.add_sample_references(8, 0, 4, 75, 0, desc, SampleFlags::default());
        movie
            .metadata
            .add_common_item(StorageFormat::UserData, CommonKey::Copyright, "(c) me");

        let mut res = MovieResource::new(movie);
        res.set_source(DataRef::from_vec(data.clone()));
        (res, data)
    }

    #[test]
    fn roundtrip() {
        let (res, data) = sound_movie();
        let mut writer = MemWriter::new();
        res.write_to(&mut writer).unwrap();
        let buf = writer.into_vec();

        let res2 = MovieResource::read_from(&mut &buf[..]).unwrap();
        let movie = &res2.movie;
        assert_eq!(movie.time_scale(), 600);
        assert_eq!(movie.track_count(), 1);
        assert_eq!(movie.duration(), 600);

        let track = movie.track_by_index(1).unwrap();
        assert_eq!(track.media().kind, MediaKind::Sound);
        let table = track.media().sample_table();
        assert_eq!(table.sample_count(), 8);
        assert_eq!(table.sample_size(1), 4);
        assert_eq!(table.sample_decode_duration(3), 75);
        assert_eq!(table.description(1).unwrap().sample_rate(), Some(48000.0));

        // The written mdat holds the original sample bytes, and the
        // new offsets point into them.
        let source = res2.source.as_ref().unwrap();
        let info = table.sample_info(2);
        assert_eq!(&source[info.data_offset as usize..][..4], &data[4..8]);

        // The copyright came back through the udta export.
        assert_eq!(movie.metadata.find_text(CommonKey::Copyright), Some("(c) me"));
    }

    #[test]
    fn extras_survive() {
        let (res, _) = sound_movie();
        let mut res = res;
        res.extras.push(GenericAtom::new(FourCC::new(b"free"), vec![0; 16]));

        let mut writer = MemWriter::new();
        res.write_to(&mut writer).unwrap();
        let buf = writer.into_vec();
        // The extra atom is up front.
        assert_eq!(&buf[4..8], b"free");

        let res2 = MovieResource::read_from(&mut &buf[..]).unwrap();
        assert_eq!(res2.extras.len(), 1);
        assert_eq!(res2.extras[0].fourcc(), FourCC::new(b"free"));

        // And it survives a second cycle.
        let mut writer = MemWriter::new();
        res2.write_to(&mut writer).unwrap();
        let buf2 = writer.into_vec();
        let res3 = MovieResource::read_from(&mut &buf2[..]).unwrap();
        assert_eq!(res3.extras.len(), 1);
    }

    #[test]
    fn edits_and_text_survive() {
        let (mut res, _) = sound_movie();
        {
            let track = res.movie.track_by_id_mut(1).unwrap();
            track.insert_empty_edit(0, 300).unwrap();
            track.insert_media_edit(1, 600, 0, Fixed16_16::ONE).unwrap();
            let eng = MacLanguage::from_iso639("eng").unwrap();
            track.user_data.add_text(FourCC::new(b"\xa9nam"), eng, b"sound".to_vec());
        }

        let mut writer = MemWriter::new();
        res.write_to(&mut writer).unwrap();
        let buf = writer.into_vec();

        let res2 = MovieResource::read_from(&mut &buf[..]).unwrap();
        let track = res2.movie.track_by_index(1).unwrap();
        assert_eq!(track.edits().len(), 2);
        assert_eq!(track.edits()[0], Edit::empty(300));
        assert_eq!(track.edits()[1], Edit::media(600, 0, Fixed16_16::ONE));
        assert_eq!(track.duration(600), 900);
        let eng = MacLanguage::from_iso639("eng").unwrap();
        assert_eq!(
            track.user_data.get_text(FourCC::new(b"\xa9nam"), eng),
            Some(&b"sound"[..])
        );
    }

    #[test]
    fn varying_sizes_and_sync_samples() {
        let data: Vec<u8> = (0..60).collect();
        let mut movie = Movie::new(600);
        let track = movie
            .new_track(Fixed16_16::default(), Fixed16_16::default(), MediaKind::Video, 600)
            .unwrap();
        let table = track.media_mut().sample_table_mut();
        let mut not_sync = SampleFlags::default();
        not_sync.set(SampleFlags::NOT_SYNC, true);
        table.add_sample_references(1, 0, 20, 60, 30, 1, SampleFlags::default());
        table.add_sample_references(2, 20, 15, 60, -30, 1, not_sync);
        table.add_sample_references(1, 50, 10, 60, 30, 1, SampleFlags::default());

        let mut res = MovieResource::new(movie);
        res.set_source(DataRef::from_vec(data));

        let mut writer = MemWriter::new();
        res.write_to(&mut writer).unwrap();
        let buf = writer.into_vec();

        let res2 = MovieResource::read_from(&mut &buf[..]).unwrap();
        let table = res2.movie.track_by_index(1).unwrap().media().sample_table();
        assert_eq!(table.sample_count(), 4);
        assert_eq!(table.sample_size(1), 20);
        assert_eq!(table.sample_size(2), 15);
        assert_eq!(table.sample_size(4), 10);
        assert_eq!(table.sample_info(1).display_offset, 30);
        assert_eq!(table.sample_info(2).display_offset, -30);
        assert!(table.sample_info(1).flags.is_sync());
        assert!(!table.sample_info(2).flags.is_sync());
        assert!(!table.sample_info(3).flags.is_sync());
        assert!(table.sample_info(4).flags.is_sync());
    }

    #[test]
    fn missing_moov_is_an_error() {
        let mut writer = MemWriter::new();
        GenericAtom::new(FourCC::new(b"free"), vec![0; 4])
            .to_bytes(&mut writer)
            .unwrap();
        let buf = writer.into_vec();
        let err = MovieResource::read_from(&mut &buf[..]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn built_movie_without_source_is_rejected() {
        let (mut res, _) = sound_movie();
        res.source = None;
        let mut writer = MemWriter::new();
        assert_eq!(
            res.write_to(&mut writer).unwrap_err().kind(),
            io::ErrorKind::InvalidInput
        );
    }
}
