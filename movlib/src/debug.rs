//! Debug helpers.
//!
use std::io::{self, Write};

use crate::container::{Atom, AtomContainer};
use crate::movie::Movie;

/// Dump sample information of a track, one line per sample.
pub fn dump_track_samples(
    movie: &Movie,
    track_id: u32,
    first_sample: u64,
    last_sample: u64,
    out: &mut impl Write,
) -> io::Result<()> {
    let first_sample = std::cmp::max(1, first_sample);

    let track = match movie.track_by_id(track_id) {
        Some(track) => track,
        None => return Err(ioerr!(NotFound, "track id {}: no such track", track_id)),
    };
    let table = track.media().sample_table();
    let timescale = std::cmp::max(1, table.time_scale()) as f64;

    let mut samples = table.sample_info_iter();
    samples.seek(first_sample)?;

    let mut dtime = table.sample_decode_time(first_sample);
    let mut next_pos = 0;
    writeln!(
        out,
        "{} {:>8}  {:>10}  {:>6}  {:>10}  {:>6}  {:>5}  {:>4}",
        " ", "#", "filepos", "size", "dtime", "cdelta", "sync", "desc"
    )?;
    for sample in samples {
        let secs = dtime as f64 / timescale;
        let cdelta = 1000f64 * sample.display_offset as f64 / timescale;
        let is_sync = if sample.flags.is_sync() { "sync" } else { "" };
        let jump = if sample.sample > first_sample && next_pos != sample.data_offset {
            "+"
        } else {
            " "
        };
        next_pos = sample.data_offset + sample.size as u64;
        writeln!(
            out,
            "{} {:>8}  {:>10}  {:>6}  {:>10.1}  {:>6.0}  {:>5}  {:>4}",
            jump, sample.sample, sample.data_offset, sample.size, secs, cdelta, is_sync, sample.description_id
        )?;
        dtime += sample.decode_duration as i64;
        if last_sample > 0 && sample.sample >= last_sample {
            break;
        }
    }

    Ok(())
}

/// Dump an atom container as an indented tree.
pub fn dump_container(container: &AtomContainer, out: &mut impl Write) -> io::Result<()> {
    for atom in container.atoms() {
        dump_atom(atom, 0, out)?;
    }
    Ok(())
}

fn dump_atom(atom: &Atom, depth: usize, out: &mut impl Write) -> io::Result<()> {
    let indent = "  ".repeat(depth);
    match atom.data() {
        Some(data) => writeln!(
            out,
            "{}{} #{} [{} bytes]",
            indent,
            atom.atom_type(),
            atom.id(),
            data.len()
        )?,
        None => writeln!(out, "{}{} #{}", indent, atom.atom_type(), atom.id())?,
    }
    for child in atom.children() {
        dump_atom(child, depth + 1, out)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::AtomData;
    use crate::desc::MediaKind;
    use crate::sample_table::SampleFlags;
    use crate::types::{Fixed16_16, FourCC};

    #[test]
    fn sample_dump_has_one_line_per_sample() {
        let mut movie = Movie::new(600);
        let track = movie
            .new_track(Fixed16_16::default(), Fixed16_16::default(), MediaKind::Sound, 600)
            .unwrap();
        track.media_mut().sample_table_mut().add_sample_references(
            5,
            0,
            64,
            60,
            0,
            1,
            SampleFlags::default(),
        );

        let mut out = Vec::new();
        dump_track_samples(&movie, 1, 1, 0, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        // Header plus 5 samples.
        assert_eq!(text.lines().count(), 6);

        let mut out = Vec::new();
        dump_track_samples(&movie, 1, 2, 3, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 3);

        assert!(dump_track_samples(&movie, 9, 1, 0, &mut Vec::new()).is_err());
    }

    #[test]
    fn container_dump_is_indented() {
        let mut container = AtomContainer::new();
        let parent = container
            .insert(Atom::container(FourCC::new(b"sprt"), 1))
            .unwrap();
        parent
            .insert_child(Atom::leaf(FourCC::new(b"imag"), 1, vec![0; 8]))
            .unwrap();
        container.insert_auto_id(FourCC::new(b"dflt"), AtomData::Leaf(vec![1]));

        let mut out = Vec::new();
        dump_container(&container, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "sprt #1");
        assert_eq!(lines[1], "  imag #1 [8 bytes]");
        assert_eq!(lines[2], "dflt #1 [1 bytes]");
    }
}
