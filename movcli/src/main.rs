use std::io::{self, BufWriter, Write};

use anyhow::{anyhow, Result};
use clap;
use structopt::StructOpt;

use movlib::debug;
use movlib::info;
use movlib::meta::StorageFormat;
use movlib::resource::MovieResource;

#[derive(StructOpt, Debug)]
#[structopt(setting = clap::AppSettings::VersionlessSubcommands)]
pub struct MainOpts {
    #[structopt(long)]
    /// Log options (like RUSTLOG; trace, debug, info etc)
    pub log: Option<String>,
    #[structopt(subcommand)]
    pub cmd: Command,
}

#[derive(StructOpt, Debug)]
#[structopt(rename_all = "kebab-case")]
pub enum Command {
    #[structopt(display_order = 1)]
    /// Media information.
    Info(InfoOpts),

    #[structopt(display_order = 2)]
    /// Rewrite the movie file.
    Rewrite(RewriteOpts),

    #[structopt(display_order = 3)]
    /// Dump a track's raw sample data to stdout.
    Dump(DumpOpts),

    #[structopt(display_order = 4)]
    /// Show per-sample information for a track.
    Samples(SamplesOpts),

    #[structopt(display_order = 5)]
    /// Show the metadata items.
    Meta(MetaOpts),
}

#[derive(StructOpt, Debug)]
pub struct InfoOpts {
    #[structopt(short, long)]
    /// Select track.
    pub track: Option<u32>,

    #[structopt(short, long)]
    /// Short output, 1 line per track.
    pub short: bool,

    #[structopt(short, long)]
    /// Output in JSON
    pub json: bool,

    /// Input filename.
    pub input: String,
}

#[derive(StructOpt, Debug)]
pub struct RewriteOpts {
    /// Input filename.
    pub input:  String,
    /// Output filename.
    pub output: String,
}

#[derive(StructOpt, Debug)]
pub struct DumpOpts {
    #[structopt(short, long)]
    /// Select a track.
    pub track: u32,

    /// Input filename.
    pub input: String,
}

#[derive(StructOpt, Debug)]
pub struct SamplesOpts {
    #[structopt(short, long)]
    /// Select a track.
    pub track: u32,

    #[structopt(long, default_value = "1")]
    /// First sample to show.
    pub from: u64,

    #[structopt(long, default_value = "0")]
    /// Last sample to show.
    pub to: u64,

    /// Input filename.
    pub input: String,
}

#[derive(StructOpt, Debug)]
pub struct MetaOpts {
    /// Input filename.
    pub input: String,
}

fn main() -> Result<()> {
    let opts = MainOpts::from_args();

    let mut builder = env_logger::Builder::new();
    if let Some(ref log_opts) = opts.log {
        builder.parse_filters(log_opts);
    } else if let Ok(ref log_opts) = std::env::var("RUST_LOG") {
        builder.parse_filters(log_opts);
    } else {
        builder.parse_filters("info");
    }
    builder.init();

    match opts.cmd {
        Command::Dump(opts) => return dump(opts),
        Command::Info(opts) => return mediainfo(opts),
        Command::Meta(opts) => return meta(opts),
        Command::Rewrite(opts) => return rewrite(opts),
        Command::Samples(opts) => return samples(opts),
    }
}

fn rewrite(opts: RewriteOpts) -> Result<()> {
    let res = MovieResource::open(&opts.input)?;
    res.write(&opts.output)?;
    Ok(())
}

fn short(track: &info::TrackInfo) {
    println!(
        "{}. type [{}], length {:?}, lang {}, codec {}",
        track.id, track.track_type, track.duration, track.language, track.specific_info
    );
}

fn mediainfo(opts: InfoOpts) -> Result<()> {
    let res = MovieResource::open(&opts.input)?;
    let movie_info = info::movie_info(&res.movie);

    if let Some(track) = opts.track {
        for t in &movie_info.tracks {
            if t.id == track {
                if opts.json {
                    let json = if opts.short {
                        serde_json::to_string(t)?
                    } else {
                        serde_json::to_string_pretty(t)?
                    };
                    println!("{}", json);
                } else if opts.short {
                    short(t);
                } else {
                    println!("{:#?}", t);
                }
            }
        }
        return Ok(());
    }

    if opts.short {
        for t in &movie_info.tracks {
            if opts.json {
                let json = serde_json::to_string(t)?;
                println!("{}", json);
            } else {
                short(t);
            }
        }
    } else if opts.json {
        let json = serde_json::to_string_pretty(&movie_info)?;
        println!("{}", json);
    } else {
        println!("{:#?}", movie_info);
    }

    Ok(())
}

fn dump(opts: DumpOpts) -> Result<()> {
    let res = MovieResource::open(&opts.input)?;
    let source = res
        .source()
        .ok_or_else(|| anyhow!("dump: {}: no sample data", opts.input))?;

    let track = res
        .movie
        .track_by_id(opts.track)
        .ok_or_else(|| anyhow!("dump: track id {} not found", opts.track))?;

    let stdout = io::stdout();
    let mut handle = BufWriter::with_capacity(128000, stdout.lock());

    for sample_info in track.media().sample_table().sample_info_iter() {
        let start = sample_info.data_offset as usize;
        let end = start + sample_info.size as usize;
        if end as u64 > source.len() {
            return Err(anyhow!("dump: sample {} outside the file", sample_info.sample));
        }
        handle.write_all(&source[start..end])?;
    }

    Ok(())
}

fn samples(opts: SamplesOpts) -> Result<()> {
    let res = MovieResource::open(&opts.input)?;
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    debug::dump_track_samples(&res.movie, opts.track, opts.from, opts.to, &mut handle)?;
    Ok(())
}

fn meta(opts: MetaOpts) -> Result<()> {
    let res = MovieResource::open(&opts.input)?;
    let store = &res.movie.metadata;
    if store.is_empty() {
        println!("no metadata");
        return Ok(());
    }

    for item in store.iter() {
        let key = match item.common_key() {
            Some(key) => format!("{:?}", key),
            None => match item.key_fourcc() {
                Some(fourcc) => fourcc.to_string(),
                None => String::from_utf8_lossy(&item.key).to_string(),
            },
        };
        let storage = match item.storage {
            StorageFormat::UserData => "udta",
            StorageFormat::Itunes => "itms",
            StorageFormat::QuickTime => "mdta",
        };
        match item.value_str() {
            Some(text) => println!("{:>4}  {}  {:<16} {:?}", item.handle(), storage, key, text),
            None => println!(
                "{:>4}  {}  {:<16} [{} bytes]",
                item.handle(),
                storage,
                key,
                item.value.len()
            ),
        }
    }

    Ok(())
}
