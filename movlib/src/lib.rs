//! Read, edit and write QuickTime movie containers.
//!
//! The model is the classic movie toolbox one: a [`Movie`](crate::movie::Movie)
//! holds tracks, every track holds one [`Media`](crate::movie::Media), and a
//! media locates its data through a [`SampleTable`](crate::sample_table::SampleTable).
//! Around that sit edit lists, timebases, user data, a unified metadata
//! store, and the QT atom container format.
//!
//! This prints some `mediainfo` like info for a movie file:
//!
//! ```no_run
//! use movlib::resource::MovieResource;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let file = std::env::args().next().expect("expected filename");
//!
//!     let res = MovieResource::open(&file)?;
//!     let info = movlib::info::movie_info(&res.movie);
//!     println!("{:#?}", info);
//!
//!     Ok(())
//! }
//! ```
//!
//! In general, you start with [`MovieResource::open`](crate::resource::MovieResource::open),
//! which parses the `moov` atom into a [`Movie`](crate::movie::Movie). From
//! there you can inspect and edit the tracks, and write the whole thing
//! back out with [`MovieResource::write`](crate::resource::MovieResource::write).
//!
#[macro_use]
mod ioerr;
#[macro_use]
pub mod serialize;
#[macro_use]
pub mod types;
pub mod atom;
pub mod audio;
pub mod container;
pub mod debug;
pub mod desc;
pub mod info;
pub mod io;
pub mod meta;
pub mod movie;
pub mod resource;
pub mod sample_table;
pub mod timebase;
pub mod udta;

pub use crate::io::MovieFile;
pub use crate::movie::Movie;
pub use crate::resource::MovieResource;
