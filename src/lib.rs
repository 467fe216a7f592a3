//! # rbsa
//!
//! Read, extract and build Bethesda BSA archives (Oblivion, Fallout 3,
//! Fallout: New Vegas, Skyrim).
//!
//! Archives are read through the [`ReadAt`] trait, so only the directory is
//! loaded up front and file data is read on demand. Extraction of a whole
//! archive overlaps reading with decompressing and writing, and can be
//! stopped from a progress callback.
//!
//! ## Features
//!
//! - Folder hierarchy rebuilt from the stored folder paths
//! - Name hash validation while reading
//! - Per-file zlib compression, on read and on write
//! - Name prefixed data blocks (Fallout 3 and later)
//! - Building archives from loose files or from files of other archives
//!
//! ## Example
//!
//! ```no_run
//! use rbsa::{Archive, ExtractOptions};
//!
//! #[tokio::main]
//! async fn main() -> rbsa::Result<()> {
//!     let archive = Archive::open("Meshes.bsa", true).await?;
//!     for folder in archive.folder_names() {
//!         println!("{folder}");
//!     }
//!
//!     let report = archive
//!         .extract_all("out", &ExtractOptions::default(), |percent, file| {
//!             println!("{percent:>3}% {file}");
//!             true
//!         })
//!         .await?;
//!     println!("{} files written", report.written);
//!     Ok(())
//! }
//! ```

pub mod bsa;
pub mod cli;
pub mod error;
pub mod io;

pub use bsa::{
    Archive, ArchiveType, ExtractOptions, ExtractReport, FileEntry, FileRef, FolderId,
    ReadStatus, name_hash,
};
pub use cli::Cli;
pub use error::{Error, Result};
pub use io::{LocalFileReader, ReadAt};
