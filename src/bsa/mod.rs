//! BSA archive reading, writing and extraction.
//!
//! ## Architecture
//!
//! - [`structures`]: header and record layouts, archive type and flags
//! - [`hash`]: the name hash that keys folders and files
//! - [`tree`]: the folder hierarchy rebuilt from stored folder paths
//! - [`parser`]: reading an archive's directory
//! - [`archive`]: the in-memory archive and the API for building one
//! - `writer`, `extractor`, `pipeline`: writing, single file extraction and
//!   bulk extraction, as methods on [`Archive`]
//!
//! ## Format Overview
//!
//! A BSA file consists of:
//! 1. A fixed 36 byte header
//! 2. One record per folder (name hash, file count, offset of its block)
//! 3. Per folder, its path followed by one record per file (name hash,
//!    size, data offset)
//! 4. A table with the name of every file
//! 5. The file data, each block optionally zlib compressed
//!
//! Only folders that directly hold files are stored. Whether a file is
//! compressed is the archive default, flipped by a bit in the file's size.
//!
//! ## Supported Versions
//!
//! - Oblivion (version 0x67)
//! - Fallout 3, Fallout: New Vegas and Skyrim (version 0x68), including
//!   name prefixed data blocks

pub mod archive;
pub mod codec;
pub mod compression;
pub mod entry;
pub mod extractor;
pub mod hash;
pub mod parser;
pub mod pipeline;
pub mod structures;
pub mod tree;
mod writer;

pub use archive::{Archive, HashMismatch, ReadStatus};
pub use entry::{ArchiveData, FileEntry, FileSource};
pub use extractor::CHUNK_SIZE;
pub use hash::name_hash;
pub use parser::ArchiveParser;
pub use pipeline::{CancellationToken, ExtractFailure, ExtractOptions, ExtractReport};
pub use structures::*;
pub use tree::{FileRef, Folder, FolderId, FolderTree};
