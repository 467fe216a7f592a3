use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::io::{LocalFileReader, ReadAt};

use super::entry::FileEntry;
use super::parser::ArchiveParser;
use super::structures::{ArchiveFlags, ArchiveType, FileFlags};
use super::tree::{FileRef, Folder, FolderId, FolderTree};

/// Outcome of reading an archive whose structure was valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    Valid,
    /// Some stored name hashes did not match their names. All names were
    /// still read, but hash based lookups cannot be trusted.
    InvalidHashes { count: usize },
}

impl ReadStatus {
    pub fn is_valid(&self) -> bool {
        matches!(self, ReadStatus::Valid)
    }

    pub fn into_result(self) -> Result<()> {
        match self {
            ReadStatus::Valid => Ok(()),
            ReadStatus::InvalidHashes { count } => Err(Error::InvalidHashes { count }),
        }
    }
}

/// A file whose stored hash does not match the hash of its name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashMismatch {
    pub path: String,
    pub stored: u64,
    pub computed: u64,
}

/// A BSA archive: folder tree, archive-wide settings and, once read or
/// written, the file backing it.
pub struct Archive {
    pub(super) reader: Option<Arc<dyn ReadAt>>,
    pub(super) path: Option<PathBuf>,
    pub(super) tree: FolderTree,
    pub(super) archive_type: ArchiveType,
    pub(super) flags: ArchiveFlags,
    pub(super) file_flags: FileFlags,
    pub(super) hash_mismatches: Vec<HashMismatch>,
}

impl Default for Archive {
    fn default() -> Self {
        Self::new()
    }
}

impl Archive {
    /// Empty archive of the default type, with folder and file names enabled.
    pub fn new() -> Self {
        Self::with_type(ArchiveType::default())
    }

    pub fn with_type(archive_type: ArchiveType) -> Self {
        Self {
            reader: None,
            path: None,
            tree: FolderTree::new(),
            archive_type,
            flags: ArchiveFlags::default(),
            file_flags: FileFlags::empty(),
            hash_mismatches: Vec::new(),
        }
    }

    /// Open and parse an archive file.
    ///
    /// With `verify_hashes` set, every file name is hashed and compared with
    /// the stored hash; mismatches are reported through [`status`](Self::status)
    /// rather than failing the read.
    pub async fn open(path: impl AsRef<Path>, verify_hashes: bool) -> Result<Self> {
        let path = path.as_ref();
        let reader: Arc<dyn ReadAt> = Arc::new(LocalFileReader::new(path)?);
        let mut archive = Self::from_reader(reader, verify_hashes).await?;
        archive.path = Some(path.to_path_buf());
        Ok(archive)
    }

    /// Parse an archive from any random access source.
    pub async fn from_reader(reader: Arc<dyn ReadAt>, verify_hashes: bool) -> Result<Self> {
        ArchiveParser::new(reader).parse(verify_hashes).await
    }

    /// Reader over the file backing this archive, if any.
    pub fn source(&self) -> Option<&Arc<dyn ReadAt>> {
        self.reader.as_ref()
    }

    /// Path of the file backing this archive, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn archive_type(&self) -> ArchiveType {
        self.archive_type
    }

    pub fn set_type(&mut self, archive_type: ArchiveType) {
        self.archive_type = archive_type;
    }

    pub fn flags(&self) -> ArchiveFlags {
        self.flags
    }

    /// Content hint from the header of a parsed archive.
    pub fn file_flags(&self) -> FileFlags {
        self.file_flags
    }

    pub fn default_compressed(&self) -> bool {
        self.flags.contains(ArchiveFlags::DEFAULT_COMPRESSED)
    }

    /// Change the default compression. Only allowed while every entry is a
    /// loose file, since stored data cannot be reinterpreted.
    pub fn set_default_compressed(&mut self, compressed: bool) -> Result<()> {
        self.ensure_no_stored_entries("change default compression")?;
        self.flags.set(ArchiveFlags::DEFAULT_COMPRESSED, compressed);
        Ok(())
    }

    /// Whether file data blocks start with the file's own path.
    pub fn name_prefixed(&self) -> bool {
        self.archive_type.supports_name_prefix() && self.flags.contains(ArchiveFlags::NAME_PREFIXED)
    }

    /// Request name prefixes on write. Has no effect for Oblivion archives.
    pub fn set_name_prefixed(&mut self, prefixed: bool) {
        self.flags.set(ArchiveFlags::NAME_PREFIXED, prefixed);
    }

    /// Whether a file's data is compressed in this archive.
    pub fn is_compressed(&self, entry: &FileEntry) -> bool {
        self.default_compressed() != entry.compression_toggled()
    }

    pub fn status(&self) -> ReadStatus {
        if self.hash_mismatches.is_empty() {
            ReadStatus::Valid
        } else {
            ReadStatus::InvalidHashes {
                count: self.hash_mismatches.len(),
            }
        }
    }

    pub fn hash_mismatches(&self) -> &[HashMismatch] {
        &self.hash_mismatches
    }

    pub fn tree(&self) -> &FolderTree {
        &self.tree
    }

    pub fn root(&self) -> FolderId {
        self.tree.root()
    }

    pub fn folder(&self, id: FolderId) -> &Folder {
        self.tree.folder(id)
    }

    pub fn file(&self, file: FileRef) -> Option<&FileEntry> {
        self.tree.file(file)
    }

    pub fn file_path(&self, file: FileRef) -> Option<String> {
        self.tree.file_path(file)
    }

    pub fn count_files(&self) -> usize {
        self.tree.count_files(self.tree.root())
    }

    /// Full paths of all folders that hold files.
    pub fn folder_names(&self) -> Vec<String> {
        self.tree.folder_names()
    }

    /// Names of all files in the archive.
    pub fn file_names(&self) -> Vec<String> {
        self.tree.file_names()
    }

    /// Get or create a folder below `parent` by path.
    pub fn add_folder(&mut self, parent: FolderId, path: &str) -> FolderId {
        self.tree.add_folder(parent, path)
    }

    /// Create an entry for a loose file. The entry is not placed anywhere
    /// yet, use [`add_file`](Self::add_file) for that.
    pub fn create_file(&self, name: &str, source: impl Into<PathBuf>, compressed: bool) -> FileEntry {
        FileEntry::loose(name, source, compressed != self.default_compressed())
    }

    /// Copy an entry out of another archive so it can be added to this one.
    /// Its data is copied as stored when this archive is written.
    pub fn copy_file(&self, from: &Archive, file: FileRef) -> Result<FileEntry> {
        let mut entry = from
            .file(file)
            .ok_or_else(|| Error::invalid(format!("no file at {file:?} in source archive")))?
            .clone();
        let compressed = from.is_compressed(&entry);
        entry.set_compression_toggled(compressed != self.default_compressed());
        Ok(entry)
    }

    pub fn add_file(&mut self, folder: FolderId, entry: FileEntry) -> FileRef {
        self.tree.add_file(folder, entry)
    }

    /// Choose whether a loose file is compressed when the archive is written.
    pub fn set_compressed(&mut self, file: FileRef, compressed: bool) -> Result<()> {
        let default = self.default_compressed();
        let entry = self
            .tree
            .file_mut(file)
            .ok_or_else(|| Error::invalid(format!("no file at {file:?}")))?;
        if !entry.is_pending() {
            return Err(Error::invalid(format!(
                "stored file {} cannot change compression",
                entry.name()
            )));
        }
        entry.set_compression_toggled(compressed != default);
        Ok(())
    }

    fn ensure_no_stored_entries(&self, action: &str) -> Result<()> {
        let stored = self
            .tree
            .collect_files()
            .into_iter()
            .filter_map(|file| self.tree.file(file))
            .any(|entry| !entry.is_pending());
        if stored {
            return Err(Error::invalid(format!(
                "cannot {action}: archive holds stored files"
            )));
        }
        Ok(())
    }
}
