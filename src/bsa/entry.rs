use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::io::{ReadAt, read_exact_at, read_vec_at};

use super::hash::name_hash;
use super::structures::FileRecord;

/// Where a file's data lives.
#[derive(Debug, Clone)]
pub enum FileSource {
    /// Stored in an open archive; offset and size are known.
    Archive(ArchiveData),
    /// Loose file on disk. Its size is only learned when it is copied into
    /// an archive, after which the entry is re-bound to that archive.
    Pending(PathBuf),
}

/// Location of a data block inside an open archive.
#[derive(Clone)]
pub struct ArchiveData {
    reader: Arc<dyn ReadAt>,
    offset: u64,
    size: u32,
    name_prefixed: bool,
}

impl fmt::Debug for ArchiveData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveData")
            .field("offset", &self.offset)
            .field("size", &self.size)
            .field("name_prefixed", &self.name_prefixed)
            .finish()
    }
}

impl ArchiveData {
    pub(crate) fn new(reader: Arc<dyn ReadAt>, offset: u64, size: u32, name_prefixed: bool) -> Self {
        Self {
            reader,
            offset,
            size,
            name_prefixed,
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Stored size, including the name prefix if there is one
    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn name_prefixed(&self) -> bool {
        self.name_prefixed
    }

    pub(crate) fn reader(&self) -> &Arc<dyn ReadAt> {
        &self.reader
    }

    /// Offset and length of the data that follows the name prefix.
    pub async fn payload_range(&self) -> Result<(u64, u64)> {
        if !self.name_prefixed {
            return Ok((self.offset, self.size as u64));
        }

        let mut len = [0u8; 1];
        read_exact_at(self.reader.as_ref(), self.offset, &mut len).await?;
        let skip = 1 + len[0] as u64;
        if skip > self.size as u64 {
            return Err(Error::invalid(format!(
                "name prefix of {} bytes exceeds data block of {} bytes at {:#x}",
                skip, self.size, self.offset
            )));
        }
        Ok((self.offset + skip, self.size as u64 - skip))
    }

    /// Read the stored data block, without its name prefix.
    pub async fn read_payload(&self) -> Result<Vec<u8>> {
        let (offset, len) = self.payload_range().await?;
        read_vec_at(self.reader.as_ref(), offset, len as usize).await
    }
}

/// A single file stored in (or destined for) an archive.
#[derive(Debug, Clone)]
pub struct FileEntry {
    name: String,
    name_hash: u64,
    compression_toggled: bool,
    source: FileSource,
}

impl FileEntry {
    /// Entry read from a file record. The name is filled in later from the
    /// file name table.
    pub(crate) fn from_record(record: &FileRecord, data: ArchiveData) -> Self {
        Self {
            name: String::new(),
            name_hash: record.name_hash,
            compression_toggled: record.compression_toggled,
            source: FileSource::Archive(data),
        }
    }

    /// Entry backed by a loose file, read when the archive is written.
    pub fn loose(name: impl Into<String>, source: impl Into<PathBuf>, compression_toggled: bool) -> Self {
        let name = name.into();
        Self {
            name_hash: name_hash(&name),
            name,
            compression_toggled,
            source: FileSource::Pending(source.into()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn set_name(&mut self, name: String) {
        self.name = name;
    }

    pub fn name_hash(&self) -> u64 {
        self.name_hash
    }

    /// True if this file's compression differs from the archive default
    pub fn compression_toggled(&self) -> bool {
        self.compression_toggled
    }

    pub(crate) fn set_compression_toggled(&mut self, toggled: bool) {
        self.compression_toggled = toggled;
    }

    pub fn source(&self) -> &FileSource {
        &self.source
    }

    /// Stored size, or `None` while the entry is still backed by a loose file
    pub fn size(&self) -> Option<u32> {
        match &self.source {
            FileSource::Archive(data) => Some(data.size()),
            FileSource::Pending(_) => None,
        }
    }

    pub fn data_offset(&self) -> Option<u64> {
        match &self.source {
            FileSource::Archive(data) => Some(data.offset()),
            FileSource::Pending(_) => None,
        }
    }

    pub fn source_path(&self) -> Option<&Path> {
        match &self.source {
            FileSource::Pending(path) => Some(path),
            FileSource::Archive(_) => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.source, FileSource::Pending(_))
    }

    pub fn archive_data(&self) -> Option<&ArchiveData> {
        match &self.source {
            FileSource::Archive(data) => Some(data),
            FileSource::Pending(_) => None,
        }
    }

    /// Bind the entry to its block in a freshly written archive.
    pub(crate) fn resolve(&mut self, data: ArchiveData) {
        self.source = FileSource::Archive(data);
    }
}
