//! Reading the BSA directory structure.
//!
//! ## Layout
//!
//! 1. Header (36 bytes)
//! 2. One 16-byte folder record per folder
//! 3. Per folder: its full path as a B-string, then one 16-byte file record
//!    per file. A folder record's offset points here, plus the total length
//!    of the file name table.
//! 4. The file name table: one null-terminated name per file, in folder order
//! 5. File data
//!
//! Folder blocks are located through the folder records, so the end of the
//! last block (where the name table starts) is tracked while reading them.

use std::io::Cursor;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::io::{ReadAt, read_vec_at};

use super::archive::{Archive, HashMismatch};
use super::codec::{read_bstring, read_zstring};
use super::entry::{ArchiveData, FileEntry};
use super::hash::name_hash;
use super::structures::*;
use super::tree::{FileRef, FolderId, FolderTree};

/// Parser for the directory part of an archive.
pub struct ArchiveParser {
    reader: Arc<dyn ReadAt>,
    size: u64,
}

/// Files a folder record contributed, for resolving names afterwards.
struct PlacedFolder {
    folder: FolderId,
    first_file: usize,
    file_count: usize,
}

impl ArchiveParser {
    pub fn new(reader: Arc<dyn ReadAt>) -> Self {
        let size = reader.size();
        Self { reader, size }
    }

    pub async fn read_header(&self) -> Result<Header> {
        let buf = read_vec_at(self.reader.as_ref(), 0, Header::SIZE).await?;
        let header = Header::from_bytes(&buf)?;

        debug!(
            "Archive header: type={:?} flags={:?} folders={} files={} folder_names={} file_names={}",
            header.archive_type,
            header.archive_flags,
            header.folder_count,
            header.file_count,
            header.folder_names_length,
            header.file_names_length
        );

        Ok(header)
    }

    pub async fn read_folder_records(&self, header: &Header) -> Result<Vec<FolderRecord>> {
        let len = header.folder_count as u64 * FolderRecord::SIZE as u64;
        if Header::SIZE as u64 + len > self.size {
            return Err(Error::invalid(format!(
                "{} folder records do not fit in a {} byte archive",
                header.folder_count, self.size
            )));
        }

        let buf = read_vec_at(self.reader.as_ref(), Header::SIZE as u64, len as usize).await?;
        let mut cursor = Cursor::new(&buf[..]);
        (0..header.folder_count)
            .map(|_| FolderRecord::read(&mut cursor))
            .collect()
    }

    /// Read a folder's path and file records. Returns them together with the
    /// offset just past the block.
    async fn read_folder_block(
        &self,
        record: &FolderRecord,
        header: &Header,
    ) -> Result<(Option<String>, Vec<FileRecord>, u64)> {
        let offset = (record.offset as u64)
            .checked_sub(header.file_names_length as u64)
            .ok_or_else(|| {
                Error::invalid(format!(
                    "folder {:016x} points before the start of the archive",
                    record.name_hash
                ))
            })?;

        let has_name = header.archive_flags.contains(ArchiveFlags::HAS_FOLDER_NAMES);
        let name_len = if has_name {
            1 + read_vec_at(self.reader.as_ref(), offset, 1).await?[0] as u64
        } else {
            0
        };

        let len = name_len + record.file_count as u64 * FileRecord::SIZE as u64;
        if offset + len > self.size {
            return Err(Error::invalid(format!(
                "block of folder {:016x} runs past the end of the archive",
                record.name_hash
            )));
        }
        let buf = read_vec_at(self.reader.as_ref(), offset, len as usize).await?;
        let mut cursor = Cursor::new(&buf[..]);
        let name = if has_name {
            Some(read_bstring(&mut cursor)?)
        } else {
            None
        };
        let files = (0..record.file_count)
            .map(|_| FileRecord::read(&mut cursor))
            .collect::<Result<Vec<_>>>()?;

        Ok((name, files, offset + len))
    }

    /// Parse the whole directory structure into an [`Archive`].
    pub async fn parse(&self, verify_hashes: bool) -> Result<Archive> {
        self.parse_inner(verify_hashes).await.map_err(|e| match e {
            Error::Io(io) => Error::invalid(io.to_string()),
            other => other,
        })
    }

    async fn parse_inner(&self, verify_hashes: bool) -> Result<Archive> {
        let header = self.read_header().await?;
        let records = self.read_folder_records(&header).await?;

        let name_prefixed = header.archive_type.supports_name_prefix()
            && header.archive_flags.contains(ArchiveFlags::NAME_PREFIXED);

        let mut tree = FolderTree::new();
        let mut placed = Vec::with_capacity(records.len());
        let mut end_pos = Header::SIZE as u64 + records.len() as u64 * FolderRecord::SIZE as u64;

        for record in &records {
            let (name, files, block_end) = self.read_folder_block(record, &header).await?;
            end_pos = end_pos.max(block_end);

            let path = name.unwrap_or_else(|| format!("{:016x}", record.name_hash));
            let folder = tree.insert_path(&path);
            tree.folder_mut(folder).set_name_hash(record.name_hash);
            trace!("Placed folder {} with {} files", path, files.len());

            let first_file = tree.folder(folder).num_files();
            for file in &files {
                if file.offset as u64 + file.size as u64 > self.size {
                    return Err(Error::invalid(format!(
                        "data of file {:016x} in {} runs past the end of the archive",
                        file.name_hash, path
                    )));
                }
                let data = ArchiveData::new(
                    self.reader.clone(),
                    file.offset as u64,
                    file.size,
                    name_prefixed,
                );
                tree.add_file(folder, FileEntry::from_record(file, data));
            }

            placed.push(PlacedFolder {
                folder,
                first_file,
                file_count: files.len(),
            });
        }

        let hash_mismatches = if header.archive_flags.contains(ArchiveFlags::HAS_FILE_NAMES) {
            self.resolve_file_names(&mut tree, &placed, &header, end_pos, verify_hashes)
                .await?
        } else {
            name_files_by_hash(&mut tree, &placed);
            Vec::new()
        };

        if !hash_mismatches.is_empty() {
            warn!("{} file name hashes do not match", hash_mismatches.len());
        }

        Ok(Archive {
            reader: Some(self.reader.clone()),
            path: None,
            tree,
            archive_type: header.archive_type,
            flags: header.archive_flags,
            file_flags: header.file_flags,
            hash_mismatches,
        })
    }

    /// Read the file name table that follows the last folder block and give
    /// every file its name, in folder record order.
    async fn resolve_file_names(
        &self,
        tree: &mut FolderTree,
        placed: &[PlacedFolder],
        header: &Header,
        table_start: u64,
        verify_hashes: bool,
    ) -> Result<Vec<HashMismatch>> {
        // Writers disagree on whether the declared length counts terminators
        let table_len = (header.file_names_length as u64 + header.file_count as u64)
            .min(self.size.saturating_sub(table_start));
        let table = read_vec_at(self.reader.as_ref(), table_start, table_len as usize).await?;
        let mut cursor = Cursor::new(&table[..]);

        let mut mismatched = Vec::new();
        for placed_folder in placed {
            for index in placed_folder.first_file..placed_folder.first_file + placed_folder.file_count {
                let file = FileRef {
                    folder: placed_folder.folder,
                    index,
                };
                let name = read_zstring(&mut cursor)
                    .map_err(|_| Error::invalid("file name table is truncated"))?;

                if let Some(entry) = tree.file_mut(file) {
                    if verify_hashes {
                        let computed = name_hash(&name);
                        if computed != entry.name_hash() {
                            mismatched.push((file, entry.name_hash(), computed));
                        }
                    }
                    entry.set_name(name);
                }
            }
        }

        let mismatches = mismatched
            .into_iter()
            .map(|(file, stored, computed)| {
                let path = tree.file_path(file).unwrap_or_default();
                warn!(
                    "Name hash mismatch for {}: stored {:016x}, computed {:016x}",
                    path, stored, computed
                );
                HashMismatch {
                    path,
                    stored,
                    computed,
                }
            })
            .collect::<Vec<_>>();

        Ok(mismatches)
    }
}

/// Archives without a name table only know their files by hash.
fn name_files_by_hash(tree: &mut FolderTree, placed: &[PlacedFolder]) {
    for placed_folder in placed {
        for index in placed_folder.first_file..placed_folder.first_file + placed_folder.file_count {
            let file = FileRef {
                folder: placed_folder.folder,
                index,
            };
            if let Some(entry) = tree.file_mut(file) {
                let name = format!("{:016x}", entry.name_hash());
                entry.set_name(name);
            }
        }
    }
}
