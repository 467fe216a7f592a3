//! Writing an archive to disk.
//!
//! The directory (folder records, folder blocks) embeds the offset and size
//! of every data block, which are only known once the data has been written.
//! The directory is therefore written twice: first with zeroed placements so
//! that the name table and data land at their final positions, then again
//! over the first copy once every placement is known.
//!
//! Everything goes to a temporary file next to the destination, which
//! replaces the destination only once it is complete. Entries copied from the
//! archive being replaced keep reading from the old file until then.

use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::fs::{self, File};
use tokio::io::{AsyncSeekExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::io::{LocalFileReader, ReadAt};

use super::archive::Archive;
use super::codec::{MAX_BSTRING_LEN, encode_name, write_bstring, write_prefix, write_zstring};
use super::compression::compress;
use super::entry::{ArchiveData, FileEntry, FileSource};
use super::extractor::copy_payload;
use super::hash::name_hash;
use super::structures::*;
use super::tree::{FileRef, FolderId};

/// Largest data block a file record can describe; the bit above carries the
/// compression toggle.
const MAX_BLOCK_SIZE: u64 = FileRecord::COMPRESSION_TOGGLE as u64 - 1;

/// A folder as it will appear on disk.
struct FolderPlan {
    id: FolderId,
    path: String,
    hash: u64,
    /// Files in on-disk order.
    files: Vec<FileRef>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Placement {
    offset: u32,
    size: u32,
}

impl Archive {
    /// Write the archive to `path`.
    ///
    /// Folders are written ordered by the hash of their path, files by the
    /// hash of their name. Loose files that are to be compressed are deflated
    /// on the way; data from other archives is copied as stored. When the
    /// archive is name prefixed every data block starts with the file's path.
    ///
    /// On success the archive is backed by the new file and every entry,
    /// including former loose files, points at its data block there.
    pub async fn write(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let plan = self.plan_folders()?;
        let header = self.build_header(&plan)?;
        let prefixed = self.name_prefixed();
        let mut placements: Vec<Vec<Placement>> = plan
            .iter()
            .map(|folder| vec![Placement::default(); folder.files.len()])
            .collect();

        debug!(
            "Writing {} folders and {} files to {}",
            header.folder_count,
            header.file_count,
            path.display()
        );

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let (file, temp_path) = NamedTempFile::new_in(dir)
            .map_err(|source| Error::AccessFailed {
                path: path.to_path_buf(),
                source,
            })?
            .into_parts();
        let mut out = BufWriter::new(File::from_std(file));

        let mut head = Vec::with_capacity(Header::SIZE);
        header.write_to(&mut head)?;
        out.write_all(&head).await?;

        let directory = self.encode_directory(&plan, &header, &placements)?;
        out.write_all(&directory).await?;

        let mut table = Vec::new();
        if header.archive_flags.contains(ArchiveFlags::HAS_FILE_NAMES) {
            for folder in &plan {
                for &file in &folder.files {
                    write_zstring(&mut table, self.planned_entry(file)?.name())?;
                }
            }
            out.write_all(&table).await?;
        }

        let mut position = (Header::SIZE + directory.len() + table.len()) as u64;
        for (folder, placed) in plan.iter().zip(placements.iter_mut()) {
            for (&file, placement) in folder.files.iter().zip(placed.iter_mut()) {
                let size = self.write_file_data(&mut out, file, prefixed).await?;
                if size > MAX_BLOCK_SIZE {
                    return Err(Error::invalid(format!(
                        "{} is too large for an archive ({size} bytes)",
                        self.tree.file_path(file).unwrap_or_default()
                    )));
                }
                if position + size > u32::MAX as u64 {
                    return Err(Error::invalid("archive data exceeds 4 GiB"));
                }
                trace!("Placed {:?} at {:#x}, {} bytes", file, position, size);
                *placement = Placement {
                    offset: position as u32,
                    size: size as u32,
                };
                position += size;
            }
        }

        let directory = self.encode_directory(&plan, &header, &placements)?;
        out.seek(SeekFrom::Start(Header::SIZE as u64)).await?;
        out.write_all(&directory).await?;
        out.flush().await?;
        out.into_inner().sync_all().await?;

        temp_path.persist(path).map_err(|e| Error::AccessFailed {
            path: path.to_path_buf(),
            source: e.error,
        })?;

        self.rebind(path, &plan, &placements, &header, prefixed)
    }

    fn planned_entry(&self, file: FileRef) -> Result<&FileEntry> {
        self.tree
            .file(file)
            .ok_or_else(|| Error::invalid(format!("no file at {file:?}")))
    }

    fn plan_folders(&self) -> Result<Vec<FolderPlan>> {
        let has_folder_names = self.flags.contains(ArchiveFlags::HAS_FOLDER_NAMES);
        let mut plan = Vec::new();

        for id in self.tree.collect_folders() {
            let path = self.tree.full_path(id);
            if stored_len(&path)? > MAX_BSTRING_LEN as u64 {
                return Err(Error::invalid(format!("folder path too long: {path}")));
            }

            let folder = self.tree.folder(id);
            let hash = if has_folder_names {
                name_hash(&path)
            } else {
                folder.name_hash()
            };

            let mut files: Vec<FileRef> = (0..folder.num_files())
                .map(|index| FileRef { folder: id, index })
                .collect();
            files.sort_by_cached_key(|file| {
                let entry = &folder.files()[file.index];
                (entry.name_hash(), entry.name().to_ascii_lowercase())
            });

            plan.push(FolderPlan {
                id,
                path,
                hash,
                files,
            });
        }

        plan.sort_by(|a, b| a.hash.cmp(&b.hash).then_with(|| a.path.cmp(&b.path)));
        Ok(plan)
    }

    fn build_header(&self, plan: &[FolderPlan]) -> Result<Header> {
        let mut file_count = 0u64;
        let mut folder_names_length = 0u64;
        let mut file_names_length = 0u64;
        let mut file_flags = FileFlags::empty();

        for folder in plan {
            folder_names_length += stored_len(&folder.path)?;
            for &file in &folder.files {
                let name = self.planned_entry(file)?.name();
                file_count += 1;
                file_names_length += stored_len(name)?;
                file_flags |= FileFlags::for_name(name);
            }
        }

        let mut archive_flags = self.flags;
        if !self.archive_type.supports_name_prefix() {
            archive_flags.remove(ArchiveFlags::NAME_PREFIXED);
        }

        Ok(Header {
            archive_type: self.archive_type,
            header_size: Header::SIZE as u32,
            archive_flags,
            folder_count: to_u32(plan.len() as u64, "folder count")?,
            file_count: to_u32(file_count, "file count")?,
            folder_names_length: to_u32(folder_names_length, "folder name length")?,
            file_names_length: to_u32(file_names_length, "file name length")?,
            file_flags,
        })
    }

    /// Folder records followed by the folder blocks.
    fn encode_directory(
        &self,
        plan: &[FolderPlan],
        header: &Header,
        placements: &[Vec<Placement>],
    ) -> Result<Vec<u8>> {
        let has_folder_names = header.archive_flags.contains(ArchiveFlags::HAS_FOLDER_NAMES);
        let blocks_start = (Header::SIZE + plan.len() * FolderRecord::SIZE) as u64;

        let mut records = Vec::with_capacity(plan.len() * FolderRecord::SIZE);
        let mut blocks = Vec::new();

        for (folder, placed) in plan.iter().zip(placements) {
            let offset = blocks_start + blocks.len() as u64 + header.file_names_length as u64;
            FolderRecord {
                name_hash: folder.hash,
                file_count: folder.files.len() as u32,
                offset: to_u32(offset, "folder offset")?,
            }
            .write_to(&mut records)?;

            if has_folder_names {
                write_bstring(&mut blocks, &folder.path)?;
            }
            for (&file, placement) in folder.files.iter().zip(placed) {
                let entry = self.planned_entry(file)?;
                FileRecord {
                    name_hash: entry.name_hash(),
                    size: placement.size,
                    compression_toggled: entry.compression_toggled(),
                    offset: placement.offset,
                }
                .write_to(&mut blocks)?;
            }
        }

        records.extend_from_slice(&blocks);
        Ok(records)
    }

    /// Write one file's data block. Returns its stored size.
    async fn write_file_data<W>(&self, out: &mut W, file: FileRef, prefixed: bool) -> Result<u64>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let entry = self.planned_entry(file)?;
        let mut written = 0u64;

        if prefixed {
            let path = self.tree.file_path(file).unwrap_or_default();
            let mut prefix = Vec::new();
            write_prefix(&mut prefix, &path).map_err(|e| Error::invalid(e.to_string()))?;
            out.write_all(&prefix).await?;
            written += prefix.len() as u64;
        }

        written += match entry.source() {
            FileSource::Archive(data) => copy_payload(data, out).await?,
            FileSource::Pending(source) if self.is_compressed(entry) => {
                write_compressed(out, source).await?
            }
            FileSource::Pending(source) => copy_loose(out, source).await?,
        };

        Ok(written)
    }

    fn rebind(
        &mut self,
        path: &Path,
        plan: &[FolderPlan],
        placements: &[Vec<Placement>],
        header: &Header,
        prefixed: bool,
    ) -> Result<()> {
        let reader: Arc<dyn ReadAt> = Arc::new(LocalFileReader::new(path)?);

        for (folder, placed) in plan.iter().zip(placements) {
            self.tree.folder_mut(folder.id).set_name_hash(folder.hash);
            for (&file, placement) in folder.files.iter().zip(placed) {
                if let Some(entry) = self.tree.file_mut(file) {
                    entry.resolve(ArchiveData::new(
                        reader.clone(),
                        placement.offset as u64,
                        placement.size,
                        prefixed,
                    ));
                }
            }
        }

        self.reader = Some(reader);
        self.path = Some(path.to_path_buf());
        self.flags = header.archive_flags;
        self.file_flags = header.file_flags;
        Ok(())
    }
}

async fn copy_loose<W>(out: &mut W, source: &Path) -> Result<u64>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut file = File::open(source)
        .await
        .map_err(|_| Error::SourceFileMissing(source.to_path_buf()))?;
    Ok(tokio::io::copy(&mut file, out).await?)
}

async fn write_compressed<W>(out: &mut W, source: &Path) -> Result<u64>
where
    W: AsyncWrite + Unpin + Send,
{
    let data = fs::read(source)
        .await
        .map_err(|_| Error::SourceFileMissing(source.to_path_buf()))?;
    let block = tokio::task::spawn_blocking(move || compress(&data)).await??;
    out.write_all(&block).await?;
    Ok(block.len() as u64)
}

/// Length of a name in the archive's code page.
fn stored_len(name: &str) -> Result<u64> {
    let bytes = encode_name(name).map_err(|e| Error::invalid(e.to_string()))?;
    Ok(bytes.len() as u64)
}

fn to_u32(value: u64, what: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::invalid(format!("{what} {value} does not fit the format")))
}
