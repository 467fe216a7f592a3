use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::{Error, Result};
use crate::io::read_exact_at;

use super::archive::Archive;
use super::compression::decompress;
use super::entry::{ArchiveData, FileSource};
use super::tree::FileRef;

/// Size of the buffer used when copying data blocks.
pub const CHUNK_SIZE: usize = 128 * 1024;

impl Archive {
    /// Read a file's contents, decompressed if needed.
    pub async fn read_file(&self, file: FileRef) -> Result<Vec<u8>> {
        let entry = self
            .file(file)
            .ok_or_else(|| Error::invalid(format!("no file at {file:?}")))?;

        match entry.source() {
            FileSource::Archive(data) => {
                let raw = data.read_payload().await?;
                decode_payload(raw, self.is_compressed(entry)).await
            }
            FileSource::Pending(path) => fs::read(path)
                .await
                .map_err(|_| Error::SourceFileMissing(path.clone())),
        }
    }

    /// Extract a single file below `out_dir`, at its path inside the archive.
    /// Returns the path written.
    ///
    /// An existing file at the destination is replaced.
    pub async fn extract(&self, file: FileRef, out_dir: impl AsRef<Path>) -> Result<PathBuf> {
        let entry = self
            .file(file)
            .ok_or_else(|| Error::invalid(format!("no file at {file:?}")))?;
        let archive_path = self.file_path(file).unwrap_or_default();
        let target = output_path(out_dir.as_ref(), &archive_path);
        create_parent(&target).await?;

        debug!("Extracting {} to {}", archive_path, target.display());

        match entry.source() {
            FileSource::Archive(data) if !self.is_compressed(entry) => {
                let mut out = create_output(&target).await?;
                copy_payload(data, &mut out).await?;
                out.flush().await?;
            }
            FileSource::Archive(_) => {
                let data = self.read_file(file).await?;
                write_output(&target, &data).await?;
            }
            FileSource::Pending(source) => {
                fs::copy(source, &target)
                    .await
                    .map_err(|_| Error::SourceFileMissing(source.clone()))?;
            }
        }

        Ok(target)
    }
}

/// Copy a stored data block, without its name prefix, in chunks.
/// Returns the number of bytes copied.
pub(crate) async fn copy_payload<W>(data: &ArchiveData, out: &mut W) -> Result<u64>
where
    W: AsyncWrite + Unpin + Send,
{
    let (mut offset, len) = data.payload_range().await?;
    let end = offset + len;
    let mut buf = vec![0u8; CHUNK_SIZE.min(len as usize)];

    while offset < end {
        let n = ((end - offset) as usize).min(buf.len());
        read_exact_at(data.reader().as_ref(), offset, &mut buf[..n]).await?;
        out.write_all(&buf[..n]).await?;
        offset += n as u64;
    }

    Ok(len)
}

/// Turn a stored payload into file contents. Inflating runs on the blocking
/// pool.
pub(crate) async fn decode_payload(raw: Vec<u8>, compressed: bool) -> Result<Vec<u8>> {
    if !compressed || raw.is_empty() {
        return Ok(raw);
    }
    tokio::task::spawn_blocking(move || decompress(&raw)).await?
}

/// Destination of an archive path below `dir`. Empty, `.` and `..`
/// segments are dropped so nothing lands outside `dir`.
pub fn output_path(dir: &Path, archive_path: &str) -> PathBuf {
    archive_path
        .split(['\\', '/'])
        .filter(|segment| !matches!(*segment, "" | "." | ".."))
        .fold(dir.to_path_buf(), |path, segment| path.join(segment))
}

pub(crate) async fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .await
            .map_err(|source| Error::AccessFailed {
                path: parent.to_path_buf(),
                source,
            })?;
    }
    Ok(())
}

async fn create_output(path: &Path) -> Result<File> {
    File::create(path).await.map_err(|source| Error::AccessFailed {
        path: path.to_path_buf(),
        source,
    })
}

pub(crate) async fn write_output(path: &Path, data: &[u8]) -> Result<()> {
    let mut out = create_output(path).await?;
    out.write_all(data).await?;
    out.flush().await?;
    Ok(())
}
