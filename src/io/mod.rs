mod local;

pub use local::LocalFileReader;

use crate::error::{Error, Result};
use async_trait::async_trait;

/// Trait for random access reading from a data source
#[async_trait]
pub trait ReadAt: Send + Sync {
    /// Read data at the specified offset into the buffer
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Get the total size of the data source
    fn size(&self) -> u64;
}

/// Fill `buf` completely from `offset`, failing if the source ends first.
pub async fn read_exact_at(reader: &dyn ReadAt, offset: u64, buf: &mut [u8]) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read_at(offset + filled as u64, &mut buf[filled..]).await?;
        if n == 0 {
            return Err(Error::invalid(format!(
                "unexpected end of archive: wanted {} bytes at {:#x}, got {}",
                buf.len(),
                offset,
                filled
            )));
        }
        filled += n;
    }
    Ok(())
}

/// Read `len` bytes at `offset` into a fresh buffer.
pub async fn read_vec_at(reader: &dyn ReadAt, offset: u64, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    read_exact_at(reader, offset, &mut buf).await?;
    Ok(buf)
}
