//! Per-file zlib compression.
//!
//! A compressed data block is a little-endian `u32` holding the decompressed
//! size, followed by a zlib stream.

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use flate2::write::ZlibEncoder;
use flate2::{Compression, Decompress, FlushDecompress, Status};
use std::io::Write;
use tracing::trace;

use crate::error::{Error, Result};

/// Length of the decompressed-size field in front of the zlib stream.
pub const SIZE_FIELD_LEN: usize = 4;

/// Output reserved up front per input byte. The declared size is only an
/// upper bound; the buffer grows with what the stream actually produces.
const INITIAL_RATIO: usize = 4;
const MIN_GROWTH: usize = 64 * 1024;

/// Decompress a size-prefixed data block.
///
/// A declared size of zero or an empty stream yields an empty buffer.
pub fn decompress(block: &[u8]) -> Result<Vec<u8>> {
    if block.len() < SIZE_FIELD_LEN {
        return Err(Error::Decompression(format!(
            "block of {} bytes has no size field",
            block.len()
        )));
    }

    let declared = LittleEndian::read_u32(&block[..SIZE_FIELD_LEN]) as usize;
    let input = &block[SIZE_FIELD_LEN..];
    if declared == 0 || input.is_empty() {
        return Ok(Vec::new());
    }

    trace!("Inflating {} bytes into {} bytes", input.len(), declared);

    let mut output = Vec::with_capacity(declared.min(input.len().saturating_mul(INITIAL_RATIO)));
    let mut inflater = Decompress::new(true);

    loop {
        if output.len() == output.capacity() {
            let growth = output.len().max(MIN_GROWTH).min(declared - output.len());
            output.reserve_exact(growth);
        }

        let consumed = inflater.total_in() as usize;
        let produced = inflater.total_out() as usize;

        let status = inflater
            .decompress_vec(&input[consumed..], &mut output, FlushDecompress::None)
            .map_err(|e| Error::Decompression(e.to_string()))?;

        let produced_now = inflater.total_out() as usize;
        match status {
            Status::StreamEnd => break,
            Status::Ok | Status::BufError => {
                if produced_now >= declared {
                    break;
                }
                if inflater.total_in() as usize == consumed && produced_now == produced {
                    return Err(Error::Decompression(format!(
                        "stream ended after {produced_now} of {declared} bytes"
                    )));
                }
            }
        }
    }

    // the buffer may have been given more room than was declared
    output.truncate(declared);
    let produced = output.len();
    if produced != declared {
        return Err(Error::Decompression(format!(
            "stream holds {produced} bytes, header declares {declared}"
        )));
    }

    Ok(output)
}

/// Compress `data` into a size-prefixed data block.
pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let declared = u32::try_from(data.len())
        .map_err(|_| Error::invalid(format!("{} bytes is too large to compress", data.len())))?;

    let mut block = Vec::with_capacity(SIZE_FIELD_LEN + data.len() / 2);
    block.write_u32::<LittleEndian>(declared)?;

    let mut encoder = ZlibEncoder::new(block, Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}
