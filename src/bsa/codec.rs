//! String encodings used by the BSA format.
//!
//! - B-string: one length byte followed by that many bytes. Folder paths are
//!   written with a trailing null that is counted in the length byte, the name
//!   prefix in front of file data carries no terminator.
//! - Z-string: bytes terminated by a null, used for the file name table.
//!
//! Names are stored in the Windows-1252 code page. Every byte maps to exactly
//! one character, so names read from an archive are written back unchanged.

use byteorder::{ReadBytesExt, WriteBytesExt};
use encoding_rs::WINDOWS_1252;
use std::borrow::Cow;
use std::io::{self, BufRead, Read, Write};

/// Longest folder path a null-terminated B-string can carry.
pub const MAX_BSTRING_LEN: usize = u8::MAX as usize - 1;

/// Read a B-string, dropping anything from the first null on.
pub fn read_bstring<R: Read>(reader: &mut R) -> io::Result<String> {
    let len = reader.read_u8()? as usize;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(decode_name(&buf))
}

/// Write a null-terminated B-string.
pub fn write_bstring<W: Write>(writer: &mut W, value: &str) -> io::Result<()> {
    let bytes = encode_name(value)?;
    if bytes.len() > MAX_BSTRING_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("path too long for archive: {value}"),
        ));
    }
    writer.write_u8(bytes.len() as u8 + 1)?;
    writer.write_all(&bytes)?;
    writer.write_u8(0)
}

/// Write a B-string without terminator, as used for the file data name prefix.
pub fn write_prefix<W: Write>(writer: &mut W, value: &str) -> io::Result<()> {
    let bytes = encode_name(value)?;
    if bytes.len() > u8::MAX as usize {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("path too long for name prefix: {value}"),
        ));
    }
    writer.write_u8(bytes.len() as u8)?;
    writer.write_all(&bytes)
}

/// Read a Z-string. Fails if the input ends before the terminator.
pub fn read_zstring<R: BufRead>(reader: &mut R) -> io::Result<String> {
    let mut buf = Vec::new();
    reader.read_until(0, &mut buf)?;
    if buf.pop() != Some(0) {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "unterminated name in file name table",
        ));
    }
    Ok(decode_name(&buf))
}

pub fn write_zstring<W: Write>(writer: &mut W, value: &str) -> io::Result<()> {
    writer.write_all(&encode_name(value)?)?;
    writer.write_u8(0)
}

/// On-disk bytes of a name. Fails for characters outside the code page.
pub fn encode_name(name: &str) -> io::Result<Cow<'_, [u8]>> {
    let (bytes, _, unmappable) = WINDOWS_1252.encode(name);
    if unmappable {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("name cannot be stored in an archive: {name}"),
        ));
    }
    Ok(bytes)
}

/// Decode stored name bytes, stopping at the first null.
pub fn decode_name(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    WINDOWS_1252
        .decode_without_bom_handling(&bytes[..end])
        .0
        .into_owned()
}
