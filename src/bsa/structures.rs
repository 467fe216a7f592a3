use bitflags::bitflags;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Write};

use crate::error::{Error, Result};

/// Game generation an archive was built for.
///
/// The type determines the version tag in the header and whether file data
/// can carry a name prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArchiveType {
    Oblivion,
    #[default]
    Fallout3,
}

impl ArchiveType {
    pub const FALLOUT_NV: ArchiveType = ArchiveType::Fallout3;
    pub const SKYRIM: ArchiveType = ArchiveType::Fallout3;

    pub fn from_u32(value: u32) -> Result<Self> {
        match value {
            0x67 => Ok(ArchiveType::Oblivion),
            0x68 => Ok(ArchiveType::Fallout3),
            _ => Err(Error::invalid(format!("unknown archive type {value:#x}"))),
        }
    }

    pub fn as_u32(&self) -> u32 {
        match self {
            ArchiveType::Oblivion => 0x67,
            ArchiveType::Fallout3 => 0x68,
        }
    }

    /// Whether the name-prefix archive flag has any meaning for this type.
    pub fn supports_name_prefix(&self) -> bool {
        !matches!(self, ArchiveType::Oblivion)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ArchiveFlags: u32 {
        const HAS_FOLDER_NAMES = 0x0000_0001;
        const HAS_FILE_NAMES = 0x0000_0002;
        const DEFAULT_COMPRESSED = 0x0000_0004;
        const NAME_PREFIXED = 0x0000_0100;
    }
}

impl Default for ArchiveFlags {
    fn default() -> Self {
        ArchiveFlags::HAS_FOLDER_NAMES | ArchiveFlags::HAS_FILE_NAMES
    }
}

bitflags! {
    /// Content hint listing which kinds of files an archive holds. Advisory only.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FileFlags: u32 {
        const NIF = 1 << 0;
        const DDS = 1 << 1;
        const XML = 1 << 2;
        const WAV = 1 << 3;
        const MP3 = 1 << 4;
        const TXT = 1 << 5;
        const SPT = 1 << 6;
        const TEX = 1 << 7;
        const CTL = 1 << 8;
    }
}

impl FileFlags {
    /// Flag matching a file name's extension, if it is one of the tracked kinds.
    pub fn for_name(name: &str) -> FileFlags {
        let Some((_, ext)) = name.rsplit_once('.') else {
            return FileFlags::empty();
        };
        match ext.to_ascii_lowercase().as_str() {
            "nif" => FileFlags::NIF,
            "dds" => FileFlags::DDS,
            "xml" => FileFlags::XML,
            "wav" => FileFlags::WAV,
            "mp3" => FileFlags::MP3,
            "txt" => FileFlags::TXT,
            "spt" => FileFlags::SPT,
            "tex" => FileFlags::TEX,
            "ctl" => FileFlags::CTL,
            _ => FileFlags::empty(),
        }
    }

    pub fn from_names<'a>(names: impl IntoIterator<Item = &'a str>) -> FileFlags {
        names
            .into_iter()
            .fold(FileFlags::empty(), |acc, name| acc | FileFlags::for_name(name))
    }
}

/// Archive header - 36 bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub archive_type: ArchiveType,
    pub header_size: u32,
    pub archive_flags: ArchiveFlags,
    pub folder_count: u32,
    pub file_count: u32,
    pub folder_names_length: u32,
    pub file_names_length: u32,
    pub file_flags: FileFlags,
}

impl Header {
    pub const SIGNATURE: &'static [u8] = b"BSA\0";
    pub const SIZE: usize = 0x24;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::invalid("truncated archive header"));
        }

        if &data[0..4] != Self::SIGNATURE {
            return Err(Error::invalid("not a bsa file"));
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            archive_type: ArchiveType::from_u32(cursor.read_u32::<LittleEndian>()?)?,
            header_size: cursor.read_u32::<LittleEndian>()?,
            archive_flags: ArchiveFlags::from_bits_retain(cursor.read_u32::<LittleEndian>()?),
            folder_count: cursor.read_u32::<LittleEndian>()?,
            file_count: cursor.read_u32::<LittleEndian>()?,
            folder_names_length: cursor.read_u32::<LittleEndian>()?,
            file_names_length: cursor.read_u32::<LittleEndian>()?,
            file_flags: FileFlags::from_bits_retain(cursor.read_u32::<LittleEndian>()?),
        })
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(Self::SIGNATURE)?;
        writer.write_u32::<LittleEndian>(self.archive_type.as_u32())?;
        writer.write_u32::<LittleEndian>(self.header_size)?;
        writer.write_u32::<LittleEndian>(self.archive_flags.bits())?;
        writer.write_u32::<LittleEndian>(self.folder_count)?;
        writer.write_u32::<LittleEndian>(self.file_count)?;
        writer.write_u32::<LittleEndian>(self.folder_names_length)?;
        writer.write_u32::<LittleEndian>(self.file_names_length)?;
        writer.write_u32::<LittleEndian>(self.file_flags.bits())
    }
}

/// Folder record - 16 bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FolderRecord {
    pub name_hash: u64,
    pub file_count: u32,
    /// Offset of the folder's name and file records, plus the total length
    /// of the file name table.
    pub offset: u32,
}

impl FolderRecord {
    pub const SIZE: usize = 16;

    pub fn read(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        Ok(Self {
            name_hash: cursor.read_u64::<LittleEndian>()?,
            file_count: cursor.read_u32::<LittleEndian>()?,
            offset: cursor.read_u32::<LittleEndian>()?,
        })
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_u64::<LittleEndian>(self.name_hash)?;
        writer.write_u32::<LittleEndian>(self.file_count)?;
        writer.write_u32::<LittleEndian>(self.offset)
    }
}

/// File record - 16 bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileRecord {
    pub name_hash: u64,
    /// Stored size of the data block, without the compression toggle bit
    pub size: u32,
    pub compression_toggled: bool,
    pub offset: u32,
}

impl FileRecord {
    pub const SIZE: usize = 16;
    pub const COMPRESSION_TOGGLE: u32 = 1 << 30;

    pub fn read(cursor: &mut Cursor<&[u8]>) -> Result<Self> {
        let name_hash = cursor.read_u64::<LittleEndian>()?;
        let raw_size = cursor.read_u32::<LittleEndian>()?;
        let offset = cursor.read_u32::<LittleEndian>()?;
        Ok(Self {
            name_hash,
            size: raw_size & !Self::COMPRESSION_TOGGLE,
            compression_toggled: raw_size & Self::COMPRESSION_TOGGLE != 0,
            offset,
        })
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let mut raw_size = self.size;
        if self.compression_toggled {
            raw_size |= Self::COMPRESSION_TOGGLE;
        }
        writer.write_u64::<LittleEndian>(self.name_hash)?;
        writer.write_u32::<LittleEndian>(raw_size)?;
        writer.write_u32::<LittleEndian>(self.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> Header {
        Header {
            archive_type: ArchiveType::Oblivion,
            header_size: Header::SIZE as u32,
            archive_flags: ArchiveFlags::default() | ArchiveFlags::DEFAULT_COMPRESSED,
            folder_count: 2,
            file_count: 5,
            folder_names_length: 17,
            file_names_length: 40,
            file_flags: FileFlags::NIF | FileFlags::DDS,
        }
    }

    #[test]
    fn header_layout() {
        let mut out = Vec::new();
        sample_header().write_to(&mut out).unwrap();
        assert_eq!(out.len(), Header::SIZE);
        assert_eq!(&out[0..4], b"BSA\0");
        assert_eq!(&out[4..8], &0x67u32.to_le_bytes());
        assert_eq!(&out[8..12], &0x24u32.to_le_bytes());
        assert_eq!(Header::from_bytes(&out).unwrap(), sample_header());
    }

    #[test]
    fn header_rejects_bad_magic() {
        let mut out = Vec::new();
        sample_header().write_to(&mut out).unwrap();
        out[0] = b'X';
        assert!(matches!(Header::from_bytes(&out), Err(Error::InvalidData(_))));
    }

    #[test]
    fn header_rejects_unknown_type() {
        let mut out = Vec::new();
        sample_header().write_to(&mut out).unwrap();
        out[4..8].copy_from_slice(&0x69u32.to_le_bytes());
        assert!(matches!(Header::from_bytes(&out), Err(Error::InvalidData(_))));
    }

    #[test]
    fn file_record_splits_toggle_bit() {
        let mut out = Vec::new();
        out.extend_from_slice(&0x1122334455667788u64.to_le_bytes());
        out.extend_from_slice(&(1234 | FileRecord::COMPRESSION_TOGGLE).to_le_bytes());
        out.extend_from_slice(&0x200u32.to_le_bytes());

        let record = FileRecord::read(&mut Cursor::new(&out[..])).unwrap();
        assert_eq!(record.size, 1234);
        assert!(record.compression_toggled);
        assert_eq!(record.offset, 0x200);

        let mut again = Vec::new();
        record.write_to(&mut again).unwrap();
        assert_eq!(again, out);
    }

    #[test]
    fn file_flags_from_extensions() {
        let flags = FileFlags::from_names(["a.NIF", "b.dds", "c.dds", "readme", "d.kf"]);
        assert_eq!(flags, FileFlags::NIF | FileFlags::DDS);
    }

    #[test]
    fn only_oblivion_lacks_name_prefix() {
        assert!(!ArchiveType::Oblivion.supports_name_prefix());
        assert!(ArchiveType::SKYRIM.supports_name_prefix());
        assert_eq!(ArchiveType::FALLOUT_NV.as_u32(), 0x68);
    }
}
