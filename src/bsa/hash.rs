//! BSA file and folder name hash.
//!
//! Names are keyed by a 64-bit value derived from the lowercased name. The low
//! half packs a few characters of the stem plus its length, the high half is a
//! rolling hash over the middle of the stem and the extension. This has to
//! match the game engine's implementation bit for bit, since stored hashes are
//! compared against it.

use encoding_rs::WINDOWS_1252;

/// Separator used inside archive paths.
pub const PATH_SEPARATOR: char = '\\';

const HASH_MULTIPLIER: u32 = 0x1003f;

/// Hash a file or folder name as stored in an archive.
///
/// Case and separator style do not matter: `Foo/Bar.NIF` and `foo\bar.nif`
/// hash to the same value. The hash is taken over the name's code page bytes,
/// the same bytes the archive stores; only ASCII letters are lowercased.
/// Characters the code page cannot hold never reach an archive, their hash is
/// still deterministic.
pub fn name_hash(name: &str) -> u64 {
    let (encoded, _, _) = WINDOWS_1252.encode(name);
    let normalized: Vec<u8> = encoded
        .iter()
        .map(|&b| match b {
            b'/' => b'\\',
            _ => b.to_ascii_lowercase(),
        })
        .collect();
    hash_normalized(&normalized)
}

fn hash_normalized(name: &[u8]) -> u64 {
    let ext_start = name.iter().rposition(|&b| b == b'.').unwrap_or(name.len());
    let (stem, ext) = name.split_at(ext_start);

    let mut hash = 0u64;

    let len = stem.len();
    if len > 0 {
        let second_last = if len > 2 { stem[len - 2] as u64 } else { 0 };
        hash = stem[len - 1] as u64
            | second_last << 8
            | (len as u64) << 16
            | (stem[0] as u64) << 24;
    }

    if !ext.is_empty() {
        hash |= match &ext[1..] {
            b"kf" => 0x80,
            b"nif" => 0x8000,
            b"dds" => 0x8080,
            b"wav" => 0x8000_0000,
            _ => 0,
        };

        // first character and the last two are already in the low half
        let middle = if len > 3 { &stem[1..len - 2] } else { &[][..] };
        let rolling = rolling_hash(middle).wrapping_add(rolling_hash(ext));
        hash |= (rolling as u64) << 32;
    }

    hash
}

fn rolling_hash(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .fold(0u32, |acc, &b| acc.wrapping_mul(HASH_MULTIPLIER).wrapping_add(b as u32))
}
