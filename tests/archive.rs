use std::collections::BTreeMap;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use rbsa::bsa::{ArchiveFlags, FileFlags};
use rbsa::{Archive, ArchiveType, Error, ReadStatus, name_hash};
use tempfile::tempdir;

/// (folder, name, contents) of the loose files used by most tests.
fn sample_files() -> Vec<(&'static str, &'static str, Vec<u8>)> {
    vec![
        ("meshes\\armor", "iron.nif", b"iron cuirass mesh".to_vec()),
        ("meshes\\armor", "steel.nif", b"steel cuirass mesh, a bit longer".to_vec()),
        ("meshes", "rock.nif", vec![7u8; 3000]),
        ("textures\\sky", "clouds.dds", (0..=255u8).cycle().take(70_000).collect()),
        ("", "readme.txt", b"read me first".to_vec()),
        ("sound\\fx", "empty.wav", Vec::new()),
    ]
}

/// Write the sample files below `dir` and add them to `archive`.
fn add_loose_files(archive: &mut Archive, dir: &Path, compressed: bool) {
    for (index, (folder, name, contents)) in sample_files().into_iter().enumerate() {
        let source = dir.join(format!("{index}-{name}"));
        std::fs::write(&source, contents).unwrap();
        let folder = archive.add_folder(archive.root(), folder);
        let entry = archive.create_file(name, source, compressed);
        archive.add_file(folder, entry);
    }
}

fn expected_contents() -> BTreeMap<String, Vec<u8>> {
    sample_files()
        .into_iter()
        .map(|(folder, name, contents)| {
            let path = if folder.is_empty() {
                name.to_string()
            } else {
                format!("{folder}\\{name}")
            };
            (path, contents)
        })
        .collect()
}

async fn contents(archive: &Archive) -> BTreeMap<String, Vec<u8>> {
    let mut result = BTreeMap::new();
    for file in archive.tree().collect_files() {
        let path = archive.file_path(file).unwrap();
        result.insert(path, archive.read_file(file).await.unwrap());
    }
    result
}

fn sorted(mut names: Vec<String>) -> Vec<String> {
    names.sort();
    names
}

#[tokio::test]
async fn loose_files_round_trip() {
    let dir = tempdir().unwrap();
    let mut archive = Archive::new();
    add_loose_files(&mut archive, dir.path(), false);
    let folders = sorted(archive.folder_names());
    let files = sorted(archive.file_names());

    let path = dir.path().join("out.bsa");
    archive.write(&path).await.unwrap();

    let read = Archive::open(&path, true).await.unwrap();
    assert_eq!(read.status(), ReadStatus::Valid);
    assert_eq!(read.archive_type(), ArchiveType::Fallout3);
    assert_eq!(read.count_files(), 6);
    assert_eq!(sorted(read.folder_names()), folders);
    assert_eq!(sorted(read.file_names()), files);
    assert_eq!(contents(&read).await, expected_contents());
    assert_eq!(
        read.file_flags(),
        FileFlags::NIF | FileFlags::DDS | FileFlags::TXT | FileFlags::WAV
    );
}

#[tokio::test]
async fn written_archive_is_rebound() {
    let dir = tempdir().unwrap();
    let mut archive = Archive::new();
    add_loose_files(&mut archive, dir.path(), false);

    let path = dir.path().join("out.bsa");
    archive.write(&path).await.unwrap();

    assert_eq!(archive.path(), Some(path.as_path()));
    for file in archive.tree().collect_files() {
        let entry = archive.file(file).unwrap();
        assert!(!entry.is_pending());
        assert!(entry.size().is_some());
    }
    assert_eq!(contents(&archive).await, expected_contents());

    // rewriting in place reads from the old file until the new one replaces it
    archive.write(&path).await.unwrap();
    assert_eq!(contents(&archive).await, expected_contents());
    let read = Archive::open(&path, true).await.unwrap();
    assert_eq!(contents(&read).await, expected_contents());
}

#[tokio::test]
async fn copies_can_replace_their_source_archive() {
    let dir = tempdir().unwrap();
    let mut original = Archive::new();
    add_loose_files(&mut original, dir.path(), true);
    let path = dir.path().join("a.bsa");
    original.write(&path).await.unwrap();

    let source = Archive::open(&path, true).await.unwrap();
    let mut target = Archive::new();
    for file in source.tree().collect_files() {
        let folder_path = source.tree().full_path(file.folder);
        let entry = target.copy_file(&source, file).unwrap();
        let folder = target.add_folder(target.root(), &folder_path);
        target.add_file(folder, entry);
    }

    target.write(&path).await.unwrap();
    let read = Archive::open(&path, true).await.unwrap();
    assert_eq!(read.status(), ReadStatus::Valid);
    assert_eq!(contents(&read).await, expected_contents());
}

#[tokio::test]
async fn failed_write_keeps_existing_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("out.bsa");
    std::fs::write(&path, b"previous contents").unwrap();

    let mut archive = Archive::new();
    let folder = archive.add_folder(archive.root(), "meshes");
    let entry = archive.create_file("gone.nif", dir.path().join("gone.nif"), false);
    archive.add_file(folder, entry);

    assert!(archive.write(&path).await.is_err());
    assert_eq!(std::fs::read(&path).unwrap(), b"previous contents");
    // no temporary file left behind
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[tokio::test]
async fn code_page_names_round_trip() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("source.nif");
    std::fs::write(&source, b"mesh").unwrap();

    let mut archive = Archive::new();
    let folder = archive.add_folder(archive.root(), "meshes\\été");
    let entry = archive.create_file("café.nif", &source, false);
    archive.add_file(folder, entry);

    let path = dir.path().join("out.bsa");
    archive.write(&path).await.unwrap();

    // stored as single Windows-1252 bytes, not UTF-8
    let bytes = std::fs::read(&path).unwrap();
    assert!(bytes.windows(9).any(|w| w == b"caf\xe9.nif\0"));
    assert!(bytes.windows(11).any(|w| w == b"meshes\\\xe9t\xe9\0"));

    let read = Archive::open(&path, true).await.unwrap();
    assert_eq!(read.status(), ReadStatus::Valid);
    assert_eq!(read.folder_names(), vec!["meshes\\été"]);
    assert_eq!(read.file_names(), vec!["café.nif"]);
    let file = read.tree().collect_files()[0];
    assert_eq!(read.file(file).unwrap().name_hash(), name_hash("café.nif"));
    assert_eq!(read.read_file(file).await.unwrap(), b"mesh");
}

#[tokio::test]
async fn names_outside_the_code_page_are_rejected() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("source.dds");
    std::fs::write(&source, b"texture").unwrap();

    let mut archive = Archive::new();
    let folder = archive.add_folder(archive.root(), "textures");
    let entry = archive.create_file("日本.dds", &source, false);
    archive.add_file(folder, entry);

    let path = dir.path().join("out.bsa");
    assert!(matches!(archive.write(&path).await, Err(Error::InvalidData(_))));
    assert!(!path.exists());
}

#[tokio::test]
async fn record_offsets_point_at_data() {
    let dir = tempdir().unwrap();
    let mut archive = Archive::new();
    add_loose_files(&mut archive, dir.path(), false);

    let path = dir.path().join("out.bsa");
    archive.write(&path).await.unwrap();

    let read = Archive::open(&path, true).await.unwrap();
    let expected = expected_contents();
    let mut raw = std::fs::File::open(&path).unwrap();

    for file in read.tree().collect_files() {
        let entry = read.file(file).unwrap();
        let mut buf = vec![0u8; entry.size().unwrap() as usize];
        raw.seek(SeekFrom::Start(entry.data_offset().unwrap())).unwrap();
        raw.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, &expected[&read.file_path(file).unwrap()]);
    }
}

#[tokio::test]
async fn stored_order_follows_hashes() {
    let dir = tempdir().unwrap();
    let mut archive = Archive::new();
    add_loose_files(&mut archive, dir.path(), false);

    let path = dir.path().join("out.bsa");
    archive.write(&path).await.unwrap();
    let raw = std::fs::read(&path).unwrap();
    let folder_count = u32::from_le_bytes(raw[16..20].try_into().unwrap()) as usize;
    assert_eq!(folder_count, 5);
    let folder_hashes: Vec<u64> = (0..folder_count)
        .map(|i| {
            let at = 0x24 + i * 16;
            u64::from_le_bytes(raw[at..at + 8].try_into().unwrap())
        })
        .collect();
    let mut ascending = folder_hashes.clone();
    ascending.sort();
    assert_eq!(folder_hashes, ascending);

    // files are placed in stored order within each folder
    let read = Archive::open(&path, true).await.unwrap();
    let tree = read.tree();
    for folder in tree.collect_folders() {
        let hashes: Vec<u64> = tree.folder(folder).files().iter().map(|f| f.name_hash()).collect();
        let mut ascending = hashes.clone();
        ascending.sort();
        assert_eq!(hashes, ascending);
        assert_eq!(tree.folder(folder).name_hash(), name_hash(&tree.full_path(folder)));
    }
}

#[tokio::test]
async fn corrupted_hash_is_reported() {
    let dir = tempdir().unwrap();
    let mut archive = Archive::new();
    add_loose_files(&mut archive, dir.path(), false);

    let path = dir.path().join("out.bsa");
    archive.write(&path).await.unwrap();

    let target = name_hash("clouds.dds").to_le_bytes();
    let mut bytes = std::fs::read(&path).unwrap();
    let pos = bytes
        .windows(8)
        .position(|window| window == target)
        .expect("file record present");
    bytes[pos + 4] ^= 0x5a;
    std::fs::write(&path, &bytes).unwrap();

    let read = Archive::open(&path, true).await.unwrap();
    assert_eq!(read.status(), ReadStatus::InvalidHashes { count: 1 });
    assert_eq!(read.hash_mismatches()[0].path, "textures\\sky\\clouds.dds");
    assert_eq!(read.hash_mismatches()[0].computed, name_hash("clouds.dds"));
    assert!(read.file_names().contains(&"clouds.dds".to_string()));
    assert!(matches!(
        read.status().into_result(),
        Err(Error::InvalidHashes { count: 1 })
    ));

    // names and data are still usable
    assert_eq!(contents(&read).await, expected_contents());

    let unchecked = Archive::open(&path, false).await.unwrap();
    assert!(unchecked.status().is_valid());
}

#[tokio::test]
async fn compressed_archive_round_trip() {
    let dir = tempdir().unwrap();
    let mut archive = Archive::new();
    archive.set_default_compressed(true).unwrap();
    add_loose_files(&mut archive, dir.path(), true);

    // one file stored plain against the default
    let plain = dir.path().join("plain.xml");
    std::fs::write(&plain, b"<plain/>").unwrap();
    let folder = archive.add_folder(archive.root(), "interface");
    let entry = archive.create_file("plain.xml", &plain, false);
    let plain_ref = archive.add_file(folder, entry);
    assert!(archive.file(plain_ref).unwrap().compression_toggled());

    let path = dir.path().join("packed.bsa");
    archive.write(&path).await.unwrap();

    let read = Archive::open(&path, true).await.unwrap();
    assert!(read.default_compressed());
    assert!(read.flags().contains(ArchiveFlags::DEFAULT_COMPRESSED));

    let mut expected = expected_contents();
    expected.insert("interface\\plain.xml".to_string(), b"<plain/>".to_vec());
    assert_eq!(contents(&read).await, expected);

    for file in read.tree().collect_files() {
        let entry = read.file(file).unwrap();
        let path = read.file_path(file).unwrap();
        if path == "interface\\plain.xml" {
            assert!(!read.is_compressed(entry));
            assert_eq!(entry.size(), Some(8));
        } else {
            assert!(read.is_compressed(entry));
        }
        if path == "meshes\\rock.nif" {
            assert!(entry.size().unwrap() < 3000);
        }
    }

    let out = dir.path().join("extracted");
    let sky = read
        .tree()
        .collect_files()
        .into_iter()
        .find(|&file| read.file(file).unwrap().name() == "clouds.dds")
        .unwrap();
    let written = read.extract(sky, &out).await.unwrap();
    assert_eq!(written, out.join("textures").join("sky").join("clouds.dds"));
    assert_eq!(
        std::fs::read(written).unwrap(),
        expected["textures\\sky\\clouds.dds"]
    );
}

#[tokio::test]
async fn name_prefixed_archive() {
    let dir = tempdir().unwrap();
    let mut archive = Archive::with_type(ArchiveType::SKYRIM);
    archive.set_name_prefixed(true);
    add_loose_files(&mut archive, dir.path(), false);

    let path = dir.path().join("prefixed.bsa");
    archive.write(&path).await.unwrap();

    let read = Archive::open(&path, true).await.unwrap();
    assert!(read.name_prefixed());
    assert_eq!(contents(&read).await, expected_contents());

    let raw = std::fs::read(&path).unwrap();
    for file in read.tree().collect_files() {
        let entry = read.file(file).unwrap();
        let full = read.file_path(file).unwrap();
        let offset = entry.data_offset().unwrap() as usize;
        assert_eq!(raw[offset] as usize, full.len());
        assert_eq!(&raw[offset + 1..offset + 1 + full.len()], full.as_bytes());
    }
}

#[tokio::test]
async fn oblivion_ignores_name_prefix() {
    let dir = tempdir().unwrap();
    let mut archive = Archive::with_type(ArchiveType::Oblivion);
    archive.set_name_prefixed(true);
    add_loose_files(&mut archive, dir.path(), false);

    let path = dir.path().join("oblivion.bsa");
    archive.write(&path).await.unwrap();

    let raw = std::fs::read(&path).unwrap();
    assert_eq!(&raw[4..8], &0x67u32.to_le_bytes());
    assert_eq!(u32::from_le_bytes(raw[12..16].try_into().unwrap()) & 0x100, 0);

    let read = Archive::open(&path, true).await.unwrap();
    assert_eq!(read.archive_type(), ArchiveType::Oblivion);
    assert!(!read.name_prefixed());
    assert_eq!(contents(&read).await, expected_contents());
}

#[tokio::test]
async fn copy_between_archives() {
    let dir = tempdir().unwrap();
    let mut source = Archive::with_type(ArchiveType::FALLOUT_NV);
    source.set_default_compressed(true).unwrap();
    source.set_name_prefixed(true);
    add_loose_files(&mut source, dir.path(), true);
    let source_path = dir.path().join("source.bsa");
    source.write(&source_path).await.unwrap();
    let source = Archive::open(&source_path, true).await.unwrap();

    let mut target = Archive::with_type(ArchiveType::Oblivion);
    for file in source.tree().collect_files() {
        let folder_path = source.tree().full_path(file.folder);
        let entry = target.copy_file(&source, file).unwrap();
        assert!(entry.compression_toggled());
        let folder = target.add_folder(target.root(), &folder_path);
        target.add_file(folder, entry);
    }

    let target_path = dir.path().join("target.bsa");
    target.write(&target_path).await.unwrap();

    let read = Archive::open(&target_path, true).await.unwrap();
    assert!(!read.default_compressed());
    assert!(!read.name_prefixed());
    assert_eq!(contents(&read).await, expected_contents());
    for file in read.tree().collect_files() {
        let entry = read.file(file).unwrap();
        if entry.name() != "empty.wav" {
            assert!(read.is_compressed(entry));
        }
    }
}

#[tokio::test]
async fn stored_entries_lock_default_compression() {
    let dir = tempdir().unwrap();
    let mut archive = Archive::new();
    add_loose_files(&mut archive, dir.path(), false);
    let path = dir.path().join("out.bsa");
    archive.write(&path).await.unwrap();

    assert!(archive.set_default_compressed(true).is_err());
    let file = archive.tree().collect_files()[0];
    assert!(archive.set_compressed(file, true).is_err());
}

#[tokio::test]
async fn missing_source_file_fails_write() {
    let dir = tempdir().unwrap();
    let mut archive = Archive::new();
    let folder = archive.add_folder(archive.root(), "meshes");
    let gone = dir.path().join("gone.nif");
    let entry = archive.create_file("gone.nif", &gone, false);
    archive.add_file(folder, entry);

    let result = archive.write(dir.path().join("out.bsa")).await;
    assert!(matches!(result, Err(Error::SourceFileMissing(p)) if p == gone));
}

#[tokio::test]
async fn open_errors() {
    let dir = tempdir().unwrap();

    let missing = Archive::open(dir.path().join("missing.bsa"), true).await;
    assert!(matches!(missing, Err(Error::FileNotFound(_))));

    let not_bsa = dir.path().join("not.bsa");
    std::fs::write(&not_bsa, b"PK\x03\x04 definitely not a bsa archive header").unwrap();
    assert!(matches!(
        Archive::open(&not_bsa, true).await,
        Err(Error::InvalidData(_))
    ));

    let mut header = b"BSA\0".to_vec();
    header.extend_from_slice(&0x69u32.to_le_bytes());
    header.resize(0x24, 0);
    let unknown = dir.path().join("unknown.bsa");
    std::fs::write(&unknown, &header).unwrap();
    assert!(matches!(
        Archive::open(&unknown, true).await,
        Err(Error::InvalidData(_))
    ));
}

#[tokio::test]
async fn truncated_archive_is_invalid() {
    let dir = tempdir().unwrap();
    let mut archive = Archive::new();
    add_loose_files(&mut archive, dir.path(), false);
    let path = dir.path().join("out.bsa");
    archive.write(&path).await.unwrap();

    let bytes = std::fs::read(&path).unwrap();
    let cut = dir.path().join("cut.bsa");
    std::fs::write(&cut, &bytes[..0x24 + 20]).unwrap();
    assert!(matches!(
        Archive::open(&cut, true).await,
        Err(Error::InvalidData(_))
    ));
}
