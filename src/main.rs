//! Main entry point for the rbsa CLI application.
//!
//! Lists, tests and extracts BSA archives, and builds new ones from a
//! directory of loose files.

use anyhow::{Result, bail};
use clap::Parser;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use rbsa::bsa::extractor::output_path;
use rbsa::{Archive, ArchiveType, Cli, ExtractOptions, FileRef, ReadStatus};

/// Application entry point.
///
/// Parses command-line arguments and dispatches to create, test, list or
/// extract mode.
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();

    if let Some(ref source) = cli.create {
        return create_archive(&cli, Path::new(source)).await;
    }

    let archive = Archive::open(&cli.file, cli.verify_hashes()).await?;

    if cli.test {
        return test_archive(&archive, &cli);
    }

    if let ReadStatus::InvalidHashes { count } = archive.status()
        && !cli.is_quiet()
    {
        eprintln!("warning: {count} file names do not match their hashes (use -t for details)");
    }

    if cli.list || cli.verbose {
        list_files(&archive, cli.verbose);
        return Ok(());
    }

    process_archive(&archive, &cli).await
}

/// Extract files based on CLI options.
///
/// Without file or exclude filters, and when not piping, the whole archive
/// goes through the bulk extraction pipeline. Otherwise matching files are
/// extracted one by one.
async fn process_archive(archive: &Archive, cli: &Cli) -> Result<()> {
    let out_dir = cli
        .extract_dir
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));

    if cli.files.is_empty() && cli.exclude.is_empty() && !cli.pipe {
        return extract_everything(archive, cli, &out_dir).await;
    }

    let files_to_extract: Vec<(FileRef, String)> = archive
        .tree()
        .collect_files()
        .into_iter()
        .filter_map(|file| Some((file, archive.file_path(file)?)))
        .filter(|(_, path)| {
            // If specific files are requested, only include matching entries
            if !cli.files.is_empty() && !cli.files.iter().any(|f| matches_request(f, path)) {
                return false;
            }

            // Exclude files matching the -x patterns
            !cli.exclude.iter().any(|x| matches_request(x, path))
        })
        .collect();

    if files_to_extract.is_empty() && !cli.files.is_empty() {
        bail!("no matching files in {}", cli.file);
    }

    let multiple_files = cli.pipe && files_to_extract.len() > 1;
    for (file, path) in files_to_extract {
        extract_file(archive, file, &path, cli, &out_dir, multiple_files).await?;
    }

    Ok(())
}

/// Extract the whole archive through the pipeline, printing progress.
async fn extract_everything(archive: &Archive, cli: &Cli, out_dir: &Path) -> Result<()> {
    let options = ExtractOptions {
        overwrite: cli.should_overwrite(),
        ..ExtractOptions::default()
    };

    let quiet = cli.is_quiet();
    let mut last = String::new();
    let report = archive
        .extract_all(out_dir, &options, |percent, current| {
            if !quiet && !current.is_empty() && current != last {
                println!("{percent:>3}%  extracting: {current}");
                last = current.to_string();
            }
            true
        })
        .await?;

    for failure in &report.failures {
        eprintln!("error: {}: {}", failure.path, failure.error);
    }
    if !cli.is_very_quiet() && report.skipped_existing > 0 {
        eprintln!(
            "Skipped {} existing files (use -o to overwrite)",
            report.skipped_existing
        );
    }
    if !quiet {
        println!("{} of {} files extracted", report.written, report.total);
    }

    if !report.failures.is_empty() {
        bail!("{} files could not be extracted", report.failures.len());
    }
    Ok(())
}

/// List files in the archive.
///
/// Supports two output formats:
/// - Simple format (`-l`): full paths, one per line
/// - Verbose format (`-v`): stored size, compression, data offset and hash
fn list_files(archive: &Archive, verbose: bool) {
    if verbose {
        println!(
            "{:>10}  {:>4}  {:>10}  {:>16}  Name",
            "Size", "Cmpr", "Offset", "Hash"
        );
        println!("{}", "-".repeat(70));
    }

    let mut total_size = 0u64;
    let mut compressed_count = 0usize;
    let mut file_count = 0usize;

    for file in archive.tree().collect_files() {
        let (Some(entry), Some(path)) = (archive.file(file), archive.file_path(file)) else {
            continue;
        };

        if verbose {
            let size = entry.size().unwrap_or(0);
            let compressed = archive.is_compressed(entry);
            println!(
                "{:>10}  {:>4}  {:>#10x}  {:016x}  {}",
                size,
                if compressed { "yes" } else { "no" },
                entry.data_offset().unwrap_or(0),
                entry.name_hash(),
                path
            );

            total_size += size as u64;
            compressed_count += compressed as usize;
            file_count += 1;
        } else {
            println!("{path}");
        }
    }

    if verbose {
        println!("{}", "-".repeat(70));
        println!(
            "{:>10}  {:>4}  {} files, {} folders, {} compressed",
            total_size,
            "",
            file_count,
            archive.folder_names().len(),
            compressed_count
        );
        if let Some(source) = archive.source() {
            println!("Archive size: {}", format_size(source.size()));
        }
    }
}

/// Report name hash mismatches. Fails if there are any.
fn test_archive(archive: &Archive, cli: &Cli) -> Result<()> {
    for mismatch in archive.hash_mismatches() {
        println!(
            "bad hash: {}  stored {:016x}  expected {:016x}",
            mismatch.path, mismatch.stored, mismatch.computed
        );
    }

    match archive.status() {
        ReadStatus::Valid => {
            if !cli.is_quiet() {
                println!(
                    "No errors detected in {} ({} files)",
                    cli.file,
                    archive.count_files()
                );
            }
            Ok(())
        }
        status => {
            status.into_result()?;
            Ok(())
        }
    }
}

/// Extract a single file from the archive.
///
/// Handles various extraction options:
/// - Pipe mode (`-p`): Write to stdout instead of file
/// - Custom output directory (`-d`): Extract to specified directory
/// - Overwrite control (`-n`, `-o`): Handle existing files
async fn extract_file(
    archive: &Archive,
    file: FileRef,
    path: &str,
    cli: &Cli,
    out_dir: &Path,
    show_filename: bool,
) -> Result<()> {
    // Pipe mode: write file contents directly to stdout
    if cli.pipe {
        let data = archive.read_file(file).await?;
        let mut stdout = tokio::io::stdout();
        if show_filename {
            stdout.write_all(format!("--- {path} ---\n").as_bytes()).await?;
        }
        stdout.write_all(&data).await?;
        stdout.flush().await?;
        return Ok(());
    }

    let target = output_path(out_dir, path);
    if fs::try_exists(&target).await.unwrap_or(false) && !cli.should_overwrite() {
        if !cli.is_quiet() {
            if cli.never_overwrite {
                eprintln!("Skipping: {path} (file exists)");
            } else {
                eprintln!("Skipping: {path} (use -o to overwrite)");
            }
        }
        return Ok(());
    }

    if !cli.is_quiet() {
        println!("  extracting: {path}");
    }

    archive.extract(file, out_dir).await?;
    Ok(())
}

/// Build `cli.file` from the files below `source`.
///
/// Each directory becomes a folder named by its path relative to `source`;
/// files directly inside `source` go into the root folder.
async fn create_archive(cli: &Cli, source: &Path) -> Result<()> {
    let archive_type = ArchiveType::from(cli.game);
    let mut archive = Archive::with_type(archive_type);
    archive.set_default_compressed(cli.compress)?;
    if archive_type.supports_name_prefix() {
        archive.set_name_prefixed(true);
    }

    for entry in WalkDir::new(source).follow_links(false).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry.path().strip_prefix(source)?;
        let folder_path = relative
            .parent()
            .map(archive_path)
            .unwrap_or_default();
        let name = entry.file_name().to_string_lossy().into_owned();

        let folder = archive.add_folder(archive.root(), &folder_path);
        let file = archive.create_file(&name, entry.path(), cli.compress);
        archive.add_file(folder, file);
        if !cli.is_quiet() {
            println!("  adding: {}", archive_path(relative));
        }
    }

    if archive.count_files() == 0 {
        bail!("no files found in {}", source.display());
    }

    debug!("Writing {} with flags {:?}", cli.file, archive.flags());
    archive.write(&cli.file).await?;

    if !cli.is_quiet() {
        let size = fs::metadata(&cli.file).await?.len();
        println!(
            "Created {} with {} files in {} folders ({})",
            cli.file,
            archive.count_files(),
            archive.folder_names().len(),
            format_size(size)
        );
    }
    Ok(())
}

/// Join the components of a relative path with the archive separator.
fn archive_path(relative: &Path) -> String {
    relative
        .iter()
        .map(|component| component.to_string_lossy())
        .collect::<Vec<_>>()
        .join("\\")
}

/// Match a requested name against a path inside the archive.
///
/// Patterns with `*` or `?` are globbed against the full path; plain names
/// match the full path or the base name. Matching ignores case and treats
/// `/` like `\`.
fn matches_request(request: &str, path: &str) -> bool {
    let request = request.replace('/', "\\").to_ascii_lowercase();
    let path = path.to_ascii_lowercase();

    if has_glob_chars(&request) {
        return glob_match(&request, &path);
    }

    let basename = path.rsplit('\\').next().unwrap_or(&path);
    path == request || basename == request
}

/// Check if a pattern contains glob wildcard characters.
fn has_glob_chars(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?')
}

/// Simple glob pattern matching supporting `*` and `?` wildcards.
///
/// - `*` matches zero or more characters
/// - `?` matches exactly one character
///
/// # Examples
///
/// ```ignore
/// assert!(glob_match("*.nif", "meshes\\armor.nif"));
/// assert!(glob_match("file?.dds", "file1.dds"));
/// assert!(!glob_match("*.nif", "readme.txt"));
/// ```
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern_chars: Vec<char> = pattern.chars().collect();
    let text_chars: Vec<char> = text.chars().collect();

    fn do_match(pattern: &[char], text: &[char]) -> bool {
        match (pattern.first(), text.first()) {
            (None, None) => true,
            // Star matches zero characters, or one more and stays
            (Some('*'), _) => {
                do_match(&pattern[1..], text) || (!text.is_empty() && do_match(pattern, &text[1..]))
            }
            (Some('?'), Some(_)) => do_match(&pattern[1..], &text[1..]),
            (Some(p), Some(t)) if *p == *t => do_match(&pattern[1..], &text[1..]),
            _ => false,
        }
    }

    do_match(&pattern_chars, &text_chars)
}

/// Format a byte size into a human-readable string.
fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}
