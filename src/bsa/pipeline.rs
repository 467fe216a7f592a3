//! Bulk extraction.
//!
//! Two tasks connected by a bounded queue: the reader walks the files in
//! data offset order and queues their raw payloads, the writer takes them off
//! the queue, decompresses and writes them out. The queue holds at most
//! `queue_capacity` payloads; the `room` semaphore counts free slots and the
//! `data` semaphore counts queued payloads.
//!
//! The caller polls both tasks and reports progress after every poll. When
//! the progress callback asks to stop, the reader is cancelled first and the
//! writer only once the reader has finished, so that a payload is never left
//! half queued. Payloads already taken off the queue are always written.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::fs;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, warn};

pub use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

use super::archive::Archive;
use super::entry::FileSource;
use super::extractor::{create_parent, decode_payload, output_path, write_output};

/// Settings for [`Archive::extract_all`].
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Replace files that already exist in the output directory
    pub overwrite: bool,
    /// Payloads read ahead of the writer
    pub queue_capacity: usize,
    /// How often the caller wakes up to report progress
    pub poll_interval: Duration,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            overwrite: true,
            queue_capacity: 100,
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// A file that could not be extracted.
#[derive(Debug)]
pub struct ExtractFailure {
    pub path: String,
    pub error: Error,
}

/// Outcome of a bulk extraction.
#[derive(Debug, Default)]
pub struct ExtractReport {
    pub total: usize,
    /// Files taken off the queue by the writer
    pub dequeued: usize,
    pub written: usize,
    pub skipped_existing: usize,
    pub failures: Vec<ExtractFailure>,
    pub canceled: bool,
}

impl ExtractReport {
    /// True if every file was written or deliberately skipped.
    pub fn is_complete(&self) -> bool {
        !self.canceled && self.failures.is_empty() && self.dequeued == self.total
    }

    /// Fail with [`Error::Canceled`] if the extraction was stopped early.
    /// Per-file failures are left in the report.
    pub fn into_result(self) -> Result<Self> {
        if self.canceled {
            Err(Error::Canceled)
        } else {
            Ok(self)
        }
    }
}

struct Job {
    path: String,
    source: FileSource,
    compressed: bool,
}

struct QueuedFile {
    path: String,
    compressed: bool,
    data: Result<Vec<u8>>,
}

struct Queue {
    items: Mutex<VecDeque<QueuedFile>>,
    room: Semaphore,
    data: Semaphore,
}

impl Queue {
    fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            room: Semaphore::new(capacity),
            data: Semaphore::new(0),
        }
    }
}

/// Writer progress, read by the polling caller.
#[derive(Default)]
struct Progress {
    dequeued: AtomicUsize,
    current: Mutex<String>,
}

impl Progress {
    fn record(&self, path: &str) {
        *self.current.lock() = path.to_string();
        self.dequeued.fetch_add(1, Ordering::SeqCst);
    }

    fn snapshot(&self, total: usize) -> (u32, String) {
        let dequeued = self.dequeued.load(Ordering::SeqCst);
        let percent = (dequeued * 100 / total.max(1)) as u32;
        (percent, self.current.lock().clone())
    }
}

#[derive(Default)]
struct WriterOutcome {
    written: usize,
    skipped_existing: usize,
    failures: Vec<ExtractFailure>,
}

impl Archive {
    /// Extract every file below `out_dir`.
    ///
    /// `progress` is called with the percentage of files handled and the path
    /// of the file handled last; returning `false` stops the extraction. A file
    /// that fails is recorded in the report and skipped.
    pub async fn extract_all<F>(
        &self,
        out_dir: impl AsRef<Path>,
        options: &ExtractOptions,
        mut progress: F,
    ) -> Result<ExtractReport>
    where
        F: FnMut(u32, &str) -> bool,
    {
        let out_dir = out_dir.as_ref().to_path_buf();
        let jobs = self.extraction_jobs();
        let total = jobs.len();
        let mut report = ExtractReport {
            total,
            ..Default::default()
        };
        if total == 0 {
            return Ok(report);
        }

        fs::create_dir_all(&out_dir)
            .await
            .map_err(|source| Error::AccessFailed {
                path: out_dir.clone(),
                source,
            })?;

        debug!("Extracting {} files to {}", total, out_dir.display());

        let queue = Arc::new(Queue::new(options.queue_capacity.max(1)));
        let status = Arc::new(Progress::default());
        let reader_token = CancellationToken::new();
        let writer_token = CancellationToken::new();

        let mut reader = Some(tokio::spawn(read_stage(
            jobs,
            queue.clone(),
            reader_token.clone(),
        )));
        let mut writer = tokio::spawn(write_stage(
            queue,
            writer_token.clone(),
            status.clone(),
            out_dir,
            options.overwrite,
            total,
        ));

        let mut canceled = false;
        let outcome = loop {
            match reader.as_mut() {
                Some(handle) => {
                    if let Ok(joined) = timeout(options.poll_interval, handle).await {
                        if let Err(e) = joined {
                            writer_token.cancel();
                            return Err(e.into());
                        }
                        reader = None;
                        if canceled {
                            writer_token.cancel();
                        }
                    }
                }
                None => {
                    if let Ok(joined) = timeout(options.poll_interval, &mut writer).await {
                        break joined?;
                    }
                }
            }

            let (percent, current) = status.snapshot(total);
            if !canceled && !progress(percent, &current) {
                debug!("Extraction canceled at {}%", percent);
                canceled = true;
                reader_token.cancel();
                if reader.is_none() {
                    writer_token.cancel();
                }
            }
        };

        if !canceled {
            let (percent, current) = status.snapshot(total);
            progress(percent, &current);
        }

        report.dequeued = status.dequeued.load(Ordering::SeqCst);
        report.written = outcome.written;
        report.skipped_existing = outcome.skipped_existing;
        report.failures = outcome.failures;
        report.canceled = canceled;
        Ok(report)
    }

    /// Every file with its path, ordered by where its data lives so that the
    /// archive is read front to back. Loose files come last.
    fn extraction_jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<(Option<u64>, Job)> = self
            .tree
            .collect_files()
            .into_iter()
            .filter_map(|file| {
                let entry = self.tree.file(file)?;
                let job = Job {
                    path: self.tree.file_path(file)?,
                    source: entry.source().clone(),
                    compressed: !entry.is_pending() && self.is_compressed(entry),
                };
                Some((entry.data_offset(), job))
            })
            .collect();
        jobs.sort_by_key(|(offset, _)| (offset.is_none(), *offset));
        jobs.into_iter().map(|(_, job)| job).collect()
    }
}

async fn read_stage(jobs: Vec<Job>, queue: Arc<Queue>, token: CancellationToken) {
    for job in jobs {
        if token.is_cancelled() {
            break;
        }
        let permit = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            permit = queue.room.acquire() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        permit.forget();

        let data = match &job.source {
            FileSource::Archive(data) => data.read_payload().await,
            FileSource::Pending(path) => fs::read(path)
                .await
                .map_err(|_| Error::SourceFileMissing(path.clone())),
        };

        queue.items.lock().push_back(QueuedFile {
            path: job.path,
            compressed: job.compressed,
            data,
        });
        queue.data.add_permits(1);
    }
}

async fn write_stage(
    queue: Arc<Queue>,
    token: CancellationToken,
    status: Arc<Progress>,
    out_dir: PathBuf,
    overwrite: bool,
    total: usize,
) -> WriterOutcome {
    let mut outcome = WriterOutcome::default();

    for _ in 0..total {
        let permit = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            permit = queue.data.acquire() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        permit.forget();

        let next = queue.items.lock().pop_front();
        let Some(item) = next else {
            break;
        };
        queue.room.add_permits(1);
        status.record(&item.path);

        match write_queued(item.data, item.compressed, &out_dir, &item.path, overwrite).await {
            Ok(true) => outcome.written += 1,
            Ok(false) => outcome.skipped_existing += 1,
            Err(error) => {
                warn!("Skipping {}: {}", item.path, error);
                outcome.failures.push(ExtractFailure {
                    path: item.path,
                    error,
                });
            }
        }
    }

    outcome
}

/// Write one dequeued file. Returns false if it was skipped because the
/// destination exists.
async fn write_queued(
    data: Result<Vec<u8>>,
    compressed: bool,
    out_dir: &Path,
    path: &str,
    overwrite: bool,
) -> Result<bool> {
    let target = output_path(out_dir, path);
    if !overwrite && fs::try_exists(&target).await.unwrap_or(false) {
        return Ok(false);
    }

    let contents = decode_payload(data?, compressed).await?;
    create_parent(&target).await?;
    write_output(&target, &contents).await?;
    Ok(true)
}
