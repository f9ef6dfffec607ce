//! The `digest` command: SHA-256 of many files through the pump.
//!
//! Files are read on fetch workers and hashed on transform workers. Hex
//! formatting happens in finalize, on the main thread, while it drains the
//! pump in batches. Results are printed in the order the files were given.
//! A single file is hashed inline on the main thread without starting a pump.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use sha2::{Digest, Sha256};
use stagepump::{
    run_now, FileFetcher, FnTransformer, JobStatus, ObjectSlot, Pump, PumpConfig, ResultSlot,
    StageError, Transformer,
};
use tracing::{debug, info, warn};

use crate::error::CliError;

/// Pause between drain passes while workers are busy.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Settings for one `digest` run.
#[derive(Debug, Clone)]
pub struct DigestOptions {
    pub files: Vec<PathBuf>,
    pub config: PumpConfig,
    /// Maximum jobs finalized per drain pass.
    pub batch: usize,
}

/// Outcome counts of a run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DigestSummary {
    pub hashed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl DigestSummary {
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.cancelled == 0
    }
}

struct Entry {
    path: PathBuf,
    result: ResultSlot,
    digest: ObjectSlot<String>,
}

/// Transformer hashing the payload; finalize renders lowercase hex.
pub fn sha256_transformer() -> impl Transformer<Output = String> {
    FnTransformer::new(
        |data: &[u8]| Ok::<_, StageError>(Sha256::digest(data).to_vec()),
        |digest: Vec<u8>| Ok::<_, StageError>(to_hex(&digest)),
    )
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Hashes every file, writing results to `out` and failures to `err`.
///
/// `interrupted` is polled between drain passes; once set, remaining jobs
/// are purged and reported as cancelled. Output errors do not stop the run:
/// every file is still accounted for and the first error is returned at the
/// end.
pub fn run(
    options: &DigestOptions,
    interrupted: &AtomicBool,
    out: &mut impl Write,
    err: &mut impl Write,
) -> Result<DigestSummary, CliError> {
    if options.files.is_empty() {
        return Err(CliError::NoInput);
    }
    if let [path] = options.files.as_slice() {
        // Bad thread counts are reported even when no pump is started.
        options.config.resolve()?;
        return run_inline(path, out, err);
    }

    let pump = Pump::new(&options.config)?;
    let threads = pump.threads();
    info!(
        files = options.files.len(),
        fetch_threads = threads.fetch,
        transform_threads = threads.transform,
        "Hashing files"
    );

    let mut entries = Vec::with_capacity(options.files.len());
    for path in &options.files {
        let entry = Entry {
            path: path.clone(),
            result: ResultSlot::new(),
            digest: ObjectSlot::new(),
        };
        pump.submit(
            FileFetcher::new(path),
            sha256_transformer(),
            Some(entry.result.clone()),
            Some(entry.digest.clone()),
        )
        .map_err(|e| CliError::Submit {
            path: path.clone(),
            error: e.into_parts().0,
        })?;
        entries.push(entry);
    }

    let batch = options.batch.max(1);
    let mut summary = DigestSummary::default();
    let mut next = 0;
    let mut purged = false;
    let mut output_error = None;

    loop {
        let finalized = pump.drain_finalize(batch);
        if finalized > 0 {
            debug!(finalized, status = %pump.queue_status(), "Drain pass");
        }
        next = report_ready(&entries, next, &mut summary, out, err, &mut output_error);

        if pump.outstanding_count() == 0 {
            break;
        }
        if !purged && interrupted.load(Ordering::SeqCst) {
            warn!("Interrupted, cancelling remaining files");
            pump.purge_all();
            purged = true;
            continue;
        }
        thread::sleep(POLL_INTERVAL);
    }

    report_ready(&entries, next, &mut summary, out, err, &mut output_error);
    finish(summary, output_error)
}

/// Hashes one file on the calling thread.
fn run_inline(
    path: &Path,
    out: &mut impl Write,
    err: &mut impl Write,
) -> Result<DigestSummary, CliError> {
    info!(path = %path.display(), "Hashing single file inline");
    let entry = Entry {
        path: path.to_path_buf(),
        result: ResultSlot::new(),
        digest: ObjectSlot::new(),
    };
    run_now(
        FileFetcher::new(path),
        sha256_transformer(),
        Some(entry.result.clone()),
        Some(entry.digest.clone()),
    );

    let mut summary = DigestSummary::default();
    let mut output_error = None;
    report_ready(
        std::slice::from_ref(&entry),
        0,
        &mut summary,
        out,
        err,
        &mut output_error,
    );
    finish(summary, output_error)
}

fn finish(
    summary: DigestSummary,
    output_error: Option<io::Error>,
) -> Result<DigestSummary, CliError> {
    info!(
        hashed = summary.hashed,
        failed = summary.failed,
        cancelled = summary.cancelled,
        "Done"
    );
    match output_error {
        Some(e) => Err(CliError::Output(e)),
        None => Ok(summary),
    }
}

/// Prints finished entries from `next` onwards, stopping at the first one
/// still running. Returns the index of that entry.
///
/// The first write error is kept in `output_error`; later entries are still
/// counted so the pump keeps draining.
fn report_ready(
    entries: &[Entry],
    mut next: usize,
    summary: &mut DigestSummary,
    out: &mut impl Write,
    err: &mut impl Write,
    output_error: &mut Option<io::Error>,
) -> usize {
    while let Some(entry) = entries.get(next) {
        let Some(status) = entry.result.get() else {
            break;
        };
        let path = entry.path.display();
        let written = match (status, entry.digest.take()) {
            (JobStatus::Success, Some(hex)) => {
                summary.hashed += 1;
                writeln!(out, "{}  {}", hex, path)
            }
            (JobStatus::Cancelled, _) => {
                summary.cancelled += 1;
                writeln!(err, "stagepump: {}: cancelled", path)
            }
            (JobStatus::Failed(failure), _) => {
                summary.failed += 1;
                writeln!(err, "stagepump: {}: {}", path, failure.error)
            }
            (JobStatus::Success, None) => {
                summary.failed += 1;
                writeln!(err, "stagepump: {}: digest missing", path)
            }
        };
        if let Err(e) = written {
            if output_error.is_none() {
                warn!(error = %e, "Failed to write result");
                *output_error = Some(e);
            }
        }
        next += 1;
    }
    next
}

/// Installs a Ctrl-C handler that raises the returned flag.
pub fn interrupt_flag() -> Result<Arc<AtomicBool>, CliError> {
    let flag = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&flag);
    ctrlc::set_handler(move || handler_flag.store(true, Ordering::SeqCst))
        .map_err(|e| CliError::Signal(e.to_string()))?;
    Ok(flag)
}
