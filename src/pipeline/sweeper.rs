// Cleanup sweeper
// Periodically empties every subdirectory of the artifact root, skipping anything a live
// lease protects. Failures are per entry and never stop the sweep.

use chrono::Utc;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::audio::FeatureKind;
use crate::context::AppContext;
use crate::state::{forget_artifact, ProgressTracker};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Entries a delete was attempted on, whether or not it succeeded
    pub processed: usize,
    pub failed: usize,
    /// Entries left alone because a live lease names them
    pub skipped: usize,
}

/// One pass over `root`
pub fn sweep_once(root: &Path, progress: &ProgressTracker) -> SweepReport {
    let mut report = SweepReport::default();
    let now = Utc::now();

    match progress.purge_expired_leases(now) {
        Ok(0) => {}
        Ok(purged) => log::info!("Purged {} expired leases", purged),
        Err(e) => log::warn!("Could not purge expired leases: {}", e),
    }

    let leased: Vec<String> = match progress.active_leases(now) {
        Ok(leases) => leases.into_iter().map(|lease| lease.job_id).collect(),
        Err(e) => {
            // Without the lease list nothing can be deleted safely
            log::error!("Skipping sweep, cannot read leases: {}", e);
            return report;
        }
    };

    let subdirs = match list_sorted(root) {
        Ok(entries) => entries.into_iter().filter(|p| p.is_dir()).collect::<Vec<_>>(),
        Err(e) => {
            log::error!("Cannot read artifact root {}: {}", root.display(), e);
            return report;
        }
    };

    for subdir in subdirs {
        let entries = match list_sorted(&subdir) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("Cannot read {}: {}", subdir.display(), e);
                continue;
            }
        };

        for entry in entries {
            let name = entry
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            if leased.iter().any(|job_id| belongs_to_job(&name, job_id)) {
                report.skipped += 1;
                continue;
            }

            report.processed += 1;
            if let Err(e) = remove_entry(&entry) {
                report.failed += 1;
                log::warn!("Failed to delete {}: {}", entry.display(), e);
                continue;
            }
            if let Err(e) = forget_artifact(progress.db(), &entry) {
                log::warn!("Deleted {} but could not update ledger: {}", entry.display(), e);
            }
        }
    }

    log::info!(
        "Sweep of {} finished: {} processed, {} failed, {} skipped",
        root.display(),
        report.processed,
        report.failed,
        report.skipped
    );
    report
}

/// Whether an artifact name is one the pipeline derives from `job_id`:
/// `{job}.{ext}`, `{job}-{index}.png` or `{kind}-{job}.mp4`
fn belongs_to_job(name: &str, job_id: &str) -> bool {
    let stem = match Path::new(name).file_stem().and_then(|s| s.to_str()) {
        Some(stem) => stem,
        None => return false,
    };
    if stem == job_id {
        return true;
    }
    let frame = stem
        .strip_prefix(job_id)
        .and_then(|rest| rest.strip_prefix('-'))
        .map_or(false, |index| {
            !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit())
        });
    frame
        || FeatureKind::ALL.iter().any(|kind| {
            stem.strip_prefix(kind.slug())
                .and_then(|rest| rest.strip_prefix('-'))
                == Some(job_id)
        })
}

fn list_sorted(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort();
    Ok(entries)
}

/// Files are unlinked; directories only go if already empty
fn remove_entry(path: &Path) -> std::io::Result<()> {
    let file_type = fs::symlink_metadata(path)?.file_type();
    if file_type.is_dir() {
        fs::remove_dir(path)
    } else {
        fs::remove_file(path)
    }
}

/// Sweep every `interval` on the tokio runtime, first pass one interval from now
pub fn spawn(ctx: AppContext, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + interval;
        let mut ticker = tokio::time::interval_at(start, interval);
        log::info!("Sweeper scheduled every {}s", interval.as_secs());

        loop {
            ticker.tick().await;
            let ctx = ctx.clone();
            let result =
                tokio::task::spawn_blocking(move || sweep_once(ctx.store.root(), &ctx.progress))
                    .await;
            if let Err(e) = result {
                log::error!("Sweep task panicked: {}", e);
            }
        }
    })
}
