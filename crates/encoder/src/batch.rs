//! Concurrent batch scheduling under a global CPU budget.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use log::{debug, error, info};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::error::{EncodeError, Result};
use crate::params::EncoderId;
use crate::pipeline::{output_file_name, FileOutcome, Pipeline};

const GIB: u64 = 1024 * 1024 * 1024;
const MIB: u64 = 1024 * 1024;

/// Host-level limits for one batch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchSettings {
    /// Global CPU usage percentage shared by all workers
    pub max_cpu_usage: f64,
    pub max_workers: usize,
    pub logical_cores: usize,
}

impl BatchSettings {
    pub fn new(max_cpu_usage: f64, max_workers: usize, logical_cores: usize) -> Result<Self> {
        if !(max_cpu_usage > 0.0 && max_cpu_usage <= 100.0) {
            return Err(EncodeError::InvalidProfile(format!(
                "max_cpu_usage must be in (0, 100], got {}",
                max_cpu_usage
            )));
        }
        if max_workers == 0 {
            return Err(EncodeError::InvalidProfile(
                "max_workers must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            max_cpu_usage,
            max_workers,
            logical_cores: logical_cores.max(1),
        })
    }
}

/// Concurrent files for a batch: bounded by file count, then by codec cost.
pub fn plan_workers(encoder: EncoderId, file_count: usize, max_workers: usize) -> usize {
    let workers = max_workers.min(file_count);
    match encoder {
        EncoderId::Libx265 => workers.min(2),
        EncoderId::Libx264 => workers.min(4),
        _ => workers,
    }
}

/// `"<n>GB"` from 1 GiB upward, `"<n>MB"` below, truncated.
pub fn format_size_label(bytes: u64) -> String {
    let gb = bytes / GIB;
    if gb >= 1 {
        format!("{}GB", gb)
    } else {
        format!("{}MB", bytes / MIB)
    }
}

/// Wall time as `HH:MM:SS`
pub fn format_elapsed(d: chrono::Duration) -> String {
    let total = d.num_seconds().max(0);
    format!("{:02}:{:02}:{:02}", total / 3600, (total / 60) % 60, total % 60)
}

/// Per-file outcomes in input order plus size totals.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    /// One slot per input, in input order
    pub outcomes: Vec<Option<FileOutcome>>,
    pub workers: usize,
    pub cpu_per_worker: f64,
    pub total_initial_bytes: u64,
    pub total_resulting_bytes: u64,
    pub savings_percent: i64,
    pub elapsed_secs: i64,
}

impl BatchReport {
    fn from_slots(
        outcomes: Vec<Option<FileOutcome>>,
        workers: usize,
        cpu_per_worker: f64,
        elapsed: chrono::Duration,
    ) -> Self {
        let total_initial_bytes: u64 = outcomes
            .iter()
            .flatten()
            .map(|o| o.sizes.initial_bytes)
            .sum();
        let total_resulting_bytes: u64 = outcomes
            .iter()
            .flatten()
            .map(|o| o.sizes.resulting_bytes)
            .sum();
        Self {
            outcomes,
            workers,
            cpu_per_worker,
            total_initial_bytes,
            total_resulting_bytes,
            savings_percent: savings_percent(total_initial_bytes, total_resulting_bytes),
            elapsed_secs: elapsed.num_seconds(),
        }
    }

    /// Final names in input order, `None` where no output was produced
    pub fn final_names(&self) -> Vec<Option<&str>> {
        self.outcomes
            .iter()
            .map(|o| o.as_ref().map(|o| o.final_name.as_str()))
            .collect()
    }

    /// Human-readable savings line, only when something was saved
    pub fn savings_summary(&self) -> Option<String> {
        if self.savings_percent <= 0 {
            return None;
        }
        Some(format!(
            "Total savings: {}% ({} → {})",
            self.savings_percent,
            format_size_label(self.total_initial_bytes),
            format_size_label(self.total_resulting_bytes)
        ))
    }
}

/// Integer percentage saved, truncated toward zero; 0 for an empty batch.
pub fn savings_percent(initial: u64, resulting: u64) -> i64 {
    if initial == 0 {
        return 0;
    }
    ((initial as f64 - resulting as f64) / initial as f64 * 100.0) as i64
}

/// Reject batches where two inputs would be renamed to the same file.
pub fn check_output_collisions(inputs: &[PathBuf], encoder: EncoderId) -> Result<()> {
    let mut targets: HashMap<PathBuf, Vec<PathBuf>> = HashMap::new();
    for input in inputs {
        let target = input
            .parent()
            .unwrap_or_else(|| Path::new(""))
            .join(output_file_name(input, encoder));
        targets.entry(target).or_default().push(input.clone());
    }
    match targets.into_iter().find(|(_, sources)| sources.len() > 1) {
        Some((target, sources)) => Err(EncodeError::OutputCollision { target, sources }),
        None => Ok(()),
    }
}

/// Transcode `inputs` with a fixed pool of workers.
///
/// Each worker takes the next queued file and drives its pipeline to
/// completion. The CPU budget is split evenly once, up front. The first
/// failure stops workers from taking more files; pipelines already running
/// finish, then the error is returned.
pub async fn run_batch(
    pipeline: &Pipeline,
    settings: BatchSettings,
    inputs: Vec<PathBuf>,
) -> Result<BatchReport> {
    let total = inputs.len();
    let encoder = pipeline.profile().encoder;
    if total == 0 {
        info!("No input files, nothing to encode");
        return Ok(BatchReport::from_slots(Vec::new(), 0, 0.0, chrono::Duration::zero()));
    }

    check_output_collisions(&inputs, encoder)?;

    let workers = plan_workers(encoder, total, settings.max_workers);
    let cpu_per_worker = settings.max_cpu_usage / workers as f64;
    let logical_cores = settings.logical_cores;
    let description = format!(
        "Encode media to {} CRF-{}",
        encoder.display_name(),
        pipeline.profile().quality
    );
    info!(
        "{}: {} file(s), {} worker(s), {:.1}% CPU each",
        description, total, workers, cpu_per_worker
    );
    info!("[0/{}] {}", total, description);

    let start = Utc::now();
    let inputs = Arc::new(inputs);
    let next = Arc::new(AtomicUsize::new(0));
    let abort = Arc::new(AtomicBool::new(false));
    let (tx, mut rx) = mpsc::unbounded_channel::<(usize, Result<FileOutcome>)>();

    let mut pool = JoinSet::new();
    for worker in 0..workers {
        let pipeline = pipeline.clone();
        let inputs = Arc::clone(&inputs);
        let next = Arc::clone(&next);
        let abort = Arc::clone(&abort);
        let tx = tx.clone();
        pool.spawn(async move {
            loop {
                if abort.load(Ordering::SeqCst) {
                    break;
                }
                let index = next.fetch_add(1, Ordering::SeqCst);
                let Some(input) = inputs.get(index) else {
                    break;
                };
                debug!("Worker {} took {}", worker, input.display());
                let result = pipeline
                    .encode_file(input, logical_cores, cpu_per_worker)
                    .await;
                if result.is_err() {
                    abort.store(true, Ordering::SeqCst);
                }
                if tx.send((index, result)).is_err() {
                    break;
                }
            }
        });
    }
    drop(tx);

    let mut slots: Vec<Option<FileOutcome>> = vec![None; total];
    let mut first_error: Option<EncodeError> = None;
    let mut completed = 0;
    while let Some((index, result)) = rx.recv().await {
        completed += 1;
        info!("[{}/{}] {}", completed, total, description);
        match result {
            Ok(outcome) => slots[index] = Some(outcome),
            Err(e) => {
                let path = inputs[index].clone();
                error!("[ERROR] {}: {}", path.display(), e);
                if first_error.is_none() {
                    first_error = Some(EncodeError::Aborted {
                        path,
                        source: Box::new(e),
                    });
                }
            }
        }
    }

    while let Some(joined) = pool.join_next().await {
        if let Err(e) = joined {
            if e.is_panic() {
                std::panic::resume_unwind(e.into_panic());
            }
        }
    }

    let elapsed = Utc::now() - start;
    info!("Encoding time: {}", format_elapsed(elapsed));

    if let Some(e) = first_error {
        return Err(e);
    }

    let report = BatchReport::from_slots(slots, workers, cpu_per_worker, elapsed);
    if let Some(summary) = report.savings_summary() {
        info!("{}", summary);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::SizeRecord;
    use proptest::prelude::*;

    fn outcome(name: &str, initial: u64, resulting: u64) -> Option<FileOutcome> {
        Some(FileOutcome {
            input: PathBuf::from(format!("/m/{}", name)),
            final_name: name.to_string(),
            sizes: SizeRecord {
                initial_bytes: initial,
                resulting_bytes: resulting,
            },
        })
    }

    #[test]
    fn test_plan_workers_clamps() {
        assert_eq!(plan_workers(EncoderId::Libx265, 10, 8), 2);
        assert_eq!(plan_workers(EncoderId::Libx264, 10, 8), 4);
        assert_eq!(plan_workers(EncoderId::LibSvtAv1, 10, 8), 8);
        assert_eq!(plan_workers(EncoderId::LibvpxVp9, 3, 8), 3);
        assert_eq!(plan_workers(EncoderId::Libx265, 1, 8), 1);
    }

    #[test]
    fn test_format_size_label() {
        assert_eq!(format_size_label(GIB), "1GB");
        assert_eq!(format_size_label(5 * GIB + GIB / 2), "5GB");
        assert_eq!(format_size_label(GIB - 1), "1023MB");
        assert_eq!(format_size_label(700 * MIB + 12345), "700MB");
        assert_eq!(format_size_label(0), "0MB");
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(chrono::Duration::seconds(3725)), "01:02:05");
        assert_eq!(format_elapsed(chrono::Duration::zero()), "00:00:00");
    }

    #[test]
    fn test_report_totals_skip_empty_slots() {
        let report = BatchReport::from_slots(
            vec![outcome("a.mkv", 4 * GIB, GIB), None, outcome("b.mkv", 2 * GIB, GIB)],
            2,
            40.0,
            chrono::Duration::seconds(90),
        );
        assert_eq!(report.total_initial_bytes, 6 * GIB);
        assert_eq!(report.total_resulting_bytes, 2 * GIB);
        assert_eq!(report.savings_percent, 66);
        assert_eq!(report.final_names(), vec![Some("a.mkv"), None, Some("b.mkv")]);
        assert_eq!(report.savings_summary().as_deref(), Some("Total savings: 66% (6GB → 2GB)"));
    }

    #[test]
    fn test_no_summary_when_output_grew() {
        let report = BatchReport::from_slots(
            vec![outcome("a.mkv", 100 * MIB, 120 * MIB)],
            1,
            80.0,
            chrono::Duration::seconds(5),
        );
        assert!(report.savings_percent < 0);
        assert_eq!(report.savings_summary(), None);
    }

    #[test]
    fn test_savings_percent_empty() {
        assert_eq!(savings_percent(0, 0), 0);
    }

    #[test]
    fn test_collision_detected_before_work() {
        let inputs = vec![
            PathBuf::from("/m/Movie.x264.mp4"),
            PathBuf::from("/m/Movie.HEVC.mkv"),
        ];
        match check_output_collisions(&inputs, EncoderId::Libx265) {
            Err(EncodeError::OutputCollision { target, sources }) => {
                assert_eq!(target, PathBuf::from("/m/Movie.x265.mkv"));
                assert_eq!(sources.len(), 2);
            }
            other => panic!("expected collision, got {:?}", other),
        }
        assert!(check_output_collisions(&inputs[..1], EncoderId::Libx265).is_ok());
    }

    #[test]
    fn test_settings_validation() {
        assert!(BatchSettings::new(0.0, 4, 8).is_err());
        assert!(BatchSettings::new(101.0, 4, 8).is_err());
        assert!(BatchSettings::new(f64::NAN, 4, 8).is_err());
        assert!(BatchSettings::new(80.0, 0, 8).is_err());
        assert_eq!(BatchSettings::new(80.0, 4, 0).unwrap().logical_cores, 1);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn test_worker_clamp_by_codec_family(files in 0usize..500, max in 1usize..256) {
            prop_assert!(plan_workers(EncoderId::Libx265, files, max) <= 2);
            prop_assert!(plan_workers(EncoderId::Libx264, files, max) <= 4);
            for encoder in [
                EncoderId::Libx264,
                EncoderId::Libx265,
                EncoderId::LibvpxVp9,
                EncoderId::LibSvtAv1,
            ] {
                let workers = plan_workers(encoder, files, max);
                prop_assert!(workers <= files && workers <= max);
                if files > 0 {
                    prop_assert!(workers >= 1);
                }
            }
        }
    }
}
