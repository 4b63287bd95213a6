//! Encode coordination stage.
//!
//! Drains the two encode queues — version-2 retries first, then the default
//! queue — dispatching at most a fixed batch of sequences per invocation
//! through a bounded worker pool. Each dispatched sequence gets two
//! sequential encoder invocations (plain, then checksum generation) whose
//! combined output accumulates in the container's paired log file; the
//! verification stage classifies that log on a later run.

use crate::concurrency::{derive_plan, WorkerPlan};
use crate::encode::{run_encode, EncodeParams};
use crate::ledger::LedgerSet;
use crate::layout::PipelineLayout;
use crate::runlist::RunList;
use crate::sequence::{self, Candidate, EncodeVersion, Sequence};
use crate::PipelineError;
use dpx_pipeline_config::PipelineConfig;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// One sequence selected for encoding, with its version assignment.
///
/// Jobs only exist with a version attached: a sequence drawn from the v2
/// queue cannot be encoded as v1 by accident.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeJob {
    pub sequence: Sequence,
    pub version: EncodeVersion,
}

/// Selects the batch to dispatch this run.
///
/// The v2 partition drains first so overflow retries age out ahead of new
/// work, and the combined batch never exceeds `cap` however many sequences
/// are eligible.
pub fn plan_batch(v2: Vec<Sequence>, v1: Vec<Sequence>, cap: usize) -> Vec<EncodeJob> {
    v2.into_iter()
        .map(|sequence| EncodeJob {
            sequence,
            version: EncodeVersion::V2,
        })
        .chain(v1.into_iter().map(|sequence| EncodeJob {
            sequence,
            version: EncodeVersion::V1,
        }))
        .take(cap)
        .collect()
}

/// Outcome counts of one encode run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EncodeSummary {
    /// Sequences dispatched to the encoder.
    pub dispatched: usize,
    /// Of those, dispatched at the default version.
    pub v1: usize,
    /// Of those, dispatched at version 2.
    pub v2: usize,
    /// Sequences whose encoder invocation could not run at all.
    pub failed: usize,
    /// Eligible sequences left queued beyond the batch cap.
    pub deferred: usize,
    /// Candidates already terminal in a ledger.
    pub skipped: usize,
}

/// Bounded worker pool for encoder subprocesses.
///
/// A semaphore caps how many encoder processes run at once; dispatch order
/// within the batch is unordered beyond permit availability.
pub struct EncodeCoordinator {
    semaphore: Arc<Semaphore>,
    plan: WorkerPlan,
}

impl EncodeCoordinator {
    pub fn new(plan: WorkerPlan) -> Self {
        let permits = plan.encode_workers as usize;
        Self {
            semaphore: Arc::new(Semaphore::new(permits)),
            plan,
        }
    }

    /// Slots currently free in the pool.
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn plan(&self) -> &WorkerPlan {
        &self.plan
    }

    /// Runs every prepared job through the pool and returns the number that
    /// failed to execute. One job's failure never aborts the others.
    pub async fn execute(&self, jobs: Vec<PreparedJob>) -> usize {
        let mut handles = Vec::with_capacity(jobs.len());

        for job in jobs {
            let semaphore = self.semaphore.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("semaphore should not be closed");
                tracing::info!(
                    sequence = job.id.as_str(),
                    version = %job.params.version,
                    "encoder dispatch"
                );

                // Two sequential invocations: plain, then checksum
                // generation, both appending to the same log.
                let result = tokio::task::spawn_blocking(move || {
                    run_encode(&job.params, &job.log_path)?;
                    let mut checksum_params = job.params.clone();
                    checksum_params.checksum = true;
                    run_encode(&checksum_params, &job.log_path)
                })
                .await;

                match result {
                    Ok(Ok(())) => true,
                    Ok(Err(e)) => {
                        tracing::error!(error = %e, "encoder invocation failed");
                        false
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "encoder task panicked");
                        false
                    }
                }
            }));
        }

        let mut failed = 0;
        for handle in handles {
            match handle.await {
                Ok(true) => {}
                _ => failed += 1,
            }
        }
        failed
    }
}

/// A job with its encoder parameters and log destination resolved.
#[derive(Debug, Clone)]
pub struct PreparedJob {
    pub id: String,
    pub params: EncodeParams,
    pub log_path: PathBuf,
}

/// Runs the encode stage over both encode queues.
pub async fn run(
    cfg: &PipelineConfig,
    layout: &PipelineLayout,
    ledgers: &LedgerSet,
    _run_id: &str,
) -> Result<EncodeSummary, PipelineError> {
    let mut summary = EncodeSummary::default();

    let v2 = eligible(ledgers, &layout.encode_v2, &mut summary)?;
    let v1 = eligible(ledgers, &layout.encode_v1, &mut summary)?;
    if v2.is_empty() && v1.is_empty() {
        return Err(PipelineError::NoInput("encoding"));
    }

    let eligible_total = v2.len() + v1.len();
    let jobs = plan_batch(v2, v1, cfg.encoder.batch_cap);
    summary.deferred = eligible_total - jobs.len();

    // Record every dispatch before submission: a crash during encoding
    // leaves an accurate in-flight record for the next run to reconcile.
    let run_list = RunList::create(&layout.ledgers, "encode_dispatch")?;
    let mut prepared = Vec::with_capacity(jobs.len());
    for job in jobs {
        run_list.append(&format!(
            "{}\t{}",
            job.sequence.root.display(),
            job.version
        ))?;
        match job.version {
            EncodeVersion::V1 => summary.v1 += 1,
            EncodeVersion::V2 => summary.v2 += 1,
        }
        prepared.push(PreparedJob {
            id: job.sequence.id.clone(),
            log_path: layout.log_path(&job.sequence.id),
            params: EncodeParams {
                sequence_root: job.sequence.root.clone(),
                container_path: layout.container_path(&job.sequence.id),
                version: job.version,
                checksum: false,
                max_reversibility_bytes: cfg.encoder.max_reversibility_bytes,
                license: cfg.encoder.license.clone(),
            },
        });
    }
    summary.dispatched = prepared.len();

    let coordinator = EncodeCoordinator::new(derive_plan(&cfg.encoder));
    tracing::info!(
        dispatched = summary.dispatched,
        v1 = summary.v1,
        v2 = summary.v2,
        deferred = summary.deferred,
        workers = coordinator.plan().encode_workers,
        "encode batch starting"
    );
    summary.failed = coordinator.execute(prepared).await;

    run_list.finish()?;

    tracing::info!(
        dispatched = summary.dispatched,
        failed = summary.failed,
        "encode run complete"
    );
    Ok(summary)
}

/// Discovers a queue directory and filters out ledger-terminal sequences.
fn eligible(
    ledgers: &LedgerSet,
    queue: &std::path::Path,
    summary: &mut EncodeSummary,
) -> Result<Vec<Sequence>, PipelineError> {
    let mut sequences = Vec::new();
    for candidate in sequence::discover(queue)? {
        match candidate {
            Candidate::Frames(seq) => {
                if ledgers.is_terminal(&seq.id)? {
                    tracing::info!(sequence = seq.id.as_str(), "already terminal in a ledger, skipping");
                    summary.skipped += 1;
                } else {
                    sequences.push(seq);
                }
            }
            Candidate::Empty { id, .. } => {
                // Encode queues are fed by assessment; a frameless directory
                // here is operator interference. Leave it for review runs.
                tracing::error!(sequence = id.as_str(), "frameless directory in encode queue");
                summary.skipped += 1;
            }
        }
    }
    Ok(sequences)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{LedgerEntry, LedgerOutcome, Stage};
    use dpx_pipeline_config::EncoderConfig;
    use proptest::prelude::*;
    use std::fs::{self, File};
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    fn make_sequence(n: usize) -> Sequence {
        let root = PathBuf::from(format!("/queue/N_{:06}_01of01", n));
        Sequence {
            id: format!("N_{:06}_01of01", n),
            frames_dir: root.clone(),
            representative: root.join("0000001.dpx"),
            root,
        }
    }

    fn make_sequences(count: usize) -> Vec<Sequence> {
        (0..count).map(make_sequence).collect()
    }

    #[test]
    fn test_plan_batch_respects_cap() {
        let jobs = plan_batch(make_sequences(15), make_sequences(15), 20);
        assert_eq!(jobs.len(), 20);
    }

    #[test]
    fn test_plan_batch_v2_first() {
        let jobs = plan_batch(make_sequences(3), make_sequences(3), 20);
        let versions: Vec<EncodeVersion> = jobs.iter().map(|j| j.version).collect();
        assert_eq!(
            versions,
            vec![
                EncodeVersion::V2,
                EncodeVersion::V2,
                EncodeVersion::V2,
                EncodeVersion::V1,
                EncodeVersion::V1,
                EncodeVersion::V1,
            ]
        );
    }

    #[test]
    fn test_plan_batch_cap_can_exclude_v1_entirely() {
        let jobs = plan_batch(make_sequences(25), make_sequences(5), 20);
        assert_eq!(jobs.len(), 20);
        assert!(jobs.iter().all(|j| j.version == EncodeVersion::V2));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        // The batch never exceeds the cap, and every v2 job precedes every
        // v1 job.
        #[test]
        fn prop_batch_cap_and_ordering(
            v2_count in 0usize..40,
            v1_count in 0usize..40,
            cap in 1usize..30,
        ) {
            let jobs = plan_batch(make_sequences(v2_count), make_sequences(v1_count), cap);

            prop_assert!(jobs.len() <= cap);
            prop_assert_eq!(jobs.len(), cap.min(v2_count + v1_count));

            let first_v1 = jobs.iter().position(|j| j.version == EncodeVersion::V1);
            if let Some(first_v1) = first_v1 {
                prop_assert!(
                    jobs[first_v1..].iter().all(|j| j.version == EncodeVersion::V1),
                    "v1 jobs must come after every v2 job"
                );
            }
        }
    }

    fn test_plan(workers: u32) -> WorkerPlan {
        WorkerPlan {
            total_cores: 32,
            encode_workers: workers,
        }
    }

    #[tokio::test]
    async fn test_coordinator_initial_permits() {
        let coordinator = EncodeCoordinator::new(test_plan(3));
        assert_eq!(coordinator.available_permits(), 3);
    }

    #[tokio::test]
    async fn test_semaphore_permit_limiting() {
        let coordinator = EncodeCoordinator::new(test_plan(2));
        assert_eq!(coordinator.available_permits(), 2);

        let permit1 = coordinator.semaphore.clone().try_acquire_owned();
        assert!(permit1.is_ok());
        assert_eq!(coordinator.available_permits(), 1);

        let permit2 = coordinator.semaphore.clone().try_acquire_owned();
        assert!(permit2.is_ok());
        assert_eq!(coordinator.available_permits(), 0);

        assert!(coordinator.semaphore.clone().try_acquire_owned().is_err());

        drop(permit1);
        assert_eq!(coordinator.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_permit_acquisition() {
        let coordinator = Arc::new(EncodeCoordinator::new(test_plan(2)));

        let c1 = coordinator.clone();
        let c2 = coordinator.clone();
        let c3 = coordinator.clone();

        let handle1 = tokio::spawn(async move {
            let _permit = c1.semaphore.clone().acquire_owned().await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
        });
        let handle2 = tokio::spawn(async move {
            let _permit = c2.semaphore.clone().acquire_owned().await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
        });

        tokio::time::sleep(Duration::from_millis(10)).await;

        let start = std::time::Instant::now();
        let handle3 = tokio::spawn(async move {
            let _permit = c3.semaphore.clone().acquire_owned().await.unwrap();
        });

        let _ = tokio::join!(handle1, handle2, handle3);

        // The third task had to wait for a permit
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    struct Fixture {
        _temp: TempDir,
        cfg: PipelineConfig,
        layout: PipelineLayout,
        ledgers: LedgerSet,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let cfg = PipelineConfig {
            paths: Default::default(),
            encoder: EncoderConfig {
                workers: 2,
                ..EncoderConfig::default()
            },
        };
        let layout = PipelineLayout::new(temp.path());
        layout.ensure().unwrap();
        let ledgers = LedgerSet::open(&layout.ledgers);
        Fixture {
            _temp: temp,
            cfg,
            layout,
            ledgers,
        }
    }

    fn seed_sequence(dir: &Path, id: &str) {
        let root = dir.join(id);
        fs::create_dir_all(&root).unwrap();
        File::create(root.join("0000001.dpx")).unwrap();
    }

    #[tokio::test]
    async fn test_run_no_input_is_fatal() {
        let f = fixture();
        let err = run(&f.cfg, &f.layout, &f.ledgers, "run-1").await.unwrap_err();
        assert!(err.is_no_input());
    }

    #[tokio::test]
    async fn test_run_all_candidates_terminal_is_no_input() {
        let f = fixture();
        seed_sequence(&f.layout.encode_v1, "N_000123_01of01");
        f.ledgers
            .review
            .append(&LedgerEntry::new(
                "run-0",
                Stage::Verify,
                LedgerOutcome::GenericError,
                &f.layout.encode_v1.join("N_000123_01of01"),
                None,
            ))
            .unwrap();

        let err = run(&f.cfg, &f.layout, &f.ledgers, "run-1").await.unwrap_err();
        assert!(err.is_no_input());
    }

    // Dispatch bookkeeping holds whether or not the encoder binary exists on
    // the test machine: the batch is recorded, counted, and the run list is
    // removed at run end.
    #[tokio::test]
    async fn test_run_dispatch_bookkeeping() {
        let f = fixture();
        seed_sequence(&f.layout.encode_v1, "N_000100_01of01");
        seed_sequence(&f.layout.encode_v2, "N_000200_01of01");

        let summary = run(&f.cfg, &f.layout, &f.ledgers, "run-1").await.unwrap();

        assert_eq!(summary.dispatched, 2);
        assert_eq!(summary.v1, 1);
        assert_eq!(summary.v2, 1);
        assert_eq!(summary.deferred, 0);

        // Per-run dispatch list cleaned up at run end
        assert!(!f
            .layout
            .ledgers
            .join("temp_encode_dispatch_list.txt")
            .exists());
    }

    #[tokio::test]
    async fn test_run_defers_beyond_batch_cap() {
        let mut f = fixture();
        f.cfg.encoder.batch_cap = 2;
        for i in 0..5 {
            seed_sequence(&f.layout.encode_v1, &format!("N_{:06}_01of01", i));
        }

        let summary = run(&f.cfg, &f.layout, &f.ledgers, "run-1").await.unwrap();
        assert_eq!(summary.dispatched, 2);
        assert_eq!(summary.deferred, 3);
    }
}
