//! Worker-pool planning for the encode coordinator.
//!
//! Derives how many encoder subprocesses may run at once from the CPU core
//! count, unless the configuration pins an explicit value.

use dpx_pipeline_config::EncoderConfig;

/// Worker plan derived from configuration and system resources
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPlan {
    /// Total logical CPU cores available
    pub total_cores: u32,
    /// Concurrent encoder subprocesses
    pub encode_workers: u32,
}

impl WorkerPlan {
    /// Derive a worker plan for a given core count.
    ///
    /// Uses the configured worker count when non-zero; otherwise tiers on the
    /// core count. The encoder parallelizes internally, so the pool stays
    /// small even on large machines.
    pub fn for_cores(total_cores: u32, cfg: &EncoderConfig) -> Self {
        let encode_workers = if cfg.workers > 0 {
            cfg.workers
        } else {
            derive_workers(total_cores)
        };
        Self {
            total_cores,
            encode_workers,
        }
    }

    /// Derive a worker plan from the detected core count.
    pub fn derive(cfg: &EncoderConfig) -> Self {
        Self::for_cores(num_cpus::get() as u32, cfg)
    }
}

/// Derive worker count based on core count
/// - 4 workers for 24+ cores
/// - 2 workers for 8+ cores
/// - 1 worker otherwise
fn derive_workers(cores: u32) -> u32 {
    if cores >= 24 {
        4
    } else if cores >= 8 {
        2
    } else {
        1
    }
}

/// Public function to derive a worker plan from configuration
pub fn derive_plan(cfg: &EncoderConfig) -> WorkerPlan {
    WorkerPlan::derive(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        // For any core count with no explicit worker setting, the derived
        // pool size follows the core tiers and never exceeds 4.
        #[test]
        fn prop_worker_derivation(cores in 1u32..256) {
            let cfg = EncoderConfig::default();
            let plan = WorkerPlan::for_cores(cores, &cfg);

            prop_assert_eq!(plan.total_cores, cores);

            let expected = if cores >= 24 { 4 } else if cores >= 8 { 2 } else { 1 };
            prop_assert_eq!(
                plan.encode_workers, expected,
                "For {} cores, expected {} workers but got {}",
                cores, expected, plan.encode_workers
            );
        }

        // For any explicit non-zero worker setting, the plan uses it
        // unchanged.
        #[test]
        fn prop_explicit_workers_override(
            cores in 1u32..256,
            explicit in 1u32..32,
        ) {
            let cfg = EncoderConfig {
                workers: explicit,
                ..EncoderConfig::default()
            };
            let plan = WorkerPlan::for_cores(cores, &cfg);

            prop_assert_eq!(plan.encode_workers, explicit);
        }
    }

    #[test]
    fn test_tier_boundaries() {
        let cfg = EncoderConfig::default();
        assert_eq!(WorkerPlan::for_cores(1, &cfg).encode_workers, 1);
        assert_eq!(WorkerPlan::for_cores(7, &cfg).encode_workers, 1);
        assert_eq!(WorkerPlan::for_cores(8, &cfg).encode_workers, 2);
        assert_eq!(WorkerPlan::for_cores(23, &cfg).encode_workers, 2);
        assert_eq!(WorkerPlan::for_cores(24, &cfg).encode_workers, 4);
        assert_eq!(WorkerPlan::for_cores(128, &cfg).encode_workers, 4);
    }
}
