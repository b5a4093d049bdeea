//! Lookup-table preparation
//!
//! Building an absorption lookup table can take minutes, so it happens once
//! per setup name, before any column is solved. The manager remembers which
//! setup names are ready in this process and otherwise defers to the solver's
//! own persisted cache.

use crate::config::SimulationConfig;
use crate::errors::{FluxError, FluxResult, SolverError};
use crate::profile::ProfileBatch;
use crate::solver::FluxSolver;
use log::{info, warn};
use std::collections::HashMap;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// How a lookup table was made available
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LookupTableStatus {
    /// Already prepared earlier by this manager
    Cached,
    /// Found in the solver's persisted cache
    Reused,
    /// Built during this call
    Built { elapsed: Duration },
}

/// Ensures lookup tables exist before solving
#[derive(Debug, Default)]
pub struct LookupTableManager {
    timeout: Option<Duration>,
    /// setup name -> fingerprint of the configuration it was prepared for
    ready: Mutex<HashMap<String, String>>,
    /// Builds that outlived the timeout, by setup name. Held while preparing a
    /// table so that only one build runs at a time.
    pending: Mutex<HashMap<String, PendingBuild>>,
}

/// A build running on its own thread
#[derive(Debug)]
struct PendingBuild {
    fingerprint: String,
    started: Instant,
    result: mpsc::Receiver<Result<(), SolverError>>,
}

impl LookupTableManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound the build time. On expiry the run fails with
    /// [`FluxError::LookupTableTimeout`]. The build itself cannot be cancelled:
    /// it keeps running on its own thread, and later calls for the same setup
    /// name wait for it instead of starting another.
    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            ..Default::default()
        }
    }

    /// Make sure a lookup table exists for `config`
    ///
    /// Idempotent: repeated calls with the same setup name build at most once,
    /// including after a timeout.
    ///
    /// # Errors
    ///
    /// [`FluxError::LookupTableBuildFailure`] if the solver cannot check for or
    /// build the table, [`FluxError::LookupTableTimeout`] if the build outlives
    /// the timeout.
    pub fn ensure_lookup_table<S>(
        &self,
        solver: &Arc<S>,
        batch: &Arc<ProfileBatch>,
        config: &Arc<SimulationConfig>,
    ) -> FluxResult<LookupTableStatus>
    where
        S: FluxSolver + ?Sized + 'static,
    {
        let setup_name = config.setup_name().to_string();
        let fingerprint = config.lookup_table_fingerprint();

        if self.is_ready(&setup_name, &fingerprint) {
            return Ok(LookupTableStatus::Cached);
        }

        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        // Another caller may have finished the table while we waited for the lock
        if self.is_ready(&setup_name, &fingerprint) {
            return Ok(LookupTableStatus::Cached);
        }

        if let Some(build) = pending.remove(&setup_name) {
            info!(
                "Waiting for lookup table '{}', building for {:.1?}",
                setup_name,
                build.started.elapsed()
            );
            if build.fingerprint != fingerprint {
                warn!(
                    "Lookup table '{}' is being built for a different configuration ({} vs {}); reusing it anyway",
                    setup_name, build.fingerprint, fingerprint
                );
            }
            return self.finish_build(&mut pending, setup_name, build);
        }

        let exists = solver
            .lookup_table_exists(config)
            .map_err(|source| FluxError::LookupTableBuildFailure {
                setup_name: setup_name.clone(),
                source,
            })?;
        if exists {
            info!("Reusing existing lookup table '{}'", setup_name);
            self.mark_ready(setup_name, fingerprint);
            return Ok(LookupTableStatus::Reused);
        }

        info!(
            "Building lookup table '{}' for {} species, {} frequencies, {} profiles",
            setup_name,
            config.species().len(),
            config.spectral_grid().len(),
            batch.len()
        );
        if self.timeout.is_some() {
            let build = spawn_build(solver, batch, config, fingerprint)?;
            return self.finish_build(&mut pending, setup_name, build);
        }

        let start = Instant::now();
        solver
            .build_lookup_table(batch, config)
            .map_err(|source| FluxError::LookupTableBuildFailure {
                setup_name: setup_name.clone(),
                source,
            })?;
        let elapsed = start.elapsed();
        info!("Built lookup table '{}' in {:.1?}", setup_name, elapsed);
        self.mark_ready(setup_name, fingerprint);
        Ok(LookupTableStatus::Built { elapsed })
    }

    /// Wait for a build, putting it back into `pending` if it is still running
    /// when the timeout expires
    fn finish_build(
        &self,
        pending: &mut HashMap<String, PendingBuild>,
        setup_name: String,
        build: PendingBuild,
    ) -> FluxResult<LookupTableStatus> {
        let timeout = self.timeout.unwrap_or(Duration::MAX);
        match build.result.recv_timeout(timeout) {
            Ok(result) => {
                result.map_err(|source| FluxError::LookupTableBuildFailure {
                    setup_name: setup_name.clone(),
                    source,
                })?;
                let elapsed = build.started.elapsed();
                info!("Built lookup table '{}' in {:.1?}", setup_name, elapsed);
                self.mark_ready(setup_name, build.fingerprint);
                Ok(LookupTableStatus::Built { elapsed })
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                warn!(
                    "Lookup table '{}' not ready after {:.1?}; the build continues",
                    setup_name, timeout
                );
                pending.insert(setup_name.clone(), build);
                Err(FluxError::LookupTableTimeout {
                    setup_name,
                    timeout,
                })
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(FluxError::LookupTableBuildFailure {
                setup_name,
                source: SolverError::new("lookup table build thread terminated without a result"),
            }),
        }
    }

    fn is_ready(&self, setup_name: &str, fingerprint: &str) -> bool {
        let ready = self.ready.lock().unwrap_or_else(|e| e.into_inner());
        match ready.get(setup_name) {
            Some(previous) => {
                if previous != fingerprint {
                    warn!(
                        "Lookup table '{}' was prepared for a different configuration ({} vs {}); reusing it anyway",
                        setup_name, previous, fingerprint
                    );
                }
                true
            }
            None => false,
        }
    }

    fn mark_ready(&self, setup_name: String, fingerprint: String) {
        let mut ready = self.ready.lock().unwrap_or_else(|e| e.into_inner());
        ready.insert(setup_name, fingerprint);
    }
}

/// Start a build on its own thread
fn spawn_build<S>(
    solver: &Arc<S>,
    batch: &Arc<ProfileBatch>,
    config: &Arc<SimulationConfig>,
    fingerprint: String,
) -> FluxResult<PendingBuild>
where
    S: FluxSolver + ?Sized + 'static,
{
    let (tx, rx) = mpsc::channel();
    let solver = Arc::clone(solver);
    let batch = Arc::clone(batch);
    let thread_config = Arc::clone(config);

    std::thread::Builder::new()
        .name(format!("lookup-table-{}", config.setup_name()))
        .spawn(move || {
            let result = solver.build_lookup_table(&batch, &thread_config);
            // The receiver is gone if the manager was dropped
            let _ = tx.send(result);
        })?;

    Ok(PendingBuild {
        fingerprint,
        started: Instant::now(),
        result: rx,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::example_solvers::{ConstantSolver, FailingSolver};
    use crate::indexing::GridShape;

    fn empty_batch() -> Arc<ProfileBatch> {
        Arc::new(ProfileBatch::new(GridShape::new(0, 0), vec![]).unwrap())
    }

    #[test]
    fn test_builds_once_across_calls() {
        let solver = Arc::new(ConstantSolver::new(1.0));
        let config = Arc::new(SimulationConfig::default());
        let batch = empty_batch();
        let manager = LookupTableManager::new();

        let first = manager.ensure_lookup_table(&solver, &batch, &config).unwrap();
        assert!(matches!(first, LookupTableStatus::Built { .. }));
        for _ in 0..3 {
            let status = manager.ensure_lookup_table(&solver, &batch, &config).unwrap();
            assert_eq!(status, LookupTableStatus::Cached);
        }
        assert_eq!(solver.counters().builds(), 1);
    }

    #[test]
    fn test_persisted_table_is_reused_by_new_manager() {
        let solver = Arc::new(ConstantSolver::new(1.0));
        let config = Arc::new(SimulationConfig::default());
        let batch = empty_batch();

        LookupTableManager::new()
            .ensure_lookup_table(&solver, &batch, &config)
            .unwrap();
        let status = LookupTableManager::new()
            .ensure_lookup_table(&solver, &batch, &config)
            .unwrap();

        assert_eq!(status, LookupTableStatus::Reused);
        assert_eq!(solver.counters().builds(), 1);
    }

    #[test]
    fn test_build_failure_is_reported() {
        let solver = Arc::new(FailingSolver::failing_lookup_table("unknown species tag"));
        let config = Arc::new(SimulationConfig::default());
        let result =
            LookupTableManager::new().ensure_lookup_table(&solver, &empty_batch(), &config);

        match result {
            Err(FluxError::LookupTableBuildFailure { setup_name, source }) => {
                assert_eq!(setup_name, "test");
                assert_eq!(source.message, "unknown species tag");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_timeout() {
        let solver =
            Arc::new(ConstantSolver::new(1.0).with_build_delay(Duration::from_millis(500)));
        let config = Arc::new(SimulationConfig::default());
        let manager = LookupTableManager::with_timeout(Some(Duration::from_millis(10)));

        let result = manager.ensure_lookup_table(&solver, &empty_batch(), &config);
        assert!(matches!(result, Err(FluxError::LookupTableTimeout { .. })));
    }

    #[test]
    fn test_retry_after_timeout_waits_for_running_build() {
        let solver =
            Arc::new(ConstantSolver::new(1.0).with_build_delay(Duration::from_millis(300)));
        let config = Arc::new(SimulationConfig::default());
        let batch = empty_batch();
        let manager = LookupTableManager::with_timeout(Some(Duration::from_millis(20)));

        for _ in 0..2 {
            let result = manager.ensure_lookup_table(&solver, &batch, &config);
            assert!(matches!(result, Err(FluxError::LookupTableTimeout { .. })));
        }
        std::thread::sleep(Duration::from_millis(800));
        assert_eq!(solver.counters().builds(), 1);

        let status = manager.ensure_lookup_table(&solver, &batch, &config).unwrap();
        assert!(matches!(status, LookupTableStatus::Built { .. }));
        let status = manager.ensure_lookup_table(&solver, &batch, &config).unwrap();
        assert_eq!(status, LookupTableStatus::Cached);
        assert_eq!(solver.counters().builds(), 1);
    }

    #[test]
    fn test_existence_check_failure_is_reported() {
        let solver = Arc::new(FailingSolver::unreadable_lookup_table_cache("permission denied"));
        let config = Arc::new(SimulationConfig::default());
        let result =
            LookupTableManager::new().ensure_lookup_table(&solver, &empty_batch(), &config);

        match result {
            Err(FluxError::LookupTableBuildFailure { source, .. }) => {
                assert_eq!(source.message, "permission denied");
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(solver.counters().builds(), 0);
    }

    #[test]
    fn test_build_within_timeout() {
        let solver = Arc::new(ConstantSolver::new(1.0));
        let config = Arc::new(SimulationConfig::default());
        let manager = LookupTableManager::with_timeout(Some(Duration::from_secs(10)));

        let status = manager
            .ensure_lookup_table(&solver, &empty_batch(), &config)
            .unwrap();
        assert!(matches!(status, LookupTableStatus::Built { .. }));
    }
}
