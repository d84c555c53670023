//! Worker pool (Component H).
//!
//! A bounded set of threads drains [`ScanEnvironment`]'s job queue,
//! running the scan pipeline against each queued meta directory. Workers
//! share no mutable state beyond the queue and the outstanding-jobs
//! counter; [`crate::meta_dir::MetaDirectoryCache`] guarantees at most one
//! in-memory `MetaDirectory` per `md_path`, so two workers that queue a
//! job for the same artifact converge on the same instance.

use crate::config::ScanEnvironment;
use crate::pipeline::Pipe;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

/// How a worker decides the scan has drained once its queue read times
/// out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainMode {
    /// Exit once the outstanding-jobs counter reaches zero. Race-free:
    /// [`ScanEnvironment::enqueue`] increments the counter before sending,
    /// so a worker can never observe zero while a job is still in flight.
    Counter,
    /// Exit on the first `job_wait_time` timeout, full stop. This mirrors
    /// the original implementation's reliance on a fixed wait with no
    /// shared counter, which can under-wait and miss jobs produced by a
    /// sibling worker mid-timeout on a slow filesystem; kept only so the
    /// original behavior can be reproduced for comparison.
    FixedWait,
}

pub struct WorkerPool {
    env: Arc<ScanEnvironment>,
    drain_mode: DrainMode,
}

impl WorkerPool {
    pub fn new(env: Arc<ScanEnvironment>) -> Self {
        WorkerPool {
            env,
            drain_mode: DrainMode::Counter,
        }
    }

    pub fn with_drain_mode(mut self, mode: DrainMode) -> Self {
        self.drain_mode = mode;
        self
    }

    /// Runs `pipeline` against every job on the queue until the scan
    /// drains, blocking until all worker threads have exited.
    pub fn run(&self, pipeline: Pipe) {
        let worker_count = self.env.config.worker_count;
        let wait = Duration::from_secs(self.env.config.job_wait_time_secs);
        std::thread::scope(|scope| {
            for worker_id in 0..worker_count {
                let env = &self.env;
                let pipeline = Arc::clone(&pipeline);
                let drain_mode = self.drain_mode;
                scope.spawn(move || {
                    worker_loop(worker_id, env, pipeline, drain_mode, wait);
                });
            }
        });
    }
}

fn worker_loop(
    worker_id: usize,
    env: &ScanEnvironment,
    pipeline: Pipe,
    drain_mode: DrainMode,
    wait: Duration,
) {
    loop {
        match env.receiver().recv_timeout(wait) {
            Ok(job) => {
                let md = env.md_cache.get_or_insert(&job.md_path, &env.meta_root);
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    pipeline(env, &md)
                }));
                if let Err(panic) = result {
                    let reason = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    tracing::error!(worker_id, md_path = job.md_path, reason, "worker panicked while scanning");
                }
                env.job_done();
            }
            Err(_timeout) => match drain_mode {
                DrainMode::FixedWait => break,
                DrainMode::Counter => {
                    if env.outstanding.load(Ordering::SeqCst) == 0 {
                        break;
                    }
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::meta_dir::MetaDirectory;
    use crate::registry::ParserRegistry;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn pool_drains_queue_via_counter() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("input.bin"), b"hello").unwrap();
        let config = EngineConfig {
            meta_root: dir.path().to_path_buf(),
            worker_count: 2,
            job_wait_time_secs: 1,
            signature_chunk_size: 1024,
        };
        let registry = ParserRegistry::build(Vec::new());
        let env = ScanEnvironment::new(config, registry).unwrap();
        let root = MetaDirectory::for_root(Arc::clone(&env.meta_root), PathBuf::from("input.bin"))
            .unwrap();
        env.md_cache.insert(Arc::clone(&root));
        let processed = Arc::new(AtomicUsize::new(0));
        let processed2 = Arc::clone(&processed);
        let pipe: Pipe = Arc::new(move |_env, _md| {
            processed2.fetch_add(1, Ordering::SeqCst);
            true
        });
        env.enqueue(root.md_path().to_string());
        let pool = WorkerPool::new(Arc::clone(&env));
        pool.run(pipe);
        assert_eq!(processed.load(Ordering::SeqCst), 1);
        assert_eq!(env.outstanding_count(), 0);
    }
}
