//! Configuration & environment (Component I).
//!
//! Wires together the parser registry, the meta root, the temporary
//! unpack directory, and the shared job queue. One [`ScanEnvironment`] is
//! built once per scan and handed by shared reference to every worker;
//! after construction nothing about the registry or automaton changes.

use crate::error::{BangError, Result};
use crate::meta_dir::MetaDirectoryCache;
use crate::registry::ParserRegistry;
use crossbeam_channel::{Receiver, Sender};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Startup-time configuration, validated once in [`EngineConfig::build`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub meta_root: PathBuf,
    pub worker_count: usize,
    /// How long (in seconds) a worker waits on an empty queue before
    /// considering the scan drained. Default mirrors the original
    /// implementation's `job_wait_time = 5`.
    pub job_wait_time_secs: u64,
    /// Byte size of the sliding window the signature stage reads at a
    /// time. Default mirrors `signature_chunk_size = 1024`.
    pub signature_chunk_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            meta_root: PathBuf::new(),
            worker_count: num_cpus::get(),
            job_wait_time_secs: 5,
            signature_chunk_size: 1024,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.meta_root.as_os_str().is_empty() {
            return Err(BangError::Configuration(
                "meta_root must be set".to_string(),
            ));
        }
        if self.worker_count == 0 {
            return Err(BangError::Configuration(
                "worker_count must be at least 1".to_string(),
            ));
        }
        if self.signature_chunk_size == 0 {
            return Err(BangError::Configuration(
                "signature_chunk_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// A job on the shared scan queue: a reference to the meta directory to
/// be scanned.
#[derive(Debug, Clone)]
pub struct Job {
    pub md_path: String,
}

/// Everything a worker needs: the immutable registry, the meta root, and
/// the shared queue handles. Cheaply cloned (an `Arc` bundle) so each
/// worker thread gets its own handle to the same underlying state.
pub struct ScanEnvironment {
    pub config: EngineConfig,
    pub meta_root: Arc<PathBuf>,
    pub registry: Arc<ParserRegistry>,
    pub md_cache: Arc<MetaDirectoryCache>,
    sender: Sender<Job>,
    receiver: Receiver<Job>,
    /// Outstanding (queued + in-flight) job count. Used by the
    /// counter-based drain mode described in DESIGN.md as the redesign of
    /// the original's racy semaphore-only drain condition.
    pub(crate) outstanding: Arc<std::sync::atomic::AtomicUsize>,
}

impl ScanEnvironment {
    pub fn new(config: EngineConfig, registry: ParserRegistry) -> Result<Arc<Self>> {
        config.validate()?;
        let (sender, receiver) = crossbeam_channel::unbounded();
        Ok(Arc::new(ScanEnvironment {
            meta_root: Arc::new(config.meta_root.clone()),
            config,
            registry: Arc::new(registry),
            md_cache: Arc::new(MetaDirectoryCache::new()),
            sender,
            receiver,
            outstanding: Arc::new(std::sync::atomic::AtomicUsize::new(0)),
        }))
    }

    pub fn meta_root_path(&self) -> &Path {
        &self.meta_root
    }

    /// Enqueues a scan job for `md_path`, incrementing the outstanding
    /// counter before the send so a worker that observes the counter can
    /// never see "zero outstanding" while this job is still in flight.
    pub fn enqueue(&self, md_path: impl Into<String>) {
        self.outstanding
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let _ = self.sender.send(Job {
            md_path: md_path.into(),
        });
    }

    pub(crate) fn receiver(&self) -> &Receiver<Job> {
        &self.receiver
    }

    pub(crate) fn job_done(&self) {
        self.outstanding
            .fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
    }

    #[cfg(test)]
    pub(crate) fn outstanding_count(&self) -> usize {
        self.outstanding.load(std::sync::atomic::Ordering::SeqCst)
    }
}
