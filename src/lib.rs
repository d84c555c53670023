//! # BANG — recursive binary-analysis scanning engine
//!
//! Identifies, parses and recursively unpacks embedded file-format
//! structures within an artifact. A scan starts from one input file and
//! produces a tree of [`meta_dir::MetaDirectory`] records, each describing
//! one identified or carved sub-artifact, persisted under a meta root on
//! disk.
//!
//! ## Key modules
//!
//! - [`parser`]: the format-parser contract every concrete parser
//!   implements.
//! - [`view`]: zero-copy offset-window reads over a memory-mapped
//!   artifact.
//! - [`meta_dir`]: the persistent per-artifact record and its on-disk
//!   layout.
//! - [`registry`]: indexes registered parsers by name, extension and
//!   signature.
//! - [`automaton`]: the shared Aho-Corasick signature matcher.
//! - [`pipeline`] and [`stages`]: the scan pipeline combinators and the
//!   concrete stages (suggested/padding/extension/signature/featureless)
//!   they drive.
//! - [`workers`]: the thread pool that drains the scan job queue.
//! - [`config`]: startup configuration and the shared scan environment.
//! - [`parsers`]: the built-in pseudo-parsers and demonstration format
//!   parsers.

#![allow(clippy::type_complexity)]

pub mod automaton;
pub mod config;
pub mod error;
pub mod meta_dir;
pub mod parser;
pub mod parsers;
pub mod pipeline;
pub mod registry;
pub mod stages;
pub mod view;
pub mod workers;

pub use error::{BangError, Result};

use std::path::Path;
use std::sync::Arc;

/// Runs a full scan of `input_file` under `meta_root`, using the given
/// parser factories, and returns the root [`meta_dir::MetaDirectory`].
/// Blocks until the scan has drained.
pub fn scan(
    meta_root: &Path,
    input_file: &Path,
    factories: Vec<Arc<dyn registry::ParserFactory>>,
    worker_count: usize,
) -> Result<Arc<meta_dir::MetaDirectory>> {
    let config = config::EngineConfig {
        meta_root: meta_root.to_path_buf(),
        worker_count,
        ..config::EngineConfig::default()
    };
    let registry = registry::ParserRegistry::build(factories);
    let env = config::ScanEnvironment::new(config, registry)?;
    let root = meta_dir::MetaDirectory::for_root(Arc::clone(&env.meta_root), input_file.to_path_buf())?;
    env.md_cache.insert(Arc::clone(&root));
    env.enqueue(root.md_path().to_string());

    let pool = workers::WorkerPool::new(Arc::clone(&env));
    pool.run(pipeline::default_pipeline());
    Ok(root)
}
