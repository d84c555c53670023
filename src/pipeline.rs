//! Scan pipeline combinators (Component F).
//!
//! A pipeline is built from small boolean-returning combinators, each
//! wrapping a [`crate::stages`] stage or another pipeline. `seq` and `or`
//! give short-circuiting sequencing and alternation; `cond`/`not` give
//! branching and negation; `with_open_md` scopes a meta-directory
//! open/close around a sub-pipeline; `exec` lifts a stage into a pipeline
//! step, handling the child-unpacking contract common to every stage.
//!
//! This mirrors `pipe_seq`/`pipe_or`/`pipe_cond`/`pipe_not`/`pipe_with`/
//! `pipe_exec`/`pipe_pass`/`pipe_fail` from the original scan job module:
//! `true` means "continue the enclosing sequence", `false` means
//! "short-circuit it".

use crate::config::ScanEnvironment;
use crate::meta_dir::MetaDirectory;
use crate::parser::UnpackItem;
use crate::stages::StageFn;
use std::sync::Arc;

pub type Pipe = Arc<dyn Fn(&ScanEnvironment, &Arc<MetaDirectory>) -> bool + Send + Sync>;

/// Runs every pipe in order, stopping at the first `false`.
pub fn seq(pipes: Vec<Pipe>) -> Pipe {
    Arc::new(move |env, md| {
        for pipe in &pipes {
            if !pipe(env, md) {
                return false;
            }
        }
        true
    })
}

/// Runs every pipe in order, stopping at the first `true`.
pub fn or(pipes: Vec<Pipe>) -> Pipe {
    Arc::new(move |env, md| {
        for pipe in &pipes {
            if pipe(env, md) {
                return true;
            }
        }
        false
    })
}

/// Branches on `predicate`.
pub fn cond(
    predicate: Arc<dyn Fn(&ScanEnvironment, &Arc<MetaDirectory>) -> bool + Send + Sync>,
    if_true: Pipe,
    if_false: Pipe,
) -> Pipe {
    Arc::new(move |env, md| {
        if predicate(env, md) {
            if_true(env, md)
        } else {
            if_false(env, md)
        }
    })
}

/// Negates the wrapped pipe's result.
pub fn not(pipe: Pipe) -> Pipe {
    Arc::new(move |env, md| !pipe(env, md))
}

/// Always continues the enclosing sequence.
pub fn pass() -> Pipe {
    Arc::new(|_env, _md| true)
}

/// Always short-circuits the enclosing sequence.
pub fn fail() -> Pipe {
    Arc::new(|_env, _md| false)
}

/// Opens `md` (a no-op if already open from an outer scope) for the
/// duration of `pipe`, persisting `info.json` when the inner scope is the
/// one that opened it.
pub fn with_open_md(pipe: Pipe) -> Pipe {
    Arc::new(move |env, md| {
        let guard = match md.open(false) {
            Ok(g) => g,
            Err(e) => {
                tracing::error!(md_path = md.md_path(), error = %e, "failed to open meta directory");
                return false;
            }
        };
        let result = pipe(env, md);
        drop(guard);
        result
    })
}

/// `true` once `md` has a bound parser — used with [`cond`] to short-
/// circuit the remaining stages in a `seq` once one stage has claimed the
/// artifact.
pub fn is_scanned(_env: &ScanEnvironment, md: &Arc<MetaDirectory>) -> bool {
    md.is_scanned()
}

/// `true` for a zero-length artifact — per §8's boundary behavior, an
/// empty input gets no label and no children, so no stage should even
/// attempt to mmap and parse it.
fn is_empty(_env: &ScanEnvironment, md: &Arc<MetaDirectory>) -> bool {
    md.size().map(|s| s == 0).unwrap_or(false)
}

/// `true` unless `md` already carries the `synthesized` label — a gap
/// region `signature_stage` carved out and re-queued via
/// `SynthesizingParser::unpack`'s `SelfAgain`. Guards extension/signature
/// scanning per §4.3's `cond(not_synthesized, seq(...), pass)`: a
/// synthesized region gets only the suggested/padding/featureless stages on
/// its rescan, never another pass through extension/signature.
fn not_synthesized(_env: &ScanEnvironment, md: &Arc<MetaDirectory>) -> bool {
    !md.has_label("synthesized")
}

/// Lifts a [`StageFn`] into a pipeline step: runs the stage to get zero or
/// more bound candidate meta directories, then for each one writes its
/// info and drains its unpack stream, translating every [`UnpackItem`]
/// into an actual child meta directory and queuing a scan job for it.
/// Always returns `true` — a stage finding nothing to do is not a
/// pipeline failure, just an empty result.
pub fn exec(stage: StageFn) -> Pipe {
    Arc::new(move |env, md| {
        for candidate in stage(env, md) {
            let guard = match candidate.open(false) {
                Ok(g) => g,
                Err(e) => {
                    tracing::error!(md_path = candidate.md_path(), error = %e, "failed to open candidate");
                    continue;
                }
            };
            candidate.write_info_with_unpack_parser();
            for item in candidate.unpack_with_unpack_parser() {
                match item {
                    Ok(UnpackItem::RegularFile { path, bytes }) => {
                        match candidate.unpack_regular_file(&path, &bytes) {
                            Ok(child) => env.enqueue(child.md_path().to_string()),
                            Err(e) => tracing::warn!(error = %e, "failed to write unpacked file"),
                        }
                    }
                    Ok(UnpackItem::Directory { path }) => {
                        if let Err(e) = candidate.unpack_directory(&path) {
                            tracing::warn!(error = %e, "failed to create unpacked directory");
                        }
                    }
                    Ok(UnpackItem::Symlink { path, target }) => {
                        if let Err(e) = candidate.unpack_symlink(&path, &target) {
                            tracing::warn!(error = %e, "failed to create unpacked symlink");
                        }
                    }
                    Ok(UnpackItem::Hardlink { path, target }) => {
                        if let Err(e) = candidate.unpack_hardlink(&path, &target) {
                            tracing::warn!(error = %e, "failed to create unpacked hardlink");
                        }
                    }
                    Ok(UnpackItem::SelfAgain) => {
                        // The cached `MetaDirectory` for this md_path is the
                        // same `Arc` the requeued job will fetch; clear its
                        // binding so the rescan doesn't short-circuit on
                        // `stop_if_scanned` before featureless_stage runs.
                        candidate.unbind_parser();
                        env.enqueue(candidate.md_path().to_string());
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "non-fatal unpack error, continuing");
                    }
                }
            }
            drop(guard);
        }
        true
    })
}

/// The default scan pipeline: suggested parsers, then padding, then
/// extension and signature scanning (skipped entirely for a region already
/// marked `synthesized` by a prior signature-stage pass), then the
/// featureless fallback — each gated so a successful bind stops the
/// remaining stages.
pub fn default_pipeline() -> Pipe {
    use crate::stages::{extension_stage, featureless_stage, padding_stage, signature_stage, suggested_stage};

    let stop_if_scanned = || cond(Arc::new(is_scanned), fail(), pass());

    with_open_md(cond(
        Arc::new(is_empty),
        pass(),
        seq(vec![
            exec(Arc::new(suggested_stage)),
            stop_if_scanned(),
            exec(Arc::new(padding_stage)),
            stop_if_scanned(),
            cond(
                Arc::new(not_synthesized),
                seq(vec![
                    exec(Arc::new(extension_stage)),
                    stop_if_scanned(),
                    exec(Arc::new(signature_stage)),
                    stop_if_scanned(),
                ]),
                pass(),
            ),
            exec(Arc::new(featureless_stage)),
        ]),
    ))
}
