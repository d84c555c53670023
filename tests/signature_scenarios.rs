//! End-to-end scans exercising the literal scenarios from the
//! specification's testable-properties table: a fixed `P(offset, sig,
//! len)` family of toy parsers, each recognizing one literal at one
//! offset and consuming a fixed length, run through the real pipeline and
//! checked against the expected `extracted_files` tiling.

use bang::config::{EngineConfig, ScanEnvironment};
use bang::error::{BangError, Result};
use bang::meta_dir::MetaDirectory;
use bang::parser::{Parser, ParserDescriptor};
use bang::pipeline::default_pipeline;
use bang::registry::{ParserFactory, ParserRegistry};
use bang::view::OffsetWindow;
use bang::workers::WorkerPool;
use std::collections::BTreeSet;
use std::sync::Arc;

/// `P(offset, sig, len)`: succeeds only when invoked at exactly `offset`
/// (the signature's nominal start), consumes exactly `len` bytes.
struct FixedLenParser {
    name: &'static str,
    consumed: u64,
}

impl Parser for FixedLenParser {
    fn pretty_name(&self) -> &'static str {
        self.name
    }

    fn parse(&mut self, view: &mut OffsetWindow) -> Result<()> {
        if view.size() < self.consumed {
            return Err(BangError::parse_failure(self.name, "too short"));
        }
        let mut buf = vec![0u8; self.consumed as usize];
        std::io::Read::read_exact(view, &mut buf)?;
        Ok(())
    }
}

struct FixedLenFactory {
    name: &'static str,
    signature_offset: u64,
    signature: &'static [u8],
    consumed: u64,
}

impl ParserFactory for FixedLenFactory {
    fn descriptor(&self) -> ParserDescriptor {
        ParserDescriptor {
            pretty_name: self.name,
            extensions: &[],
            signatures: std::slice::from_ref(Box::leak(Box::new((
                self.signature_offset,
                self.signature,
            )))),
            scan_if_featureless: false,
        }
    }

    fn create(&self) -> Box<dyn Parser> {
        Box::new(FixedLenParser {
            name: self.name,
            consumed: self.consumed,
        })
    }
}

fn run_scan(content: &[u8], factories: Vec<Arc<dyn ParserFactory>>) -> (Arc<MetaDirectory>, Arc<ScanEnvironment>) {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("input.bin"), content).unwrap();
    let config = EngineConfig {
        meta_root: dir.path().to_path_buf(),
        worker_count: 1,
        job_wait_time_secs: 1,
        signature_chunk_size: 1024,
    };
    let registry = ParserRegistry::build(factories);
    let env = ScanEnvironment::new(config, registry).unwrap();
    let root =
        MetaDirectory::for_root(Arc::clone(&env.meta_root), "input.bin".into()).unwrap();
    env.md_cache.insert(Arc::clone(&root));
    env.enqueue(root.md_path().to_string());
    WorkerPool::new(Arc::clone(&env)).run(default_pipeline());
    // tempdir must outlive use of `root` (file paths are relative to it);
    // leak it for the test's lifetime.
    std::mem::forget(dir);
    (root, env)
}

fn extracted_ranges(root: &Arc<MetaDirectory>) -> BTreeSet<(u64, u64)> {
    root.extracted_files()
        .keys()
        .map(|name| {
            let (offset_hex, len_hex) = name.split_once('-').unwrap();
            (
                u64::from_str_radix(offset_hex, 16).unwrap(),
                u64::from_str_radix(len_hex, 16).unwrap(),
            )
        })
        .collect()
}

fn p(name: &'static str, offset: u64, sig: &'static [u8], len: u64) -> Arc<dyn ParserFactory> {
    Arc::new(FixedLenFactory {
        name,
        signature_offset: offset,
        signature: sig,
        consumed: len,
    })
}

#[test]
fn scenario_1_two_non_overlapping_signatures_with_gaps() {
    let content = b"xAAxxxxxxxxxxxxyBBxxxxxxxxxxx";
    assert_eq!(content.len(), 29);
    let (root, _env) = run_scan(
        content,
        vec![p("p_aa", 1, b"AA", 5), p("p_bb", 1, b"BB", 5)],
    );
    let _guard = root.open(true).unwrap();
    let ranges = extracted_ranges(&root);
    assert_eq!(
        ranges,
        [(0, 5), (5, 10), (15, 5), (20, 9)].into_iter().collect()
    );
}

#[test]
fn scenario_2_adjacent_signatures_no_gap() {
    let content = b"xAAyBBxxxxxxxxxxx";
    assert_eq!(content.len(), 17);
    let (root, _env) = run_scan(
        content,
        vec![p("p_aa", 1, b"AA", 5), p("p_bb", 1, b"BB", 5)],
    );
    let _guard = root.open(true).unwrap();
    let ranges = extracted_ranges(&root);
    assert_eq!(ranges, [(0, 5), (5, 12)].into_iter().collect());
}

#[test]
fn scenario_5_uniform_fill_gets_padding_label_and_no_children() {
    let content = vec![0xFFu8; 300];
    let (root, _env) = run_scan(&content, Vec::new());
    let _guard = root.open(true).unwrap();
    assert!(root.has_label("padding"));
    assert!(root.extracted_files().is_empty());
}

#[test]
fn empty_input_has_no_label_and_no_children() {
    let (root, _env) = run_scan(b"", Vec::new());
    let _guard = root.open(true).unwrap();
    assert!(root.extracted_files().is_empty());
}

#[test]
fn scenario_3_later_match_overlapping_prior_claim_is_skipped() {
    let content = b"xAAyyyyyyBBxxxxxxxxxxx";
    assert_eq!(content.len(), 22);
    let (root, _env) = run_scan(
        content,
        vec![p("p_aa", 1, b"AA", 5), p("p_bb", 8, b"BB", 5)],
    );
    let _guard = root.open(true).unwrap();
    let ranges = extracted_ranges(&root);
    assert_eq!(ranges, [(0, 5), (5, 17)].into_iter().collect());
}

#[test]
fn scenario_4_three_parsers_interleaved_matches_and_gaps() {
    let content = b"--xAAyBBbCCxxxxxxxx";
    assert_eq!(content.len(), 19);
    let (root, _env) = run_scan(
        content,
        vec![
            p("p_aa", 1, b"AA", 5),
            p("p_bb", 1, b"BB", 5),
            p("p_cc", 0, b"CC", 5),
        ],
    );
    let _guard = root.open(true).unwrap();
    let ranges = extracted_ranges(&root);
    assert_eq!(
        ranges,
        [(0, 2), (2, 5), (7, 2), (9, 5), (14, 5)].into_iter().collect()
    );
}

#[test]
fn signature_at_last_valid_offset_is_invoked_exactly_once() {
    // 10 junk bytes, then a 2-byte signature starting at offset 8
    // consuming the final 2 bytes.
    let mut content = vec![0u8; 8];
    content.extend_from_slice(b"AA");
    let (root, _env) = run_scan(&content, vec![p("p_aa", 0, b"AA", 2)]);
    let _guard = root.open(true).unwrap();
    let ranges = extracted_ranges(&root);
    assert_eq!(ranges, [(0, 8), (8, 2)].into_iter().collect());
}

/// A featureless-eligible parser standing in for a text-like format: claims
/// any non-empty window whose first byte is `b'z'`, consuming the rest.
struct MarkerParser;

impl Parser for MarkerParser {
    fn pretty_name(&self) -> &'static str {
        "marker"
    }

    fn parse(&mut self, view: &mut OffsetWindow) -> Result<()> {
        let len = view.size() as usize;
        if len == 0 || view.as_slice()[0] != b'z' {
            return Err(BangError::parse_failure("marker", "no marker byte"));
        }
        let mut buf = vec![0u8; len];
        std::io::Read::read_exact(view, &mut buf)?;
        Ok(())
    }

    fn labels(&self) -> Vec<String> {
        vec!["rescanned_text".to_string()]
    }
}

struct MarkerFactory;

impl ParserFactory for MarkerFactory {
    fn descriptor(&self) -> ParserDescriptor {
        ParserDescriptor {
            pretty_name: "marker",
            extensions: &[],
            signatures: &[],
            scan_if_featureless: true,
        }
    }

    fn create(&self) -> Box<dyn Parser> {
        Box::new(MarkerParser)
    }
}

#[test]
fn partial_signature_match_binds_extracting_parser_and_requeues_gap_for_featureless_rescan() {
    // 3 bytes consumed by a signature match at offset 0, leaving a 4-byte
    // non-uniform tail that no signature or extension recognizes but a
    // featureless parser does.
    let content = b"AAXzyxw";
    assert_eq!(content.len(), 7);
    let (root, _env) = run_scan(
        content,
        vec![p("p_aa", 0, b"AA", 3), Arc::new(MarkerFactory)],
    );
    let _guard = root.open(true).unwrap();

    // Finding #1: the parent is scanned (bound to ExtractingParser), not
    // left open for featureless_stage to re-claim it wholesale.
    assert!(root.has_label("extracted_head_tail"));
    // Finding #2 regression: the parent must never pick up the old
    // whole-file SynthesizingParser fallback label.
    assert!(!root.has_label("synthesized"));

    let ranges = extracted_ranges(&root);
    assert_eq!(ranges, [(0, 3), (3, 4)].into_iter().collect());

    let tail_md_path = root
        .extracted_files()
        .get("000000000003-000000000004")
        .expect("tail gap recorded")
        .clone();
    let tail = MetaDirectory::from_md_path(Arc::new(root.meta_root().to_path_buf()), tail_md_path);
    let g2 = tail.open(true).unwrap();
    // Finding #3: the synthesized gap was re-queued via `SelfAgain` and
    // rescanned, reaching (and being claimed by) the featureless stage.
    assert!(tail.has_label("synthesized"));
    assert!(tail.has_label("rescanned_text"));
    drop(g2);
}

#[test]
fn signature_straddling_chunk_boundary_is_invoked_exactly_once() {
    // chunk size 16; put a 4-byte signature spanning bytes 14..18, i.e.
    // straddling the chunk_start=16 boundary.
    let mut content = vec![0u8; 14];
    content.extend_from_slice(b"SIGN");
    content.extend_from_slice(&[0u8; 10]);
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("input.bin"), &content).unwrap();
    let config = EngineConfig {
        meta_root: dir.path().to_path_buf(),
        worker_count: 1,
        job_wait_time_secs: 1,
        signature_chunk_size: 16,
    };
    let registry = ParserRegistry::build(vec![p("p_sign", 0, b"SIGN", 4)]);
    let env = ScanEnvironment::new(config, registry).unwrap();
    let root =
        MetaDirectory::for_root(Arc::clone(&env.meta_root), "input.bin".into()).unwrap();
    env.md_cache.insert(Arc::clone(&root));
    env.enqueue(root.md_path().to_string());
    WorkerPool::new(Arc::clone(&env)).run(default_pipeline());
    let _guard = root.open(true).unwrap();
    let ranges = extracted_ranges(&root);
    assert_eq!(ranges, [(0, 14), (14, 4), (18, 10)].into_iter().collect());
}
