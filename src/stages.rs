//! Scan stages (Component G).
//!
//! Each stage inspects an already-open meta directory and either binds a
//! parser directly to it (suggested/padding/extension/featureless) or
//! carves newly discovered byte ranges out of it into child meta
//! directories with their own bound parser (signature). In both cases the
//! stage returns the resulting candidates for [`crate::pipeline::exec`]
//! to drive through `write_info`/`unpack`/enqueue uniformly.

use crate::config::ScanEnvironment;
use crate::meta_dir::MetaDirectory;
use crate::parser::Parser;
use crate::parsers::builtin::{ExtractingParser, PaddingParser, SynthesizingParser};
use crate::registry::try_parse;
use crate::view::OffsetWindow;
use std::sync::Arc;

pub type StageFn =
    Arc<dyn Fn(&ScanEnvironment, &Arc<MetaDirectory>) -> Vec<Arc<MetaDirectory>> + Send + Sync>;

/// A parser that consumed only part of the file is carved into a head
/// child (the claimed range, bound to `parser`) and a tail child (the
/// remainder, re-queued for a fresh scan pass); the parent is marked with
/// [`ExtractingParser`] and returned alongside the head. A parser that
/// consumed the whole file is bound directly to `md` instead of being
/// carved at all, matching §4.4.2/§4.4.3's "yield MD" case.
fn claim_whole_or_split(
    env: &ScanEnvironment,
    md: &Arc<MetaDirectory>,
    content: &[u8],
    parser: Box<dyn Parser>,
    size: u64,
) -> Vec<Arc<MetaDirectory>> {
    let file_size = content.len() as u64;
    if size == file_size {
        md.set_parsed_size(size);
        md.bind_parser(parser);
        return vec![Arc::clone(md)];
    }
    let mut out = Vec::new();
    if let Ok(head) = md.extract_file(0, &content[..size as usize]) {
        head.set_parsed_size(size);
        head.bind_parser(parser);
        out.push(head);
    }
    if let Ok(tail) = md.extract_file(size, &content[size as usize..]) {
        env.enqueue(tail.md_path().to_string());
    }
    md.set_parsed_size(file_size);
    md.bind_parser(Box::new(ExtractingParser));
    out.push(Arc::clone(md));
    out
}

/// Tries parsers named in `md`'s `suggested_parsers` list (propagated by a
/// container parent that recognizes its children's format ahead of time),
/// in the order they were suggested.
pub fn suggested_stage(env: &ScanEnvironment, md: &Arc<MetaDirectory>) -> Vec<Arc<MetaDirectory>> {
    let mmap = match md.mmap() {
        Ok(m) => m,
        Err(_) => return Vec::new(),
    };
    for name in md.suggested_parsers() {
        let Some(registered) = env.registry.get(&name) else {
            continue;
        };
        let mut view = OffsetWindow::new(Arc::clone(&mmap), 0);
        if let Ok((parser, size)) = try_parse(registered, md, &mut view) {
            return claim_whole_or_split(env, md, &mmap, parser, size);
        }
    }
    Vec::new()
}

/// Binds [`PaddingParser`] if the whole artifact is a single repeated
/// byte (the common all-zero or all-0xFF padding region).
pub fn padding_stage(_env: &ScanEnvironment, md: &Arc<MetaDirectory>) -> Vec<Arc<MetaDirectory>> {
    let mmap = match md.mmap() {
        Ok(m) => m,
        Err(_) => return Vec::new(),
    };
    let mut parser = PaddingParser::default();
    let mut view = OffsetWindow::new(Arc::clone(&mmap), 0);
    match crate::parser::parse_from_offset(&mut parser, &mut view) {
        Ok(size) => {
            md.set_parsed_size(size);
            md.bind_parser(Box::new(parser));
            vec![Arc::clone(md)]
        }
        Err(_) => Vec::new(),
    }
}

/// Tries parsers registered under the artifact's file extension, in
/// registration order.
pub fn extension_stage(env: &ScanEnvironment, md: &Arc<MetaDirectory>) -> Vec<Arc<MetaDirectory>> {
    let Ok(file_path) = md.file_path() else {
        return Vec::new();
    };
    let Some(ext) = file_path.extension().and_then(|e| e.to_str()) else {
        return Vec::new();
    };
    let ext = ext.to_ascii_lowercase();
    let mmap = match md.mmap() {
        Ok(m) => m,
        Err(_) => return Vec::new(),
    };
    for (candidate_ext, registered) in env.registry.extension_candidates() {
        if candidate_ext != ext {
            continue;
        }
        let mut view = OffsetWindow::new(Arc::clone(&mmap), 0);
        if let Ok((parser, size)) = try_parse(registered, md, &mut view) {
            return claim_whole_or_split(env, md, &mmap, parser, size);
        }
    }
    Vec::new()
}

/// Extracts `[offset, offset+len)` as a synthesized child — raw data no
/// parser claimed — and binds [`SynthesizingParser`] to it directly. Used
/// to fill the gaps the signature stage leaves between successful parses,
/// so the coverage invariant (§8.1) holds even when only part of the
/// artifact matches a signature.
fn synthesize_gap(md: &Arc<MetaDirectory>, content: &[u8], offset: u64, len: u64) -> Option<Arc<MetaDirectory>> {
    if len == 0 {
        return None;
    }
    let bytes = &content[offset as usize..(offset + len) as usize];
    let child = md.extract_file(offset, bytes).ok()?;
    child.set_parsed_size(len);
    child.bind_parser(Box::new(SynthesizingParser));
    Some(child)
}

/// Scans the artifact's content in overlapping chunks for registered
/// signature literals. A match consuming the whole file is bound directly
/// to `md` and the scan stops there (§4.4.4's preferred whole-file case).
/// Otherwise each confirmed parse is carved into its own child meta
/// directory, with any gap since the previous claimed range synthesized
/// as raw data first, and any trailing gap synthesized once the automaton
/// is exhausted — together tiling `[0, size)` with no overlap. A later
/// match starting before the previous match's end is skipped. The overlap
/// carried between chunks is `longest signature length - 1` bytes, so a
/// signature straddling a chunk boundary is still found exactly once.
pub fn signature_stage(env: &ScanEnvironment, md: &Arc<MetaDirectory>) -> Vec<Arc<MetaDirectory>> {
    let mmap = match md.mmap() {
        Ok(m) => m,
        Err(_) => return Vec::new(),
    };
    let content: &[u8] = &mmap;
    let len = content.len() as u64;
    let automaton = env.registry.automaton();
    let longest = automaton.longest_signature_length() as u64;
    if longest == 0 || len == 0 {
        return Vec::new();
    }
    let chunk_size = env.config.signature_chunk_size as u64;
    let overlap = longest.saturating_sub(1);

    let mut children = Vec::new();
    let mut scanned_until: u64 = 0;
    let mut chunk_start: u64 = 0;

    'chunks: while chunk_start < len {
        let read_end = (chunk_start + chunk_size).min(len);
        let window_start = chunk_start.saturating_sub(overlap);
        let chunk = &content[window_start as usize..read_end as usize];

        for (end_index, end_difference, parsers) in automaton.find_candidates(chunk) {
            let abs_end_index = window_start + end_index as u64;
            if abs_end_index < chunk_start {
                // Already considered while scanning the previous chunk's
                // trailing overlap window.
                continue;
            }
            let candidate_offset = abs_end_index as i64 - end_difference;
            if candidate_offset < 0 {
                continue;
            }
            let candidate_offset = candidate_offset as u64;
            if candidate_offset < scanned_until {
                continue;
            }
            for registered in parsers {
                let mut view = OffsetWindow::new(Arc::clone(&mmap), candidate_offset);
                let Ok((parser, size)) = try_parse(registered, md, &mut view) else {
                    continue;
                };
                let end = candidate_offset + size;
                if end > len {
                    continue;
                }
                if candidate_offset == 0 && end == len {
                    // Whole-file match: prefer binding the parser directly
                    // to the meta directory over carving a same-size child.
                    md.set_parsed_size(size);
                    md.bind_parser(parser);
                    children.clear();
                    children.push(Arc::clone(md));
                    break 'chunks;
                }
                if let Some(gap) = synthesize_gap(md, content, scanned_until, candidate_offset - scanned_until) {
                    children.push(gap);
                }
                let bytes = &content[candidate_offset as usize..end as usize];
                if let Ok(child) = md.extract_file(candidate_offset, bytes) {
                    child.set_parsed_size(size);
                    child.bind_parser(parser);
                    scanned_until = end;
                    children.push(child);
                }
                break;
            }
        }
        chunk_start = read_end;
    }
    if scanned_until > 0 && scanned_until < len {
        if let Some(tail) = synthesize_gap(md, content, scanned_until, len - scanned_until) {
            children.push(tail);
        }
    }
    if scanned_until > 0 {
        // At least one signature match carved a part out of this artifact:
        // bind the parent as an `ExtractingParser` so `is_scanned()` holds
        // and the pipeline's `stop_if_scanned` guard stops before
        // `featureless_stage` re-claims the already-carved parent, mirroring
        // `claim_whole_or_split`'s partial branch.
        md.set_parsed_size(len);
        md.bind_parser(Box::new(ExtractingParser));
        children.push(Arc::clone(md));
    }
    children
}

/// Final fallback: try registered featureless-eligible parsers. If none
/// claim the artifact it is left unscanned — no `unpack_parser` installed —
/// which is how downstream consumers recognize "unparsed" (§7).
pub fn featureless_stage(env: &ScanEnvironment, md: &Arc<MetaDirectory>) -> Vec<Arc<MetaDirectory>> {
    let mmap = match md.mmap() {
        Ok(m) => m,
        Err(_) => return Vec::new(),
    };
    for registered in env.registry.featureless_candidates() {
        let mut view = OffsetWindow::new(Arc::clone(&mmap), 0);
        if let Ok((parser, size)) = try_parse(registered, md, &mut view) {
            return claim_whole_or_split(env, md, &mmap, parser, size);
        }
    }
    Vec::new()
}
