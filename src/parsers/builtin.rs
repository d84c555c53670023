//! Minimal built-in parsers.
//!
//! [`PaddingParser`] and [`SynthesizingParser`] are the pseudo-parsers
//! every scan pipeline needs regardless of which format parsers are
//! registered: the former recognizes a uniform byte run, the latter is
//! the unconditional "this is unidentified data" fallback that guarantees
//! the coverage invariant. [`ToyContainerParser`] and [`TextParser`] are a
//! small demonstration format family — a signature-recognized container
//! with one embedded child, and an extension-recognized leaf format —
//! standing in for the spec's out-of-scope concrete parser catalogue.

use crate::error::{BangError, Result};
use crate::meta_dir::{LogicalPath, MetaDirectory};
use crate::parser::{Parser, ParserDescriptor, UnpackItem, UnpackStream};
use crate::registry::ParserFactory;
use crate::view::OffsetWindow;
use serde_json::{json, Value};
use std::io::{Read, Seek};
use std::sync::Arc;

/// Recognizes a region where every byte has the same value.
#[derive(Default)]
pub struct PaddingParser {
    byte: u8,
}

impl Parser for PaddingParser {
    fn pretty_name(&self) -> &'static str {
        "padding"
    }

    fn parse(&mut self, view: &mut OffsetWindow) -> Result<()> {
        let len = view.size() as usize;
        if len == 0 {
            return Err(BangError::parse_failure("padding", "empty window"));
        }
        let data = view.as_slice();
        let first = data[0];
        if !data.iter().all(|&b| b == first) {
            return Err(BangError::parse_failure(
                "padding",
                "not a uniform byte run",
            ));
        }
        self.byte = first;
        let mut buf = vec![0u8; len];
        view.read_exact(&mut buf)?;
        Ok(())
    }

    fn labels(&self) -> Vec<String> {
        vec!["padding".to_string()]
    }

    fn metadata(&self) -> Value {
        json!({ "padding_byte": self.byte })
    }
}

/// The unconditional tail-end fallback: claims whatever bytes remain as
/// unidentified data, so every region of an artifact ends up tiled by
/// some meta directory even when no real parser matched.
#[derive(Default)]
pub struct SynthesizingParser;

impl Parser for SynthesizingParser {
    fn pretty_name(&self) -> &'static str {
        "synthesized"
    }

    fn parse(&mut self, view: &mut OffsetWindow) -> Result<()> {
        let len = view.size() as usize;
        if len == 0 {
            return Err(BangError::parse_failure("synthesized", "empty window"));
        }
        let mut buf = vec![0u8; len];
        view.read_exact(&mut buf)?;
        Ok(())
    }

    fn labels(&self) -> Vec<String> {
        vec!["synthesized".to_string(), "unscanned".to_string()]
    }

    /// Yields `to_md` itself so the synthesized region is re-queued and
    /// rescanned — `not_synthesized` then keeps it out of extension/
    /// signature, leaving only suggested/padding/featureless eligible.
    fn unpack(&self, _to_md: &Arc<MetaDirectory>) -> UnpackStream {
        Box::new(std::iter::once(Ok(UnpackItem::SelfAgain)))
    }
}

/// Marks a meta directory whose content was split into a head and a tail
/// child rather than claimed whole, per §4.4.2/§4.4.3's partial-match
/// carving. Carries no labels of its own beyond bookkeeping — the head
/// child carries the real parser's identity, the tail is re-queued for
/// further scanning.
#[derive(Default)]
pub struct ExtractingParser;

impl Parser for ExtractingParser {
    fn pretty_name(&self) -> &'static str {
        "extracting"
    }

    fn parse(&mut self, view: &mut OffsetWindow) -> Result<()> {
        let len = view.size() as usize;
        if len == 0 {
            return Err(BangError::parse_failure("extracting", "empty window"));
        }
        view.seek(std::io::SeekFrom::End(0))?;
        Ok(())
    }

    fn labels(&self) -> Vec<String> {
        vec!["extracted_head_tail".to_string()]
    }
}

/// A toy container: 4-byte magic `TOYC`, a little-endian `u32` payload
/// length, then that many payload bytes. Unpacks its payload as a single
/// child file at `payload.bin`.
#[derive(Default)]
pub struct ToyContainerParser {
    payload_len: u32,
}

const TOY_CONTAINER_MAGIC: &[u8] = b"TOYC";

impl Parser for ToyContainerParser {
    fn pretty_name(&self) -> &'static str {
        "toy_container"
    }

    fn parse(&mut self, view: &mut OffsetWindow) -> Result<()> {
        let mut magic = [0u8; 4];
        view.read_exact(&mut magic)
            .map_err(|_| BangError::parse_failure("toy_container", "truncated magic"))?;
        if magic != TOY_CONTAINER_MAGIC {
            return Err(BangError::parse_failure("toy_container", "bad magic"));
        }
        let mut len_bytes = [0u8; 4];
        view.read_exact(&mut len_bytes)
            .map_err(|_| BangError::parse_failure("toy_container", "truncated length"))?;
        let payload_len = u32::from_le_bytes(len_bytes);
        if view.remaining().len() < payload_len as usize {
            return Err(BangError::parse_failure(
                "toy_container",
                "declared payload longer than available data",
            ));
        }
        let mut discard = vec![0u8; payload_len as usize];
        view.read_exact(&mut discard)?;
        self.payload_len = payload_len;
        Ok(())
    }

    fn labels(&self) -> Vec<String> {
        vec!["container".to_string(), "toy_container".to_string()]
    }

    fn metadata(&self) -> Value {
        json!({ "payload_len": self.payload_len })
    }

    fn unpack(&self, to_md: &Arc<MetaDirectory>) -> UnpackStream {
        let payload_len = self.payload_len;
        let md = Arc::clone(to_md);
        Box::new(std::iter::once_with(move || {
            let mmap = md.mmap()?;
            let start = 8usize;
            let end = start + payload_len as usize;
            let bytes = mmap[start..end].to_vec();
            Ok(UnpackItem::RegularFile {
                path: LogicalPath::new("payload.bin"),
                bytes,
            })
        }))
    }
}

pub struct ToyContainerFactory;

impl ParserFactory for ToyContainerFactory {
    fn descriptor(&self) -> ParserDescriptor {
        ParserDescriptor {
            pretty_name: "toy_container",
            extensions: &["tgz"],
            signatures: &[(0, TOY_CONTAINER_MAGIC)],
            scan_if_featureless: false,
        }
    }

    fn create(&self) -> Box<dyn Parser> {
        Box::new(ToyContainerParser::default())
    }
}

/// Recognizes valid UTF-8 text content by extension.
#[derive(Default)]
pub struct TextParser {
    len: usize,
}

impl Parser for TextParser {
    fn pretty_name(&self) -> &'static str {
        "text"
    }

    fn parse(&mut self, view: &mut OffsetWindow) -> Result<()> {
        let len = view.size() as usize;
        if len == 0 {
            return Err(BangError::parse_failure("text", "empty window"));
        }
        std::str::from_utf8(view.as_slice())
            .map_err(|_| BangError::parse_failure("text", "not valid utf-8"))?;
        let mut buf = vec![0u8; len];
        view.read_exact(&mut buf)?;
        self.len = len;
        Ok(())
    }

    fn labels(&self) -> Vec<String> {
        vec!["text".to_string()]
    }

    fn metadata(&self) -> Value {
        json!({ "length": self.len })
    }
}

pub struct TextFactory;

impl ParserFactory for TextFactory {
    fn descriptor(&self) -> ParserDescriptor {
        ParserDescriptor {
            pretty_name: "text",
            extensions: &["txt"],
            signatures: &[],
            scan_if_featureless: false,
        }
    }

    fn create(&self) -> Box<dyn Parser> {
        Box::new(TextParser::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window_over(bytes: &[u8]) -> (Arc<memmap2::Mmap>, OffsetWindow) {
        use std::io::Write;
        let mut f = tempfile::tempfile().unwrap();
        f.write_all(bytes).unwrap();
        f.flush().unwrap();
        let mmap = Arc::new(unsafe { memmap2::Mmap::map(&f).unwrap() });
        let view = OffsetWindow::new(Arc::clone(&mmap), 0);
        (mmap, view)
    }

    #[test]
    fn padding_parser_accepts_uniform_run_and_rejects_mixed() {
        let (_m, mut view) = window_over(&[0u8; 16]);
        let mut p = PaddingParser::default();
        assert!(p.parse(&mut view).is_ok());

        let (_m2, mut view2) = window_over(b"\x00\x00\x01\x00");
        let mut p2 = PaddingParser::default();
        assert!(p2.parse(&mut view2).is_err());
    }

    #[test]
    fn toy_container_round_trips_payload() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(TOY_CONTAINER_MAGIC);
        bytes.extend_from_slice(&5u32.to_le_bytes());
        bytes.extend_from_slice(b"hello");
        let (_m, mut view) = window_over(&bytes);
        let mut parser = ToyContainerParser::default();
        assert!(parser.parse(&mut view).is_ok());
        assert_eq!(parser.payload_len, 5);
    }
}
