//! The parser contract (Component A).
//!
//! Every format parser is instantiated for one artifact and implements
//! [`Parser`]. The dispatch loop drives it through [`Parser::parse_from_offset`]:
//! seek to the start of the offset window, run [`Parser::parse`], compute
//! the consumed size, and reject a parse that consumed nothing.

use crate::error::{BangError, Result};
use crate::meta_dir::{LogicalPath, MetaDirectory};
use crate::view::OffsetWindow;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

/// A child artifact a container parser wants written into its meta
/// directory during [`Parser::unpack`].
pub enum UnpackItem {
    RegularFile { path: LogicalPath, bytes: Vec<u8> },
    Directory { path: LogicalPath },
    Symlink { path: LogicalPath, target: PathBuf },
    Hardlink { path: LogicalPath, target: PathBuf },
    /// Re-yield the meta directory itself for rescanning. Used by
    /// [`crate::parsers::builtin::SynthesizingParser`] so a region no real
    /// parser claimed is re-queued and tried against the featureless stage.
    SelfAgain,
}

/// Lazily produced stream of [`UnpackItem`]s, or a hard failure. An
/// individual `Err` does not necessarily abort the remaining items — the
/// worker (see [`crate::pipeline::exec`]) logs it and continues draining
/// the iterator, matching the "non-fatal unpack error" contract.
pub type UnpackStream = Box<dyn Iterator<Item = Result<UnpackItem>> + Send>;

/// The operations every format parser exposes.
///
/// A parser is constructed fresh for each `(parent_md, offset)` pair by a
/// [`crate::registry::ParserFactory`]; there is no persistent parser
/// instance shared across artifacts.
pub trait Parser: Send {
    /// The parser's unique, human-readable identifier. Used in logs,
    /// `suggested_parsers`, and `info["unpack_parser"]`.
    fn pretty_name(&self) -> &'static str;

    /// Format-specific decoding. Must leave enough state for
    /// [`Parser::calculate_unpacked_size`] to compute a result. Returns
    /// `Err(BangError::ParseFailure)` on any rejection; stages treat that
    /// as "this parser does not apply" and move on.
    fn parse(&mut self, view: &mut OffsetWindow) -> Result<()>;

    /// The number of bytes consumed from the window's offset. Default:
    /// the cursor position after `parse()` returns.
    fn calculate_unpacked_size(&mut self, view: &OffsetWindow) -> u64 {
        view.tell()
    }

    /// Labels to attach to the artifact on a successful parse.
    fn labels(&self) -> Vec<String> {
        Vec::new()
    }

    /// Parser-specific structured metadata to attach on a successful parse.
    fn metadata(&self) -> Value {
        Value::Null
    }

    /// For container parsers: yields child artifacts to be written into
    /// `to_md`. Default: not a container, yields nothing.
    fn unpack(&self, _to_md: &Arc<MetaDirectory>) -> UnpackStream {
        Box::new(std::iter::empty())
    }

    /// Idempotently records this parser's identity, labels and metadata
    /// into `to_md`'s info. Stages call this once per successfully bound
    /// meta directory, before draining `unpack()`.
    fn write_info(&self, to_md: &MetaDirectory) {
        to_md.set_unpack_parser(self.pretty_name());
        to_md.add_labels(self.labels());
        to_md.merge_metadata(self.metadata());
    }

    /// Seeks the window to its start, parses, and computes the consumed
    /// size. Fails if the parse consumed zero bytes. Implementors should
    /// not need to override this.
    fn parse_from_offset(&mut self, view: &mut OffsetWindow) -> Result<u64>
    where
        Self: Sized,
    {
        use std::io::Seek;
        use std::io::SeekFrom;
        view.seek(SeekFrom::Start(0))?;
        self.parse(view)?;
        let size = self.calculate_unpacked_size(view);
        if size == 0 {
            return Err(BangError::parse_failure(
                self.pretty_name(),
                "parser consumed zero bytes",
            ));
        }
        Ok(size)
    }
}

/// Drives a boxed parser through the same contract as
/// [`Parser::parse_from_offset`]. Trait-object-safe equivalent, since the
/// `Sized` default method above cannot be called through `dyn Parser`.
pub fn parse_from_offset(parser: &mut dyn Parser, view: &mut OffsetWindow) -> Result<u64> {
    use std::io::Seek;
    use std::io::SeekFrom;
    view.seek(SeekFrom::Start(0))?;
    parser.parse(view)?;
    let size = parser.calculate_unpacked_size(view);
    if size == 0 {
        return Err(BangError::parse_failure(
            parser.pretty_name(),
            "parser consumed zero bytes",
        ));
    }
    Ok(size)
}

/// Static identity of a parser, independent of any particular artifact —
/// what the registry indexes by.
#[derive(Debug, Clone, Copy)]
pub struct ParserDescriptor {
    pub pretty_name: &'static str,
    pub extensions: &'static [&'static str],
    pub signatures: &'static [(u64, &'static [u8])],
    pub scan_if_featureless: bool,
}
