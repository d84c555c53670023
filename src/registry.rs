//! Parser registry (Component D).
//!
//! Indexes parsers by pretty name, extension, signature, and
//! featureless-eligibility. Built once at startup from a set of
//! [`ParserFactory`]s and shared read-only across workers thereafter —
//! the signature automaton itself lives in [`crate::automaton`], built
//! from the same factories.

use crate::automaton::SignatureAutomaton;
use crate::meta_dir::MetaDirectory;
use crate::parser::{Parser, ParserDescriptor};
use crate::view::OffsetWindow;
use std::collections::HashMap;
use std::sync::Arc;

/// Constructs a fresh parser instance for one artifact at one offset.
/// Parsers carry no persistent state between artifacts, so the registry
/// stores a factory rather than an instance — the Rust analogue of
/// instantiating `UnpackParserCls(meta_directory, offset)` in the
/// original implementation.
pub trait ParserFactory: Send + Sync {
    fn descriptor(&self) -> ParserDescriptor;
    fn create(&self) -> Box<dyn Parser>;
}

/// A registered parser: its static descriptor plus the factory used to
/// instantiate it.
#[derive(Clone)]
pub struct RegisteredParser {
    pub descriptor: ParserDescriptor,
    factory: Arc<dyn ParserFactory>,
}

impl RegisteredParser {
    pub(crate) fn new(descriptor: ParserDescriptor, factory: Arc<dyn ParserFactory>) -> Self {
        RegisteredParser { descriptor, factory }
    }

    pub fn instantiate(&self) -> Box<dyn Parser> {
        self.factory.create()
    }
}

/// The parser registry: by-pretty-name, by-extension, by-signature and
/// featureless indices, plus the compiled signature automaton.
pub struct ParserRegistry {
    by_pretty_name: HashMap<&'static str, RegisteredParser>,
    featureless: Vec<RegisteredParser>,
    /// Insertion order, preserved so stage iteration order matches
    /// registration order (spec §4.4's "ordering and tie-breaks").
    insertion_order: Vec<&'static str>,
    automaton: SignatureAutomaton,
}

impl ParserRegistry {
    pub fn build(factories: Vec<Arc<dyn ParserFactory>>) -> Self {
        let mut by_pretty_name = HashMap::new();
        let mut featureless = Vec::new();
        let mut insertion_order = Vec::new();
        let mut signature_entries: Vec<(u64, &'static [u8], RegisteredParser)> = Vec::new();

        for factory in factories {
            let descriptor = factory.descriptor();
            let registered = RegisteredParser::new(descriptor, Arc::clone(&factory));
            insertion_order.push(descriptor.pretty_name);
            for (offset, literal) in descriptor.signatures {
                signature_entries.push((*offset, literal, registered.clone()));
            }
            if descriptor.scan_if_featureless {
                featureless.push(registered.clone());
            }
            by_pretty_name.insert(descriptor.pretty_name, registered);
        }

        let automaton = SignatureAutomaton::build(signature_entries);

        ParserRegistry {
            by_pretty_name,
            featureless,
            insertion_order,
            automaton,
        }
    }

    pub fn get(&self, pretty_name: &str) -> Option<&RegisteredParser> {
        self.by_pretty_name.get(pretty_name)
    }

    /// Iterates `(extension, parser)` pairs in registration order, the
    /// same order [`crate::stages::extension_stage`] tries them in.
    pub fn extension_candidates(&self) -> impl Iterator<Item = (&'static str, &RegisteredParser)> {
        self.insertion_order.iter().flat_map(move |name| {
            let registered = &self.by_pretty_name[name];
            registered
                .descriptor
                .extensions
                .iter()
                .map(move |ext| (*ext, registered))
        })
    }

    pub fn featureless_candidates(&self) -> &[RegisteredParser] {
        &self.featureless
    }

    pub fn automaton(&self) -> &SignatureAutomaton {
        &self.automaton
    }

    pub fn longest_signature_length(&self) -> usize {
        self.automaton.longest_signature_length()
    }
}

/// Instantiates a parser from the registry at `offset` and runs it to
/// completion in one call, mirroring `UnpackParserCls(meta_directory,
/// offset); parse_from_offset()` in the stages.
pub fn try_parse(
    registered: &RegisteredParser,
    _md: &Arc<MetaDirectory>,
    view: &mut OffsetWindow,
) -> crate::error::Result<(Box<dyn Parser>, u64)> {
    let mut parser = registered.instantiate();
    let size = crate::parser::parse_from_offset(parser.as_mut(), view)?;
    Ok((parser, size))
}
