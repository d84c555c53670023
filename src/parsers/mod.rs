//! Built-in parser catalogue.
//!
//! The spec scopes concrete format parsers out — this module carries only
//! the pseudo-parsers the pipeline always needs ([`builtin::PaddingParser`],
//! [`builtin::SynthesizingParser`]) plus a small demonstration family used
//! by the integration tests and the `bang` CLI's default registry.

pub mod builtin;

use crate::registry::ParserFactory;
use std::sync::Arc;

/// The default set of parser factories registered by the `bang` binary
/// and the integration tests: the two demonstration format parsers. The
/// padding and synthesizing pseudo-parsers are wired directly into
/// [`crate::stages::padding_stage`] and [`crate::stages::featureless_stage`]
/// rather than through the registry, since every scan needs them
/// unconditionally.
pub fn builtin_factories() -> Vec<Arc<dyn ParserFactory>> {
    vec![
        Arc::new(builtin::ToyContainerFactory),
        Arc::new(builtin::TextFactory),
    ]
}
