//! Domain tools
//!
//! The capability sources the engine ships with: the genome view (`builtin`)
//! and the sequence-analysis function library (`function_library`).

pub mod function_library;
pub mod genome_view;
pub mod sequence;

pub use function_library::FunctionLibrarySource;
pub use genome_view::{BuiltinSource, GenomeView, Region};

use std::sync::Arc;

use crate::registry::SourceRef;

/// Built-in sources over a shared genome view
pub fn default_sources(view: Arc<GenomeView>) -> Vec<SourceRef> {
    vec![
        Arc::new(BuiltinSource::new(view)) as SourceRef,
        Arc::new(FunctionLibrarySource::new()),
    ]
}
