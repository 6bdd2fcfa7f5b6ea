mod graph;
mod memory;
mod suggestions;

pub use graph::{GraphStore, PgGraphStore};
pub use memory::{InMemoryGraphStore, InMemorySuggestionStore};
pub use suggestions::{PgSuggestionStore, SuggestionStore};
