//! Final per-page line table: assembly, lookup and persistence.

pub mod builder;
pub mod table;
pub mod text;

pub use builder::LineTextBuilder;
pub use table::{LineRow, LineTable, Provenance};
pub use text::join_words;
