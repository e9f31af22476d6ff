pub mod executor;
pub(crate) mod fold;
pub mod plan;

pub use executor::{KeySlice, Slice, TableStats};
pub use plan::{ColumnRange, KeyRange};
