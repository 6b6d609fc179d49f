mod coalesce;
mod writer;

pub use coalesce::{coalesce, Coalesced};
pub use writer::IndexWriter;
