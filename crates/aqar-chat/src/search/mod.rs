pub mod text_search;

pub use text_search::{ChunkRecord, SearchHit, TextSearch};
