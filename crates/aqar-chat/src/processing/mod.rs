pub mod chunker;

pub use chunker::{clean_text, split_sections, PolicySection, TextChunker};
