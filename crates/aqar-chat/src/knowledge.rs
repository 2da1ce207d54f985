//! Policy knowledge base
//!
//! Plain-text policy documents are cleaned, split into headed sections and
//! chunked into a tantivy index. Queries return the top chunks formatted for
//! the RAG prompt.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::Path;
use walkdir::WalkDir;

use crate::config::RagSettings;
use crate::processing::{clean_text, split_sections, TextChunker};
use crate::search::{ChunkRecord, SearchHit, TextSearch};

pub const NOT_INITIALIZED: &str = "RAG Error: Vector database not initialized";

pub struct KnowledgeBase {
    index: Option<TextSearch>,
    chunker: TextChunker,
}

impl KnowledgeBase {
    /// Opens the on-disk index and rebuilds it from `data_dir` when empty.
    /// A store that cannot be opened is kept uninitialized.
    pub fn open(settings: &RagSettings) -> Self {
        let chunker = TextChunker::new(settings.chunk_size, settings.chunk_overlap);
        let index = match TextSearch::new(&settings.db_path.to_string_lossy()) {
            Ok(index) => Some(index),
            Err(e) => {
                tracing::error!(error = %e, path = %settings.db_path.display(), "Failed to open knowledge index");
                None
            }
        };

        let kb = Self { index, chunker };
        if kb.is_empty() {
            match kb.ingest_dir(&settings.data_dir) {
                Ok(0) => tracing::warn!(dir = %settings.data_dir.display(), "No policy documents found"),
                Ok(n) => tracing::info!(chunks = n, "Knowledge base rebuilt"),
                Err(e) => tracing::warn!(error = %e, "Knowledge base rebuild failed"),
            }
        } else {
            tracing::info!(chunks = kb.len(), "Loaded existing knowledge base");
        }
        kb
    }

    pub fn in_memory(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        Ok(Self {
            index: Some(TextSearch::in_memory()?),
            chunker: TextChunker::new(chunk_size, chunk_overlap),
        })
    }

    pub fn uninitialized() -> Self {
        Self {
            index: None,
            chunker: TextChunker::new(900, 200),
        }
    }

    pub fn len(&self) -> usize {
        self.index
            .as_ref()
            .and_then(|i| i.count().ok())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Index every `.txt` file directly under `dir`; returns the chunk count.
    pub fn ingest_dir(&self, dir: &Path) -> Result<usize> {
        if !dir.is_dir() {
            tracing::warn!(dir = %dir.display(), "Data directory not found");
            return Ok(0);
        }

        let mut total = 0;
        for entry in WalkDir::new(dir)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let path = entry.path();
            let is_txt = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.eq_ignore_ascii_case("txt"))
                .unwrap_or(false);
            if !is_txt {
                continue;
            }

            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let source = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("unknown")
                .to_string();
            total += self.ingest_text(&text, &source)?;
        }
        Ok(total)
    }

    /// Clean, section and chunk one document, then commit it.
    pub fn ingest_text(&self, text: &str, source: &str) -> Result<usize> {
        let Some(index) = &self.index else {
            anyhow::bail!("Knowledge index is not initialized");
        };

        let cleaned = clean_text(text);
        let sections = split_sections(&cleaned);

        let mut batch = Vec::new();
        for section in &sections {
            for chunk in self.chunker.chunk(&section.content()) {
                batch.push(ChunkRecord {
                    id: format!("{}:{}_{}", source, section.title, chunk.index),
                    text: chunk.text,
                    section: section.title.clone(),
                    source: source.to_string(),
                });
            }
        }

        index.add_chunks(&batch)?;
        index.commit()?;
        tracing::info!(
            source = %source,
            sections = sections.len(),
            chunks = batch.len(),
            "Indexed policy document"
        );
        Ok(batch.len())
    }

    /// Top-`k` chunks as `"Chunk i:\n{text}"` blocks separated by blank lines.
    pub fn search(&self, query: &str, k: usize) -> String {
        let Some(index) = self.index.as_ref().filter(|i| !i.is_empty()) else {
            return NOT_INITIALIZED.to_string();
        };

        match index.search(query, k) {
            Ok(hits) => {
                tracing::debug!(query = %query, hits = hits.len(), "Knowledge search");
                format_hits(&dedupe(hits))
            }
            Err(e) => {
                tracing::warn!(error = %e, "Knowledge search failed");
                format!("RAG Error: {}", e)
            }
        }
    }
}

/// Drop hits whose first 200 lowercase characters repeat an earlier hit.
fn dedupe(hits: Vec<SearchHit>) -> Vec<SearchHit> {
    let mut seen = HashSet::new();
    hits.into_iter()
        .filter(|h| {
            let fingerprint: String = h.text.trim().to_lowercase().chars().take(200).collect();
            seen.insert(fingerprint)
        })
        .collect()
}

fn format_hits(hits: &[SearchHit]) -> String {
    hits.iter()
        .enumerate()
        .map(|(i, h)| format!("Chunk {}:\n{}", i + 1, h.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICY: &str = "Eshtri Aqar policies\n\
1. Reservation Terms\n\
A unit is reserved once the online deposit is paid and the reservation form is signed by the buyer.\n\
2. Refund Policy\n\
The online deposit is refundable within fourteen days if the contract has not been signed yet.\n\
CANCELLATION:\n\
Cancellation after contract signing follows the developer terms and may incur administrative fees.\n";

    #[test]
    fn test_uninitialized_store_reports_error() {
        assert_eq!(KnowledgeBase::uninitialized().search("refund", 5), NOT_INITIALIZED);
        let empty = KnowledgeBase::in_memory(900, 200).unwrap();
        assert_eq!(empty.search("refund", 5), NOT_INITIALIZED);
    }

    #[test]
    fn test_ingest_and_search() {
        let kb = KnowledgeBase::in_memory(900, 200).unwrap();
        assert_eq!(kb.ingest_text(POLICY, "policies.txt").unwrap(), 3);

        let out = kb.search("refundable deposit", 3);
        assert!(out.starts_with("Chunk 1:\nSection: "));
        assert!(out.contains("fourteen days"));
    }

    #[test]
    fn test_dedupe_by_prefix() {
        let hit = |id: &str, text: &str| SearchHit {
            id: id.into(),
            text: text.into(),
            section: String::new(),
            source: String::new(),
            score: 1.0,
        };
        let hits = vec![hit("a", "Same TEXT"), hit("b", "same text"), hit("c", "other")];
        let kept = dedupe(hits);
        assert_eq!(kept.iter().map(|h| h.id.as_str()).collect::<Vec<_>>(), vec!["a", "c"]);
        assert_eq!(format_hits(&kept), "Chunk 1:\nSame TEXT\n\nChunk 2:\nother");
    }

    #[test]
    fn test_ingest_dir_reads_only_txt() {
        let dir = std::env::temp_dir().join(format!("aqar-kb-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("policies.txt"), POLICY).unwrap();
        std::fs::write(dir.join("notes.md"), POLICY).unwrap();

        let kb = KnowledgeBase::in_memory(900, 200).unwrap();
        assert_eq!(kb.ingest_dir(&dir).unwrap(), 3);
        assert_eq!(kb.len(), 3);
        std::fs::remove_dir_all(&dir).ok();
    }
}
