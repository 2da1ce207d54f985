use anyhow::{Context, Result};
use std::path::Path;
use tantivy::collector::TopDocs;
use tantivy::query::{Query, QueryParser};
use tantivy::schema::{Field, Schema, STORED, STRING, TEXT, Value as TantivyValue};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument};

const WRITER_HEAP_BYTES: usize = 50_000_000;

/// A policy chunk to be indexed.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub id: String,
    pub text: String,
    pub section: String,
    pub source: String,
}

/// A stored policy chunk returned by a query.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: String,
    pub text: String,
    pub section: String,
    pub source: String,
    pub score: f32,
}

#[derive(Clone, Copy)]
struct ChunkFields {
    id: Field,
    text: Field,
    section: Field,
    source: Field,
}

impl ChunkFields {
    /// `id` and `source` are STRING so they stay exact terms.
    fn schema() -> Schema {
        let mut builder = Schema::builder();
        builder.add_text_field("id", STRING | STORED);
        builder.add_text_field("text", TEXT | STORED);
        builder.add_text_field("section", TEXT | STORED);
        builder.add_text_field("source", STRING | STORED);
        builder.build()
    }

    fn resolve(schema: &Schema) -> Result<Self> {
        let lookup = |name: &str| {
            schema
                .get_field(name)
                .with_context(|| format!("Index is missing the `{}` field", name))
        };
        Ok(Self {
            id: lookup("id")?,
            text: lookup("text")?,
            section: lookup("section")?,
            source: lookup("source")?,
        })
    }
}

/// Full-text index over policy chunks.
pub struct TextSearch {
    index: Index,
    reader: IndexReader,
    writer: parking_lot::Mutex<IndexWriter>,
    fields: ChunkFields,
}

impl TextSearch {
    /// Opens the index under `{path}/tantivy_index`, creating it when missing.
    pub fn new(path: &str) -> Result<Self> {
        let dir_path = Path::new(path).join("tantivy_index");
        std::fs::create_dir_all(&dir_path)
            .with_context(|| format!("Failed to create index directory {}", dir_path.display()))?;

        let directory = tantivy::directory::MmapDirectory::open(&dir_path)?;
        let index = if Index::exists(&directory)? {
            Index::open(directory)?
        } else {
            Index::create_in_dir(&dir_path, ChunkFields::schema())?
        };
        Self::with_index(index)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_index(Index::create_in_ram(ChunkFields::schema()))
    }

    fn with_index(index: Index) -> Result<Self> {
        let fields = ChunkFields::resolve(&index.schema())?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .context("Failed to open index reader")?;
        let writer = index
            .writer(WRITER_HEAP_BYTES)
            .context("Failed to open index writer")?;

        Ok(Self {
            index,
            reader,
            writer: parking_lot::Mutex::new(writer),
            fields,
        })
    }

    /// Stages the chunks; they become searchable after `commit`.
    pub fn add_chunks(&self, chunks: &[ChunkRecord]) -> Result<()> {
        let f = self.fields;
        let writer = self.writer.lock();
        for chunk in chunks {
            writer.add_document(doc!(
                f.id => chunk.id.as_str(),
                f.text => chunk.text.as_str(),
                f.section => chunk.section.as_str(),
                f.source => chunk.source.as_str(),
            ))?;
        }
        Ok(())
    }

    pub fn commit(&self) -> Result<()> {
        self.writer.lock().commit().context("Index commit failed")?;
        self.reader.reload().context("Index reload failed")?;
        Ok(())
    }

    /// Queries text and section titles. Input the query parser rejects is
    /// retried as a quoted phrase over the chunk text.
    fn parse(&self, query: &str) -> Result<Box<dyn Query>> {
        let parser = QueryParser::for_index(&self.index, vec![self.fields.text, self.fields.section]);
        if let Ok(parsed) = parser.parse_query(query) {
            return Ok(parsed);
        }
        let phrase = format!("\"{}\"", query.replace('"', ""));
        QueryParser::for_index(&self.index, vec![self.fields.text])
            .parse_query(&phrase)
            .with_context(|| format!("Unsearchable query: {}", query))
    }

    pub fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        let parsed = self.parse(query)?;
        let searcher = self.reader.searcher();
        let top = searcher.search(&parsed, &TopDocs::with_limit(k.max(1)))?;

        let f = self.fields;
        let hits = top
            .into_iter()
            .filter_map(|(score, address)| {
                let stored = searcher.doc::<TantivyDocument>(address).ok()?;
                let read = |field: Field| {
                    stored
                        .get_first(field)
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string()
                };
                Some(SearchHit {
                    id: read(f.id),
                    text: read(f.text),
                    section: read(f.section),
                    source: read(f.source),
                    score,
                })
            })
            .collect();
        Ok(hits)
    }

    pub fn count(&self) -> Result<usize> {
        Ok(self.reader.searcher().num_docs() as usize)
    }

    pub fn is_empty(&self) -> bool {
        self.count().map_or(true, |n| n == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, text: &str, section: &str) -> ChunkRecord {
        ChunkRecord {
            id: id.into(),
            text: text.into(),
            section: section.into(),
            source: "policies.txt".into(),
        }
    }

    fn seeded() -> TextSearch {
        let search = TextSearch::in_memory().unwrap();
        search
            .add_chunks(&[
                record(
                    "refund_0",
                    "Section: 3. Refund Policy\n\nReservation fees are refundable within 14 days.",
                    "3. Refund Policy",
                ),
                record(
                    "delivery_0",
                    "Section: DELIVERY:\n\nUnits are delivered finished with kitchen cabinets.",
                    "DELIVERY:",
                ),
            ])
            .unwrap();
        search.commit().unwrap();
        search
    }

    #[test]
    fn test_search_returns_stored_fields() {
        let search = seeded();
        assert_eq!(search.count().unwrap(), 2);

        let hits = search.search("refundable reservation", 5).unwrap();
        assert_eq!(hits[0].id, "refund_0");
        assert_eq!(hits[0].section, "3. Refund Policy");
        assert_eq!(hits[0].source, "policies.txt");
        assert!(hits[0].text.contains("14 days"));
    }

    #[test]
    fn test_unparseable_query_falls_back_to_phrase() {
        let search = seeded();
        let hits = search.search("kitchen cabinets (", 5).unwrap();
        assert!(hits.iter().all(|h| h.id == "delivery_0"));
    }

    #[test]
    fn test_staged_chunks_are_invisible_until_commit() {
        let search = TextSearch::in_memory().unwrap();
        search
            .add_chunks(&[record("a_0", "Maintenance fees are 8%.", "FEES:")])
            .unwrap();
        assert!(search.is_empty());
        search.commit().unwrap();
        assert_eq!(search.count().unwrap(), 1);
    }
}
