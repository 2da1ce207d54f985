use std::sync::LazyLock;

static SPACE_RUN_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"\s{3,}").expect("space run regex is valid"));
static NEWLINE_RUN_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"[\n\r]{2,}").expect("newline run regex is valid"));
static HYPHEN_BREAK_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"-\s*\n").expect("hyphen break regex is valid"));
static SECTION_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"(\n\d+\.\s+[A-Za-z0-9 &]+|\n[A-Z][A-Z\s]{3,}:)").expect("section regex is valid")
});

/// Normalize extracted text before sectioning.
pub fn clean_text(text: &str) -> String {
    let text = SPACE_RUN_RE.replace_all(text, " ");
    let text = NEWLINE_RUN_RE.replace_all(&text, "\n\n");
    let text = HYPHEN_BREAK_RE.replace_all(&text, "");
    text.replace('•', "-").trim().to_string()
}

#[derive(Debug, Clone, PartialEq)]
pub struct PolicySection {
    pub title: String,
    pub body: String,
}

impl PolicySection {
    pub fn content(&self) -> String {
        format!("Section: {}\n\n{}", self.title, self.body)
    }
}

/// Split on numbered or ALL-CAPS headings. Text before the first heading is
/// dropped, as are sections under ten words.
pub fn split_sections(text: &str) -> Vec<PolicySection> {
    let headings: Vec<regex::Match<'_>> = SECTION_RE.find_iter(text).collect();
    let mut sections = Vec::new();

    for (i, heading) in headings.iter().enumerate() {
        let body_end = headings.get(i + 1).map(|h| h.start()).unwrap_or(text.len());
        let body = text[heading.end()..body_end].trim();
        if body.is_empty() || body.split_whitespace().count() < 10 {
            continue;
        }
        sections.push(PolicySection {
            title: heading.as_str().trim().replace('\n', ""),
            body: body.to_string(),
        });
    }

    sections
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChunkResult {
    pub text: String,
    pub index: usize,
    pub start_offset: usize,
    pub end_offset: usize,
}

pub struct TextChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextChunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            chunk_overlap: chunk_overlap.min(chunk_size.saturating_sub(1)),
        }
    }

    pub fn chunk(&self, text: &str) -> Vec<ChunkResult> {
        let text = text.trim();
        if text.is_empty() {
            return Vec::new();
        }
        if text.len() <= self.chunk_size {
            return vec![ChunkResult {
                text: text.to_string(),
                index: 0,
                start_offset: 0,
                end_offset: text.len(),
            }];
        }

        let mut chunks = Vec::new();
        let mut start = 0;

        while start < text.len() {
            let end = snap_to_char_boundary(text, start + self.chunk_size);
            let actual_end = if end < text.len() {
                self.find_break_point(text, start, end)
            } else {
                end
            };

            let piece = text[start..actual_end].trim();
            if !piece.is_empty() {
                chunks.push(ChunkResult {
                    text: piece.to_string(),
                    index: chunks.len(),
                    start_offset: start,
                    end_offset: actual_end,
                });
            }

            if actual_end >= text.len() {
                break;
            }

            let span = actual_end - start;
            let step = if span > self.chunk_overlap { span - self.chunk_overlap } else { span };
            let next = snap_to_char_boundary(text, start + step.max(1));
            start = if next > start { next } else { actual_end };
        }

        chunks
    }

    /// Paragraph break, then line break, then sentence end, then space.
    fn find_break_point(&self, text: &str, start: usize, preferred_end: usize) -> usize {
        let min_end = snap_to_char_boundary(text, start + self.chunk_overlap + 1);
        let safe_end = snap_to_char_boundary(text, preferred_end);
        if min_end >= safe_end {
            return safe_end;
        }

        let region = &text[min_end..safe_end];
        if let Some(pos) = region.rfind("\n\n") {
            return min_end + pos + 2;
        }
        if let Some(pos) = region.rfind('\n') {
            return min_end + pos + 1;
        }
        if let Some(pos) = region.rfind(". ") {
            return min_end + pos + 2;
        }
        if let Some(pos) = region.rfind(' ') {
            return min_end + pos + 1;
        }

        safe_end
    }
}

/// Round a byte offset down to a UTF-8 boundary, capped at `text.len()`.
fn snap_to_char_boundary(text: &str, pos: usize) -> usize {
    if pos >= text.len() {
        return text.len();
    }
    let mut p = pos;
    while p > 0 && !text.is_char_boundary(p) {
        p -= 1;
    }
    p
}
