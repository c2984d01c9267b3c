use crate::config::ExtractionConfig;

/// Separators tried in order, coarsest first. The empty separator splits
/// into single characters.
pub const DEFAULT_SEPARATORS: [&str; 7] = ["\n\n", "\n", "。", "！", "？", " ", ""];

/// A chunk of the source document
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Position of the chunk in the document, starting at 0
    pub index: usize,
    pub text: String,
}

/// Recursive separator splitter with overlap.
///
/// Lengths are measured in characters, not bytes, so CJK text chunks the
/// same way as Latin text. Each separator is kept at the start of the piece
/// that follows it.
#[derive(Debug, Clone)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl TextSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            chunk_overlap: chunk_overlap.min(chunk_size.saturating_sub(1)),
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self::new(config.chunk_size, config.chunk_overlap)
    }

    pub fn with_separators(mut self, separators: Vec<String>) -> Self {
        self.separators = separators;
        self
    }

    /// Split text into chunks of at most `chunk_size` characters where possible.
    ///
    /// A piece that cannot be split any further by the remaining separators
    /// is emitted as is, even if it is longer than `chunk_size`.
    pub fn split(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        self.split_recursive(text, &self.separators)
    }

    fn split_recursive(&self, text: &str, separators: &[String]) -> Vec<String> {
        // First separator that occurs in the text; "" always matches.
        let mut separator = separators.last().cloned().unwrap_or_default();
        let mut remaining: &[String] = &[];
        for (i, sep) in separators.iter().enumerate() {
            if sep.is_empty() {
                separator = String::new();
                break;
            }
            if text.contains(sep.as_str()) {
                separator = sep.clone();
                remaining = &separators[i + 1..];
                break;
            }
        }

        let mut chunks = Vec::new();
        let mut good: Vec<String> = Vec::new();
        for piece in split_keeping_separator(text, &separator) {
            if char_len(&piece) < self.chunk_size {
                good.push(piece);
                continue;
            }
            if !good.is_empty() {
                chunks.extend(self.merge(&good));
                good.clear();
            }
            if remaining.is_empty() {
                chunks.push(piece);
            } else {
                chunks.extend(self.split_recursive(&piece, remaining));
            }
        }
        if !good.is_empty() {
            chunks.extend(self.merge(&good));
        }
        chunks
    }

    /// Greedily pack small pieces into chunks, carrying up to `chunk_overlap`
    /// characters of trailing pieces into the next chunk.
    fn merge(&self, pieces: &[String]) -> Vec<String> {
        let mut docs = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut total = 0usize;

        for piece in pieces {
            let len = char_len(piece);
            if total + len > self.chunk_size {
                if total > self.chunk_size {
                    log::warn!(
                        "Created a chunk of {} characters, longer than the limit of {}",
                        total,
                        self.chunk_size
                    );
                }
                if !current.is_empty() {
                    push_trimmed(&mut docs, &current.concat());
                    while total > self.chunk_overlap || (total + len > self.chunk_size && total > 0) {
                        total -= char_len(current[0]);
                        current.remove(0);
                    }
                }
            }
            current.push(piece);
            total += len;
        }

        if !current.is_empty() {
            push_trimmed(&mut docs, &current.concat());
        }
        docs
    }
}

/// Split the document into indexed chunks using the configured size and overlap.
pub fn chunk_document(text: &str, config: &ExtractionConfig) -> Vec<Chunk> {
    TextSplitter::from_config(config)
        .split(text)
        .into_iter()
        .enumerate()
        .map(|(index, text)| Chunk { index, text })
        .collect()
}

fn split_keeping_separator(text: &str, separator: &str) -> Vec<String> {
    if separator.is_empty() {
        return text.chars().map(String::from).collect();
    }
    let mut parts = text.split(separator);
    let mut pieces = Vec::new();
    if let Some(first) = parts.next() {
        if !first.is_empty() {
            pieces.push(first.to_string());
        }
    }
    for part in parts {
        pieces.push(format!("{}{}", separator, part));
    }
    pieces
}

fn push_trimmed(docs: &mut Vec<String>, doc: &str) {
    let trimmed = doc.trim();
    if !trimmed.is_empty() {
        docs.push(trimmed.to_string());
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}
