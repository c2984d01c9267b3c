//! Source-text units: sentences, paragraphs and significant tokens.
//!
//! Token pipeline: split into Han and non-Han runs. Han runs go through a
//! dictionary segmenter with part-of-speech tags and keep only nouns, verbs
//! and adjectives; other runs use Unicode word segmentation and drop words
//! without letters. Stopwords are removed from both.

use jieba_rs::Jieba;
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;
use unicode_segmentation::UnicodeSegmentation;

/// English stopwords (Lucene's default set).
const ENGLISH_STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "if", "in", "into", "is", "it",
    "no", "not", "of", "on", "or", "such", "that", "the", "their", "then", "there", "these",
    "they", "this", "to", "was", "will", "with",
];

/// Chinese function words and filler verbs.
const CHINESE_STOPWORDS: &[&str] = &[
    "一种", "这个", "那个", "进行", "位于", "一个", "我们", "他们", "以及", "是", "有", "在",
];

const SENTENCE_TERMINATORS: &[char] = &['.', '!', '?', '。', '！', '？'];

fn paragraph_break() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n[ \t\r]*\n").expect("Invalid regex pattern"))
}

fn segmenter() -> &'static Jieba {
    static JIEBA: OnceLock<Jieba> = OnceLock::new();
    JIEBA.get_or_init(Jieba::new)
}

fn is_han(c: char) -> bool {
    matches!(c,
        '\u{3400}'..='\u{4DBF}'
        | '\u{4E00}'..='\u{9FFF}'
        | '\u{F900}'..='\u{FAFF}'
        | '\u{20000}'..='\u{2A6DF}')
}

fn is_stopword(token: &str) -> bool {
    let lower = token.to_lowercase();
    ENGLISH_STOPWORDS.contains(&lower.as_str()) || CHINESE_STOPWORDS.contains(&token)
}

/// Sentences split on `.!?。！？` and line breaks, keeping the terminator.
///
/// Only sentences longer than `min_chars` characters are returned.
pub fn split_sentences(text: &str, min_chars: usize) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();

    let mut flush = |current: &mut String| {
        let sentence = current.trim();
        if sentence.chars().count() > min_chars {
            sentences.push(sentence.to_string());
        }
        current.clear();
    };

    for c in text.chars() {
        if c == '\n' {
            flush(&mut current);
            continue;
        }
        current.push(c);
        if SENTENCE_TERMINATORS.contains(&c) {
            flush(&mut current);
        }
    }
    flush(&mut current);

    sentences
}

/// Blocks separated by blank lines, longer than `min_chars` characters.
pub fn split_paragraphs(text: &str, min_chars: usize) -> Vec<String> {
    paragraph_break()
        .split(text)
        .map(str::trim)
        .filter(|p| p.chars().count() > min_chars)
        .map(str::to_string)
        .collect()
}

/// Significant tokens of `text`, in order and with repetitions.
pub fn significant_tokens(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut run_start = 0usize;
    let mut run_is_han = false;

    for (offset, c) in text.char_indices() {
        let han = is_han(c);
        if offset > 0 && han != run_is_han {
            push_run(&text[run_start..offset], run_is_han, &mut tokens);
            run_start = offset;
        }
        run_is_han = han;
    }
    if run_start < text.len() {
        push_run(&text[run_start..], run_is_han, &mut tokens);
    }

    tokens
}

fn push_run(run: &str, han: bool, tokens: &mut Vec<String>) {
    if han {
        for tagged in segmenter().tag(run, true) {
            if is_content_tag(tagged.word, tagged.tag) && !is_stopword(tagged.word) {
                tokens.push(tagged.word.to_string());
            }
        }
        return;
    }
    for word in run.unicode_words() {
        if word.chars().any(char::is_alphabetic) && !is_stopword(word) {
            tokens.push(word.to_string());
        }
    }
}

/// Nouns (`n`, `nr`, `ns`, `nt`, `nz`, ...), verbs (`v`, `vn`, ...) and
/// adjectives (`a`, `an`). Out-of-dictionary words come back as `x`; a
/// multi-character one is kept as a probable proper noun.
fn is_content_tag(word: &str, tag: &str) -> bool {
    match tag.as_bytes().first() {
        Some(b'n') | Some(b'v') => true,
        Some(b'a') => tag != "ad",
        Some(b'x') => word.chars().count() > 1,
        _ => false,
    }
}

/// Entities used to project the graph around one paragraph.
///
/// The paragraph's significant tokens longer than one character, plus every
/// graph node id that occurs literally in the paragraph. Deduplicated, first
/// occurrence wins.
pub fn paragraph_entities(paragraph: &str, node_ids: &[&str]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut entities = Vec::new();

    let tokens = significant_tokens(paragraph)
        .into_iter()
        .filter(|t| t.chars().count() > 1);
    let literal = node_ids
        .iter()
        .filter(|id| !id.is_empty() && paragraph.contains(**id))
        .map(|id| id.to_string());

    for entity in tokens.chain(literal) {
        if seen.insert(entity.clone()) {
            entities.push(entity);
        }
    }
    entities
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_sentences() {
        let text = "Alice is a knight. She guards the castle!\nShort\n白鸟遥是一名优秀的学生。她喜欢阅读古籍。";
        let sentences = split_sentences(text, 5);
        assert_eq!(
            sentences,
            vec![
                "Alice is a knight.",
                "She guards the castle!",
                "白鸟遥是一名优秀的学生。",
                "她喜欢阅读古籍。",
            ]
        );
    }

    #[test]
    fn test_split_paragraphs() {
        let text = "# Title\n\nFirst paragraph is long enough.\n  \nSecond paragraph also qualifies.\n\n\n";
        let paragraphs = split_paragraphs(text, 10);
        assert_eq!(
            paragraphs,
            vec!["First paragraph is long enough.", "Second paragraph also qualifies."]
        );
    }

    #[test]
    fn test_tokens_drop_stopwords_digits_and_punctuation() {
        let tokens = significant_tokens("The knight guards the castle, since 1999!");
        assert_eq!(tokens, vec!["knight", "guards", "castle", "since"]);
    }

    #[test]
    fn test_tokens_cjk_words() {
        let tokens = significant_tokens("她喜欢阅读古籍");
        assert!(tokens.contains(&"喜欢".to_string()));
        assert!(tokens.contains(&"阅读".to_string()));
        // Pronoun dropped, no pair straddles a word boundary.
        for junk in ["她", "她喜", "欢阅", "读古"] {
            assert!(!tokens.contains(&junk.to_string()), "unexpected token {}", junk);
        }
    }

    #[test]
    fn test_tokens_cjk_function_words_removed() {
        let tokens = significant_tokens("她是学生");
        assert_eq!(tokens, vec!["学生"]);
    }

    #[test]
    fn test_tokens_mixed_scripts() {
        let tokens = significant_tokens("Alice喜欢阅读, since 1999");
        assert_eq!(tokens[0], "Alice");
        assert!(tokens.contains(&"喜欢".to_string()));
        assert!(tokens.contains(&"阅读".to_string()));
        assert_eq!(tokens.last().map(String::as_str), Some("since"));
    }

    #[test]
    fn test_tokens_keep_repetitions() {
        let tokens = significant_tokens("castle castle");
        assert_eq!(tokens, vec!["castle", "castle"]);
    }

    #[test]
    fn test_paragraph_entities() {
        let entities = paragraph_entities("Alice met Bob at the castle", &["Alice", "Carol", "castle"]);
        assert_eq!(entities, vec!["Alice", "met", "Bob", "castle"]);
    }
}
