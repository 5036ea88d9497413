// text_prep.rs - Text preparation before embedding.
//
// E5/GTE-style models are trained with role prefixes ("query: " for searches,
// "passage: " for documents). Truncation is off by default, so long documents are
// pre-segmented into word windows here instead of being cut by the tokenizer.

use crate::config;

/// Prefix a search query.
pub fn query_text(text: &str) -> String {
    format!("{}{}", config::text_prep::QUERY_PREFIX, text.trim())
}

/// Prefix a document passage.
pub fn passage_text(text: &str) -> String {
    format!("{}{}", config::text_prep::PASSAGE_PREFIX, text.trim())
}

/// Split `text` into consecutive windows of at most `max_words` words.
///
/// Whitespace inside a window is normalized to single spaces. Empty text gives
/// no segments; `max_words == 0` is treated as 1.
pub fn segment_words(text: &str, max_words: usize) -> Vec<String> {
    let max_words = max_words.max(1);
    let words: Vec<&str> = text.split_whitespace().collect();
    words.chunks(max_words).map(|chunk| chunk.join(" ")).collect()
}

/// Segment with the default window and prefix each piece as a passage.
pub fn passages(text: &str) -> Vec<String> {
    segment_words(text, config::text_prep::SEGMENT_WORDS)
        .iter()
        .map(|segment| passage_text(segment))
        .collect()
}
