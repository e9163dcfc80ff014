//! Term extraction: word tokenizer, stopwords, alias folding, phrases.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};

static RE_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?u)\b\w+\b").expect("word regex"));

/// Basic, Unicode-friendly word tokens (borrowed from `input`).
pub fn word_tokens(input: &str) -> impl Iterator<Item = &str> {
    RE_WORD.find_iter(input).map(|m| m.as_str())
}

const DEFAULT_STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "from", "your", "you", "are", "was", "were",
    "has", "have", "had", "but", "not", "all", "can", "will", "into", "its", "our", "out",
    "about", "how", "why", "what", "when", "who", "new", "now", "more", "than", "just", "via",
    "over", "after", "using", "use", "used", "they", "their", "them", "his", "her", "show",
    "ask", "yet", "also", "one", "two", "get", "got", "make", "makes", "made", "here", "there",
    "some", "any", "like", "been", "being", "which", "while", "would", "could", "should",
    "http", "https", "www", "com",
];

#[derive(Debug, Clone)]
pub struct Tokenizer {
    min_len: usize,
    stopwords: HashSet<String>,
    aliases: HashMap<String, String>,
    /// `(joined term, whole-word matcher)`, longest phrase first.
    phrases: Vec<(String, Regex)>,
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new(3, &[], &HashMap::new(), &[])
    }
}

impl Tokenizer {
    pub fn new(
        min_len: usize,
        extra_stopwords: &[String],
        aliases: &HashMap<String, String>,
        phrases: &[String],
    ) -> Self {
        let mut stopwords: HashSet<String> =
            DEFAULT_STOPWORDS.iter().map(|s| s.to_string()).collect();
        stopwords.extend(extra_stopwords.iter().map(|s| s.trim().to_lowercase()));

        let aliases = aliases
            .iter()
            .map(|(k, v)| (k.trim().to_lowercase(), v.trim().to_lowercase()))
            .collect();

        let mut phrases: Vec<String> = phrases
            .iter()
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        phrases.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        phrases.dedup();
        let phrases = phrases.iter().map(String::as_str).filter_map(phrase_matcher).collect();

        Self {
            min_len: min_len.max(1),
            stopwords,
            aliases,
            phrases,
        }
    }

    /// All candidate terms in `text`, one entry per occurrence.
    pub fn terms(&self, text: &str) -> Vec<String> {
        let mut lower = text.to_lowercase();
        let mut out = Vec::new();

        for (joined, re) in &self.phrases {
            let hits = re.find_iter(&lower).count();
            if hits == 0 {
                continue;
            }
            out.extend(std::iter::repeat_n(self.fold(joined), hits));
            lower = re.replace_all(&lower, " ").into_owned();
        }

        for tok in word_tokens(&lower) {
            if tok.chars().count() < self.min_len || tok.chars().all(|c| c.is_ascii_digit()) {
                continue;
            }
            let term = self.fold(tok);
            if self.stopwords.contains(&term) {
                continue;
            }
            out.push(term);
        }
        out
    }

    fn fold(&self, term: &str) -> String {
        self.aliases
            .get(term)
            .cloned()
            .unwrap_or_else(|| term.to_string())
    }
}

/// Whole-word matcher for a phrase; inner whitespace may vary.
fn phrase_matcher(phrase: &str) -> Option<(String, Regex)> {
    let words: Vec<&str> = phrase.split_whitespace().collect();
    if words.is_empty() {
        return None;
    }
    let body = words
        .iter()
        .map(|w| regex::escape(w))
        .collect::<Vec<_>>()
        .join(r"\s+");
    match Regex::new(&format!(r"(?u)\b{body}\b")) {
        Ok(re) => Some((words.join("-"), re)),
        Err(e) => {
            tracing::warn!(target: "aggregate", phrase, error = %e, "skipping phrase");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizer_basic() {
        let t = Tokenizer::default();
        assert_eq!(
            t.terms("The Rust compiler, and 2024 agents!"),
            vec!["rust", "compiler", "agents"]
        );
    }

    #[test]
    fn aliases_and_phrases() {
        let mut aliases = HashMap::new();
        aliases.insert("LLMs".to_string(), "llm".to_string());
        let t = Tokenizer::new(3, &[], &aliases, &["machine learning".to_string()]);
        let terms = t.terms("LLMs meet Machine Learning; machine learning wins");
        assert_eq!(
            terms,
            vec!["machine-learning", "machine-learning", "llm", "meet", "wins"]
        );
    }

    #[test]
    fn phrases_match_whole_words_only() {
        let t = Tokenizer::new(3, &[], &HashMap::new(), &["open source".to_string()]);
        assert_eq!(t.terms("reopen sources"), vec!["reopen", "sources"]);
        assert_eq!(t.terms("Open  Source, reopen source"), vec!["open-source", "reopen", "source"]);
    }

    #[test]
    fn extra_stopwords_and_min_len() {
        let t = Tokenizer::new(4, &["Launch".to_string()], &HashMap::new(), &[]);
        assert_eq!(t.terms("launch of the big rocket"), vec!["rocket"]);
    }
}
