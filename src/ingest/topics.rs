//! # Topic Classifier
//!
//! Maps item text to coarse categories (`ai`, `security`, `rust`, ...) using
//! keyword lists from config. Plain word keywords match whole tokens; anything
//! with spaces or punctuation (`supply chain`, `zero-day`) matches as a phrase
//! in the lowercased text.
//!
//! A built-in `default_seed()` is used when config provides no topics.

use std::collections::{BTreeMap, BTreeSet};

use crate::aggregate::tokenize::word_tokens;
use crate::ingest::types::SnapshotItem;

#[derive(Debug, Clone, Default)]
pub struct TopicClassifier {
    words: BTreeMap<String, BTreeSet<String>>,
    phrases: Vec<(String, String)>,
}

impl TopicClassifier {
    pub fn from_map(topics: &BTreeMap<String, Vec<String>>) -> Self {
        let mut words: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut phrases = Vec::new();
        for (category, keywords) in topics {
            let category = category.trim().to_lowercase();
            if category.is_empty() {
                continue;
            }
            for kw in keywords {
                let kw = kw.trim().to_lowercase();
                if kw.is_empty() {
                    continue;
                }
                if kw.contains(|c: char| !c.is_alphanumeric() && c != '_') {
                    phrases.push((kw, category.clone()));
                } else {
                    words.entry(kw).or_default().insert(category.clone());
                }
            }
        }
        Self { words, phrases }
    }

    /// Fallback topics when config has none.
    pub fn default_seed() -> Self {
        let mut m = BTreeMap::new();
        for (cat, kws) in [
            (
                "ai",
                &[
                    "ai", "llm", "agents", "agent", "gpt", "openai", "anthropic", "claude",
                    "gemini", "model", "models", "inference", "machine learning",
                ][..],
            ),
            (
                "security",
                &[
                    "security", "vulnerability", "cve", "exploit", "breach", "malware",
                    "ransomware", "phishing", "zero-day", "supply chain",
                ][..],
            ),
            (
                "devtools",
                &["compiler", "ide", "editor", "debugger", "cli", "git", "github", "terminal"][..],
            ),
            (
                "infrastructure",
                &["kubernetes", "docker", "cloud", "aws", "database", "postgres", "serverless"][..],
            ),
            ("rust", &["rust", "cargo", "crate", "tokio"][..]),
            ("web", &["javascript", "typescript", "react", "browser", "css", "wasm"][..]),
        ] {
            m.insert(
                cat.to_string(),
                kws.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
            );
        }
        Self::from_map(&m)
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty() && self.phrases.is_empty()
    }

    pub fn categories_for(&self, text: &str) -> BTreeSet<String> {
        let lower = text.to_lowercase();
        let mut out = BTreeSet::new();
        for tok in word_tokens(&lower) {
            if let Some(cats) = self.words.get(tok) {
                out.extend(cats.iter().cloned());
            }
        }
        for (phrase, cat) in &self.phrases {
            if lower.contains(phrase.as_str()) {
                out.insert(cat.clone());
            }
        }
        out
    }

    /// `{category: [titles]}` for the snapshot file.
    pub fn group_titles(&self, items: &[SnapshotItem]) -> BTreeMap<String, Vec<String>> {
        let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for it in items {
            for cat in self.categories_for(&it.text()) {
                out.entry(cat).or_default().push(it.title.clone());
            }
        }
        out
    }
}
