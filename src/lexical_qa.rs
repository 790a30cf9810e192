//! Local extractive QA without a model.
//!
//! The answer span is the context sentence covering the most question content
//! words; confidence is the covered fraction.

use crate::capabilities::{QaModel, SpanPrediction};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashSet;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "about", "can", "do", "does", "for", "how", "i", "in", "is", "it",
    "me", "my", "of", "on", "or", "tell", "the", "there", "to", "what", "when", "where", "which",
    "who", "why", "with", "you", "your", "we", "our", "be", "this", "that",
];

#[derive(Debug, Default, Clone)]
pub struct LexicalQa;

impl LexicalQa {
    pub fn new() -> Self {
        Self
    }

    /// Synchronous core of `answer`
    pub fn best_span(&self, question: &str, context: &str) -> SpanPrediction {
        let wanted: HashSet<String> = content_words(question).collect();
        if wanted.is_empty() {
            return empty();
        }

        let mut best: Option<(&str, usize)> = None;
        for sentence in split_sentences(context) {
            let present: HashSet<String> = content_words(sentence).collect();
            let overlap = wanted.intersection(&present).count();
            if overlap > best.map_or(0, |(_, n)| n) {
                best = Some((sentence, overlap));
            }
        }

        match best {
            Some((sentence, overlap)) => SpanPrediction {
                span: sentence.to_string(),
                confidence: overlap as f32 / wanted.len() as f32,
            },
            None => empty(),
        }
    }
}

#[async_trait]
impl QaModel for LexicalQa {
    fn name(&self) -> &'static str {
        "lexical_qa"
    }

    async fn answer(&self, question: &str, context: &str) -> Result<SpanPrediction> {
        Ok(self.best_span(question, context))
    }
}

fn empty() -> SpanPrediction {
    SpanPrediction {
        span: String::new(),
        confidence: 0.0,
    }
}

/// Lowercased, stopword-free words with a naive plural strip
fn content_words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .map(|w| {
            if w.len() > 3 && w.ends_with('s') && !w.ends_with("ss") {
                w[..w.len() - 1].to_string()
            } else {
                w
            }
        })
}

/// Split on `.`, `!` or `?` followed by whitespace or end of text.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            let at_boundary = chars.peek().map_or(true, |(_, next)| next.is_whitespace());
            if at_boundary {
                let end = idx + c.len_utf8();
                let sentence = text[start..end].trim();
                if !sentence.is_empty() {
                    sentences.push(sentence);
                }
                start = end;
            }
        }
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}
