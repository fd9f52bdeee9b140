//! Keyword-weighted prompt classification.
//!
//! Each style owns a table of weighted keywords. A prompt scores the sum of
//! the weights of every keyword it contains (case-insensitive substring
//! match). Dreamshaper wins only on a strictly higher score; ties, including
//! prompts that match nothing, go to Realistic Vision.

use std::fmt;

use serde::{Serialize, Serializer};

use crate::catalog::StyleKey;

/// A keyword that contributed to a style's score.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordMatch {
    pub keyword: &'static str,
    pub weight: u32,
}

impl fmt::Display for KeywordMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (+{})", self.keyword, self.weight)
    }
}

impl Serialize for KeywordMatch {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Outcome of classifying a prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StyleClassification {
    pub style: StyleKey,
    pub model_ref: &'static str,
    pub dreamshaper_score: u32,
    pub realistic_vision_score: u32,
    pub dreamshaper_keywords: Vec<KeywordMatch>,
    pub realistic_vision_keywords: Vec<KeywordMatch>,
}

/// Score `prompt` against both keyword tables and pick a style.
pub fn classify(prompt: &str) -> StyleClassification {
    let lowered = prompt.to_lowercase();

    let (dreamshaper_score, dreamshaper_keywords) = score(&lowered, StyleKey::Dreamshaper);
    let (realistic_vision_score, realistic_vision_keywords) =
        score(&lowered, StyleKey::RealisticVision);

    let style = if dreamshaper_score > realistic_vision_score {
        StyleKey::Dreamshaper
    } else {
        StyleKey::RealisticVision
    };

    StyleClassification {
        style,
        model_ref: style.model_ref(),
        dreamshaper_score,
        realistic_vision_score,
        dreamshaper_keywords,
        realistic_vision_keywords,
    }
}

fn score(lowered: &str, style: StyleKey) -> (u32, Vec<KeywordMatch>) {
    let matches: Vec<KeywordMatch> = style
        .profile()
        .keywords
        .iter()
        .filter(|(keyword, _)| lowered.contains(keyword))
        .map(|&(keyword, weight)| KeywordMatch { keyword, weight })
        .collect();
    let total = matches.iter().map(|m| m.weight).sum();
    (total, matches)
}
