//! Style keys, profiles and parser utilities.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identifier of a diffusion checkpoint variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StyleKey {
    /// Stylized / illustrative output (DreamShaper 8).
    Dreamshaper,
    /// Photographic output (Realistic Vision 5.1).
    RealisticVision,
}

/// Static description of a style: where its weights live and which prompt
/// terms pull towards it.
#[derive(Debug)]
pub struct StyleProfile {
    pub key: StyleKey,
    /// Hugging Face repository the checkpoint was exported from.
    pub model_ref: &'static str,
    /// Directory name under the models directory.
    pub model_dir: &'static str,
    /// Lower-case keyword and its weight.
    pub keywords: &'static [(&'static str, u32)],
}

static DREAMSHAPER: StyleProfile = StyleProfile {
    key: StyleKey::Dreamshaper,
    model_ref: "Lykon/dreamshaper-8",
    model_dir: "dreamshaper_model",
    keywords: &[
        ("anime", 3),
        ("cartoon", 3),
        ("fantasy", 2),
        ("magical", 2),
        ("mystical", 2),
        ("ethereal", 2),
        ("glowing", 2),
        ("sparkles", 2),
        ("vibrant", 1),
        ("stylized", 2),
        ("art", 1),
        ("illustration", 2),
        ("drawing", 2),
        ("painting", 1),
        ("colorful", 1),
        ("bright", 1),
    ],
};

static REALISTIC_VISION: StyleProfile = StyleProfile {
    key: StyleKey::RealisticVision,
    model_ref: "SG161222/Realistic_Vision_V5.1_noVAE",
    model_dir: "realistic_vision_model",
    keywords: &[
        ("realistic", 3),
        ("photorealistic", 3),
        ("cinematic", 3),
        ("photography", 3),
        ("photo", 2),
        ("documentary", 2),
        ("lifelike", 2),
        ("natural", 1),
        ("real", 1),
        ("professional", 1),
        ("portrait", 1),
        ("landscape", 1),
        ("film", 2),
        ("movie", 2),
        ("dramatic lighting", 1),
        ("film photography", 2),
    ],
};

impl StyleKey {
    pub fn all() -> &'static [StyleKey] {
        &[StyleKey::Dreamshaper, StyleKey::RealisticVision]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StyleKey::Dreamshaper => "dreamshaper",
            StyleKey::RealisticVision => "realistic_vision",
        }
    }

    pub fn profile(&self) -> &'static StyleProfile {
        match self {
            StyleKey::Dreamshaper => &DREAMSHAPER,
            StyleKey::RealisticVision => &REALISTIC_VISION,
        }
    }

    pub fn model_ref(&self) -> &'static str {
        self.profile().model_ref
    }
}

impl fmt::Display for StyleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseStyleKeyError {
    input: String,
}

impl fmt::Display for ParseStyleKeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = if self.input.trim().is_empty() {
            "<empty>"
        } else {
            self.input.trim()
        };
        write!(
            f,
            "Unsupported style: {shown}. Supported: dreamshaper, realistic_vision"
        )
    }
}

impl std::error::Error for ParseStyleKeyError {}

/// Parse a style identifier, accepting the canonical key, the Hugging Face
/// reference and a few separator variants.
pub fn parse_style_key(input: &str) -> Result<StyleKey, ParseStyleKeyError> {
    let normalized: String = input
        .trim()
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c == '-' || c == ' ' { '_' } else { c })
        .collect();

    StyleKey::all()
        .iter()
        .copied()
        .find(|key| {
            normalized == key.as_str()
                || normalized == key.model_ref().to_ascii_lowercase().replace('-', "_")
                || normalized == key.as_str().replace('_', "")
        })
        .ok_or_else(|| ParseStyleKeyError {
            input: input.to_string(),
        })
}

impl FromStr for StyleKey {
    type Err = ParseStyleKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_style_key(s)
    }
}
