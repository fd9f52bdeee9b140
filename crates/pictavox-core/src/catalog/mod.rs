//! Static style catalog: which diffusion checkpoints exist and how prompts
//! are scored against them.

mod style;

pub use style::{parse_style_key, ParseStyleKeyError, StyleKey, StyleProfile};
