//! Translation table for gateway display strings.
//!
//! The gateway sends names and enum values as `I18N_` keys. The table itself
//! is fetched elsewhere and injected here as a plain string map.

use std::collections::HashMap;
use std::path::Path;

use tracing::debug;

use crate::constants::TRANSLATION_KEY_PREFIX;
use crate::error::BridgeResult;

#[derive(Debug, Clone, Default)]
pub struct LabelTable {
    labels: HashMap<String, String>,
}

impl LabelTable {
    pub fn new(labels: HashMap<String, String>) -> Self {
        Self { labels }
    }

    /// Load a flat `{"I18N_KEY": "text"}` JSON object.
    pub fn from_json_str(json: &str) -> BridgeResult<Self> {
        Ok(Self::new(serde_json::from_str(json)?))
    }

    pub fn from_path(path: impl AsRef<Path>) -> BridgeResult<Self> {
        Self::from_json_str(&std::fs::read_to_string(path.as_ref())?)
    }

    pub fn insert(&mut self, key: impl Into<String>, text: impl Into<String>) {
        self.labels.insert(key.into(), text.into());
    }

    /// Translate `text` if it is a known key, else return it unchanged.
    pub fn resolve<'a>(&'a self, text: &'a str) -> &'a str {
        if !is_translation_key(text) {
            return text;
        }
        match self.labels.get(text) {
            Some(label) => label,
            None => {
                debug!("No label for {}", text);
                text
            }
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

pub fn is_translation_key(text: &str) -> bool {
    text.starts_with(TRANSLATION_KEY_PREFIX)
}
