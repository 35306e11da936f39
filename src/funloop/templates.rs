//! Template sets
//!
//! Named, ordered message lists cycled by fun loops. The built-in sets
//! ship with the binary; a config-pointed JSON/JSON5 file can replace
//! them wholesale. Loaded once at startup.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Template loading errors
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Template file defines no sets")]
    Empty,
}

/// One named message cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateSet {
    pub name: String,
    pub messages: Vec<String>,
    /// Send a status summary every Kth message (0 disables).
    #[serde(default = "default_status_every")]
    pub status_every: u64,
    /// Decorate every Nth message with flavor text (0 disables).
    #[serde(default = "default_decorate_every")]
    pub decorate_every: u64,
}

fn default_status_every() -> u64 {
    10
}

fn default_decorate_every() -> u64 {
    7
}

impl TemplateSet {
    pub fn new(name: impl Into<String>, messages: Vec<String>) -> Self {
        Self {
            name: name.into(),
            messages,
            status_every: default_status_every(),
            decorate_every: default_decorate_every(),
        }
    }

    pub fn with_status_every(mut self, every: u64) -> Self {
        self.status_every = every;
        self
    }

    pub fn with_decorate_every(mut self, every: u64) -> Self {
        self.decorate_every = every;
        self
    }
}

fn lines(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Immutable set of template sets, keyed by lowercase name.
#[derive(Debug, Default)]
pub struct TemplateLibrary {
    sets: HashMap<String, Arc<TemplateSet>>,
}

impl TemplateLibrary {
    /// The sets shipped with the binary.
    pub fn builtin() -> Self {
        Self::from_sets(vec![
            TemplateSet::new(
                "murgi",
                lines(&[
                    "Kok kok kok! 🐔",
                    "Ei murgi ta amar na tomar?",
                    "Murgi palaiya gelo, dhor dhor!",
                    "Dim paro nai keno aj?",
                    "Kok kok... keu ki sunche?",
                ]),
            )
            .with_status_every(10),
            TemplateSet::new(
                "chor",
                lines(&[
                    "Chor chor chor!! 🚨",
                    "Dhor dhor, chor palay!",
                    "Ke nilo amar mobile ta?",
                    "Police ashar age shob ferot de!",
                    "Chor dhora porse, hat tali!",
                ]),
            )
            .with_status_every(8),
            TemplateSet::new(
                "vut",
                lines(&[
                    "Boo! 👻",
                    "Raat hoise, vut ashbe ekhuni...",
                    "Ke jeno pichone dariye ache!",
                    "Batti nivaya dao, vut dekhbo.",
                ]),
            )
            .with_status_every(12),
            TemplateSet::new(
                "shiyal",
                lines(&[
                    "Hukka hua! 🦊",
                    "Shiyal pandit abar asche.",
                    "Murgi-ra shabdhan thako!",
                    "Pandit moshai ke salam dao.",
                ]),
            )
            .with_status_every(9),
            TemplateSet::new(
                "pagol",
                lines(&[
                    "Hahaha, ami pagol hoye jacchi! 🤪",
                    "Pagol chara ke eto raat e message dey?",
                    "Tumi o pagol, ami o pagol!",
                    "Pagla garod theke palaisi, hush!",
                ]),
            )
            .with_status_every(6),
            TemplateSet::new(
                "biye",
                lines(&[
                    "Biyer dawat roilo! 💍",
                    "Shanai bajche, shuncho?",
                    "Kobe mishti khawabe bolo?",
                    "Borjatri ready, koi jabo?",
                ]),
            )
            .with_status_every(15),
        ])
    }

    /// Build a library from explicit sets; later duplicates win.
    pub fn from_sets(sets: Vec<TemplateSet>) -> Self {
        let mut map = HashMap::new();
        for set in sets {
            map.insert(set.name.to_lowercase(), Arc::new(set));
        }
        Self { sets: map }
    }

    /// Load sets from a JSON/JSON5 file holding an array of sets.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TemplateError> {
        let raw = std::fs::read_to_string(path)?;
        let sets: Vec<TemplateSet> =
            json5::from_str(&raw).map_err(|e| TemplateError::Parse(e.to_string()))?;
        if sets.is_empty() {
            return Err(TemplateError::Empty);
        }
        Ok(Self::from_sets(sets))
    }

    /// Look up a set by name, case-insensitive.
    pub fn get(&self, name: &str) -> Option<Arc<TemplateSet>> {
        self.sets.get(&name.to_lowercase()).cloned()
    }

    /// Set names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sets.keys().cloned().collect();
        names.sort();
        names
    }

    /// (name, message count) pairs, sorted by name.
    pub fn summary(&self) -> Vec<(String, usize)> {
        let mut summary: Vec<(String, usize)> = self
            .sets
            .values()
            .map(|s| (s.name.to_lowercase(), s.messages.len()))
            .collect();
        summary.sort();
        summary
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}
