//! Key matching rules for bulk removal.

use serde::{Deserialize, Serialize};

// == Remove Mode ==
/// How `remove_matching` compares each cached key with the pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoveMode {
    StartsWith,
    StartsWithIgnoreCase,
    EndsWith,
    EndsWithIgnoreCase,
    Equal,
    EqualIgnoreCase,
    Contains,
}

impl RemoveMode {
    pub const ALL: [RemoveMode; 7] = [
        RemoveMode::StartsWith,
        RemoveMode::StartsWithIgnoreCase,
        RemoveMode::EndsWith,
        RemoveMode::EndsWithIgnoreCase,
        RemoveMode::Equal,
        RemoveMode::EqualIgnoreCase,
        RemoveMode::Contains,
    ];

    /// Returns true if `candidate` matches `pattern` under this mode.
    pub fn matches(self, candidate: &str, pattern: &str) -> bool {
        match self {
            RemoveMode::StartsWith => candidate.starts_with(pattern),
            RemoveMode::EndsWith => candidate.ends_with(pattern),
            RemoveMode::Equal => candidate == pattern,
            RemoveMode::Contains => candidate.contains(pattern),
            RemoveMode::StartsWithIgnoreCase => {
                candidate.to_lowercase().starts_with(&pattern.to_lowercase())
            }
            RemoveMode::EndsWithIgnoreCase => {
                candidate.to_lowercase().ends_with(&pattern.to_lowercase())
            }
            RemoveMode::EqualIgnoreCase => candidate.to_lowercase() == pattern.to_lowercase(),
        }
    }
}
