use std::collections::BTreeSet;

use crate::contract::FieldName;

/// Spelling of [`Subscript::All`] in textual configuration.
pub const ALL_ITEMS: &str = "__all__";

/// Per-field preload policy: which turn keys `load_field_latest` returns.
///
/// Advisory for the in-memory view only — explicit fetches always succeed
/// when the key exists in storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subscript {
    /// The last `n` turns by key.
    Last(usize),
    /// Exactly these keys.
    Keys(BTreeSet<i64>),
    /// Everything.
    All,
}

impl Default for Subscript {
    fn default() -> Self {
        Self::Last(1)
    }
}

impl Subscript {
    /// Apply the policy to a key-descending sequence of candidate keys.
    pub fn admits(&self, position: usize, key: i64) -> bool {
        match self {
            Self::Last(n) => position < *n,
            Self::Keys(keys) => keys.contains(&key),
            Self::All => true,
        }
    }
}

impl std::str::FromStr for Subscript {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == ALL_ITEMS {
            return Ok(Self::All);
        }
        s.parse::<usize>()
            .map(Self::Last)
            .map_err(|_| format!("expected a turn count or {ALL_ITEMS:?}: {s}"))
    }
}

/// Subscription configuration for the three turn-indexed history fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptConfig {
    pub labels: Subscript,
    pub requests: Subscript,
    pub responses: Subscript,
}

impl SubscriptConfig {
    /// The same policy for every field — the common case.
    pub fn uniform(subscript: Subscript) -> Self {
        Self {
            labels: subscript.clone(),
            requests: subscript.clone(),
            responses: subscript,
        }
    }

    pub fn get(&self, field: FieldName) -> &Subscript {
        match field {
            FieldName::Labels => &self.labels,
            FieldName::Requests => &self.requests,
            FieldName::Responses => &self.responses,
        }
    }
}
