//! Named values available to templates.

use std::collections::BTreeMap;

/// A value bound to a placeholder name.
///
/// Lists come from multi-file bindings (`{infiles}`) or array parameters; in a
/// shell command they render as space-separated, individually escaped words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingValue {
    Single(String),
    List(Vec<String>),
}

impl BindingValue {
    /// All words of this value.
    pub fn words(&self) -> Vec<&str> {
        match self {
            BindingValue::Single(s) => vec![s.as_str()],
            BindingValue::List(items) => items.iter().map(String::as_str).collect(),
        }
    }

    /// The value as a single space-joined string.
    pub fn joined(&self) -> String {
        match self {
            BindingValue::Single(s) => s.clone(),
            BindingValue::List(items) => items.join(" "),
        }
    }
}

impl From<&str> for BindingValue {
    fn from(s: &str) -> Self {
        BindingValue::Single(s.to_string())
    }
}

impl From<String> for BindingValue {
    fn from(s: String) -> Self {
        BindingValue::Single(s)
    }
}

impl From<Vec<String>> for BindingValue {
    fn from(items: Vec<String>) -> Self {
        BindingValue::List(items)
    }
}

/// Instance-level bindings: captures plus `infile`, `outfiles`, and friends.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bindings {
    values: BTreeMap<String, BindingValue>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<BindingValue>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&BindingValue> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BindingValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
