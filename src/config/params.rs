//! Flat, sectioned parameter table.
//!
//! `[params.cutadapt] minphred = 20` becomes two names for the same value:
//! `cutadapt_minphred` and `cutadapt.minphred`. Top-level keys keep their
//! own name. Scalars are stringified; arrays of scalars become lists.

use std::collections::BTreeMap;

use crate::errors::{PipedagError, Result};
use crate::pattern::bindings::BindingValue;

/// Read-only parameter lookup shared by the pattern matcher and job runner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parameters {
    values: BTreeMap<String, BindingValue>,
}

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flatten a TOML table into a parameter lookup.
    pub fn from_table(table: &toml::Table) -> Result<Self> {
        let mut values = BTreeMap::new();
        for (key, value) in table.iter() {
            flatten_into(&mut values, &[key.as_str()], value)?;
        }
        Ok(Self { values })
    }

    pub fn get(&self, name: &str) -> Option<&BindingValue> {
        self.values.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<BindingValue>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BindingValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

fn flatten_into(
    out: &mut BTreeMap<String, BindingValue>,
    path: &[&str],
    value: &toml::Value,
) -> Result<()> {
    match value {
        toml::Value::Table(table) => {
            for (key, inner) in table.iter() {
                let mut nested = path.to_vec();
                nested.push(key.as_str());
                flatten_into(out, &nested, inner)?;
            }
        }
        toml::Value::Array(items) => {
            let mut words = Vec::with_capacity(items.len());
            for item in items {
                words.push(scalar_to_string(path, item)?);
            }
            insert_names(out, path, BindingValue::List(words));
        }
        scalar => {
            let s = scalar_to_string(path, scalar)?;
            insert_names(out, path, BindingValue::Single(s));
        }
    }
    Ok(())
}

fn insert_names(out: &mut BTreeMap<String, BindingValue>, path: &[&str], value: BindingValue) {
    if path.len() > 1 {
        out.insert(path.join("."), value.clone());
    }
    out.insert(path.join("_"), value);
}

fn scalar_to_string(path: &[&str], value: &toml::Value) -> Result<String> {
    match value {
        toml::Value::String(s) => Ok(s.clone()),
        toml::Value::Integer(i) => Ok(i.to_string()),
        toml::Value::Float(f) => Ok(f.to_string()),
        toml::Value::Boolean(b) => Ok(b.to_string()),
        toml::Value::Datetime(d) => Ok(d.to_string()),
        toml::Value::Array(_) | toml::Value::Table(_) => Err(PipedagError::ConfigError(format!(
            "parameter '{}' must be a scalar or a list of scalars",
            path.join(".")
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(src: &str) -> toml::Table {
        toml::from_str(src).unwrap()
    }

    #[test]
    fn sections_flatten_to_underscore_and_dotted_names() {
        let params = Parameters::from_table(&table(
            r#"
threads = 8
[general]
adapter = "AGATCGGAAGAGC"
[cutadapt]
minphred = 20
strict = true
"#,
        ))
        .unwrap();

        assert_eq!(params.get("threads"), Some(&BindingValue::from("8")));
        assert_eq!(
            params.get("general_adapter"),
            Some(&BindingValue::from("AGATCGGAAGAGC"))
        );
        assert_eq!(params.get("cutadapt.minphred"), Some(&BindingValue::from("20")));
        assert_eq!(params.get("cutadapt_strict"), Some(&BindingValue::from("true")));
        assert!(params.get("cutadapt").is_none());
    }

    #[test]
    fn arrays_become_lists() {
        let params = Parameters::from_table(&table(r#"star = { extra = ["--a", "--b"] }"#)).unwrap();
        assert_eq!(
            params.get("star_extra"),
            Some(&BindingValue::List(vec!["--a".into(), "--b".into()]))
        );
    }

    #[test]
    fn nested_arrays_are_rejected() {
        let err = Parameters::from_table(&table(r#"bad = [[1, 2]]"#)).unwrap_err();
        assert!(matches!(err, PipedagError::ConfigError(msg) if msg.contains("bad")));
    }
}
