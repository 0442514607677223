//! Runtime-typed component configuration schemas.
//!
//! Component config is plain data: every component exposes a
//! `{field → FieldSchema}` map through `meta()`, and clients edit the
//! `value` of each field. Field value types are not expressed in the
//! static type system; [`FieldValue`] is a tagged sum with coercion
//! helpers that fail loudly on mismatch.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VerbaError};

/// Widget type of a config field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Number,
    Text,
    Password,
    Textarea,
    Bool,
    Dropdown,
    Multi,
}

/// A runtime-typed field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Number(i64),
    Text(String),
    Multi(Vec<String>),
}

impl FieldValue {
    pub fn as_int(&self) -> Result<i64> {
        match self {
            FieldValue::Number(n) => Ok(*n),
            other => Err(VerbaError::Config(format!(
                "expected a number, got {other:?}"
            ))),
        }
    }

    pub fn as_str(&self) -> Result<&str> {
        match self {
            FieldValue::Text(s) => Ok(s),
            other => Err(VerbaError::Config(format!("expected text, got {other:?}"))),
        }
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self {
            FieldValue::Bool(b) => Ok(*b),
            other => Err(VerbaError::Config(format!(
                "expected a boolean, got {other:?}"
            ))),
        }
    }

    pub fn as_list(&self) -> Result<&[String]> {
        match self {
            FieldValue::Multi(v) => Ok(v),
            other => Err(VerbaError::Config(format!("expected a list, got {other:?}"))),
        }
    }
}

/// Schema and current value of one config field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub value: FieldValue,
    pub description: String,
    /// Allowed choices for `dropdown` and `multi` fields; empty otherwise.
    #[serde(default)]
    pub values: Vec<String>,
}

impl FieldSchema {
    pub fn number(value: i64, description: &str) -> Self {
        Self {
            field_type: FieldType::Number,
            value: FieldValue::Number(value),
            description: description.to_string(),
            values: Vec::new(),
        }
    }

    pub fn text(value: &str, description: &str) -> Self {
        Self {
            field_type: FieldType::Text,
            value: FieldValue::Text(value.to_string()),
            description: description.to_string(),
            values: Vec::new(),
        }
    }

    pub fn password(value: &str, description: &str) -> Self {
        Self {
            field_type: FieldType::Password,
            value: FieldValue::Text(value.to_string()),
            description: description.to_string(),
            values: Vec::new(),
        }
    }

    pub fn textarea(value: &str, description: &str) -> Self {
        Self {
            field_type: FieldType::Textarea,
            value: FieldValue::Text(value.to_string()),
            description: description.to_string(),
            values: Vec::new(),
        }
    }

    pub fn boolean(value: bool, description: &str) -> Self {
        Self {
            field_type: FieldType::Bool,
            value: FieldValue::Bool(value),
            description: description.to_string(),
            values: Vec::new(),
        }
    }

    pub fn dropdown(value: &str, choices: &[&str], description: &str) -> Self {
        Self {
            field_type: FieldType::Dropdown,
            value: FieldValue::Text(value.to_string()),
            description: description.to_string(),
            values: choices.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn multi(selected: &[&str], choices: &[&str], description: &str) -> Self {
        Self {
            field_type: FieldType::Multi,
            value: FieldValue::Multi(selected.iter().map(|s| s.to_string()).collect()),
            description: description.to_string(),
            values: choices.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// One component's schema as exposed to clients: identity, runtime
/// requirements, editable config, and availability in the current
/// environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentEntry {
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub component_type: String,
    /// Environment variables the component requires to be usable.
    #[serde(default)]
    pub variables: Vec<String>,
    /// External services or libraries the component depends on.
    #[serde(default)]
    pub library: Vec<String>,
    pub config: BTreeMap<String, FieldSchema>,
    pub available: bool,
}

impl ComponentEntry {
    pub fn field(&self, name: &str) -> Result<&FieldValue> {
        self.config
            .get(name)
            .map(|f| &f.value)
            .ok_or_else(|| VerbaError::Config(format!("missing config field '{name}'")))
    }

    pub fn int_field(&self, name: &str) -> Result<i64> {
        self.field(name)?.as_int()
    }

    pub fn str_field(&self, name: &str) -> Result<&str> {
        self.field(name)?.as_str()
    }

    /// The fully-resolved config as JSON, for the document `meta` map.
    pub fn resolved_json(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name,
            "config": self.config,
        })
    }
}

/// Selection state for one component kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KindConfig {
    pub selected: String,
    pub components: BTreeMap<String, ComponentEntry>,
}

impl KindConfig {
    /// The currently selected component's entry.
    pub fn selected_entry(&self) -> Result<&ComponentEntry> {
        self.components.get(&self.selected).ok_or_else(|| {
            VerbaError::Config(format!(
                "selected component '{}' is not registered",
                self.selected
            ))
        })
    }
}

/// The full pipeline configuration: one selection per component kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagConfig {
    #[serde(rename = "Reader")]
    pub reader: KindConfig,
    #[serde(rename = "Chunker")]
    pub chunker: KindConfig,
    #[serde(rename = "Embedder")]
    pub embedder: KindConfig,
    #[serde(rename = "Retriever")]
    pub retriever: KindConfig,
    #[serde(rename = "Generator")]
    pub generator: KindConfig,
}

impl RagConfig {
    /// Kinds in their fixed pipeline order.
    pub fn kinds(&self) -> [(&'static str, &KindConfig); 5] {
        [
            ("Reader", &self.reader),
            ("Chunker", &self.chunker),
            ("Embedder", &self.embedder),
            ("Retriever", &self.retriever),
            ("Generator", &self.generator),
        ]
    }

    /// Every `selected` must name a registered, available component.
    pub fn validate_selections(&self) -> Result<()> {
        for (kind, cfg) in self.kinds() {
            let entry = cfg
                .selected_entry()
                .map_err(|_| VerbaError::Config(format!("{kind}: unknown component selected")))?;
            if !entry.available {
                return Err(VerbaError::Config(format!(
                    "{kind}: selected component '{}' is not available in this environment",
                    entry.name
                )));
            }
        }
        Ok(())
    }
}

/// Structural reconciliation of a persisted config against a freshly
/// generated one. Compares shape only: kind order, component names per
/// kind, and per-field `description` and allowed `values`. Field
/// values (the user's edits) are deliberately not compared, so
/// harmless user edits survive restarts while adding or removing a
/// component or dropdown choice invalidates the persisted blob.
pub fn verify_config(loaded: &RagConfig, fresh: &RagConfig) -> bool {
    for ((lk, l), (fk, f)) in loaded.kinds().iter().zip(fresh.kinds().iter()) {
        if lk != fk {
            return false;
        }
        if l.components.len() != f.components.len() {
            return false;
        }
        for ((ln, lc), (fn_, fc)) in l.components.iter().zip(f.components.iter()) {
            if ln != fn_ {
                return false;
            }
            if lc.config.len() != fc.config.len() {
                return false;
            }
            for ((lfname, lf), (ffname, ff)) in lc.config.iter().zip(fc.config.iter()) {
                if lfname != ffname
                    || lf.description != ff.description
                    || lf.values != ff.values
                {
                    return false;
                }
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, fields: &[(&str, FieldSchema)]) -> ComponentEntry {
        ComponentEntry {
            name: name.to_string(),
            description: format!("{name} component"),
            component_type: "Chunker".to_string(),
            variables: Vec::new(),
            library: Vec::new(),
            config: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            available: true,
        }
    }

    fn kind(selected: &str, entries: Vec<ComponentEntry>) -> KindConfig {
        KindConfig {
            selected: selected.to_string(),
            components: entries.into_iter().map(|e| (e.name.clone(), e)).collect(),
        }
    }

    fn config_with_chunker(chunker: KindConfig) -> RagConfig {
        let empty = kind("X", vec![entry("X", &[])]);
        RagConfig {
            reader: empty.clone(),
            chunker,
            embedder: empty.clone(),
            retriever: empty.clone(),
            generator: empty,
        }
    }

    #[test]
    fn coercion_fails_loudly() {
        let v = FieldValue::Text("abc".into());
        assert!(v.as_int().is_err());
        assert!(v.as_bool().is_err());
        assert!(v.as_list().is_err());
        assert_eq!(v.as_str().unwrap(), "abc");
    }

    #[test]
    fn untagged_value_roundtrip() {
        for v in [
            FieldValue::Number(42),
            FieldValue::Bool(true),
            FieldValue::Text("hi".into()),
            FieldValue::Multi(vec!["a".into(), "b".into()]),
        ] {
            let json = serde_json::to_string(&v).unwrap();
            let back: FieldValue = serde_json::from_str(&json).unwrap();
            assert_eq!(v, back);
        }
    }

    #[test]
    fn verify_ignores_user_values() {
        let fresh = config_with_chunker(kind(
            "Token",
            vec![entry("Token", &[("Tokens", FieldSchema::number(250, "tokens per chunk"))])],
        ));
        let mut loaded = fresh.clone();
        loaded
            .chunker
            .components
            .get_mut("Token")
            .unwrap()
            .config
            .get_mut("Tokens")
            .unwrap()
            .value = FieldValue::Number(100);
        loaded.chunker.selected = "Token".to_string();
        assert!(verify_config(&loaded, &fresh));
    }

    #[test]
    fn verify_rejects_changed_choices() {
        let fresh = config_with_chunker(kind(
            "Token",
            vec![entry(
                "Token",
                &[("Mode", FieldSchema::dropdown("a", &["a", "b"], "mode"))],
            )],
        ));
        let mut loaded = fresh.clone();
        loaded
            .chunker
            .components
            .get_mut("Token")
            .unwrap()
            .config
            .get_mut("Mode")
            .unwrap()
            .values = vec!["a".to_string()];
        assert!(!verify_config(&loaded, &fresh));
    }

    #[test]
    fn verify_rejects_added_component() {
        let fresh = config_with_chunker(kind(
            "Token",
            vec![entry("Token", &[]), entry("Sentence", &[])],
        ));
        let loaded = config_with_chunker(kind("Token", vec![entry("Token", &[])]));
        assert!(!verify_config(&loaded, &fresh));
    }

    #[test]
    fn verify_rejects_changed_description() {
        let fresh = config_with_chunker(kind(
            "Token",
            vec![entry("Token", &[("Tokens", FieldSchema::number(250, "tokens per chunk"))])],
        ));
        let mut loaded = fresh.clone();
        loaded
            .chunker
            .components
            .get_mut("Token")
            .unwrap()
            .config
            .get_mut("Tokens")
            .unwrap()
            .description = "something else".to_string();
        assert!(!verify_config(&loaded, &fresh));
    }
}
