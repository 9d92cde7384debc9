//! Typed facts produced by extraction and consumed by generation

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::{Map, Number, Value};
use tracing::debug;

/// Declared kind of an extracted key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum KeyKind {
    #[serde(rename = "number")]
    Number,
    #[serde(rename = "string")]
    String,
    #[serde(rename = "array[string]")]
    StringList,
}

impl KeyKind {
    /// Name as written in task configuration
    pub fn name(&self) -> &'static str {
        match self {
            Self::Number => "number",
            Self::String => "string",
            Self::StringList => "array[string]",
        }
    }

    /// JSON-schema fragment describing this kind
    pub fn json_schema(&self) -> Value {
        match self {
            Self::Number => serde_json::json!({ "type": "number" }),
            Self::String => serde_json::json!({ "type": "string" }),
            Self::StringList => serde_json::json!({ "type": "array", "items": { "type": "string" } }),
        }
    }

    /// Coerce a raw response value into this kind
    ///
    /// `null` is treated the same as an absent key.
    pub fn coerce(&self, value: &Value) -> Result<FactValue, String> {
        match (self, value) {
            (_, Value::Null) => Err("value is null".to_string()),

            (Self::Number, Value::Number(n)) => Ok(FactValue::Number(n.clone())),
            (Self::Number, Value::String(s)) => parse_number(s)
                .map(FactValue::Number)
                .ok_or_else(|| format!("'{}' is not a number", s)),
            (Self::Number, other) => Err(format!("expected number, got {}", json_type(other))),

            (Self::String, Value::String(s)) => Ok(FactValue::Text(s.clone())),
            (Self::String, Value::Number(n)) => Ok(FactValue::Text(n.to_string())),
            (Self::String, Value::Bool(b)) => Ok(FactValue::Text(b.to_string())),
            (Self::String, other) => Err(format!("expected string, got {}", json_type(other))),

            (Self::StringList, Value::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(i, item)| match item {
                    Value::String(s) => Ok(s.clone()),
                    Value::Number(n) => Ok(n.to_string()),
                    Value::Bool(b) => Ok(b.to_string()),
                    other => Err(format!("element {} is {}, expected string", i, json_type(other))),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(FactValue::List),
            (Self::StringList, other) => Err(format!("expected array of strings, got {}", json_type(other))),
        }
    }
}

impl FromStr for KeyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "number" => Ok(Self::Number),
            "string" => Ok(Self::String),
            "array[string]" => Ok(Self::StringList),
            other => Err(format!(
                "unknown key kind '{}' (expected number, string or array[string])",
                other
            )),
        }
    }
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn parse_number(s: &str) -> Option<Number> {
    let s = s.trim();
    if let Ok(i) = s.parse::<i64>() {
        return Some(Number::from(i));
    }
    s.parse::<f64>().ok().and_then(Number::from_f64)
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A key that failed validation against its declared kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    pub key: String,
    pub reason: String,
}

/// Ordered key -> kind declaration for one sheet
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeySchema {
    keys: IndexMap<String, KeyKind>,
}

impl KeySchema {
    pub fn new(keys: IndexMap<String, KeyKind>) -> Self {
        Self { keys }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains_key(key)
    }

    pub fn kind(&self, key: &str) -> Option<KeyKind> {
        self.keys.get(key).copied()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, KeyKind)> {
        self.keys.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// JSON-schema object with every declared key required
    pub fn to_json_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .keys
            .iter()
            .map(|(key, kind)| (key.clone(), kind.json_schema()))
            .collect();
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": self.keys.keys().collect::<Vec<_>>(),
        })
    }

    /// Validate and coerce a response object, in declaration order
    ///
    /// Every declared key must be present and coercible; the first failure is
    /// reported. Undeclared keys are ignored.
    pub fn apply(&self, object: &Map<String, Value>) -> Result<IndexMap<String, FactValue>, SchemaViolation> {
        debug!(declared = self.keys.len(), received = object.len(), "KeySchema::apply: called");
        let mut out = IndexMap::with_capacity(self.keys.len());
        for (key, kind) in &self.keys {
            let raw = object.get(key).ok_or_else(|| SchemaViolation {
                key: key.clone(),
                reason: "key missing from response".to_string(),
            })?;
            let value = kind.coerce(raw).map_err(|reason| SchemaViolation {
                key: key.clone(),
                reason,
            })?;
            out.insert(key.clone(), value);
        }
        Ok(out)
    }
}

/// A validated fact value
#[derive(Debug, Clone, PartialEq)]
pub enum FactValue {
    Number(Number),
    Text(String),
    List(Vec<String>),
}

impl FactValue {
    pub fn kind(&self) -> KeyKind {
        match self {
            Self::Number(_) => KeyKind::Number,
            Self::Text(_) => KeyKind::String,
            Self::List(_) => KeyKind::StringList,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Number(n) => Value::Number(n.clone()),
            Self::Text(s) => Value::String(s.clone()),
            Self::List(items) => Value::Array(items.iter().cloned().map(Value::String).collect()),
        }
    }
}

impl Serialize for FactValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl fmt::Display for FactValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{}", n),
            Self::Text(s) => f.write_str(s),
            Self::List(items) => f.write_str(&items.join(", ")),
        }
    }
}

impl From<f64> for FactValue {
    fn from(n: f64) -> Self {
        Number::from_f64(n).map(Self::Number).unwrap_or_else(|| Self::Text(n.to_string()))
    }
}

impl From<i64> for FactValue {
    fn from(n: i64) -> Self {
        Self::Number(Number::from(n))
    }
}

impl From<&str> for FactValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

/// A fact together with the sheet that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct Fact {
    pub value: FactValue,
    pub sheet: String,
}

/// Global key -> fact mapping built during the extract phase
///
/// Keys are unique across sheets; on collision the later write wins. Each
/// sheet's own values stay reachable through `Sheet.Key` lookups.
#[derive(Debug, Clone, Default)]
pub struct FactMapping {
    facts: IndexMap<String, Fact>,
    by_sheet: IndexMap<String, IndexMap<String, FactValue>>,
}

impl FactMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one sheet's extracted values; returns the keys that overwrote
    /// a fact from a different sheet
    pub fn merge_sheet(&mut self, sheet: &str, values: IndexMap<String, FactValue>) -> Vec<String> {
        debug!(%sheet, count = values.len(), "FactMapping::merge_sheet: called");
        let mut collisions = Vec::new();
        for (key, value) in &values {
            let previous = self.facts.insert(
                key.clone(),
                Fact {
                    value: value.clone(),
                    sheet: sheet.to_string(),
                },
            );
            if let Some(prev) = previous
                && prev.sheet != sheet
            {
                debug!(%key, from = %prev.sheet, to = %sheet, "FactMapping::merge_sheet: key collision");
                collisions.push(key.clone());
            }
        }
        self.by_sheet.entry(sheet.to_string()).or_default().extend(values);
        collisions
    }

    /// Look up a fact by plain key, falling back to `Sheet.Key`
    pub fn lookup(&self, key: &str) -> Option<Fact> {
        if let Some(fact) = self.facts.get(key) {
            return Some(fact.clone());
        }
        let (sheet, field) = key.split_once('.')?;
        self.by_sheet.get(sheet)?.get(field).map(|value| Fact {
            value: value.clone(),
            sheet: sheet.to_string(),
        })
    }

    pub fn get(&self, key: &str) -> Option<&FactValue> {
        self.facts.get(key).map(|f| &f.value)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lookup(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.facts.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Fact)> {
        self.facts.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Sheets that contributed at least one fact, in merge order
    pub fn sheets(&self) -> impl Iterator<Item = &str> {
        self.by_sheet.keys().map(String::as_str)
    }
}

impl Serialize for FactMapping {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.facts.len()))?;
        for (key, fact) in &self.facts {
            map.serialize_entry(key, &fact.value)?;
        }
        map.end()
    }
}

/// Placeholder token -> generated paragraph text
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PlaceholderMapping {
    entries: IndexMap<String, String>,
}

impl PlaceholderMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, placeholder: impl Into<String>, text: impl Into<String>) {
        self.entries.insert(placeholder.into(), text.into());
    }

    pub fn get(&self, placeholder: &str) -> Option<&str> {
        self.entries.get(placeholder).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn schema(pairs: &[(&str, KeyKind)]) -> KeySchema {
        KeySchema::new(pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect())
    }

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_key_kind_from_str() {
        assert_eq!("number".parse::<KeyKind>(), Ok(KeyKind::Number));
        assert_eq!(" string ".parse::<KeyKind>(), Ok(KeyKind::String));
        assert_eq!("array[string]".parse::<KeyKind>(), Ok(KeyKind::StringList));
        assert!("float".parse::<KeyKind>().is_err());
    }

    #[test]
    fn test_number_coercion() {
        let kind = KeyKind::Number;
        assert_eq!(kind.coerce(&serde_json::json!(12.3)).unwrap().as_f64(), Some(12.3));
        assert_eq!(kind.coerce(&serde_json::json!(" 2.0 ")).unwrap().as_f64(), Some(2.0));
        assert_eq!(kind.coerce(&serde_json::json!("100")).unwrap(), FactValue::from(100i64));
        assert!(kind.coerce(&serde_json::json!("12 ng/mL")).is_err());
        assert!(kind.coerce(&serde_json::json!(true)).is_err());
        assert!(kind.coerce(&Value::Null).is_err());
    }

    #[test]
    fn test_string_coercion_passes_through() {
        let kind = KeyKind::String;
        assert_eq!(kind.coerce(&serde_json::json!("oral")).unwrap(), FactValue::from("oral"));
        assert_eq!(kind.coerce(&serde_json::json!(5)).unwrap(), FactValue::from("5"));
        assert!(kind.coerce(&serde_json::json!({"a": 1})).is_err());
    }

    #[test]
    fn test_string_list_coercion() {
        let kind = KeyKind::StringList;
        let value = kind.coerce(&serde_json::json!(["a", 2])).unwrap();
        assert_eq!(value, FactValue::List(vec!["a".to_string(), "2".to_string()]));
        assert!(kind.coerce(&serde_json::json!("a")).is_err());
        assert!(kind.coerce(&serde_json::json!([["nested"]])).is_err());
    }

    #[test]
    fn test_schema_apply_ignores_extra_keys() {
        let s = schema(&[("Cmax", KeyKind::Number), ("Tmax", KeyKind::Number)]);
        let out = s
            .apply(&object(serde_json::json!({"Cmax": 12.3, "Tmax": "2.0", "Note": "extra"})))
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out["Cmax"].as_f64(), Some(12.3));
        assert_eq!(out["Tmax"].as_f64(), Some(2.0));
        assert!(!out.contains_key("Note"));
    }

    #[test]
    fn test_schema_apply_names_missing_key() {
        let s = schema(&[("Cmax", KeyKind::Number), ("Tmax", KeyKind::Number)]);
        let err = s.apply(&object(serde_json::json!({"Cmax": 1}))).unwrap_err();
        assert_eq!(err.key, "Tmax");
        assert!(err.reason.contains("missing"));
    }

    #[test]
    fn test_schema_apply_names_uncoercible_key() {
        let s = schema(&[("Dose", KeyKind::Number)]);
        let err = s.apply(&object(serde_json::json!({"Dose": "high"}))).unwrap_err();
        assert_eq!(err.key, "Dose");
    }

    #[test]
    fn test_json_schema_requires_all_keys() {
        let s = schema(&[("Cmax", KeyKind::Number), ("Notes", KeyKind::StringList)]);
        let js = s.to_json_schema();
        assert_eq!(js["properties"]["Cmax"]["type"], "number");
        assert_eq!(js["properties"]["Notes"]["items"]["type"], "string");
        assert_eq!(js["required"], serde_json::json!(["Cmax", "Notes"]));
    }

    #[test]
    fn test_fact_mapping_last_write_wins() {
        let mut facts = FactMapping::new();
        let first: IndexMap<_, _> = [("Dose".to_string(), FactValue::from(50i64))].into_iter().collect();
        let second: IndexMap<_, _> = [("Dose".to_string(), FactValue::from(100i64))].into_iter().collect();

        assert!(facts.merge_sheet("A", first).is_empty());
        assert_eq!(facts.merge_sheet("B", second), vec!["Dose".to_string()]);

        assert_eq!(facts.get("Dose"), Some(&FactValue::from(100i64)));
        assert_eq!(facts.lookup("Dose").unwrap().sheet, "B");
        // The overwritten value is still reachable sheet-qualified
        assert_eq!(facts.lookup("A.Dose").unwrap().value, FactValue::from(50i64));
        assert!(facts.lookup("C.Dose").is_none());
    }

    #[test]
    fn test_fact_mapping_serializes_flat() {
        let mut facts = FactMapping::new();
        facts.merge_sheet(
            "A",
            [
                ("Cmax".to_string(), FactValue::from(12.3f64)),
                ("Route".to_string(), FactValue::from("oral")),
            ]
            .into_iter()
            .collect(),
        );
        let json = serde_json::to_value(&facts).unwrap();
        assert_eq!(json, serde_json::json!({"Cmax": 12.3, "Route": "oral"}));
    }

    #[test]
    fn test_fact_value_display() {
        assert_eq!(FactValue::from(100i64).to_string(), "100");
        assert_eq!(FactValue::from(2.5f64).to_string(), "2.5");
        assert_eq!(FactValue::List(vec!["a".into(), "b".into()]).to_string(), "a, b");
    }

    proptest! {
        #[test]
        fn prop_successful_apply_yields_exactly_declared_keys(
            keys in proptest::collection::btree_set("[A-Za-z][A-Za-z0-9_]{0,8}", 1..8),
            value in -1.0e6f64..1.0e6f64,
        ) {
            let declared: IndexMap<String, KeyKind> = keys.iter().map(|k| (k.clone(), KeyKind::Number)).collect();
            let s = KeySchema::new(declared);
            let mut response: Map<String, Value> = keys
                .iter()
                .map(|k| (k.clone(), serde_json::json!(value)))
                .collect();
            response.insert("__extra".to_string(), serde_json::json!("ignored"));

            let out = s.apply(&response).unwrap();
            prop_assert_eq!(out.len(), keys.len());
            for key in &keys {
                prop_assert_eq!(out[key.as_str()].kind(), KeyKind::Number);
            }
        }
    }
}
