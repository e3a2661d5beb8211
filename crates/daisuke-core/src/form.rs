//! Schema-driven forms exchanged with runners.
//!
//! Runners describe preference menus, setup menus and tracker entry forms as
//! a [`Form`]. The host keeps the user's edits in a [`FormValues`] mapping and
//! hands it back to the runner on submission.

use crate::{CoreError, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Mapping from component key to the current value.
pub type FormValues = BTreeMap<String, FormValue>;

const DEFAULT_LOWER_BOUND: f64 = 0.0;
const DEFAULT_UPPER_BOUND: f64 = 9999.0;
const DEFAULT_STEP: f64 = 1.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Form {
    pub sections: Vec<FormSection>,
}

impl Form {
    /// All components of the form, in declaration order.
    pub fn components(&self) -> impl Iterator<Item = &FormComponent> {
        self.sections.iter().flat_map(|s| s.children.iter())
    }

    pub fn component(&self, key: &str) -> Option<&FormComponent> {
        self.components().find(|c| c.key == key)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormSection {
    #[serde(default)]
    pub header: Option<String>,
    #[serde(default)]
    pub footer: Option<String>,
    pub children: Vec<FormComponent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentType {
    Button,
    Datepicker,
    Multipicker,
    Picker,
    Stepper,
    Textfield,
    Toggle,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FormOption {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormComponent {
    pub key: String,
    pub label: String,
    #[serde(rename = "type")]
    pub component_type: ComponentType,
    #[serde(default)]
    pub value: Option<FormValue>,
    #[serde(default)]
    pub is_optional: bool,
    #[serde(default)]
    pub lower_bound: Option<f64>,
    #[serde(default)]
    pub upper_bound: Option<f64>,
    #[serde(default)]
    pub step: Option<f64>,
    #[serde(default)]
    pub allows_decimal: bool,
    #[serde(default)]
    pub options: Option<Vec<FormOption>>,
    #[serde(default)]
    pub multiline: Option<bool>,
    #[serde(default)]
    pub system_image: Option<String>,
}

impl FormComponent {
    pub fn lower_bound(&self) -> f64 {
        self.lower_bound.unwrap_or(DEFAULT_LOWER_BOUND)
    }

    pub fn upper_bound(&self) -> f64 {
        self.upper_bound.unwrap_or(DEFAULT_UPPER_BOUND)
    }

    pub fn step(&self) -> f64 {
        self.step.unwrap_or(DEFAULT_STEP)
    }

    /// Clamp a stepper value into the component's bounds.
    pub fn clamp(&self, value: f64) -> f64 {
        let value = if self.allows_decimal { value } else { value.trunc() };
        value.max(self.lower_bound()).min(self.upper_bound())
    }

    /// Keep only the selections that name one of this component's options.
    pub fn known_selections(&self, selected: &BTreeSet<String>) -> BTreeSet<String> {
        let options = self.options.as_deref().unwrap_or_default();
        selected
            .iter()
            .filter(|id| options.iter().any(|o| &o.id == *id))
            .cloned()
            .collect()
    }
}

/// A dynamically typed form value.
///
/// The JSON encoding is untagged: strings, numbers, booleans and arrays of
/// strings map to themselves; dates are written as RFC 3339 strings, so a
/// date read back from JSON arrives as a `String` and is recovered with
/// [`FormValue::as_date`].
#[derive(Debug, Clone, PartialEq)]
pub enum FormValue {
    String(String),
    Number(f64),
    Bool(bool),
    Date(DateTime<Utc>),
    StringSet(BTreeSet<String>),
}

impl FormValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Date(d) => Some(*d),
            Self::String(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|d| d.with_timezone(&Utc)),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&BTreeSet<String>> {
        match self {
            Self::StringSet(set) => Some(set),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Date(d) => {
                serde_json::Value::String(d.to_rfc3339_opts(SecondsFormat::Secs, true))
            }
            Self::StringSet(set) => serde_json::Value::Array(
                set.iter().cloned().map(serde_json::Value::String).collect(),
            ),
        }
    }
}

impl TryFrom<serde_json::Value> for FormValue {
    type Error = CoreError;

    fn try_from(value: serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::String(s) => Ok(Self::String(s)),
            serde_json::Value::Bool(b) => Ok(Self::Bool(b)),
            serde_json::Value::Number(n) => n
                .as_f64()
                .map(Self::Number)
                .ok_or_else(|| CoreError::InvalidFormValue(format!("number out of range: {n}"))),
            serde_json::Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    serde_json::Value::String(s) => Ok(s),
                    other => Err(CoreError::InvalidFormValue(format!(
                        "expected string in selection, found {other}"
                    ))),
                })
                .collect::<Result<BTreeSet<_>>>()
                .map(Self::StringSet),
            other => Err(CoreError::InvalidFormValue(format!(
                "unsupported value: {other}"
            ))),
        }
    }
}

impl Serialize for FormValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for FormValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        FormValue::try_from(value).map_err(de::Error::custom)
    }
}

impl From<&str> for FormValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for FormValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<f64> for FormValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<bool> for FormValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<DateTime<Utc>> for FormValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Date(value)
    }
}
