//! Label selectors for restore filtering
//!
//! A small interpreted expression over object labels: `matchLabels` equality
//! plus `matchExpressions` requirements. Mirrors Kubernetes
//! `metav1.LabelSelector` semantics, so a selector that serializes here can be
//! copied verbatim from a Velero Restore or a Deployment spec.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Operator for label selector requirements
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum LabelSelectorOperator {
    /// Label value must be in the specified set
    In,
    /// Label value must not be in the specified set (absent labels match)
    NotIn,
    /// Label must exist (value ignored)
    Exists,
    /// Label must not exist (value ignored)
    DoesNotExist,
}

impl LabelSelectorOperator {
    /// Check if a label value matches this operator
    ///
    /// - `label_value`: The actual label value (None if label doesn't exist)
    /// - `values`: The values specified in the requirement
    pub fn matches(&self, label_value: Option<&str>, values: &[String]) -> bool {
        match self {
            Self::In => label_value.is_some_and(|v| values.iter().any(|req| req == v)),
            Self::NotIn => label_value.is_none_or(|v| !values.iter().any(|req| req == v)),
            Self::Exists => label_value.is_some(),
            Self::DoesNotExist => label_value.is_none(),
        }
    }

    /// Whether the operator takes a value list
    pub fn requires_values(&self) -> bool {
        matches!(self, Self::In | Self::NotIn)
    }
}

impl std::fmt::Display for LabelSelectorOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::In => write!(f, "In"),
            Self::NotIn => write!(f, "NotIn"),
            Self::Exists => write!(f, "Exists"),
            Self::DoesNotExist => write!(f, "DoesNotExist"),
        }
    }
}

/// A single label selector requirement
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelectorRequirement {
    /// The label key that the selector applies to
    pub key: String,

    /// Operator representing the relationship between label and values
    pub operator: LabelSelectorOperator,

    /// Array of string values
    ///
    /// - For `In` and `NotIn` operators: must be non-empty
    /// - For `Exists` and `DoesNotExist`: must be empty
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

impl LabelSelectorRequirement {
    /// Create a requirement
    pub fn new(key: impl Into<String>, operator: LabelSelectorOperator, values: &[&str]) -> Self {
        Self {
            key: key.into(),
            operator,
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    /// Check if a label set matches this requirement
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let value = labels.get(&self.key).map(|s| s.as_str());
        self.operator.matches(value, &self.values)
    }

    /// Check the requirement is well-formed
    pub fn validate(&self) -> Result<(), String> {
        if self.key.is_empty() {
            return Err("label selector requirement key cannot be empty".to_string());
        }
        match (self.operator.requires_values(), self.values.is_empty()) {
            (true, true) => Err(format!(
                "label selector requirement for key {:?} with operator {} must have values",
                self.key, self.operator
            )),
            (false, false) => Err(format!(
                "label selector requirement for key {:?} with operator {} must not have values",
                self.key, self.operator
            )),
            _ => Ok(()),
        }
    }
}

/// Label selector over object labels
///
/// An empty selector `{}` matches every object.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    /// Map of label key-value pairs for exact matching
    ///
    /// All labels must match for the object to be selected.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,

    /// List of label selector requirements
    ///
    /// All requirements must be satisfied for the object to be selected.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_expressions: Vec<LabelSelectorRequirement>,
}

impl LabelSelector {
    /// Selector requiring the given labels to be present with equal values
    pub fn from_labels<'a>(labels: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            match_labels: labels
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            match_expressions: Vec::new(),
        }
    }

    /// Add a requirement
    pub fn with_expression(mut self, requirement: LabelSelectorRequirement) -> Self {
        self.match_expressions.push(requirement);
        self
    }

    /// Check if a label set matches this selector
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.match_labels
            .iter()
            .all(|(key, value)| labels.get(key) == Some(value))
            && self.match_expressions.iter().all(|req| req.matches(labels))
    }

    /// Check if this selector is empty (matches everything)
    pub fn is_empty(&self) -> bool {
        self.match_labels.is_empty() && self.match_expressions.is_empty()
    }

    /// Collect every problem with this selector
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.match_labels.keys().any(|k| k.is_empty()) {
            errors.push("label selector matchLabels key cannot be empty".to_string());
        }
        errors.extend(
            self.match_expressions
                .iter()
                .filter_map(|req| req.validate().err()),
        );
        errors
    }
}
