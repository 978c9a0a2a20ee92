// Task Argument Payload
//
// Arguments are tagged values rather than open-ended JSON so that the codec can
// reject payloads with the wrong shape at decode time.

use super::error::{DomainError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Maximum nesting depth accepted for an argument value
pub const MAX_VALUE_DEPTH: usize = 32;

/// A single structured argument value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ArgValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<ArgValue>),
    Map(BTreeMap<String, ArgValue>),
}

impl ArgValue {
    /// Nesting depth (scalars are depth 1)
    pub fn depth(&self) -> usize {
        match self {
            ArgValue::List(items) => 1 + items.iter().map(ArgValue::depth).max().unwrap_or(0),
            ArgValue::Map(entries) => 1 + entries.values().map(ArgValue::depth).max().unwrap_or(0),
            _ => 1,
        }
    }

    /// False if any float inside is NaN or infinite (those do not survive the wire)
    pub fn is_finite(&self) -> bool {
        match self {
            ArgValue::Float(f) => f.is_finite(),
            ArgValue::List(items) => items.iter().all(ArgValue::is_finite),
            ArgValue::Map(entries) => entries.values().all(ArgValue::is_finite),
            _ => true,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ArgValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ArgValue::Float(f) => Some(*f),
            ArgValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ArgValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ArgValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ArgValue::Null)
    }

    fn check(&self, path: &str) -> Result<()> {
        if self.depth() > MAX_VALUE_DEPTH {
            return Err(DomainError::ValidationError(format!(
                "argument {} is too deeply nested (max depth {})",
                path, MAX_VALUE_DEPTH
            )));
        }
        if !self.is_finite() {
            return Err(DomainError::ValidationError(format!(
                "argument {} contains a non-finite float",
                path
            )));
        }
        Ok(())
    }
}

impl From<bool> for ArgValue {
    fn from(v: bool) -> Self {
        ArgValue::Bool(v)
    }
}

impl From<i64> for ArgValue {
    fn from(v: i64) -> Self {
        ArgValue::Int(v)
    }
}

impl From<i32> for ArgValue {
    fn from(v: i32) -> Self {
        ArgValue::Int(v as i64)
    }
}

impl From<f64> for ArgValue {
    fn from(v: f64) -> Self {
        ArgValue::Float(v)
    }
}

impl From<&str> for ArgValue {
    fn from(v: &str) -> Self {
        ArgValue::Str(v.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(v: String) -> Self {
        ArgValue::Str(v)
    }
}

impl From<Vec<ArgValue>> for ArgValue {
    fn from(v: Vec<ArgValue>) -> Self {
        ArgValue::List(v)
    }
}

impl<T: Into<ArgValue>> From<Option<T>> for ArgValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(ArgValue::Null)
    }
}

/// Positional and keyword arguments of a task invocation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskArgs {
    #[serde(default)]
    pub args: Vec<ArgValue>,
    #[serde(default)]
    pub kwargs: BTreeMap<String, ArgValue>,
}

impl TaskArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from positional arguments only
    pub fn positional<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<ArgValue>,
    {
        Self {
            args: values.into_iter().map(Into::into).collect(),
            kwargs: BTreeMap::new(),
        }
    }

    pub fn with_arg(mut self, value: impl Into<ArgValue>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn with_kwarg(mut self, key: impl Into<String>, value: impl Into<ArgValue>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    pub fn arg(&self, index: usize) -> Option<&ArgValue> {
        self.args.get(index)
    }

    pub fn kwarg(&self, key: &str) -> Option<&ArgValue> {
        self.kwargs.get(key)
    }

    /// Check depth and float finiteness of every argument
    pub fn validate(&self) -> Result<()> {
        for (i, value) in self.args.iter().enumerate() {
            value.check(&format!("#{}", i))?;
        }
        for (key, value) in &self.kwargs {
            value.check(key)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_wire_shape() {
        let json = serde_json::to_value(ArgValue::Int(3)).unwrap();
        assert_eq!(json, serde_json::json!({"type": "int", "value": 3}));

        let null = serde_json::to_value(ArgValue::Null).unwrap();
        assert_eq!(null, serde_json::json!({"type": "null"}));
    }

    #[test]
    fn test_untagged_value_rejected() {
        let result: std::result::Result<ArgValue, _> = serde_json::from_str("42");
        assert!(result.is_err());

        let mistagged: std::result::Result<ArgValue, _> =
            serde_json::from_str(r#"{"type": "int", "value": "nope"}"#);
        assert!(mistagged.is_err());
    }

    #[test]
    fn test_depth_limit() {
        let mut deep = ArgValue::Int(0);
        for _ in 0..MAX_VALUE_DEPTH {
            deep = ArgValue::List(vec![deep]);
        }
        let args = TaskArgs::new().with_arg(deep);
        let err = args.validate().unwrap_err();
        assert!(err.to_string().contains("deeply nested"));
    }

    #[test]
    fn test_non_finite_float_rejected() {
        let args = TaskArgs::new().with_kwarg("ratio", f64::NAN);
        assert!(args.validate().is_err());

        let ok = TaskArgs::positional([1.5, 2.0]);
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_accessors() {
        let args = TaskArgs::positional([1, 2]).with_kwarg("name", "x");
        assert_eq!(args.arg(1).and_then(ArgValue::as_i64), Some(2));
        assert_eq!(args.kwarg("name").and_then(ArgValue::as_str), Some("x"));
        assert!(args.kwarg("missing").is_none());
    }
}
