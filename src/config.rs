//! Typed configuration parameters for module instances.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A single configuration value, as written in a parameter document.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// Integer scalar.
    Int(i64),
    /// Floating point scalar.
    Double(f64),
    /// Boolean scalar.
    Bool(bool),
    /// String scalar.
    String(String),
    /// Homogeneous array of scalars.
    Array(Vec<ParamValue>),
}

impl ParamValue {
    fn type_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::Double(_) => "double",
            Self::Bool(_) => "bool",
            Self::String(_) => "string",
            Self::Array(_) => "array",
        }
    }

    /// Coerces to `f64`, accepting both `Int` and `Double`.
    fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Double(v) => Some(*v),
            _ => None,
        }
    }

    fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    fn as_array(&self) -> Option<&[ParamValue]> {
        match self {
            Self::Array(v) => Some(v),
            _ => None,
        }
    }
}

/// The parameter document for a single module instance: a flat map from parameter name to value,
/// plus the module's own name (used to attribute configuration errors).
///
/// There is no silent default-injection for a parameter a module declares required: an absent
/// required key is a [`Error::Configuration`] at `init`, not a fallback. Modules are free to
/// treat a parameter as genuinely optional by calling one of the `_or` accessors with an explicit
/// default instead.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ModuleConfig {
    /// The instance name this configuration belongs to, used in error messages.
    pub name: String,
    /// Raw parameter map.
    pub params: HashMap<String, ParamValue>,
}

impl ModuleConfig {
    /// Creates an empty configuration for an instance named `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: HashMap::new(),
        }
    }

    /// Sets `key` to `value`, builder-style.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: ParamValue) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    fn missing(&self, key: &str) -> Error {
        Error::Configuration {
            module: self.name.clone(),
            message: format!("required parameter `{key}` is missing"),
        }
    }

    fn wrong_type(&self, key: &str, expected: &str, found: &ParamValue) -> Error {
        Error::Configuration {
            module: self.name.clone(),
            message: format!(
                "parameter `{key}` must be a {expected}, found {}",
                found.type_name()
            ),
        }
    }

    /// Reads a required `f64` parameter (accepting an integer literal too).
    pub fn required_f64(&self, key: &str) -> Result<f64> {
        let value = self.params.get(key).ok_or_else(|| self.missing(key))?;
        value.as_f64().ok_or_else(|| self.wrong_type(key, "number", value))
    }

    /// Reads a required `i64` parameter.
    pub fn required_i64(&self, key: &str) -> Result<i64> {
        let value = self.params.get(key).ok_or_else(|| self.missing(key))?;
        value.as_i64().ok_or_else(|| self.wrong_type(key, "int", value))
    }

    /// Reads a required string parameter.
    pub fn required_str(&self, key: &str) -> Result<&str> {
        let value = self.params.get(key).ok_or_else(|| self.missing(key))?;
        value.as_str().ok_or_else(|| self.wrong_type(key, "string", value))
    }

    /// Reads a required array-of-strings parameter (used for input/output collection name
    /// lists).
    pub fn required_str_array(&self, key: &str) -> Result<Vec<String>> {
        let value = self.params.get(key).ok_or_else(|| self.missing(key))?;
        let array = value.as_array().ok_or_else(|| self.wrong_type(key, "array", value))?;
        array
            .iter()
            .map(|entry| {
                entry
                    .as_str()
                    .map(str::to_string)
                    .ok_or_else(|| self.wrong_type(key, "string", entry))
            })
            .collect()
    }

    /// Reads an optional `f64` parameter, falling back to `default` when absent.
    #[must_use]
    pub fn f64_or(&self, key: &str, default: f64) -> f64 {
        self.params.get(key).and_then(ParamValue::as_f64).unwrap_or(default)
    }

    /// Reads an optional `i64` parameter, falling back to `default` when absent.
    #[must_use]
    pub fn i64_or(&self, key: &str, default: i64) -> i64 {
        self.params.get(key).and_then(ParamValue::as_i64).unwrap_or(default)
    }

    /// Reads an optional `bool` parameter, falling back to `default` when absent.
    #[must_use]
    pub fn bool_or(&self, key: &str, default: bool) -> bool {
        self.params.get(key).and_then(ParamValue::as_bool).unwrap_or(default)
    }

    /// Reads an optional string parameter, falling back to `default` when absent.
    #[must_use]
    pub fn str_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.params.get(key).and_then(ParamValue::as_str).unwrap_or(default)
    }

    /// Reads a `{pdg_id: value}` fraction/mass map, where `0` is the default fall-through entry.
    /// Keys are parsed as the string form of the PDG id (matching the on-disk representation of a
    /// parameter block keyed by particle species).
    pub fn f64_map(&self, key: &str) -> Result<HashMap<i32, f64>> {
        let value = match self.params.get(key) {
            Some(v) => v,
            None => return Ok(HashMap::new()),
        };
        let array = value.as_array().ok_or_else(|| self.wrong_type(key, "array", value))?;
        let mut map = HashMap::new();
        for entry in array {
            let pair = entry.as_array().ok_or_else(|| self.wrong_type(key, "array", entry))?;
            let (pid_value, val_value) = match pair {
                [a, b] => (a, b),
                _ => {
                    return Err(Error::Configuration {
                        module: self.name.clone(),
                        message: format!("entries of `{key}` must be `[pdg_id, value]` pairs"),
                    })
                }
            };
            let pid = pid_value
                .as_i64()
                .ok_or_else(|| self.wrong_type(key, "int", pid_value))? as i32;
            let val = val_value
                .as_f64()
                .ok_or_else(|| self.wrong_type(key, "number", val_value))?;
            map.insert(pid, val);
        }
        Ok(map)
    }
}
