use std::collections::BTreeMap;

use jsonschema::Validator;
use serde_json::value::RawValue;
use serde_json::Value;
use tracing::debug;

use crate::error::{Result, SchemaError};
use crate::validator::validate_args;

struct Entry {
    schema: Value,
    validator: Validator,
}

/// Method-keyed registry of compiled argument schemas.
pub struct SchemaRegistry {
    entries: BTreeMap<String, Entry>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Register a schema for `method` from a JSON string.
    pub fn register(&mut self, method: &str, schema_json: &str) -> Result<()> {
        let schema: Value = serde_json::from_str(schema_json)?;
        self.register_value(method, schema)
    }

    /// Register a schema for `method`, replacing any earlier one.
    pub fn register_value(&mut self, method: &str, schema: Value) -> Result<()> {
        check_method_name(method)?;
        let validator = jsonschema::validator_for(&schema)
            .map_err(|err| SchemaError::CompileFailed(format!("{method}: {err}")))?;

        if self
            .entries
            .insert(method.to_string(), Entry { schema, validator })
            .is_some()
        {
            debug!(method, "replaced argument schema");
        }
        Ok(())
    }

    /// Drop the schema for `method`. Returns whether one was registered.
    pub fn remove(&mut self, method: &str) -> bool {
        self.entries.remove(method).is_some()
    }

    /// Validate request arguments for `method`.
    ///
    /// Methods without a schema accept anything. Absent arguments are
    /// validated as an empty object.
    pub fn validate(&self, method: &str, args: Option<&RawValue>) -> Result<()> {
        let Some(entry) = self.entries.get(method) else {
            return Ok(());
        };
        let value = match args {
            Some(raw) => serde_json::from_str(raw.get())?,
            None => Value::Object(serde_json::Map::new()),
        };
        validate_args(method, &value, &entry.validator)
    }

    /// The source schema registered for `method`.
    pub fn schema(&self, method: &str) -> Option<&Value> {
        self.entries.get(method).map(|entry| &entry.schema)
    }

    pub fn has_schema(&self, method: &str) -> bool {
        self.entries.contains_key(method)
    }

    /// Methods with a registered schema, sorted.
    pub fn methods(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaRegistry")
            .field("methods", &self.methods())
            .finish()
    }
}

fn check_method_name(method: &str) -> Result<()> {
    let valid = !method.is_empty()
        && method
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'));
    if valid {
        Ok(())
    } else {
        Err(SchemaError::InvalidMethodName(method.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ECHO_SCHEMA: &str = r#"{
        "type": "object",
        "properties": {
            "text": { "type": "string" },
            "repeat": { "type": "integer", "minimum": 1 }
        },
        "required": ["text"]
    }"#;

    fn raw(json: &str) -> Box<RawValue> {
        RawValue::from_string(json.to_string()).unwrap()
    }

    #[test]
    fn register_and_validate() {
        let mut registry = SchemaRegistry::new();
        registry.register("Test.Echo", ECHO_SCHEMA).unwrap();

        let good = raw(r#"{"text":"hi","repeat":2}"#);
        assert!(registry.validate("Test.Echo", Some(&good)).is_ok());

        let bad = raw(r#"{"text":5}"#);
        let err = registry.validate("Test.Echo", Some(&bad)).unwrap_err();
        match err {
            SchemaError::ValidationFailed { method, .. } => assert_eq!(method, "Test.Echo"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn absent_args_validate_as_empty_object() {
        let mut registry = SchemaRegistry::new();
        registry.register("Test.Echo", ECHO_SCHEMA).unwrap();
        registry
            .register("Sys.Reboot", r#"{"type":"object"}"#)
            .unwrap();

        assert!(matches!(
            registry.validate("Test.Echo", None),
            Err(SchemaError::ValidationFailed { .. })
        ));
        assert!(registry.validate("Sys.Reboot", None).is_ok());
    }

    #[test]
    fn unknown_method_passes() {
        let registry = SchemaRegistry::new();
        let args = raw("[1,2,3]");
        assert!(registry.validate("Anything", Some(&args)).is_ok());
    }

    #[test]
    fn invalid_schema_fails_compile() {
        let mut registry = SchemaRegistry::new();
        assert!(matches!(
            registry.register("M", r#"{"type":"definitely-not-a-type"}"#),
            Err(SchemaError::CompileFailed(_))
        ));
        assert!(matches!(
            registry.register("M", "{not json"),
            Err(SchemaError::InvalidJson(_))
        ));
    }

    #[test]
    fn method_names_are_checked() {
        let mut registry = SchemaRegistry::new();
        for bad in ["", "has space", "slash/name"] {
            assert!(
                matches!(
                    registry.register(bad, "{}"),
                    Err(SchemaError::InvalidMethodName(_))
                ),
                "{bad:?} should be rejected"
            );
        }
        registry.register("Shelly.Get-Status_2", "{}").unwrap();
    }

    #[test]
    fn later_registration_replaces_and_remove_drops() {
        let mut registry = SchemaRegistry::new();
        registry.register("M", r#"{"type":"array"}"#).unwrap();
        registry.register("M", r#"{"type":"object"}"#).unwrap();

        assert_eq!(registry.schema("M").unwrap()["type"], "object");
        assert!(registry.remove("M"));
        assert!(!registry.remove("M"));
        assert!(!registry.has_schema("M"));
    }

    #[test]
    fn methods_are_listed_sorted() {
        let mut registry = SchemaRegistry::new();
        registry.register("Zeta.Set", ECHO_SCHEMA).unwrap();
        registry.register("Alpha.Get", "{}").unwrap();
        assert_eq!(registry.methods(), vec!["Alpha.Get", "Zeta.Set"]);
        assert!(format!("{registry:?}").contains("Alpha.Get"));
    }
}
