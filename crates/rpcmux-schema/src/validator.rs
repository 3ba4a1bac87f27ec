use jsonschema::Validator;
use serde_json::Value;

use crate::error::{Result, SchemaError};

// Reports the first error plus up to three more.
pub(crate) fn validate_args(method: &str, args: &Value, validator: &Validator) -> Result<()> {
    let mut errors = validator.iter_errors(args);
    if let Some(first) = errors.next() {
        let mut message = first.to_string();
        for err in errors.take(3) {
            message.push_str("; ");
            message.push_str(&err.to_string());
        }
        return Err(SchemaError::ValidationFailed {
            method: method.to_string(),
            message,
        });
    }
    Ok(())
}
