//! Envelope codec
//!
//! Requests are single-line JSON objects `{"name": ..., "arguments": {...}}`.
//! Responses are single-line JSON values: a snapshot or an
//! [`ErrorResponse`](crate::runtime::error::ErrorResponse).

use serde::Serialize;
use serde_json::{Map, Value};

use crate::runtime::error::{ApiError, ErrorCode};
use crate::runtime::journal::FunctionCall;
use crate::sim::Phase;

/// Decoded request.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandEnvelope {
    /// Command name.
    pub name: String,
    /// Arguments object.
    pub arguments: Map<String, Value>,
}

impl CommandEnvelope {
    /// Envelope for `name` with `arguments`.
    pub fn new(name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }

    /// The call as recorded in the run log.
    pub fn to_call(&self) -> FunctionCall {
        FunctionCall {
            name: self.name.clone(),
            arguments: self.arguments.clone(),
        }
    }

    /// Encode as a request line.
    pub fn encode(&self) -> String {
        let mut object = Map::new();
        object.insert("name".into(), Value::String(self.name.clone()));
        object.insert("arguments".into(), Value::Object(self.arguments.clone()));
        encode(&Value::Object(object))
    }
}

impl From<FunctionCall> for CommandEnvelope {
    fn from(call: FunctionCall) -> Self {
        Self::new(call.name, call.arguments)
    }
}

/// Parse one frame.
pub fn decode(frame: &str) -> Result<CommandEnvelope, ApiError> {
    let value: Value = serde_json::from_str(frame).map_err(|err| {
        ApiError::new(ErrorCode::InvalidEnvelope, format!("Invalid JSON: {err}"))
    })?;
    let Value::Object(mut object) = value else {
        return Err(ApiError::new(
            ErrorCode::InvalidEnvelope,
            "Invalid JSON: message must be an object",
        ));
    };

    let name = match object.remove("name") {
        Some(Value::String(name)) if !name.is_empty() => name,
        _ => {
            return Err(ApiError::new(
                ErrorCode::MissingName,
                "Message must contain a name",
            ));
        }
    };

    let arguments = match object.remove("arguments") {
        Some(Value::Object(arguments)) => arguments,
        Some(other) => {
            return Err(ApiError::new(
                ErrorCode::InvalidArguments,
                "Arguments must be an object",
            )
            .with("received", json_type(&other)));
        }
        None => {
            return Err(ApiError::new(
                ErrorCode::MissingArguments,
                "Message must contain arguments",
            ));
        }
    };

    Ok(CommandEnvelope { name, arguments })
}

/// Serialize a response as one line. JSON escapes newlines inside strings,
/// so the result never contains a raw line break.
pub fn encode<T: Serialize + ?Sized>(response: &T) -> String {
    serde_json::to_string(response).unwrap_or_else(|err| {
        tracing::error!(error = %err, "response serialization failed");
        r#"{"error":"Response serialization failed","error_code":"E001"}"#.to_string()
    })
}

/// Serialize an error stamped with `phase`.
pub fn encode_error(error: ApiError, phase: Phase) -> String {
    encode(&error.into_response(phase))
}

/// JSON type name, for error context.
pub fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
