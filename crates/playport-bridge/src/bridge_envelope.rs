//! Inbound envelope validation for messages arriving from the embedded frame.
//!
//! The transport is shared with unrelated senders, so a message is only
//! trusted when its transport-level type carries [`FRAME_ORIGIN_PREFIX`] and
//! its body parses into a `{type, data}` object. Rejections carry a reason
//! code for diagnostics but are never reported back across the boundary.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bridge_command::BridgeMethod;

/// Vendor marker every trusted transport-level type starts with.
pub const FRAME_ORIGIN_PREFIX: &str = "playport:";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
/// Opaque reference to the window that sent a message.
pub struct SenderRef(pub String);

impl SenderRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Message as delivered by the transport, before any trust decision.
pub struct RawFrameMessage {
    pub transport_type: String,
    pub sender: SenderRef,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Shape-checked `{type, data}` envelope.
pub struct FrameEnvelope {
    #[serde(rename = "type")]
    pub method: String,
    pub data: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `EnvelopeRejectionCode` values.
pub enum EnvelopeRejectionCode {
    MissingOriginMarker,
    InvalidJson,
    ListEnvelope,
    NotAnObject,
    MissingType,
    InvalidType,
    MissingData,
    ListData,
}

impl EnvelopeRejectionCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingOriginMarker => "missing_origin_marker",
            Self::InvalidJson => "invalid_json",
            Self::ListEnvelope => "list_envelope",
            Self::NotAnObject => "not_an_object",
            Self::MissingType => "missing_type",
            Self::InvalidType => "invalid_type",
            Self::MissingData => "missing_data",
            Self::ListData => "list_data",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeRejection {
    pub code: EnvelopeRejectionCode,
    pub message: String,
}

impl Display for EnvelopeRejection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for EnvelopeRejection {}

pub fn validate_frame_message(raw: &RawFrameMessage) -> Result<FrameEnvelope, EnvelopeRejection> {
    if !raw.transport_type.starts_with(FRAME_ORIGIN_PREFIX) {
        return Err(rejection(
            EnvelopeRejectionCode::MissingOriginMarker,
            format!(
                "transport type '{}' does not start with '{}'",
                raw.transport_type, FRAME_ORIGIN_PREFIX
            ),
        ));
    }
    let parsed = serde_json::from_str::<Value>(&raw.body)
        .map_err(|error| rejection(EnvelopeRejectionCode::InvalidJson, error.to_string()))?;
    validate_envelope_value(parsed)
}

pub fn validate_envelope_value(value: Value) -> Result<FrameEnvelope, EnvelopeRejection> {
    let mut fields = match value {
        Value::Object(fields) => fields,
        Value::Array(_) => {
            return Err(rejection(
                EnvelopeRejectionCode::ListEnvelope,
                "envelope must be an object, found a list",
            ))
        }
        _ => {
            return Err(rejection(
                EnvelopeRejectionCode::NotAnObject,
                "envelope must be a JSON object",
            ))
        }
    };

    let method = match fields.remove("type") {
        Some(Value::String(method)) => method,
        Some(_) => {
            return Err(rejection(
                EnvelopeRejectionCode::InvalidType,
                "envelope type must be a string",
            ))
        }
        None => {
            return Err(rejection(
                EnvelopeRejectionCode::MissingType,
                "envelope type is required",
            ))
        }
    };
    let Some(data) = fields.remove("data") else {
        return Err(rejection(
            EnvelopeRejectionCode::MissingData,
            format!("envelope '{method}' is missing data"),
        ));
    };
    if data.is_array() {
        let permitted = BridgeMethod::parse(&method).is_some_and(BridgeMethod::permits_list_data);
        if !permitted {
            return Err(rejection(
                EnvelopeRejectionCode::ListData,
                format!("envelope '{method}' carries list-shaped data"),
            ));
        }
    }

    Ok(FrameEnvelope { method, data })
}

fn rejection(code: EnvelopeRejectionCode, message: impl Into<String>) -> EnvelopeRejection {
    EnvelopeRejection {
        code,
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{
        validate_frame_message, EnvelopeRejectionCode, RawFrameMessage, SenderRef,
        FRAME_ORIGIN_PREFIX,
    };

    fn raw(transport_type: &str, body: &str) -> RawFrameMessage {
        RawFrameMessage {
            transport_type: transport_type.to_string(),
            sender: SenderRef::new("frame-1"),
            body: body.to_string(),
        }
    }

    fn trusted(body: &str) -> RawFrameMessage {
        raw(&format!("{FRAME_ORIGIN_PREFIX}sdk"), body)
    }

    fn rejection_code(message: RawFrameMessage) -> EnvelopeRejectionCode {
        validate_frame_message(&message)
            .expect_err("message should be rejected")
            .code
    }

    #[test]
    fn unit_accepts_well_formed_envelope() {
        let envelope = validate_frame_message(&trusted(r#"{"type":"getUsers","data":{"ids":[1]}}"#))
            .expect("envelope should validate");
        assert_eq!(envelope.method, "getUsers");
        assert_eq!(envelope.data, json!({"ids": [1]}));
    }

    #[test]
    fn unit_rejects_each_malformed_shape_with_reason_code() {
        assert_eq!(
            rejection_code(trusted("not json")),
            EnvelopeRejectionCode::InvalidJson
        );
        assert_eq!(
            rejection_code(trusted(r#"[{"type":"logout","data":{}}]"#)),
            EnvelopeRejectionCode::ListEnvelope
        );
        assert_eq!(
            rejection_code(trusted(r#""logout""#)),
            EnvelopeRejectionCode::NotAnObject
        );
        assert_eq!(
            rejection_code(trusted(r#"{"data":{}}"#)),
            EnvelopeRejectionCode::MissingType
        );
        assert_eq!(
            rejection_code(trusted(r#"{"type":7,"data":{}}"#)),
            EnvelopeRejectionCode::InvalidType
        );
        assert_eq!(
            rejection_code(trusted(r#"{"type":"logout"}"#)),
            EnvelopeRejectionCode::MissingData
        );
        assert_eq!(
            rejection_code(trusted(r#"{"type":"getUsers","data":[1,2]}"#)),
            EnvelopeRejectionCode::ListData
        );
    }

    #[test]
    fn functional_greeting_is_the_only_list_data_exception() {
        let envelope = validate_frame_message(&trusted(r#"{"type":"sayHello","data":["hi",null]}"#))
            .expect("greeting may carry list data");
        assert!(envelope.data.is_array());
        assert_eq!(
            rejection_code(trusted(r#"{"type":"unknownThing","data":[]}"#)),
            EnvelopeRejectionCode::ListData
        );
    }

    #[test]
    fn regression_rejects_well_formed_envelope_without_origin_marker() {
        let body = r#"{"type":"logout","data":{}}"#;
        assert_eq!(
            rejection_code(raw("webpackHotUpdate", body)),
            EnvelopeRejectionCode::MissingOriginMarker
        );
        assert_eq!(
            rejection_code(raw("sdk:playport:", body)),
            EnvelopeRejectionCode::MissingOriginMarker
        );
    }

    #[test]
    fn regression_null_data_is_still_present_data() {
        let envelope = validate_frame_message(&trusted(r#"{"type":"logout","data":null}"#))
            .expect("explicit null data is present");
        assert!(envelope.data.is_null());
    }
}
