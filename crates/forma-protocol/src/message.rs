//! Typed messages and their JSON wire form
//!
//! | Direction     | Message           | Payload                                  |
//! |---------------|-------------------|------------------------------------------|
//! | Bridge → Host | `ready`           | none                                     |
//! | Bridge → Host | `bootstrapFailed` | `{message}`                              |
//! | Host → Bridge | `updateScript`    | `{code, sourceId}`                       |
//! | Bridge → Worker | `init`          | `{kernelBinaryAddress}`                  |
//! | Bridge → Worker | evaluation      | `{code}`                                 |
//! | Worker → Bridge | log             | `{log}`                                  |
//! | Worker → Bridge | result          | `{assetUrl}` or `{assetUrl: null}`       |

use crate::error::{ProtocolError, Result};
use crate::script::ScriptSubmission;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Messages sent from the Host Controller to the UI Bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HostMessage {
    /// A new script to evaluate
    UpdateScript(ScriptSubmission),
}

impl HostMessage {
    /// Encode to the JSON wire form
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode and validate a wire payload
    pub fn decode(text: &str) -> Result<Self> {
        let message: Self = serde_json::from_str(text)?;
        message.validate()?;
        Ok(message)
    }

    fn validate(&self) -> Result<()> {
        match self {
            Self::UpdateScript(sub) if sub.source_id().is_empty() => {
                Err(ProtocolError::EmptyField("sourceId"))
            }
            Self::UpdateScript(_) => Ok(()),
        }
    }
}

/// Messages sent from the UI Bridge back to the Host Controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BridgeMessage {
    /// Bootstrap finished; scripts can be dispatched
    Ready,
    /// The worker could not be constructed; the surface stays inert
    BootstrapFailed { message: String },
}

impl BridgeMessage {
    /// Encode to the JSON wire form
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a wire payload
    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Messages sent from the UI Bridge to the Evaluation Worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerRequest {
    /// Cache the kernel binary location; sent once after construction
    Init { kernel_binary_address: String },
    /// Evaluate a script
    Evaluate { code: String },
}

impl WorkerRequest {
    fn to_value(&self) -> Value {
        match self {
            Self::Init {
                kernel_binary_address,
            } => json!({ "type": "init", "kernelBinaryAddress": kernel_binary_address }),
            Self::Evaluate { code } => json!({ "code": code }),
        }
    }

    fn from_value(value: &Value) -> Result<Self> {
        let object = as_object(value)?;

        match object.get("type").and_then(Value::as_str) {
            Some("init") => {
                let address = object
                    .get("kernelBinaryAddress")
                    .and_then(Value::as_str)
                    .ok_or(ProtocolError::MissingField("kernelBinaryAddress"))?;
                if address.is_empty() {
                    return Err(ProtocolError::EmptyField("kernelBinaryAddress"));
                }
                Ok(Self::Init {
                    kernel_binary_address: address.to_string(),
                })
            }
            Some(other) => Err(ProtocolError::UnknownMessage(other.to_string())),
            None => {
                let code = object
                    .get("code")
                    .and_then(Value::as_str)
                    .ok_or(ProtocolError::MissingField("code"))?;
                Ok(Self::Evaluate {
                    code: code.to_string(),
                })
            }
        }
    }

    /// Encode to the JSON wire form
    pub fn encode(&self) -> String {
        self.to_value().to_string()
    }

    /// Decode and validate a wire payload
    pub fn decode(text: &str) -> Result<Self> {
        Self::from_value(&serde_json::from_str(text)?)
    }
}

/// Messages sent from the Evaluation Worker back to the UI Bridge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerReply {
    /// One captured console line, emitted as soon as it is written
    Log { log: String },
    /// Final result of an evaluation; `None` marks a failure
    Result { asset_url: Option<String> },
}

impl WorkerReply {
    /// Shorthand for a log reply
    pub fn log(line: impl Into<String>) -> Self {
        Self::Log { log: line.into() }
    }

    /// Whether this reply ends an evaluation
    pub fn is_result(&self) -> bool {
        matches!(self, Self::Result { .. })
    }

    fn to_value(&self) -> Value {
        match self {
            Self::Log { log } => json!({ "log": log }),
            Self::Result { asset_url } => json!({ "assetUrl": asset_url }),
        }
    }

    fn from_value(value: &Value) -> Result<Self> {
        let object = as_object(value)?;

        if let Some(log) = object.get("log") {
            let log = log.as_str().ok_or(ProtocolError::MissingField("log"))?;
            return Ok(Self::log(log));
        }

        match object.get("assetUrl") {
            Some(Value::Null) => Ok(Self::Result { asset_url: None }),
            Some(Value::String(url)) if url.is_empty() => {
                Err(ProtocolError::EmptyField("assetUrl"))
            }
            Some(Value::String(url)) => Ok(Self::Result {
                asset_url: Some(url.clone()),
            }),
            Some(_) => Err(ProtocolError::MissingField("assetUrl")),
            None => Err(ProtocolError::UnknownMessage(value.to_string())),
        }
    }

    /// Encode to the JSON wire form
    pub fn encode(&self) -> String {
        self.to_value().to_string()
    }

    /// Decode and validate a wire payload
    pub fn decode(text: &str) -> Result<Self> {
        Self::from_value(&serde_json::from_str(text)?)
    }
}

fn as_object(value: &Value) -> Result<&Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| ProtocolError::UnknownMessage(value.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_update_script_wire_shape() {
        let message = HostMessage::UpdateScript(ScriptSubmission::new("cube(1.0)", "a.fcad"));
        let value: Value = serde_json::from_str(&message.encode().unwrap()).unwrap();
        assert_eq!(value["type"], "updateScript");
        assert_eq!(value["code"], "cube(1.0)");
        assert_eq!(value["sourceId"], "a.fcad");
    }

    #[test]
    fn test_update_script_rejects_empty_source() {
        let result = HostMessage::decode(r#"{"type":"updateScript","code":"x","sourceId":""}"#);
        assert!(matches!(result, Err(ProtocolError::EmptyField("sourceId"))));
    }

    #[test]
    fn test_host_message_rejects_unknown_type() {
        assert!(HostMessage::decode(r#"{"type":"reload"}"#).is_err());
        assert!(HostMessage::decode("not json").is_err());
    }

    #[test]
    fn test_bridge_messages() {
        assert_eq!(BridgeMessage::Ready.encode().unwrap(), r#"{"type":"ready"}"#);
        let failed = BridgeMessage::decode(r#"{"type":"bootstrapFailed","message":"boom"}"#);
        assert_eq!(
            failed.unwrap(),
            BridgeMessage::BootstrapFailed {
                message: "boom".into()
            }
        );
    }

    #[test]
    fn test_worker_request_decoding() {
        let init = WorkerRequest::decode(r#"{"type":"init","kernelBinaryAddress":"file:///k.rhai"}"#);
        assert_eq!(
            init.unwrap(),
            WorkerRequest::Init {
                kernel_binary_address: "file:///k.rhai".into()
            }
        );

        let eval = WorkerRequest::decode(r#"{"code":"sphere(1.0)"}"#).unwrap();
        assert_eq!(
            eval,
            WorkerRequest::Evaluate {
                code: "sphere(1.0)".into()
            }
        );

        assert!(matches!(
            WorkerRequest::decode(r#"{"type":"init","kernelBinaryAddress":""}"#),
            Err(ProtocolError::EmptyField(_))
        ));
        assert!(matches!(
            WorkerRequest::decode(r#"{"type":"shutdown"}"#),
            Err(ProtocolError::UnknownMessage(_))
        ));
        assert!(matches!(
            WorkerRequest::decode("{}"),
            Err(ProtocolError::MissingField("code"))
        ));
    }

    #[test]
    fn test_worker_reply_decoding() {
        assert_eq!(WorkerReply::decode(r#"{"log":"hi"}"#).unwrap(), WorkerReply::log("hi"));
        assert_eq!(
            WorkerReply::decode(r#"{"assetUrl":null}"#).unwrap(),
            WorkerReply::Result { asset_url: None }
        );
        assert_eq!(
            WorkerReply::decode(r#"{"assetUrl":"model://1"}"#).unwrap(),
            WorkerReply::Result {
                asset_url: Some("model://1".into())
            }
        );
        assert!(WorkerReply::decode("{}").is_err());
        assert!(WorkerReply::decode(r#"{"log":3}"#).is_err());
    }

    #[test]
    fn test_failure_marker_encodes_null() {
        let reply = WorkerReply::Result { asset_url: None };
        assert_eq!(reply.encode(), r#"{"assetUrl":null}"#);
        assert!(reply.is_result());
        assert!(!WorkerReply::log("x").is_result());
    }
}
