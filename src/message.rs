//! The Singer tap/target protocol messages this engine consumes.

use crate::error::TargetStitchError;
use serde_json::Value;

/// One parsed line of Singer protocol input, plus the raw line it came from.
///
/// Keeping the raw line alongside the decoded message lets the batcher
/// account for `buffer_bytes` using the exact byte length the line had on
/// the wire (§3 Buffer), rather than re-serializing to measure it.
#[derive(Debug, Clone)]
pub struct LineMessage {
    pub message: Message,
    pub raw_len: usize,
}

/// A decoded Singer protocol message (§3).
#[derive(Debug, Clone)]
pub enum Message {
    Schema {
        stream: String,
        json_schema: Value,
        key_properties: Vec<String>,
        bookmark_properties: Option<Vec<String>>,
    },
    Record {
        stream: String,
        record: Value,
        version: Option<i64>,
        time_extracted: Option<String>,
    },
    ActivateVersion {
        stream: String,
        version: Option<i64>,
    },
    State {
        value: Value,
    },
}

impl Message {
    /// The stream this message belongs to, if any (`State` has none).
    pub fn stream(&self) -> Option<&str> {
        match self {
            Message::Schema { stream, .. } => Some(stream),
            Message::Record { stream, .. } => Some(stream),
            Message::ActivateVersion { stream, .. } => Some(stream),
            Message::State { .. } => None,
        }
    }

    /// The table version this message carries, if any.
    pub fn version(&self) -> Option<i64> {
        match self {
            Message::Record { version, .. } => *version,
            Message::ActivateVersion { version, .. } => *version,
            _ => None,
        }
    }
}

/// Parse one line of stdin into a [`LineMessage`].
///
/// Unknown `type` values and malformed JSON are synchronous, fatal parse
/// errors (§7: "Synchronous parsing ... errors ... are raised immediately
/// and short-circuit the consume loop").
pub fn parse_line(line: &str, line_no: usize) -> Result<LineMessage, TargetStitchError> {
    let raw_len = line.len();
    let value: Value = serde_json::from_str(line).map_err(|e| TargetStitchError::ParseError {
        line: line_no,
        detail: format!("invalid JSON: {e}"),
    })?;

    let obj = value.as_object().ok_or_else(|| TargetStitchError::ParseError {
        line: line_no,
        detail: "message is not a JSON object".to_string(),
    })?;

    let msg_type = obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| TargetStitchError::ParseError {
            line: line_no,
            detail: "missing \"type\" field".to_string(),
        })?;

    let message = match msg_type {
        "SCHEMA" => {
            let stream = required_str(obj, "stream", line_no)?;
            let json_schema = obj.get("schema").cloned().unwrap_or(Value::Object(Default::default()));
            let key_properties = string_array(obj, "key_properties");
            let bookmark_properties = obj
                .get("bookmark_properties")
                .map(|_| string_array(obj, "bookmark_properties"));
            Message::Schema {
                stream,
                json_schema,
                key_properties,
                bookmark_properties,
            }
        }
        "RECORD" => {
            let stream = required_str(obj, "stream", line_no)?;
            let record = obj.get("record").cloned().unwrap_or(Value::Object(Default::default()));
            let version = obj.get("version").and_then(Value::as_i64);
            let time_extracted = obj
                .get("time_extracted")
                .and_then(Value::as_str)
                .map(str::to_string);
            Message::Record {
                stream,
                record,
                version,
                time_extracted,
            }
        }
        "ACTIVATE_VERSION" => {
            let stream = required_str(obj, "stream", line_no)?;
            let version = obj.get("version").and_then(Value::as_i64);
            Message::ActivateVersion { stream, version }
        }
        "STATE" => {
            let value = obj.get("value").cloned().unwrap_or(Value::Null);
            Message::State { value }
        }
        other => {
            return Err(TargetStitchError::ParseError {
                line: line_no,
                detail: format!("unknown message type \"{other}\""),
            })
        }
    };

    Ok(LineMessage { message, raw_len })
}

fn required_str(
    obj: &serde_json::Map<String, Value>,
    key: &str,
    line_no: usize,
) -> Result<String, TargetStitchError> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| TargetStitchError::ParseError {
            line: line_no,
            detail: format!("missing \"{key}\" field"),
        })
}

fn string_array(obj: &serde_json::Map<String, Value>, key: &str) -> Vec<String> {
    obj.get(key)
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
