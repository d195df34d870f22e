//! Sinks (§4.5): the Batcher fans every flush out to each configured sink,
//! in order. `HttpSink` ships to the Gate; `FileSink` writes bodies to a
//! local stream; `ValidatingSink` schema-checks and drops nothing further.

use crate::dispatcher::Dispatcher;
use crate::error::TargetStitchError;
use crate::message::Message;
use crate::pending::PendingQueue;
use crate::serializer::serialize;
use serde_json::Value;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

pub trait Sink: Send + Sync {
    fn handle_batch(
        &self,
        messages: &[Message],
        schema: &Value,
        key_names: &[String],
        bookmark_names: Option<&[String]>,
        state_snapshot: Option<&Value>,
    ) -> Result<(), TargetStitchError>;
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is after the epoch")
        .as_millis() as i64
}

/// Ships a flush to the Gate. `state_writer` is the shared stdout sink the
/// background completion callback writes acknowledged `STATE` lines to.
pub struct HttpSink {
    dispatcher: Dispatcher,
    pending: Arc<PendingQueue>,
    state_writer: Arc<Mutex<Box<dyn Write + Send>>>,
    max_batch_bytes: usize,
    max_batch_records: usize,
}

impl HttpSink {
    pub fn new(
        dispatcher: Dispatcher,
        pending: Arc<PendingQueue>,
        state_writer: Arc<Mutex<Box<dyn Write + Send>>>,
        max_batch_bytes: usize,
        max_batch_records: usize,
    ) -> Self {
        Self {
            dispatcher,
            pending,
            state_writer,
            max_batch_bytes,
            max_batch_records,
        }
    }
}

impl Sink for HttpSink {
    fn handle_batch(
        &self,
        messages: &[Message],
        schema: &Value,
        key_names: &[String],
        bookmark_names: Option<&[String]>,
        state_snapshot: Option<&Value>,
    ) -> Result<(), TargetStitchError> {
        let bodies = serialize(
            messages,
            schema,
            key_names,
            bookmark_names,
            self.max_batch_bytes,
            self.max_batch_records,
            now_millis(),
        )?;

        let last = bodies.len() - 1;
        for (i, body) in bodies.into_iter().enumerate() {
            // Only the last body of a flush carries the state snapshot (§4.3).
            let state = if i == last { state_snapshot.cloned() } else { None };
            self.dispatcher
                .submit(&self.pending, self.state_writer.clone(), body, state);
        }
        Ok(())
    }
}

/// Writes serialized bodies to a local stream instead of the Gate (`-o`).
pub struct FileSink {
    output: Mutex<Box<dyn Write + Send>>,
    max_batch_bytes: usize,
    max_batch_records: usize,
}

impl FileSink {
    pub fn new(output: Box<dyn Write + Send>, max_batch_bytes: usize, max_batch_records: usize) -> Self {
        Self {
            output: Mutex::new(output),
            max_batch_bytes,
            max_batch_records,
        }
    }
}

impl Sink for FileSink {
    fn handle_batch(
        &self,
        messages: &[Message],
        schema: &Value,
        key_names: &[String],
        bookmark_names: Option<&[String]>,
        _state_snapshot: Option<&Value>,
    ) -> Result<(), TargetStitchError> {
        let bodies = serialize(
            messages,
            schema,
            key_names,
            bookmark_names,
            self.max_batch_bytes,
            self.max_batch_records,
            now_millis(),
        )?;

        let mut output = self.output.lock().unwrap();
        for body in bodies {
            writeln!(output, "{body}").map_err(|e| {
                TargetStitchError::ConfigError(format!("failed writing to output file: {e}"))
            })?;
        }
        Ok(())
    }
}

/// Validates each record against its stream's schema (`-n/--dry-run`).
/// With `arbitrary_precision` enabled on `serde_json`, `record` still holds
/// the exact decimal text the tap emitted, so validation sees the same
/// digits a human reading the input would - unlike the HTTP/File path,
/// which deliberately rounds numbers through `f64` before sending them on
/// (§9 Open Question; see `serializer::round_trip_through_f64`).
pub struct ValidatingSink {
    draft4_formats: bool,
}

impl ValidatingSink {
    pub fn new() -> Self {
        Self { draft4_formats: true }
    }
}

impl Default for ValidatingSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Sink for ValidatingSink {
    fn handle_batch(
        &self,
        messages: &[Message],
        schema: &Value,
        key_names: &[String],
        _bookmark_names: Option<&[String]>,
        _state_snapshot: Option<&Value>,
    ) -> Result<(), TargetStitchError> {
        let validator = jsonschema::options()
            .with_draft(jsonschema::Draft::Draft4)
            .should_validate_formats(self.draft4_formats)
            .build(schema)
            .map_err(|e| TargetStitchError::ValidationError {
                index: 0,
                detail: format!("invalid schema: {e}"),
            })?;

        for (index, message) in messages.iter().enumerate() {
            let Message::Record { record, .. } = message else {
                continue;
            };

            for key in key_names {
                if record.get(key).is_none() {
                    return Err(TargetStitchError::ValidationError {
                        index,
                        detail: format!("missing key property \"{key}\""),
                    });
                }
            }

            if let Err(e) = validator.validate(record) {
                return Err(TargetStitchError::ValidationError {
                    index,
                    detail: e.to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn validating_sink_rejects_missing_key_property() {
        let sink = ValidatingSink::new();
        let schema = json!({"type": "object", "properties": {"id": {"type": "integer"}}});
        let messages = vec![Message::Record {
            stream: "s".to_string(),
            record: json!({"name": "no id here"}),
            version: None,
            time_extracted: None,
        }];
        let err = sink
            .handle_batch(&messages, &schema, &["id".to_string()], None, None)
            .unwrap_err();
        assert!(matches!(err, TargetStitchError::ValidationError { .. }));
    }

    #[test]
    fn validating_sink_rejects_schema_mismatch() {
        let sink = ValidatingSink::new();
        let schema = json!({"type": "object", "properties": {"id": {"type": "string"}}, "required": ["id"]});
        let messages = vec![Message::Record {
            stream: "s".to_string(),
            record: json!({"id": 5}),
            version: None,
            time_extracted: None,
        }];
        let err = sink
            .handle_batch(&messages, &schema, &[], None, None)
            .unwrap_err();
        assert!(matches!(err, TargetStitchError::ValidationError { .. }));
    }

    #[test]
    fn validating_sink_accepts_matching_record() {
        let sink = ValidatingSink::new();
        let schema = json!({"type": "object", "properties": {"id": {"type": "integer"}}, "required": ["id"]});
        let messages = vec![Message::Record {
            stream: "s".to_string(),
            record: json!({"id": 5}),
            version: None,
            time_extracted: None,
        }];
        assert!(sink
            .handle_batch(&messages, &schema, &["id".to_string()], None, None)
            .is_ok());
    }

    #[test]
    fn file_sink_writes_each_body_with_newline() {
        let buffer: Vec<u8> = Vec::new();
        let sink = FileSink::new(Box::new(buffer) as Box<dyn Write + Send>, 1_000_000, 20_000);
        let messages = vec![Message::Record {
            stream: "s".to_string(),
            record: json!({"id": 1}),
            version: None,
            time_extracted: None,
        }];
        sink.handle_batch(&messages, &json!({}), &[], None, None).unwrap();
    }
}
