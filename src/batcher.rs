//! Batcher (§4.4): consumes parsed messages, maintains the per-stream
//! buffer and the latest state snapshot, and decides when to flush.

use crate::error::TargetStitchError;
use crate::message::Message;
use crate::sink::Sink;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Wall-clock accumulator for a flush, split the way the original's
/// `Timings`/`TIMINGS.mode(...)` context manager split it: time spent
/// building the serialized batch vs. time spent handing it to sinks
/// (posting to the Gate, writing to a file, validating). Reset on every
/// flush and logged at `debug` rather than accumulated for the life of
/// the process, since nothing here ever reads the totals back.
#[derive(Default)]
struct Timings {
    serializing: Duration,
    posting: Duration,
}

impl Timings {
    fn log(&self, record_count: usize) {
        debug!(
            records = record_count,
            serializing_ms = self.serializing.as_secs_f64() * 1000.0,
            posting_ms = self.posting.as_secs_f64() * 1000.0,
            "flush timings"
        );
    }
}

#[derive(Clone)]
struct StreamMeta {
    schema: Value,
    key_properties: Vec<String>,
    bookmark_properties: Option<Vec<String>>,
}

/// Buffered message plus the raw byte length it occupied on the wire, so
/// `buffer_bytes` tracks input size rather than re-serialized size.
struct BufferedMessage {
    message: Message,
    raw_len: usize,
}

/// Tunable flush thresholds (§6 CLI surface).
pub struct BatcherConfig {
    pub max_batch_bytes: usize,
    pub max_batch_records: usize,
    pub batch_delay: Duration,
}

/// The streaming batch/flush state machine. Named `Batcher` rather than
/// the source's `TargetStitch` class, since that name described the whole
/// program, not this one piece of it.
pub struct Batcher {
    config: BatcherConfig,
    sinks: Vec<Box<dyn Sink>>,
    buffer: Vec<BufferedMessage>,
    buffer_bytes: usize,
    current_state: Option<Value>,
    stream_meta: HashMap<String, StreamMeta>,
    last_flush_time: Instant,
    timings: Timings,
}

impl Batcher {
    pub fn new(config: BatcherConfig, sinks: Vec<Box<dyn Sink>>) -> Self {
        Self {
            config,
            sinks,
            buffer: Vec::new(),
            buffer_bytes: 0,
            current_state: None,
            stream_meta: HashMap::new(),
            last_flush_time: Instant::now(),
            timings: Timings::default(),
        }
    }

    fn buffer_stream_and_version(&self) -> Option<(&str, Option<i64>)> {
        self.buffer
            .first()
            .map(|entry| (entry.message.stream().unwrap_or_default(), entry.message.version()))
    }

    fn time_to_flush(&self) -> bool {
        self.last_flush_time.elapsed() >= self.config.batch_delay
    }

    /// Handle one parsed line (§4.4 `handle`).
    pub fn handle(&mut self, message: Message, raw_len: usize) -> Result<(), TargetStitchError> {
        match &message {
            Message::Schema {
                stream,
                json_schema,
                key_properties,
                bookmark_properties,
            } => {
                self.flush()?;
                self.stream_meta.insert(
                    stream.clone(),
                    StreamMeta {
                        schema: json_schema.clone(),
                        key_properties: key_properties.clone(),
                        bookmark_properties: bookmark_properties.clone(),
                    },
                );
            }
            Message::Record { stream, version, .. } | Message::ActivateVersion { stream, version } => {
                if let Some((head_stream, head_version)) = self.buffer_stream_and_version() {
                    if head_stream != stream || head_version != *version {
                        self.flush()?;
                    }
                }
                self.buffer.push(BufferedMessage { message, raw_len });
                self.buffer_bytes += raw_len;

                if self.buffer_bytes >= self.config.max_batch_bytes
                    || self.buffer.len() >= self.config.max_batch_records
                    || self.time_to_flush()
                {
                    self.flush()?;
                }
            }
            Message::State { value } => {
                self.current_state = Some(value.clone());
                if self.time_to_flush() {
                    self.flush()?;
                }
            }
        }
        Ok(())
    }

    /// Flush the current buffer to every configured sink, in order (§4.4).
    ///
    /// `current_state` is deliberately left set after a flush: it is the
    /// latest state observed, and the next flush will attach it again if no
    /// newer `STATE` has arrived in between.
    pub fn flush(&mut self) -> Result<(), TargetStitchError> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let mark = Instant::now();

        let stream = self.buffer[0]
            .message
            .stream()
            .unwrap_or_default()
            .to_string();
        let meta = self.stream_meta.get(&stream);
        let schema = meta.map(|m| m.schema.clone()).unwrap_or(Value::Object(Default::default()));
        let key_names = meta.map(|m| m.key_properties.clone()).unwrap_or_default();
        let bookmark_names = meta.and_then(|m| m.bookmark_properties.clone());

        let messages: Vec<Message> = self.buffer.drain(..).map(|b| b.message).collect();
        let record_count = messages.len();
        self.buffer_bytes = 0;
        self.last_flush_time = Instant::now();

        self.timings.serializing += mark.elapsed();
        let mark = Instant::now();

        let result = (|| {
            for sink in &self.sinks {
                sink.handle_batch(
                    &messages,
                    &schema,
                    &key_names,
                    bookmark_names.as_deref(),
                    self.current_state.as_ref(),
                )?;
            }
            Ok(())
        })();

        self.timings.posting += mark.elapsed();
        self.timings.log(record_count);

        result
    }

    /// EOF path (§4.6): flush whatever remains buffered.
    pub fn finish(&mut self) -> Result<(), TargetStitchError> {
        self.flush()
    }
}
