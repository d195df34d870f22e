//! Turns a buffered batch of messages into one or more JSON request bodies
//! (§4.1). The hard part is a pure function - no I/O, no async.

use crate::error::TargetStitchError;
use crate::message::Message;
use serde_json::{json, Map, Value};

/// Multiplier applied to the millisecond timestamp before the zero-padded
/// index is appended (§3).
const SEQUENCE_MULTIPLIER: i64 = 1000;

/// Generate the sequence number for message at position `index` within a
/// serialize() call that sampled `now_millis` once at its start.
///
/// `max_records` governs the zero-pad width: the suffix must be wide enough
/// for ten times the configured batch size, since a single `serialize` call
/// may be handed an oversize batch (the spec tolerates up to an order of
/// magnitude over `max_records`).
fn generate_sequence(now_millis: i64, index: usize, max_records: usize) -> i64 {
    let width = (10 * max_records).to_string().len();
    let suffix = format!("{:0width$}", index, width = width);
    format!("{now_millis}{suffix}")
        .parse()
        .expect("concatenated decimal digits always parse as an integer")
}

/// Re-render every number in `value` through its `f64` representation, the
/// way the Gate's own JSON parser will read it back. With `arbitrary_precision`
/// enabled, a record parsed from the tap carries its source decimal text
/// verbatim (see `ValidatingSink`, which validates that exact text); this is
/// the one place that text is deliberately allowed to round the way the Gate
/// accepts (§9 Open Question).
fn round_trip_through_f64(value: &Value) -> Value {
    match value {
        Value::Number(n) => match n.as_f64() {
            Some(f) => serde_json::Number::from_f64(f).map(Value::Number).unwrap_or_else(|| value.clone()),
            None => value.clone(),
        },
        Value::Array(items) => Value::Array(items.iter().map(round_trip_through_f64).collect()),
        Value::Object(map) => {
            Value::Object(map.iter().map(|(k, v)| (k.clone(), round_trip_through_f64(v))).collect())
        }
        other => other.clone(),
    }
}

/// Build the serialized `messages` array entries and, in the same pass,
/// determine whether a `table_version` should be attached.
fn serialize_messages(messages: &[Message], now_millis: i64, max_records: usize) -> Vec<Value> {
    messages
        .iter()
        .enumerate()
        .filter_map(|(i, message)| {
            let sequence = generate_sequence(now_millis, i, max_records);
            match message {
                Message::Record {
                    record,
                    time_extracted,
                    ..
                } => {
                    let mut entry = Map::new();
                    entry.insert("action".to_string(), json!("upsert"));
                    entry.insert("data".to_string(), round_trip_through_f64(record));
                    entry.insert("sequence".to_string(), json!(sequence));
                    if let Some(t) = time_extracted {
                        entry.insert("time_extracted".to_string(), json!(t));
                    }
                    Some(Value::Object(entry))
                }
                Message::ActivateVersion { .. } => Some(json!({
                    "action": "activate_version",
                    "sequence": sequence,
                })),
                Message::Schema { .. } | Message::State { .. } => None,
            }
        })
        .collect()
}

/// Produce request bodies for the Gate (§4.1).
///
/// Builds one body containing all `messages`. If its serialized length is
/// `>= max_bytes`, splits the message list in half and recurses on each
/// half, concatenating the results - so the recursion is logarithmic in the
/// oversize factor rather than linear in message count.
pub fn serialize(
    messages: &[Message],
    schema: &Value,
    key_names: &[String],
    bookmark_names: Option<&[String]>,
    max_bytes: usize,
    max_records: usize,
    now_millis: i64,
) -> Result<Vec<String>, TargetStitchError> {
    assert!(!messages.is_empty(), "serialize() requires a non-empty batch");

    let serialized_messages = serialize_messages(messages, now_millis, max_records);

    let mut body = Map::new();
    body.insert(
        "table_name".to_string(),
        json!(messages[0].stream().unwrap_or_default()),
    );
    body.insert("schema".to_string(), schema.clone());
    body.insert("key_names".to_string(), json!(key_names));
    if let Some(version) = messages[0].version() {
        body.insert("table_version".to_string(), json!(version));
    }
    if let Some(bookmarks) = bookmark_names {
        if !bookmarks.is_empty() {
            body.insert("bookmark_names".to_string(), json!(bookmarks));
        }
    }
    body.insert("messages".to_string(), Value::Array(serialized_messages));

    let serialized = serde_json::to_string(&Value::Object(body))
        .expect("request body is built entirely from valid JSON values");

    if serialized.len() < max_bytes {
        return Ok(vec![serialized]);
    }

    if messages.len() <= 1 {
        return Err(TargetStitchError::BatchTooLarge {
            max_mb: (max_bytes / 1_000_000) as u64,
        });
    }

    let pivot = messages.len() / 2;
    let mut left = serialize(
        &messages[..pivot],
        schema,
        key_names,
        bookmark_names,
        max_bytes,
        max_records,
        now_millis,
    )?;
    let right = serialize(
        &messages[pivot..],
        schema,
        key_names,
        bookmark_names,
        max_bytes,
        max_records,
        now_millis,
    )?;
    left.extend(right);
    Ok(left)
}
