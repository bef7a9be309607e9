use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FieldResolutionError;

/// Unit of work travelling through a pipeline.
///
/// The event carries its own pipeline definition: every processor reads the
/// step at `run.step`, acts on it, and hands the event on to the next step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineEvent {
    /// Observed data.
    pub event: EventData,

    /// Pipeline metadata for this run.
    pub run: RunMetadata,
}

impl PipelineEvent {
    pub fn new(event: EventData, run: RunMetadata) -> Self {
        Self { event, run }
    }

    /// Step the event is currently positioned at, if the index is in range.
    pub fn current_step(&self) -> Option<&Step> {
        self.run.steps.get(self.run.step)
    }

    /// Move the event to its next step and return that step.
    ///
    /// Returns `None` once the run has moved past its last step. An index
    /// already at `usize::MAX` is left as is and treated as terminal.
    pub fn advance(&mut self) -> Option<&Step> {
        self.run.step = self.run.step.checked_add(1)?;
        self.current_step()
    }
}

/// Observed data of an event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    /// When the event was indexed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_time: Option<DateTime<Utc>>,

    /// When the event happened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,

    /// Fields extracted by earlier pipeline steps.
    #[serde(default)]
    pub derived: HashMap<String, DerivedValue>,
}

impl EventData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_raw(mut self, raw: impl Into<String>) -> Self {
        self.raw = Some(raw.into());
        self
    }

    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_timestamps(mut self, index_time: DateTime<Utc>, timestamp: DateTime<Utc>) -> Self {
        self.index_time = Some(index_time);
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_derived(mut self, field: impl Into<String>, value: impl Into<DerivedValue>) -> Self {
        self.derived.insert(field.into(), value.into());
        self
    }

    /// Resolve `field` as an integer.
    ///
    /// `raw`, `event_type` and `category` are parsed from their text. Derived
    /// floats are truncated toward zero and derived strings are parsed.
    pub fn int_field(&self, field: &str) -> Result<i64, FieldResolutionError> {
        match self.well_known(field) {
            Some(text) => {
                let text = text.ok_or_else(|| FieldResolutionError::Missing(field.to_string()))?;
                text.parse()
                    .map_err(|_| FieldResolutionError::NotAnInteger(field.to_string()))
            }
            None => self
                .derived
                .get(field)
                .ok_or_else(|| FieldResolutionError::Missing(field.to_string()))?
                .as_int()
                .ok_or_else(|| FieldResolutionError::NotAnInteger(field.to_string())),
        }
    }

    /// Resolve `field` as text.
    pub fn str_field(&self, field: &str) -> Result<Cow<'_, str>, FieldResolutionError> {
        match self.well_known(field) {
            Some(text) => text
                .map(Cow::Borrowed)
                .ok_or_else(|| FieldResolutionError::Missing(field.to_string())),
            None => self
                .derived
                .get(field)
                .ok_or_else(|| FieldResolutionError::Missing(field.to_string()))?
                .as_text()
                .ok_or_else(|| FieldResolutionError::Incompatible(field.to_string())),
        }
    }

    // Outer `None` means the name is not one of the well-known fields.
    fn well_known(&self, field: &str) -> Option<Option<&str>> {
        match field {
            "raw" => Some(self.raw.as_deref()),
            "event_type" => Some(self.event_type.as_deref()),
            "category" => Some(self.category.as_deref()),
            _ => None,
        }
    }
}

/// Loosely-typed scalar stored under [`EventData::derived`].
///
/// Decoded once at the JSON boundary. Non-scalar values are kept as
/// [`DerivedValue::Other`] so a single odd field does not reject the whole
/// event; such values never resolve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DerivedValue {
    Int(i64),
    Float(f64),
    Str(String),
    Other(serde_json::Value),
}

impl DerivedValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            DerivedValue::Int(value) => Some(*value),
            DerivedValue::Float(value) => Some(value.trunc() as i64),
            DerivedValue::Str(value) => value.parse().ok(),
            DerivedValue::Other(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<Cow<'_, str>> {
        match self {
            DerivedValue::Str(value) => Some(Cow::Borrowed(value)),
            DerivedValue::Int(value) => Some(Cow::Owned(value.to_string())),
            DerivedValue::Float(value) => Some(Cow::Owned(value.to_string())),
            DerivedValue::Other(_) => None,
        }
    }
}

impl From<i64> for DerivedValue {
    fn from(value: i64) -> Self {
        DerivedValue::Int(value)
    }
}

impl From<i32> for DerivedValue {
    fn from(value: i32) -> Self {
        DerivedValue::Int(value.into())
    }
}

impl From<f64> for DerivedValue {
    fn from(value: f64) -> Self {
        DerivedValue::Float(value)
    }
}

impl From<&str> for DerivedValue {
    fn from(value: &str) -> Self {
        DerivedValue::Str(value.to_string())
    }
}

impl From<String> for DerivedValue {
    fn from(value: String) -> Self {
        DerivedValue::Str(value)
    }
}

/// Pipeline metadata carried by every copy of an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    /// Identifies one logical execution; stable across steps.
    pub run_id: RunId,

    /// Ordered pipeline definition.
    pub steps: Vec<Step>,

    /// Index into `steps` of the step being processed.
    #[serde(default)]
    pub step: usize,

    /// Where failures for this run are reported.
    #[serde(default)]
    pub error_url: String,
}

impl RunMetadata {
    pub fn new(run_id: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            run_id: RunId(run_id.into()),
            steps,
            step: 0,
            error_url: String::new(),
        }
    }

    pub fn at_step(mut self, step: usize) -> Self {
        self.step = step;
        self
    }

    pub fn with_error_url(mut self, error_url: impl Into<String>) -> Self {
        self.error_url = error_url.into();
        self
    }
}

/// One stage of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub name: String,

    /// Condition string understood by [`crate::Condition::parse`].
    #[serde(default)]
    pub args: String,

    /// Target that receives the event once the previous step completes.
    pub url: String,
}

impl Step {
    pub fn new(name: impl Into<String>, args: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: args.into(),
            url: url.into(),
        }
    }
}

/// Identifier of a pipeline run.
///
/// This is a strongly-typed wrapper to avoid accidental mixing
/// of run IDs with callback URLs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Failure record posted to a run's error URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub run_id: RunId,
    pub step: usize,
    pub recoverable: bool,
    pub error_msg: String,
    pub debug_msg: String,
    pub event: EventData,
}

impl ErrorReport {
    /// Every failure this service reports leaves the run able to continue.
    pub fn new(event: &PipelineEvent, error_msg: impl Into<String>, debug_msg: impl Into<String>) -> Self {
        Self {
            run_id: event.run.run_id.clone(),
            step: event.run.step,
            recoverable: true,
            error_msg: error_msg.into(),
            debug_msg: debug_msg.into(),
            event: event.event.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> serde_json::Value {
        serde_json::json!({
            "event": {
                "raw": "Test",
                "event_type": "login",
                "index_time": "2024-03-01T10:00:00Z",
                "timestamp": "2024-03-01T09:59:58Z",
                "derived": {
                    "count": 30,
                    "ratio": 2.75,
                    "colour": "orange",
                    "tags": ["a", "b"]
                }
            },
            "run": {
                "run_id": "run-1",
                "steps": [
                    { "name": "webhook", "args": "count>=30 http://cb/webhook", "url": "http://here/query" },
                    { "name": "sink", "args": "", "url": "http://next/query" }
                ],
                "step": 0,
                "error_url": "http://errors/report"
            }
        })
    }

    #[test]
    fn decodes_derived_values_into_variants() {
        let event: PipelineEvent = serde_json::from_value(sample_json()).unwrap();
        let derived = &event.event.derived;

        assert_eq!(derived["count"], DerivedValue::Int(30));
        assert_eq!(derived["ratio"], DerivedValue::Float(2.75));
        assert_eq!(derived["colour"], DerivedValue::Str("orange".into()));
        assert!(matches!(derived["tags"], DerivedValue::Other(_)));
        assert_eq!(event.run.run_id, RunId("run-1".into()));
        assert_eq!(event.current_step().unwrap().name, "webhook");
    }

    #[test]
    fn encoded_event_keeps_integer_fields_integral() {
        let event: PipelineEvent = serde_json::from_value(sample_json()).unwrap();
        let encoded = serde_json::to_value(&event).unwrap();

        assert_eq!(encoded["event"]["derived"]["count"], serde_json::json!(30));
        assert_eq!(encoded["run"]["run_id"], serde_json::json!("run-1"));
        assert!(encoded["event"].get("category").is_none());
    }

    #[test]
    fn int_field_resolves_each_derived_kind() {
        let data = EventData::new()
            .with_derived("int", 42)
            .with_derived("float", 7.9)
            .with_derived("negative", -7.9)
            .with_derived("text", "15")
            .with_derived("word", "orange");

        assert_eq!(data.int_field("int").unwrap(), 42);
        assert_eq!(data.int_field("float").unwrap(), 7);
        assert_eq!(data.int_field("negative").unwrap(), -7);
        assert_eq!(data.int_field("text").unwrap(), 15);
        assert_eq!(
            data.int_field("word"),
            Err(FieldResolutionError::NotAnInteger("word".into()))
        );
        assert_eq!(
            data.int_field("absent"),
            Err(FieldResolutionError::Missing("absent".into()))
        );
    }

    #[test]
    fn well_known_fields_resolve_from_their_own_slots() {
        let data = EventData::new().with_raw("12").with_event_type("login");

        assert_eq!(data.int_field("raw").unwrap(), 12);
        assert_eq!(data.str_field("event_type").unwrap(), "login");
        assert_eq!(
            data.str_field("category"),
            Err(FieldResolutionError::Missing("category".into()))
        );
        assert!(data.int_field("event_type").is_err());
    }

    #[test]
    fn well_known_names_shadow_derived_entries() {
        let data = EventData::new().with_derived("raw", 5);

        assert_eq!(
            data.int_field("raw"),
            Err(FieldResolutionError::Missing("raw".into()))
        );
    }

    #[test]
    fn str_field_renders_numbers_and_rejects_structures() {
        let data = EventData::new()
            .with_derived("int", 30)
            .with_derived("list", DerivedValue::Other(serde_json::json!([1, 2])));

        assert_eq!(data.str_field("int").unwrap(), "30");
        assert_eq!(
            data.str_field("list"),
            Err(FieldResolutionError::Incompatible("list".into()))
        );
    }

    #[test]
    fn advance_walks_off_the_end_of_the_run() {
        let run = RunMetadata::new(
            "run-2",
            vec![Step::new("a", "", "http://a"), Step::new("b", "", "http://b")],
        );
        let mut event = PipelineEvent::new(EventData::new(), run);

        assert_eq!(event.advance().map(|s| s.url.as_str()), Some("http://b"));
        assert!(event.advance().is_none());
        assert_eq!(event.run.step, 2);
    }

    #[test]
    fn advance_from_the_largest_index_is_terminal() {
        let run = RunMetadata::new("run-3", vec![Step::new("a", "", "http://a")]).at_step(usize::MAX);
        let mut event = PipelineEvent::new(EventData::new(), run);

        assert!(event.advance().is_none());
        assert_eq!(event.run.step, usize::MAX);
    }

    #[test]
    fn padded_numbers_are_not_integers() {
        let data = EventData::new().with_raw(" 45").with_derived("padded", " 30");

        assert_eq!(
            data.int_field("raw"),
            Err(FieldResolutionError::NotAnInteger("raw".into()))
        );
        assert_eq!(
            data.int_field("padded"),
            Err(FieldResolutionError::NotAnInteger("padded".into()))
        );
        assert_eq!(data.str_field("padded").unwrap(), " 30");
    }

    #[test]
    fn error_report_marks_failures_recoverable() {
        let event: PipelineEvent = serde_json::from_value(sample_json()).unwrap();
        let report = ErrorReport::new(&event, "Failed to parse args", "debug");

        assert!(report.recoverable);
        assert_eq!(report.step, 0);
        assert_eq!(report.run_id.0, "run-1");
        assert_eq!(report.event, event.event);
    }
}
