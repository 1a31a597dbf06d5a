//! Wire types shared by the realtime channel and the HTTP API.
//!
//! The backend reports pipeline progress two ways: discrete
//! [`ProcessEvent`] rows inserted into an events table, and full
//! [`ProcessStateRow`] snapshots (fetched or pushed as row updates).
//! Both carry the same nested [`StateSnapshot`] shape, which is what the
//! reconciler actually ingests.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One immutable notification from the pipeline's event stream.
///
/// Delivered at-least-once and possibly out of order; `event_sequence`
/// is a hint only — it may be zero or absent and is never trusted to
/// drop events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessEvent {
    pub id: String,
    pub process_id: String,
    pub event_type: String,
    #[serde(default)]
    pub event_data: Value,
    #[serde(default)]
    pub event_sequence: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Full snapshot of a generation process, as stored by the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessStateRow {
    pub id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(flatten)]
    pub state: StateSnapshot,
}

/// The state-bearing fields common to row snapshots and
/// `process_state_updated` event payloads.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StateSnapshot {
    pub status: Option<ProcessStatus>,
    pub current_step: Option<String>,
    pub current_step_name: Option<String>,
    pub is_waiting_for_input: Option<bool>,
    pub input_type: Option<String>,
    pub article_context: Option<ArticleContext>,
    pub process_metadata: Option<ProcessMetadata>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl StateSnapshot {
    /// Backend step identifier, checking both legacy field names before
    /// falling back to the nested context.
    pub fn backend_step(&self) -> Option<&str> {
        self.current_step
            .as_deref()
            .or(self.current_step_name.as_deref())
            .or_else(|| {
                self.article_context
                    .as_ref()
                    .and_then(|ctx| ctx.current_step.as_deref())
            })
    }

    /// Input type, honoring the `process_metadata` override when present.
    pub fn effective_input_type(&self) -> Option<&str> {
        self.process_metadata
            .as_ref()
            .and_then(|meta| meta.input_type.as_deref())
            .or(self.input_type.as_deref())
    }

    pub fn is_waiting(&self) -> bool {
        self.is_waiting_for_input.unwrap_or(false)
    }
}

/// Auxiliary hints attached to a process row.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProcessMetadata {
    pub input_type: Option<String>,
    pub retry_count: Option<u32>,
}

/// Accumulated pipeline artifacts. Fields appear incrementally as the
/// pipeline advances; the reconciler merges them fill-if-absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ArticleContext {
    pub current_step: Option<String>,
    pub personas: Option<Vec<Persona>>,
    pub themes: Option<Vec<Theme>>,
    pub research_plan: Option<Value>,
    pub outline: Option<Value>,
    pub sections: Option<Vec<SectionPayload>>,
    pub generated_content: Option<String>,
    pub final_article: Option<Value>,
    pub article_id: Option<String>,
    pub current_section_index: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Persona {
    pub id: Option<i64>,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Theme {
    pub id: Option<i64>,
    #[serde(alias = "name")]
    pub title: String,
    pub description: String,
}

/// Payload of a `section_completed` event (also the element shape of
/// `article_context.sections`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SectionPayload {
    #[serde(alias = "index")]
    pub section_index: Option<u32>,
    pub title: Option<String>,
    pub content: String,
}

/// Backend process status. Open set: values this client does not know
/// are preserved as `Unknown`, never treated as fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ProcessStatus {
    Pending,
    Running,
    UserInputRequired,
    Completed,
    Error,
    Paused,
    Cancelled,
    Unknown(String),
}

impl ProcessStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::UserInputRequired => "user_input_required",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Paused => "paused",
            Self::Cancelled => "cancelled",
            Self::Unknown(raw) => raw,
        }
    }

    /// Terminal statuses are sticky: once applied they are never
    /// downgraded by later notifications.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Cancelled)
    }
}

impl From<String> for ProcessStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "pending" => Self::Pending,
            "running" => Self::Running,
            "user_input_required" => Self::UserInputRequired,
            "completed" => Self::Completed,
            "error" => Self::Error,
            "paused" => Self::Paused,
            "cancelled" => Self::Cancelled,
            _ => Self::Unknown(s),
        }
    }
}

impl From<&str> for ProcessStatus {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<ProcessStatus> for String {
    fn from(status: ProcessStatus) -> String {
        status.as_str().to_string()
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User-decision kinds accepted by the user-input endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputType {
    SelectPersona,
    SelectTheme,
    ApprovePlan,
    ApproveOutline,
}

impl InputType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SelectPersona => "select_persona",
            Self::SelectTheme => "select_theme",
            Self::ApprovePlan => "approve_plan",
            Self::ApproveOutline => "approve_outline",
        }
    }
}

impl FromStr for InputType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "select_persona" => Ok(Self::SelectPersona),
            "select_theme" => Ok(Self::SelectTheme),
            "approve_plan" => Ok(Self::ApprovePlan),
            "approve_outline" => Ok(Self::ApproveOutline),
            _ => Err(format!("Invalid input type: {}", s)),
        }
    }
}

impl fmt::Display for InputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of `POST /api/generation/start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub keyword: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub article_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_length: Option<u32>,
}

/// Response from `POST /api/generation/start`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartResponse {
    pub process_id: String,
    #[serde(default)]
    pub status: Option<ProcessStatus>,
}

/// Payload staged by a `user_input_required` event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputRequest {
    pub input_type: Option<InputType>,
    pub personas: Vec<Persona>,
    pub themes: Vec<Theme>,
    pub research_plan: Option<Value>,
    pub outline: Option<Value>,
    pub message: Option<String>,
}

/// A `ProcessEvent` classified into the closed vocabulary the reconciler
/// dispatches on. Unrecognized types land in `Unknown` rather than being
/// dropped silently.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    StateUpdated(StateSnapshot),
    GenerationStarted,
    StepStarted { step: String },
    StepCompleted { step: String },
    UserInputRequired(InputRequest),
    UserInputResolved { input_type: Option<InputType> },
    ContentChunk { content: String },
    SectionCompleted(SectionPayload),
    GenerationCompleted { final_article: Option<Value>, article_id: Option<String> },
    GenerationError { message: String },
    GenerationPaused,
    GenerationCancelled,
    Unknown { event_type: String },
}

impl PipelineEvent {
    /// Classify a raw event. Payload fields are extracted tolerantly:
    /// a malformed payload degrades to empty fields, never to a panic.
    pub fn from_event(event: &ProcessEvent) -> Self {
        let data = &event.event_data;
        match event.event_type.as_str() {
            "process_state_updated" => {
                let snapshot: StateSnapshot =
                    serde_json::from_value(data.clone()).unwrap_or_default();
                Self::StateUpdated(snapshot)
            }
            "generation_started" => Self::GenerationStarted,
            "step_started" => Self::StepStarted {
                step: step_field(data),
            },
            "step_completed" => Self::StepCompleted {
                step: step_field(data),
            },
            "user_input_required" => {
                let input_type = str_field(data, "input_type").and_then(|s| s.parse().ok());
                Self::UserInputRequired(InputRequest {
                    input_type,
                    personas: vec_field(data, "personas"),
                    themes: vec_field(data, "themes"),
                    research_plan: value_field(data, "research_plan"),
                    outline: value_field(data, "outline"),
                    message: str_field(data, "message"),
                })
            }
            "user_input_resolved" => Self::UserInputResolved {
                input_type: str_field(data, "input_type").and_then(|s| s.parse().ok()),
            },
            "content_chunk" => Self::ContentChunk {
                content: str_field(data, "content")
                    .or_else(|| str_field(data, "chunk"))
                    .unwrap_or_default(),
            },
            "section_completed" => {
                let payload: SectionPayload =
                    serde_json::from_value(data.clone()).unwrap_or_default();
                Self::SectionCompleted(payload)
            }
            "generation_completed" => Self::GenerationCompleted {
                final_article: value_field(data, "final_article"),
                article_id: str_field(data, "article_id"),
            },
            "generation_error" => Self::GenerationError {
                message: str_field(data, "error")
                    .or_else(|| str_field(data, "message"))
                    .unwrap_or_else(|| "Generation failed".to_string()),
            },
            "generation_paused" => Self::GenerationPaused,
            "generation_cancelled" => Self::GenerationCancelled,
            other => Self::Unknown {
                event_type: other.to_string(),
            },
        }
    }
}

fn step_field(data: &Value) -> String {
    str_field(data, "step_name")
        .or_else(|| str_field(data, "step"))
        .unwrap_or_default()
}

fn str_field(data: &Value, key: &str) -> Option<String> {
    data.get(key)
        .and_then(Value::as_str)
        .map(ToString::to_string)
}

fn value_field(data: &Value, key: &str) -> Option<Value> {
    data.get(key).filter(|v| !v.is_null()).cloned()
}

fn vec_field<T: serde::de::DeserializeOwned>(data: &Value, key: &str) -> Vec<T> {
    data.get(key)
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default()
}
