use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const SCREEN_WIDTH: u32 = 1440;
pub const SCREEN_HEIGHT: u32 = 900;

/// Action-result turns that keep their screenshots; older ones are pruned.
pub const MAX_RECENT_TURNS_WITH_SCREENSHOTS: usize = 3;

/// Turn cap for workflow tasks (diagram, ROI).
pub const WORKFLOW_MAX_TURNS: usize = 15;
/// Turn cap for ad-hoc tasks.
pub const ADHOC_MAX_TURNS: usize = 10;

pub const DEFAULT_START_URL: &str = "https://www.google.com";

pub type Args = Map<String, Value>;

/// Encoded image bytes captured at one point in time. Cloning is cheap.
#[derive(Clone, PartialEq, Eq)]
pub struct Screenshot {
    data: Arc<[u8]>,
    mime_type: &'static str,
}

impl Screenshot {
    pub fn png(data: Vec<u8>) -> Self {
        Self {
            data: data.into(),
            mime_type: "image/png",
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn mime_type(&self) -> &'static str {
        self.mime_type
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.data)
    }
}

impl std::fmt::Debug for Screenshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Screenshot({}, {} bytes)", self.mime_type, self.data.len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Task side: instructions, observations, action results.
    Initiator,
    /// The model.
    Responder,
}

/// What the task side reports back for one executed action request.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionOutcome {
    pub name: String,
    pub url: String,
    pub safety_acknowledged: bool,
    pub error: Option<String>,
    pub screenshot: Option<Screenshot>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Text(String),
    /// Responder text that came with a provider token; echoed back as received.
    SignedText {
        text: String,
        signature: String,
    },
    Image(Screenshot),
    ActionRequest {
        name: String,
        args: Args,
        /// Opaque provider token that must be echoed back with the request.
        signature: Option<String>,
    },
    ActionResult(ActionOutcome),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub role: Role,
    pub segments: Vec<Segment>,
}

impl Turn {
    pub fn initiator(segments: Vec<Segment>) -> Self {
        Self {
            role: Role::Initiator,
            segments,
        }
    }

    pub fn responder(segments: Vec<Segment>) -> Self {
        Self {
            role: Role::Responder,
            segments,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Action requests in emitted order.
    pub fn action_requests(&self) -> impl Iterator<Item = (&str, &Args)> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::ActionRequest { name, args, .. } => Some((name.as_str(), args)),
            _ => None,
        })
    }

    pub fn has_action_requests(&self) -> bool {
        self.action_requests().next().is_some()
    }

    /// All text segments joined by a single space.
    pub fn text(&self) -> String {
        self.segments
            .iter()
            .filter_map(|segment| match segment {
                Segment::Text(text) | Segment::SignedText { text, .. } if !text.is_empty() => {
                    Some(text.as_str())
                }
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Audit trail entry for one executed action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    #[serde(rename = "action")]
    pub name: String,
    pub args: Args,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub safety_acknowledged: bool,
}

impl ActionRecord {
    pub fn new(name: impl Into<String>, args: Args) -> Self {
        Self {
            name: name.into(),
            args,
            error: None,
            safety_acknowledged: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Completed,
    Error,
    InProgress,
}

/// Terminal summary of one task execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub status: TaskStatus,
    pub actions_taken: Vec<ActionRecord>,
    pub final_url: String,
    pub final_response: String,
    /// Base64-encoded PNG of the last page state.
    pub final_screenshot: String,
}

impl TaskResult {
    pub fn in_progress() -> Self {
        Self {
            status: TaskStatus::InProgress,
            actions_taken: Vec::new(),
            final_url: String::new(),
            final_response: String::new(),
            final_screenshot: String::new(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}
