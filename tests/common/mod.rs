//! Shared fakes for integration tests.
//!
//! Each integration test file compiles common/ as its own module, so not
//! every helper is used in every file.
#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use browser_pilot::coords::{Pixel, Viewport};
use browser_pilot::error::{BrowserError, InferenceError};
use browser_pilot::types::{Args, Screenshot, Segment, Turn};
use browser_pilot::{
    BrowserSession, Candidate, Conversation, ExecutorSettings, InferenceClient, LoopOptions,
    ModelResponse, SessionFactory,
};

/// Replays canned responses in order, then `fallback` forever (or an error).
pub struct ScriptedClient {
    responses: Mutex<VecDeque<Result<ModelResponse, InferenceError>>>,
    fallback: Option<ModelResponse>,
    seen: Mutex<Vec<Conversation>>,
}

impl ScriptedClient {
    pub fn new(responses: Vec<ModelResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().map(Ok).collect()),
            fallback: None,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(err: InferenceError) -> Self {
        Self {
            responses: Mutex::new(VecDeque::from([Err(err)])),
            fallback: None,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn repeating(response: ModelResponse) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            fallback: Some(response),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Every conversation the client was asked about, in call order.
    pub fn seen(&self) -> Vec<Conversation> {
        self.seen.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl InferenceClient for ScriptedClient {
    async fn generate(&self, conversation: &Conversation) -> Result<ModelResponse, InferenceError> {
        self.seen.lock().unwrap().push(conversation.clone());
        if let Some(next) = self.responses.lock().unwrap().pop_front() {
            return next;
        }
        self.fallback
            .clone()
            .ok_or_else(|| InferenceError::Decode("script exhausted".into()))
    }
}

pub fn args(value: Value) -> Args {
    match value {
        Value::Object(map) => map,
        other => panic!("args must be an object, got {other}"),
    }
}

pub fn request(name: &str, value: Value) -> Segment {
    Segment::ActionRequest {
        name: name.to_string(),
        args: args(value),
        signature: None,
    }
}

pub fn reply(segments: Vec<Segment>) -> ModelResponse {
    ModelResponse {
        candidate: Some(Candidate {
            turn: Turn::responder(segments),
            malformed: false,
        }),
    }
}

pub fn text_reply(text: &str) -> ModelResponse {
    reply(vec![Segment::Text(text.to_string())])
}

pub fn malformed_reply() -> ModelResponse {
    ModelResponse {
        candidate: Some(Candidate {
            turn: Turn::responder(Vec::new()),
            malformed: true,
        }),
    }
}

pub fn no_candidates() -> ModelResponse {
    ModelResponse { candidate: None }
}

/// A browser that records every primitive it is asked to perform.
pub struct RecordingSession {
    log: Mutex<Vec<String>>,
    url: Mutex<String>,
    shots: Mutex<u8>,
    failing: HashSet<&'static str>,
    viewport: Viewport,
}

impl RecordingSession {
    pub fn new() -> Self {
        Self {
            log: Mutex::new(Vec::new()),
            url: Mutex::new("about:blank".to_string()),
            shots: Mutex::new(0),
            failing: HashSet::new(),
            viewport: Viewport::default(),
        }
    }

    /// Primitives named here (`click`, `navigate`, ...) fail.
    pub fn failing_on(operations: &[&'static str]) -> Self {
        Self {
            failing: operations.iter().copied().collect(),
            ..Self::new()
        }
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// Log entries without the settle/capture bookkeeping.
    pub fn inputs(&self) -> Vec<String> {
        self.log()
            .into_iter()
            .filter(|entry| !matches!(entry.as_str(), "wait" | "screenshot" | "url"))
            .collect()
    }

    pub fn screenshots_taken(&self) -> usize {
        self.log().iter().filter(|entry| *entry == "screenshot").count()
    }

    fn record(&self, operation: &'static str, entry: String) -> Result<(), BrowserError> {
        self.log.lock().unwrap().push(entry);
        if self.failing.contains(operation) {
            return Err(BrowserError::Input(format!("{operation} failed")));
        }
        Ok(())
    }
}

#[async_trait]
impl BrowserSession for RecordingSession {
    fn viewport(&self) -> Viewport {
        self.viewport
    }

    async fn mouse_move(&self, at: Pixel) -> Result<(), BrowserError> {
        self.record("mouse_move", format!("move {},{}", at.x, at.y))
    }

    async fn mouse_down(&self, at: Pixel) -> Result<(), BrowserError> {
        self.record("mouse_down", format!("down {},{}", at.x, at.y))
    }

    async fn mouse_up(&self, at: Pixel) -> Result<(), BrowserError> {
        self.record("mouse_up", format!("up {},{}", at.x, at.y))
    }

    async fn click(&self, at: Pixel) -> Result<(), BrowserError> {
        self.record("click", format!("click {},{}", at.x, at.y))
    }

    async fn wheel(&self, at: Pixel, delta_x: i64, delta_y: i64) -> Result<(), BrowserError> {
        self.record(
            "wheel",
            format!("wheel {},{} {delta_x},{delta_y}", at.x, at.y),
        )
    }

    async fn key_down(&self, key: &str) -> Result<(), BrowserError> {
        self.record("key_down", format!("key_down {key}"))
    }

    async fn key_up(&self, key: &str) -> Result<(), BrowserError> {
        self.record("key_up", format!("key_up {key}"))
    }

    async fn key_press(&self, key: &str) -> Result<(), BrowserError> {
        self.record("key_press", format!("key_press {key}"))
    }

    async fn type_text(&self, text: &str) -> Result<(), BrowserError> {
        self.record("type_text", format!("type {text}"))
    }

    async fn scroll_by(&self, delta_x: i64, delta_y: i64) -> Result<(), BrowserError> {
        self.record("scroll_by", format!("scroll_by {delta_x},{delta_y}"))
    }

    async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        self.record("navigate", format!("navigate {url}"))?;
        *self.url.lock().unwrap() = url.to_string();
        Ok(())
    }

    async fn go_back(&self) -> Result<(), BrowserError> {
        self.record("go_back", "go_back".to_string())
    }

    async fn go_forward(&self) -> Result<(), BrowserError> {
        self.record("go_forward", "go_forward".to_string())
    }

    async fn wait_for_load(&self) -> Result<(), BrowserError> {
        self.record("wait_for_load", "wait".to_string())
    }

    async fn screenshot(&self) -> Result<Screenshot, BrowserError> {
        self.log.lock().unwrap().push("screenshot".to_string());
        if self.failing.contains("screenshot") {
            return Err(BrowserError::Screenshot("capture failed".into()));
        }
        let mut shots = self.shots.lock().unwrap();
        *shots = shots.wrapping_add(1);
        Ok(Screenshot::png(vec![0x89, b'P', b'N', b'G', *shots]))
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        self.log.lock().unwrap().push("url".to_string());
        Ok(self.url.lock().unwrap().clone())
    }
}

/// Hands out fresh [`RecordingSession`]s.
pub struct FakeLauncher;

#[async_trait]
impl SessionFactory for FakeLauncher {
    async fn open(&self) -> Result<Box<dyn BrowserSession>, BrowserError> {
        Ok(Box::new(RecordingSession::new()))
    }
}

/// Executor settings without real-time waits.
pub fn instant_settings() -> ExecutorSettings {
    ExecutorSettings {
        settle_delay: Duration::ZERO,
        wait_duration: Duration::ZERO,
        ..ExecutorSettings::default()
    }
}

pub fn loop_options(max_turns: usize) -> LoopOptions {
    LoopOptions {
        max_turns,
        executor: instant_settings(),
        ..LoopOptions::default()
    }
}
