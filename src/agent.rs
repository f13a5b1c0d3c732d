//! The agent loop: ask the model, execute what it asks for, report back,
//! until it answers without action requests or the turn budget runs out.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::brain::InferenceClient;
use crate::error::BrowserError;
use crate::executor::{ActionExecutor, ExecutorSettings};
use crate::hands::BrowserSession;
use crate::history::Conversation;
use crate::types::{
    ADHOC_MAX_TURNS, ActionRecord, Args, MAX_RECENT_TURNS_WITH_SCREENSHOTS, Screenshot, Segment,
    TaskResult, TaskStatus, Turn, WORKFLOW_MAX_TURNS,
};

pub const DEFAULT_MAX_MALFORMED_RETRIES: usize = 3;

#[derive(Debug, Clone)]
pub struct LoopOptions {
    pub max_turns: usize,
    /// Action-result turns that keep their screenshots.
    pub screenshot_budget: usize,
    /// Consecutive malformed responses tolerated before giving up.
    pub max_malformed_retries: usize,
    /// Loaded before the first turn when set.
    pub start_url: Option<String>,
    pub executor: ExecutorSettings,
}

impl LoopOptions {
    pub fn adhoc() -> Self {
        Self {
            max_turns: ADHOC_MAX_TURNS,
            ..Self::default()
        }
    }

    pub fn workflow() -> Self {
        Self {
            max_turns: WORKFLOW_MAX_TURNS,
            ..Self::default()
        }
    }
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            max_turns: WORKFLOW_MAX_TURNS,
            screenshot_budget: MAX_RECENT_TURNS_WITH_SCREENSHOTS,
            max_malformed_retries: DEFAULT_MAX_MALFORMED_RETRIES,
            start_url: None,
            executor: ExecutorSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Completed,
    Error,
    MaxTurnsExceeded,
}

impl LoopState {
    pub fn status(self) -> TaskStatus {
        match self {
            LoopState::Completed => TaskStatus::Completed,
            LoopState::Error => TaskStatus::Error,
            LoopState::Running | LoopState::MaxTurnsExceeded => TaskStatus::InProgress,
        }
    }
}

/// Progress notifications, streamed to observers while a task runs.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AgentEvent {
    /// `task` is a caller label or a preview, never the full instructions.
    TaskStarted {
        task: String,
    },
    Thinking {
        turn: usize,
    },
    ActionExecuted {
        turn: usize,
        action: String,
        url: String,
        error: Option<String>,
        #[serde(skip)]
        screenshot: Option<Screenshot>,
    },
    TaskComplete {
        response: String,
    },
    TaskError {
        message: String,
    },
    TaskIncomplete {
        turns: usize,
    },
}

pub struct AgentLoop<'a> {
    client: &'a dyn InferenceClient,
    session: &'a dyn BrowserSession,
    options: LoopOptions,
    events: Option<broadcast::Sender<AgentEvent>>,
    label: Option<String>,
}

impl<'a> AgentLoop<'a> {
    pub fn new(
        client: &'a dyn InferenceClient,
        session: &'a dyn BrowserSession,
        options: LoopOptions,
    ) -> Self {
        Self {
            client,
            session,
            options,
            events: None,
            label: None,
        }
    }

    pub fn with_events(mut self, events: broadcast::Sender<AgentEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Names the task in logs and progress events in place of its text.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    fn emit(&self, event: AgentEvent) {
        if let Some(events) = &self.events {
            // no subscribers is fine
            let _ = events.send(event);
        }
    }

    /// Runs one task. Fails only if the opening page cannot be loaded or captured.
    pub async fn run(&self, task: &str) -> Result<TaskResult, BrowserError> {
        let label = self.label.clone().unwrap_or_else(|| preview(task));
        info!(task = %label, "starting task");
        self.emit(AgentEvent::TaskStarted { task: label });

        if let Some(url) = &self.options.start_url {
            self.session.navigate(url).await?;
            self.session.wait_for_load().await?;
        }
        if !self.options.executor.settle_delay.is_zero() {
            tokio::time::sleep(self.options.executor.settle_delay).await;
        }
        let opening = self.session.screenshot().await?;

        let mut conversation = Conversation::seeded(task, opening);
        let mut result = TaskResult::in_progress();
        let mut state = LoopState::Running;
        let mut malformed_streak = 0;
        let mut last_text = String::new();
        let executor = ActionExecutor::new(self.session, &self.options.executor);

        for turn in 1..=self.options.max_turns {
            info!(turn, "turn started");
            self.emit(AgentEvent::Thinking { turn });

            let response = match self.client.generate(&conversation).await {
                Ok(response) => response,
                Err(err) => {
                    error!(turn, "model call failed: {err}");
                    result.final_response = format!("API error: {err}");
                    state = LoopState::Error;
                    break;
                }
            };

            let Some(candidate) = response.candidate else {
                warn!(turn, "response has no candidates");
                result.final_response = "Empty response from model".to_string();
                state = LoopState::Error;
                break;
            };

            let requests: Vec<(String, Args)> = candidate
                .turn
                .action_requests()
                .map(|(name, args)| (name.to_string(), args.clone()))
                .collect();
            let text = candidate.turn.text();
            if !text.is_empty() {
                last_text.clone_from(&text);
            }
            if !candidate.turn.is_empty() {
                conversation.append(candidate.turn);
            }

            if candidate.malformed && requests.is_empty() {
                malformed_streak += 1;
                if malformed_streak > self.options.max_malformed_retries {
                    error!(turn, malformed_streak, "model keeps producing malformed action requests");
                    result.final_response = format!(
                        "Model produced {malformed_streak} malformed action requests in a row"
                    );
                    state = LoopState::Error;
                    break;
                }
                warn!(turn, "malformed function call, retrying");
                continue;
            }
            malformed_streak = 0;

            if requests.is_empty() {
                info!(turn, response = %preview(&text), "task completed");
                result.final_response = text;
                state = LoopState::Completed;
                break;
            }

            let mut outcomes = Vec::with_capacity(requests.len());
            for (name, args) in requests {
                let outcome = executor.execute(&name, &args).await;
                self.emit(AgentEvent::ActionExecuted {
                    turn,
                    action: name.clone(),
                    url: outcome.url.clone(),
                    error: outcome.error.clone(),
                    screenshot: outcome.screenshot.clone(),
                });
                result.actions_taken.push(ActionRecord {
                    name,
                    args,
                    error: outcome.error.clone(),
                    safety_acknowledged: outcome.safety_acknowledged,
                });
                outcomes.push(Segment::ActionResult(outcome));
            }
            conversation.append(Turn::initiator(outcomes));
            conversation = conversation.prune_visual_context(self.options.screenshot_budget);
        }

        if state == LoopState::Running {
            warn!(
                max_turns = self.options.max_turns,
                actions = result.actions_taken.len(),
                "turn budget exhausted before the task completed"
            );
            result.final_response = last_text;
            state = LoopState::MaxTurnsExceeded;
        }

        match state {
            LoopState::Completed => self.emit(AgentEvent::TaskComplete {
                response: result.final_response.clone(),
            }),
            LoopState::Error => self.emit(AgentEvent::TaskError {
                message: result.final_response.clone(),
            }),
            _ => self.emit(AgentEvent::TaskIncomplete {
                turns: self.options.max_turns,
            }),
        }

        self.capture_final_state(&mut result).await;
        result.status = state.status();
        Ok(result)
    }

    /// Best effort: failures leave the fields empty.
    async fn capture_final_state(&self, result: &mut TaskResult) {
        match self.session.screenshot().await {
            Ok(shot) => result.final_screenshot = shot.to_base64(),
            Err(err) => warn!("final screenshot failed: {err}"),
        }
        match self.session.current_url().await {
            Ok(url) => result.final_url = url,
            Err(err) => warn!("final url unavailable: {err}"),
        }
    }
}

fn preview(text: &str) -> String {
    text.chars().take(100).collect()
}
