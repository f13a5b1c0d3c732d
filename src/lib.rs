//! A computer-use browser agent: a model looks at screenshots, asks for
//! clicks, keystrokes and navigations, and this crate carries them out in a
//! real Chrome until the task is done.

pub mod action;
pub mod agent;
pub mod brain;
pub mod config;
pub mod coords;
pub mod error;
pub mod executor;
pub mod face;
pub mod gemini;
pub mod hands;
pub mod history;
pub mod keys;
pub mod tasks;
pub mod types;

pub use agent::{AgentEvent, AgentLoop, LoopOptions, LoopState};
pub use brain::{Candidate, InferenceClient, ModelResponse, RetryPolicy, RetryingClient};
pub use config::AgentConfig;
pub use executor::{ActionExecutor, ExecutorSettings, SafetyPolicy};
pub use gemini::GeminiClient;
pub use hands::{BrowserOptions, BrowserSession, ChromeLauncher, ChromeSession, SessionFactory};
pub use history::Conversation;
pub use types::{ActionRecord, Screenshot, TaskResult, TaskStatus};
