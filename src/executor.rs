use std::time::Duration;

use serde_json::Value;
use tracing::{error, info, warn};

use crate::action::{Action, ScrollDirection};
use crate::error::{ActionError, BrowserError};
use crate::hands::BrowserSession;
use crate::keys::KeyChord;
use crate::types::{ActionOutcome, Args, DEFAULT_START_URL};

/// What to do when an action carries a `safety_decision`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyPolicy {
    /// Execute and flag the result as acknowledged (unattended operation).
    AutoAcknowledge,
    /// Skip the action and report it as refused.
    Refuse,
}

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    /// Grace period after the page settles, before the screenshot.
    pub settle_delay: Duration,
    pub wait_duration: Duration,
    pub search_url: String,
    pub safety: SafetyPolicy,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(500),
            wait_duration: Duration::from_secs(5),
            search_url: DEFAULT_START_URL.to_string(),
            safety: SafetyPolicy::AutoAcknowledge,
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum ExecutionError {
    #[error(transparent)]
    Action(#[from] ActionError),
    #[error(transparent)]
    Browser(#[from] BrowserError),
    #[error(transparent)]
    Key(#[from] crate::error::KeyError),
    #[error("action requires a safety confirmation and the policy refuses it")]
    SafetyRefused,
}

/// Executes one model action against a browser session.
pub struct ActionExecutor<'a> {
    session: &'a dyn BrowserSession,
    settings: &'a ExecutorSettings,
}

impl<'a> ActionExecutor<'a> {
    pub fn new(session: &'a dyn BrowserSession, settings: &'a ExecutorSettings) -> Self {
        Self { session, settings }
    }

    /// Never fails: errors are logged and reported in the outcome, and the
    /// page is always settled and captured afterwards.
    pub async fn execute(&self, name: &str, args: &Args) -> ActionOutcome {
        info!(action = name, "executing action");

        let mut safety_acknowledged = false;
        let result = match args.get("safety_decision") {
            Some(decision) if !decision.is_null() => {
                let explanation = decision
                    .get("explanation")
                    .and_then(Value::as_str)
                    .unwrap_or("No explanation");
                warn!(action = name, explanation, "safety decision required");
                match self.settings.safety {
                    SafetyPolicy::AutoAcknowledge => {
                        safety_acknowledged = true;
                        self.run(name, args).await
                    }
                    SafetyPolicy::Refuse => Err(ExecutionError::SafetyRefused),
                }
            }
            _ => self.run(name, args).await,
        };

        let error = match result {
            Ok(()) => None,
            Err(err) => {
                error!(action = name, "error executing action: {err}");
                Some(err.to_string())
            }
        };

        if let Err(err) = self.session.wait_for_load().await {
            warn!(action = name, "page did not settle: {err}");
        }
        if !self.settings.settle_delay.is_zero() {
            tokio::time::sleep(self.settings.settle_delay).await;
        }

        let screenshot = match self.session.screenshot().await {
            Ok(shot) => Some(shot),
            Err(err) => {
                warn!(action = name, "screenshot after action failed: {err}");
                None
            }
        };
        let url = self.session.current_url().await.unwrap_or_else(|err| {
            warn!(action = name, "could not read page url: {err}");
            String::new()
        });

        ActionOutcome {
            name: name.to_string(),
            url,
            safety_acknowledged,
            error,
            screenshot,
        }
    }

    async fn run(&self, name: &str, args: &Args) -> Result<(), ExecutionError> {
        let action = Action::parse(name, args)?;
        self.perform(&action).await
    }

    async fn perform(&self, action: &Action) -> Result<(), ExecutionError> {
        let session = self.session;
        let viewport = session.viewport();

        match action {
            // the browser is already open
            Action::OpenWebBrowser => {}
            Action::ClickAt { x, y } => session.click(viewport.point(*x, *y)).await?,
            Action::HoverAt { x, y } => session.mouse_move(viewport.point(*x, *y)).await?,
            Action::TypeTextAt {
                x,
                y,
                text,
                clear_before_typing,
                press_enter,
            } => {
                session.click(viewport.point(*x, *y)).await?;
                session.wait_for_load().await?;
                if *clear_before_typing {
                    self.chord("Control+A").await?;
                    self.chord("Delete").await?;
                }
                session.type_text(text).await?;
                session.wait_for_load().await?;
                if *press_enter {
                    self.chord("Enter").await?;
                }
            }
            Action::ScrollDocument { direction } => match direction {
                ScrollDirection::Down => self.chord("PageDown").await?,
                ScrollDirection::Up => self.chord("PageUp").await?,
                horizontal => {
                    let (dx, dy) = horizontal.delta(viewport.width / 2);
                    session.scroll_by(dx, dy).await?;
                }
            },
            Action::ScrollAt {
                x,
                y,
                direction,
                magnitude,
            } => {
                let at = viewport.point(*x, *y);
                let amount = viewport.scroll_magnitude(*direction, *magnitude);
                let (dx, dy) = direction.delta(amount);
                session.mouse_move(at).await?;
                session.wheel(at, dx, dy).await?;
            }
            Action::Navigate { url } => session.navigate(&normalize_url(url)).await?,
            Action::Search => session.navigate(&self.settings.search_url).await?,
            Action::GoBack => session.go_back().await?,
            Action::GoForward => session.go_forward().await?,
            Action::Wait5Seconds => tokio::time::sleep(self.settings.wait_duration).await,
            Action::KeyCombination { keys } => self.chord(keys).await?,
            Action::DragAndDrop {
                x,
                y,
                destination_x,
                destination_y,
            } => {
                let from = viewport.point(*x, *y);
                let to = viewport.point(*destination_x, *destination_y);
                session.mouse_move(from).await?;
                session.wait_for_load().await?;
                session.mouse_down(from).await?;
                session.wait_for_load().await?;
                session.mouse_move(to).await?;
                session.wait_for_load().await?;
                session.mouse_up(to).await?;
            }
            Action::Unrecognized { name } => {
                warn!(action = %name, "unknown action, ignoring");
            }
        }
        Ok(())
    }

    async fn chord(&self, keys: &str) -> Result<(), ExecutionError> {
        KeyChord::parse(keys)?.dispatch(self.session).await?;
        Ok(())
    }
}

const KNOWN_SCHEMES: [&str; 6] = ["http", "https", "about", "file", "data", "chrome"];

/// Prefixes `https://` unless the URL already names a known scheme.
pub fn normalize_url(raw: &str) -> String {
    let raw = raw.trim();
    match url::Url::parse(raw) {
        Ok(parsed) if KNOWN_SCHEMES.contains(&parsed.scheme()) => raw.to_string(),
        _ => format!("https://{raw}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_hosts_get_https() {
        assert_eq!(normalize_url("wikipedia.org"), "https://wikipedia.org");
        assert_eq!(normalize_url(" www.google.com/search?q=x "), "https://www.google.com/search?q=x");
        assert_eq!(normalize_url("localhost:8080"), "https://localhost:8080");
    }

    #[test]
    fn explicit_schemes_are_kept() {
        assert_eq!(normalize_url("http://example.com"), "http://example.com");
        assert_eq!(normalize_url("https://lucid.co"), "https://lucid.co");
        assert_eq!(normalize_url("about:blank"), "about:blank");
    }
}
