use std::str::FromStr;

use crate::agent::{DEFAULT_MAX_MALFORMED_RETRIES, LoopOptions};
use crate::coords::Viewport;
use crate::error::ConfigError;
use crate::executor::{ExecutorSettings, SafetyPolicy};
use crate::gemini::{DEFAULT_ENDPOINT, DEFAULT_MODEL};
use crate::hands::BrowserOptions;
use crate::tasks::Credentials;
use crate::types::{DEFAULT_START_URL, MAX_RECENT_TURNS_WITH_SCREENSHOTS, SCREEN_HEIGHT, SCREEN_WIDTH};

pub const DEFAULT_PORT: u16 = 8080;

/// Process settings, read once at startup.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub api_key: String,
    pub model: String,
    pub endpoint: String,
    pub port: u16,
    pub viewport: Viewport,
    pub headless: bool,
    pub start_url: String,
    pub screenshot_budget: usize,
    pub max_malformed_retries: usize,
    pub safety: SafetyPolicy,
    pub lucidchart: Option<Credentials>,
}

impl AgentConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let api_key = get("GEMINI_API_KEY").ok_or(ConfigError::Missing("GEMINI_API_KEY"))?;
        let lucidchart = match (get("LUCIDCHART_EMAIL"), get("LUCIDCHART_PASSWORD")) {
            (Some(email), Some(password)) => Some(Credentials { email, password }),
            _ => None,
        };

        Ok(Self {
            api_key,
            model: get("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            endpoint: get("GEMINI_ENDPOINT").unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            port: parse(&get, "PORT", DEFAULT_PORT)?,
            viewport: Viewport::new(
                parse(&get, "SCREEN_WIDTH", SCREEN_WIDTH)?,
                parse(&get, "SCREEN_HEIGHT", SCREEN_HEIGHT)?,
            ),
            headless: flag(&get, "HEADLESS", true)?,
            start_url: get("START_URL").unwrap_or_else(|| DEFAULT_START_URL.to_string()),
            screenshot_budget: parse(
                &get,
                "MAX_RECENT_TURNS_WITH_SCREENSHOTS",
                MAX_RECENT_TURNS_WITH_SCREENSHOTS,
            )?,
            max_malformed_retries: parse(
                &get,
                "MAX_MALFORMED_RETRIES",
                DEFAULT_MAX_MALFORMED_RETRIES,
            )?,
            safety: if flag(&get, "AUTO_ACKNOWLEDGE_SAFETY", true)? {
                SafetyPolicy::AutoAcknowledge
            } else {
                SafetyPolicy::Refuse
            },
            lucidchart,
        })
    }

    pub fn browser_options(&self) -> BrowserOptions {
        BrowserOptions {
            headless: self.headless,
            viewport: self.viewport,
        }
    }

    /// Loop settings for a task capped at `max_turns`, optionally opening `start_url`.
    pub fn loop_options(&self, max_turns: usize, start_url: Option<String>) -> LoopOptions {
        LoopOptions {
            max_turns,
            screenshot_budget: self.screenshot_budget,
            max_malformed_retries: self.max_malformed_retries,
            start_url,
            executor: ExecutorSettings {
                search_url: self.start_url.clone(),
                safety: self.safety,
                ..ExecutorSettings::default()
            },
        }
    }
}

fn parse<T, G>(get: &G, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid { name, value }),
    }
}

fn flag<G>(get: &G, name: &'static str, default: bool) -> Result<bool, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        None => Ok(default),
        Some(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid { name, value }),
        },
    }
}
