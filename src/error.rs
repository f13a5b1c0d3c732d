use thiserror::Error;

/// Failures reported by the browser layer.
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("browser launch failed: {0}")]
    Launch(String),

    #[error("input dispatch failed: {0}")]
    Input(String),

    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("screenshot capture failed: {0}")]
    Screenshot(String),

    #[error("script evaluation failed: {0}")]
    Script(String),

    #[error("unknown key: {0}")]
    UnknownKey(String),

    #[error("browser worker panicked: {0}")]
    Worker(String),
}

/// A model-emitted action request that cannot be turned into an [`crate::action::Action`].
#[derive(Debug, Error, PartialEq)]
pub enum ActionError {
    #[error("{action} requires argument '{argument}'")]
    MissingArgument {
        action: &'static str,
        argument: &'static str,
    },

    #[error("{action}: invalid value for '{argument}': {value}")]
    InvalidArgument {
        action: &'static str,
        argument: &'static str,
        value: String,
    },
}

#[derive(Debug, Error, PartialEq)]
pub enum KeyError {
    #[error("key combination is empty")]
    Empty,

    #[error("key combination '{0}' contains an empty key")]
    EmptyKey(String),
}

/// Failures of one inference call.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("could not decode model response: {0}")]
    Decode(String),

    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<InferenceError>,
    },
}

impl InferenceError {
    /// Network hiccups, timeouts, rate limits and server errors.
    pub fn is_transient(&self) -> bool {
        match self {
            InferenceError::Transport(_) => true,
            InferenceError::Api { status, .. } => {
                *status == 408 || *status == 429 || *status >= 500
            }
            InferenceError::Decode(_) | InferenceError::Exhausted { .. } => false,
        }
    }
}

impl From<reqwest::Error> for InferenceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            InferenceError::Decode(err.to_string())
        } else {
            InferenceError::Transport(err.to_string())
        }
    }
}

/// Structured result extraction failed; `raw` keeps the model text for diagnosis.
#[derive(Debug, Error)]
#[error("{message}: {}", preview(.raw))]
pub struct ExtractionError {
    pub message: String,
    pub raw: String,
}

fn preview(raw: &str) -> String {
    let head: String = raw.chars().take(200).collect();
    if head.len() < raw.len() {
        format!("{head}...")
    } else {
        head
    }
}

/// Rejected workflow request.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("No JSON data provided")]
    EmptyBody,

    #[error("Missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),

    #[error("{0}")]
    Invalid(String),

    #[error("credentials not configured: {0}")]
    MissingCredentials(&'static str),
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("environment variable {0} is not set")]
    Missing(&'static str),

    #[error("environment variable {name} has invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(InferenceError::Transport("reset".into()).is_transient());
        for status in [408, 429, 500, 503] {
            let err = InferenceError::Api {
                status,
                message: String::new(),
            };
            assert!(err.is_transient(), "{status} should be transient");
        }
        let bad_request = InferenceError::Api {
            status: 400,
            message: "bad".into(),
        };
        assert!(!bad_request.is_transient());
        assert!(!InferenceError::Decode("eof".into()).is_transient());
    }

    #[test]
    fn extraction_error_truncates_raw_text() {
        let err = ExtractionError {
            message: "Could not extract ROI values".into(),
            raw: "x".repeat(500),
        };
        let rendered = err.to_string();
        assert!(rendered.ends_with("..."));
        assert_eq!(err.raw.len(), 500);
    }

    #[test]
    fn missing_fields_are_listed() {
        let err = ValidationError::MissingFields(vec!["company_name", "products"]);
        assert_eq!(
            err.to_string(),
            "Missing required fields: company_name, products"
        );
    }
}
