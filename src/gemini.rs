//! Gemini `generateContent` client with the computer-use tool enabled.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::brain::{Candidate, InferenceClient, ModelResponse};
use crate::error::InferenceError;
use crate::history::Conversation;
use crate::types::{ActionOutcome, Args, Role, Screenshot, Segment, Turn};

pub const DEFAULT_MODEL: &str = "gemini-2.5-computer-use-preview-10-2025";
pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

const MALFORMED_FUNCTION_CALL: &str = "MALFORMED_FUNCTION_CALL";

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: u32,
    pub max_output_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            top_p: 0.95,
            top_k: 40,
            max_output_tokens: 8192,
        }
    }
}

// ── request ────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    tools: Vec<Tool>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    inline_data: Option<Blob>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_call: Option<FunctionCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_response: Option<FunctionResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thought_signature: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Blob {
    mime_type: &'static str,
    data: String,
}

impl From<&Screenshot> for Blob {
    fn from(shot: &Screenshot) -> Self {
        Self {
            mime_type: shot.mime_type(),
            data: shot.to_base64(),
        }
    }
}

#[derive(Debug, Serialize)]
struct FunctionCall {
    name: String,
    args: Args,
}

#[derive(Debug, Serialize)]
struct FunctionResponse {
    name: String,
    response: Map<String, Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    parts: Vec<FunctionResponsePart>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FunctionResponsePart {
    inline_data: Blob,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Tool {
    computer_use: ComputerUse,
}

#[derive(Debug, Serialize)]
struct ComputerUse {
    environment: &'static str,
}

// ── response ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<ResponseCandidate>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseCandidate {
    content: Option<ResponseContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    text: Option<String>,
    #[serde(default)]
    thought: bool,
    function_call: Option<ResponseFunctionCall>,
    thought_signature: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseFunctionCall {
    name: String,
    #[serde(default)]
    args: Option<Args>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: Option<u16>,
    message: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

// ── client ─────────────────────────────────────────────────────────────────

pub struct GeminiClient {
    http: Client,
    api_key: String,
    model: String,
    endpoint: String,
    generation: GenerationConfig,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, InferenceError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()?;
        Ok(Self {
            http,
            api_key: api_key.into(),
            model: model.into(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            generation: GenerationConfig::default(),
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_generation_config(mut self, generation: GenerationConfig) -> Self {
        self.generation = generation;
        self
    }

    fn url(&self) -> String {
        let model = self.model.strip_prefix("models/").unwrap_or(&self.model);
        format!("{}/models/{model}:generateContent", self.endpoint)
    }

    fn request(&self, conversation: &Conversation) -> GenerateContentRequest {
        GenerateContentRequest {
            contents: conversation.turns().iter().map(to_content).collect(),
            tools: vec![Tool {
                computer_use: ComputerUse {
                    environment: "ENVIRONMENT_BROWSER",
                },
            }],
            generation_config: self.generation,
        }
    }
}

#[async_trait]
impl InferenceClient for GeminiClient {
    async fn generate(&self, conversation: &Conversation) -> Result<ModelResponse, InferenceError> {
        info!(model = %self.model, turns = conversation.len(), "asking model for next step");

        let response = self
            .http
            .post(self.url())
            .header("x-goog-api-key", &self.api_key)
            .json(&self.request(conversation))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorEnvelope>(&body)
                .map(|envelope| envelope.error.message)
                .unwrap_or(body);
            return Err(InferenceError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| InferenceError::Decode(e.to_string()))?;
        if let Some(err) = body.error {
            return Err(InferenceError::Api {
                status: err.code.unwrap_or(500),
                message: err.message,
            });
        }

        let response = into_model_response(body);
        debug!(?response, "model response");
        Ok(response)
    }
}

fn to_content(turn: &Turn) -> Content {
    let role = match turn.role {
        Role::Initiator => "user",
        Role::Responder => "model",
    };
    Content {
        role,
        parts: turn.segments.iter().map(to_part).collect(),
    }
}

fn to_part(segment: &Segment) -> Part {
    match segment {
        Segment::Text(text) => Part {
            text: Some(text.clone()),
            ..Part::default()
        },
        Segment::SignedText { text, signature } => Part {
            text: Some(text.clone()),
            thought_signature: Some(signature.clone()),
            ..Part::default()
        },
        Segment::Image(shot) => Part {
            inline_data: Some(shot.into()),
            ..Part::default()
        },
        Segment::ActionRequest {
            name,
            args,
            signature,
        } => Part {
            function_call: Some(FunctionCall {
                name: name.clone(),
                args: args.clone(),
            }),
            thought_signature: signature.clone(),
            ..Part::default()
        },
        Segment::ActionResult(outcome) => Part {
            function_response: Some(function_response(outcome)),
            ..Part::default()
        },
    }
}

fn function_response(outcome: &ActionOutcome) -> FunctionResponse {
    let mut response = Map::new();
    response.insert("url".into(), Value::String(outcome.url.clone()));
    if outcome.safety_acknowledged {
        response.insert("safety_acknowledgement".into(), Value::String("true".into()));
    }
    if let Some(error) = &outcome.error {
        response.insert("error".into(), Value::String(error.clone()));
    }
    FunctionResponse {
        name: outcome.name.clone(),
        response,
        parts: outcome
            .screenshot
            .iter()
            .map(|shot| FunctionResponsePart {
                inline_data: shot.into(),
            })
            .collect(),
    }
}

fn into_model_response(body: GenerateContentResponse) -> ModelResponse {
    let Some(candidate) = body.candidates.into_iter().next() else {
        return ModelResponse { candidate: None };
    };

    let malformed = candidate.finish_reason.as_deref() == Some(MALFORMED_FUNCTION_CALL);
    let segments = candidate
        .content
        .map(|content| content.parts)
        .unwrap_or_default()
        .into_iter()
        // thought summaries are not part of the answer
        .filter(|part| !part.thought)
        .filter_map(|part| match (part.function_call, part.text, part.thought_signature) {
            (Some(call), _, signature) => Some(Segment::ActionRequest {
                name: call.name,
                args: call.args.unwrap_or_default(),
                signature,
            }),
            (None, Some(text), Some(signature)) => Some(Segment::SignedText { text, signature }),
            (None, Some(text), None) => Some(Segment::Text(text)),
            (None, None, _) => None,
        })
        .collect();

    ModelResponse {
        candidate: Some(Candidate {
            turn: Turn::responder(segments),
            malformed,
        }),
    }
}
