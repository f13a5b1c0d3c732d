//! HTTP front end: ad-hoc tasks, the diagram and ROI workflows, and an SSE
//! stream of agent progress.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{Method, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::agent::{AgentEvent, AgentLoop};
use crate::brain::InferenceClient;
use crate::config::AgentConfig;
use crate::error::{BrowserError, ValidationError};
use crate::hands::SessionFactory;
use crate::tasks::{DiagramRequest, RoiFigures, RoiRequest, extract_lucidchart_url, extract_roi_figures};
use crate::types::{ADHOC_MAX_TURNS, ActionRecord, TaskResult, TaskStatus, WORKFLOW_MAX_TURNS};

pub const SERVICE_NAME: &str = "browser-pilot";

impl AgentEvent {
    fn kind(&self) -> &'static str {
        match self {
            AgentEvent::TaskStarted { .. } => "task_started",
            AgentEvent::Thinking { .. } => "thinking",
            AgentEvent::ActionExecuted { .. } => "action_executed",
            AgentEvent::TaskComplete { .. } => "task_complete",
            AgentEvent::TaskError { .. } => "task_error",
            AgentEvent::TaskIncomplete { .. } => "task_incomplete",
        }
    }

    fn to_sse_event(&self) -> Event {
        Event::default()
            .event(self.kind())
            .json_data(self)
            .unwrap_or_else(|_| Event::default().event(self.kind()).data("{}"))
    }
}

/// Shared by all requests. Browsers are not shared: each task opens its own.
pub struct AppState {
    pub config: AgentConfig,
    pub client: Arc<dyn InferenceClient>,
    pub sessions: Arc<dyn SessionFactory>,
    pub events: broadcast::Sender<AgentEvent>,
}

impl AppState {
    pub fn new(
        config: AgentConfig,
        client: Arc<dyn InferenceClient>,
        sessions: Arc<dyn SessionFactory>,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            config,
            client,
            sessions,
            events,
        }
    }

    /// `label` stands in for `task` on the public event stream.
    async fn run(
        &self,
        task: &str,
        label: Option<String>,
        max_turns: usize,
    ) -> Result<TaskResult, ApiError> {
        let session = self.sessions.open().await?;
        let options = self
            .config
            .loop_options(max_turns, Some(self.config.start_url.clone()));
        let mut agent =
            AgentLoop::new(&*self.client, &*session, options).with_events(self.events.clone());
        if let Some(label) = label {
            agent = agent.with_label(label);
        }
        let result = agent.run(task).await?;
        info!(
            status = ?result.status,
            actions = result.actions_taken.len(),
            "task finished"
        );
        Ok(result)
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(health_handler).post(task_handler))
        .route("/diagram", post(diagram_handler))
        .route("/roi", post(roi_handler))
        .route("/events", get(sse_handler))
        .with_state(state)
        .layer(cors_layer())
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

#[derive(Debug)]
pub enum ApiError {
    Validation(ValidationError),
    Execution {
        message: String,
        actions_taken: Vec<ActionRecord>,
        final_response: Option<String>,
    },
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::Validation(err)
    }
}

impl From<BrowserError> for ApiError {
    fn from(err: BrowserError) -> Self {
        ApiError::Execution {
            message: err.to_string(),
            actions_taken: Vec::new(),
            final_response: None,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    status: &'static str,
    error: String,
    error_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    actions_taken: Option<Vec<ActionRecord>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    final_response: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Validation(err) => {
                warn!("rejected request: {err}");
                (
                    StatusCode::BAD_REQUEST,
                    ErrorBody {
                        status: "error",
                        error: err.to_string(),
                        error_type: "validation_error",
                        actions_taken: None,
                        final_response: None,
                    },
                )
            }
            ApiError::Execution {
                message,
                actions_taken,
                final_response,
            } => {
                error!("task failed: {message}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody {
                        status: "error",
                        error: message,
                        error_type: "execution_error",
                        actions_taken: Some(actions_taken),
                        final_response,
                    },
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

fn rejected(rejection: JsonRejection) -> ApiError {
    match rejection {
        JsonRejection::JsonDataError(err) => ValidationError::Invalid(err.body_text()).into(),
        _ => ValidationError::EmptyBody.into(),
    }
}

/// Workflows only report success when the agent finished on its own.
fn require_completed(result: TaskResult) -> Result<TaskResult, ApiError> {
    if result.is_completed() {
        return Ok(result);
    }
    let final_response =
        (!result.final_response.is_empty()).then(|| preview(&result.final_response, 500));
    let message = match (&result.status, &final_response) {
        (TaskStatus::Error, Some(response)) => response.clone(),
        _ => "Task did not complete successfully".to_string(),
    };
    Err(ApiError::Execution {
        message,
        actions_taken: result.actions_taken,
        final_response,
    })
}

fn preview(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

async fn health_handler() -> Json<Value> {
    Json(json!({"status": "healthy", "service": SERVICE_NAME}))
}

#[derive(Deserialize)]
struct TaskPayload {
    #[serde(default)]
    task: String,
}

async fn task_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<TaskPayload>, JsonRejection>,
) -> Result<Json<TaskResult>, ApiError> {
    let task = body.map(|Json(payload)| payload.task).unwrap_or_default();
    if task.trim().is_empty() {
        return Err(ValidationError::Invalid("No task provided".into()).into());
    }
    info!("POST / task: {task}");
    Ok(Json(state.run(&task, None, ADHOC_MAX_TURNS).await?))
}

#[derive(Debug, Serialize)]
struct DiagramResponse {
    status: &'static str,
    lucidchart_url: String,
    screenshot_b64: String,
    message: String,
    actions_taken: Vec<ActionRecord>,
}

async fn diagram_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<DiagramRequest>, JsonRejection>,
) -> Result<Json<DiagramResponse>, ApiError> {
    let Json(request) = body.map_err(rejected)?;
    let task = request.validate()?;
    let instructions = task.instructions(state.config.lucidchart.as_ref())?;
    info!(
        company = %task.company_name,
        products = task.products.len(),
        "POST /diagram"
    );

    let label = format!("diagram for {}", task.company_name);
    let result = require_completed(
        state
            .run(&instructions, Some(label), WORKFLOW_MAX_TURNS)
            .await?,
    )?;
    Ok(Json(DiagramResponse {
        status: "completed",
        lucidchart_url: extract_lucidchart_url(&result.final_response, &result.final_url),
        screenshot_b64: result.final_screenshot,
        message: task.summary(),
        actions_taken: result.actions_taken,
    }))
}

#[derive(Debug, Serialize)]
struct RoiResponse {
    status: &'static str,
    sheet_url: String,
    #[serde(flatten)]
    figures: RoiFigures,
    screenshot_b64: String,
    message: String,
    actions_taken: Vec<ActionRecord>,
}

async fn roi_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<RoiRequest>, JsonRejection>,
) -> Result<Json<RoiResponse>, ApiError> {
    let Json(request) = body.map_err(rejected)?;
    let task = request.validate()?;
    info!(company = %task.company_name, sheet = %task.sheet_url, "POST /roi");

    let label = format!("ROI model for {}", task.company_name);
    let result = require_completed(
        state
            .run(&task.instructions(), Some(label), WORKFLOW_MAX_TURNS)
            .await?,
    )?;
    let figures = match extract_roi_figures(&result.final_response) {
        Ok(figures) => figures,
        Err(err) => {
            warn!("could not extract ROI values: {err}");
            return Err(ApiError::Execution {
                message: format!("Could not extract ROI values from response: {err}"),
                actions_taken: result.actions_taken,
                final_response: Some(preview(&result.final_response, 1000)),
            });
        }
    };
    info!(?figures, "extracted ROI figures");

    Ok(Json(RoiResponse {
        status: "completed",
        message: task.summary(&figures),
        sheet_url: task.sheet_url,
        figures,
        screenshot_b64: result.final_screenshot,
        actions_taken: result.actions_taken,
    }))
}

async fn sse_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.events.subscribe();
    let stream =
        BroadcastStream::new(rx).filter_map(|result: Result<AgentEvent, _>| match result {
            Ok(event) => Some(Ok::<_, Infallible>(event.to_sse_event())),
            Err(_) => None,
        });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
