use std::collections::{BTreeMap, HashMap};

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
    app_state::{AppState, Status},
    cfr::{self, CfrLink},
    chat::{self, ChatError, Exchange},
    llm::FlowError,
    models::{BotResponse, ChatMessage, ChatSession, InputParameter, InputValue},
    regulatory::{self, ParseDocumentInput, ParseDocumentOutput},
    rwa::{self, CalculateRwaInput, CalculateRwaOutput, ProcessRwaTextInput, ProcessRwaTextOutput},
    store::SessionStore,
};

// --- Errores de la API ---

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    /// Fallo del modelo o salida inválida.
    #[error("{0}")]
    Upstream(String),
    #[error("{0}")]
    Internal(String),
}

impl From<FlowError> for ApiError {
    fn from(err: FlowError) -> Self {
        match err {
            FlowError::InvalidInput(msg) => Self::BadRequest(msg),
            other => Self::Upstream(other.to_string()),
        }
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::Flow(flow) => flow.into(),
            ChatError::NotFound(msg) => Self::NotFound(msg),
            ChatError::Store(e) => Self::Internal(e.to_string()),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("Error en la API: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

// --- Payloads y Respuestas de la API ---

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AskPayload {
    session_id: Option<String>,
    question: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AskResponse {
    #[serde(flatten)]
    exchange: Exchange,
    reference_links: Vec<CfrLink>,
}

#[derive(Deserialize)]
pub struct EditResponsePayload {
    response: BotResponse,
}

#[derive(Deserialize, Default)]
pub struct SummaryPayload {
    #[serde(default)]
    regenerate: bool,
}

#[derive(Serialize)]
pub struct SummaryResponse {
    summary: String,
}

/// Admite valores ya tipados (`providedInputs`) o los valores crudos del
/// formulario junto a los parámetros que los validan.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculatePayload {
    rwa_context: String,
    #[serde(default)]
    provided_inputs: Option<BTreeMap<String, InputValue>>,
    #[serde(default)]
    required_inputs: Vec<InputParameter>,
    #[serde(default)]
    values: Option<HashMap<String, String>>,
}

#[derive(Deserialize)]
pub struct LinksPayload {
    text: String,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/status", get(status_handler))
        .route("/api/chat/welcome", get(welcome_handler))
        .route("/api/chat/ask", post(ask_handler))
        .route("/api/sessions", get(list_sessions_handler).delete(clear_sessions_handler))
        .route(
            "/api/sessions/:id",
            get(get_session_handler).delete(delete_session_handler),
        )
        .route("/api/sessions/:id/summary", post(summary_handler))
        .route("/api/sessions/:id/messages/:message_id", put(edit_response_handler))
        .route("/api/rwa/process", post(process_rwa_handler))
        .route("/api/rwa/calculate", post(calculate_rwa_handler))
        .route("/api/regulatory/parse", post(parse_document_handler))
        .route("/api/cfr/links", post(cfr_links_handler))
        .with_state(app_state)
}

// --- Handlers ---

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> ApiResult<Status> {
    let mut store = lock_store(&state)?;
    Ok(Json(Status {
        llm_provider: format!("{:?}", state.config.llm_provider),
        chat_model: state.config.llm_chat_model.clone(),
        session_count: store.list_sessions()?.len(),
        storage_keys: store.storage_keys()?,
    }))
}

#[axum::debug_handler]
async fn welcome_handler() -> Json<ChatMessage> {
    Json(chat::welcome_message())
}

#[axum::debug_handler]
async fn ask_handler(
    State(state): State<AppState>,
    Json(payload): Json<AskPayload>,
) -> ApiResult<AskResponse> {
    let session_id = payload
        .session_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let exchange = chat::ask(
        state.model.as_ref(),
        &state.store,
        &session_id,
        Utc::now(),
        &payload.question,
        state.config.history_turns,
    )
    .await?;

    let reference_links = exchange
        .bot_message
        .bot_response()
        .map(|r| cfr::find_cfr_links(&r.references))
        .unwrap_or_default();

    Ok(Json(AskResponse {
        exchange,
        reference_links,
    }))
}

#[axum::debug_handler]
async fn edit_response_handler(
    State(state): State<AppState>,
    Path((session_id, message_id)): Path<(String, String)>,
    Json(payload): Json<EditResponsePayload>,
) -> ApiResult<ChatMessage> {
    let message = chat::save_edited_response(&state.store, &session_id, &message_id, payload.response)?;
    Ok(Json(message))
}

#[axum::debug_handler]
async fn list_sessions_handler(State(state): State<AppState>) -> ApiResult<Vec<ChatSession>> {
    let sessions = lock_store(&state)?.list_sessions()?;
    Ok(Json(sessions))
}

#[axum::debug_handler]
async fn get_session_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<ChatSession> {
    let session = lock_store(&state)?.get_session(&session_id)?;
    session
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Sesión no encontrada: {session_id}")))
}

#[axum::debug_handler]
async fn delete_session_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let deleted = lock_store(&state)?.delete_session(&session_id)?;
    if deleted {
        info!("Sesión {session_id} borrada");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Sesión no encontrada: {session_id}")))
    }
}

#[axum::debug_handler]
async fn clear_sessions_handler(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    lock_store(&state)?.clear()?;
    info!("Historial de chat vaciado");
    Ok(StatusCode::NO_CONTENT)
}

#[axum::debug_handler]
async fn summary_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    payload: Option<Json<SummaryPayload>>,
) -> ApiResult<SummaryResponse> {
    let regenerate = payload.map(|Json(p)| p.regenerate).unwrap_or_default();
    let summary =
        chat::summarize_stored_session(state.model.as_ref(), &state.store, &session_id, regenerate)
            .await?;
    Ok(Json(SummaryResponse { summary }))
}

#[axum::debug_handler]
async fn process_rwa_handler(
    State(state): State<AppState>,
    Json(payload): Json<ProcessRwaTextInput>,
) -> ApiResult<ProcessRwaTextOutput> {
    Ok(Json(rwa::process_rwa_text(state.model.as_ref(), payload).await?))
}

#[axum::debug_handler]
async fn calculate_rwa_handler(
    State(state): State<AppState>,
    Json(payload): Json<CalculatePayload>,
) -> ApiResult<CalculateRwaOutput> {
    if payload.rwa_context.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "Lógica no identificada. Procesa primero el texto.".into(),
        ));
    }

    let provided_inputs = match (payload.values, payload.provided_inputs) {
        (Some(values), _) => rwa::collect_form_inputs(&payload.required_inputs, &values)?,
        (None, Some(provided)) => provided,
        (None, None) => BTreeMap::new(),
    };

    let output = rwa::calculate_rwa(
        state.model.as_ref(),
        CalculateRwaInput {
            rwa_context: payload.rwa_context,
            provided_inputs,
        },
    )
    .await?;
    Ok(Json(output))
}

#[axum::debug_handler]
async fn parse_document_handler(
    State(state): State<AppState>,
    Json(payload): Json<ParseDocumentInput>,
) -> ApiResult<ParseDocumentOutput> {
    let url = regulatory::validate_document_url(&payload.document_url)?;

    let document_text = if state.config.fetch_documents {
        match state.documents.fetch(&url).await {
            Ok(text) if !text.is_empty() => Some(text),
            Ok(_) => None,
            Err(e) => {
                warn!("No se pudo descargar {url}: {e}. Se continúa sólo con la URL.");
                None
            }
        }
    } else {
        None
    };

    let output =
        regulatory::parse_regulatory_document(state.model.as_ref(), payload, document_text.as_deref())
            .await?;
    Ok(Json(output))
}

#[axum::debug_handler]
async fn cfr_links_handler(Json(payload): Json<LinksPayload>) -> Json<Vec<CfrLink>> {
    Json(cfr::find_cfr_links(&payload.text))
}

// --- Utilidades ---

fn lock_store(state: &AppState) -> Result<std::sync::MutexGuard<'_, SessionStore>, ApiError> {
    state
        .store
        .lock()
        .map_err(|_| ApiError::Internal("El almacén de sesiones está envenenado".into()))
}
