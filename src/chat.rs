//! Flujos del chat: responder preguntas, corregir respuestas y resumir sesiones,
//! más la orquestación sobre el almacén de sesiones.
//!
//! Flujo de una pregunta:
//!   1. Se valida la pregunta (no vacía).
//!   2. Se arma el historial con los últimos N pares usuario/bot de la sesión.
//!   3. Se invoca el flujo de respuesta.
//!   4. Sólo si el modelo responde se persisten el mensaje del usuario y el del bot;
//!      un fallo deja la sesión intacta.

use std::sync::Mutex;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::{
    llm::{self, FlowError, PromptModel, PromptRequest},
    models::{BotResponse, ChatMessage, ChatSession, ConversationTurn, MessageContent, WELCOME_MESSAGE_ID},
    prompts,
    store::SessionStore,
};

pub const EMPTY_SESSION_SUMMARY: &str = "This session has no messages to summarize.";

const USER_SPEAKER: &str = "User";
const HISTORY_BOT_SPEAKER: &str = "AI Summary";
const SUMMARY_BOT_SPEAKER: &str = "AI";

// --- Flujo de respuesta ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerQuestionInput {
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_history_items: Option<Vec<ConversationTurn>>,
}

pub async fn answer_question(
    model: &dyn PromptModel,
    input: AnswerQuestionInput,
) -> Result<BotResponse, FlowError> {
    if input.question.trim().is_empty() {
        return Err(FlowError::InvalidInput("La pregunta no puede estar vacía.".into()));
    }

    let request = PromptRequest {
        flow: "answerRegQQuestion",
        preamble: llm::structured_preamble::<BotResponse>(&prompts::answer_preamble()),
        prompt: prompts::render_answer_prompt(
            &input.question,
            input.conversation_history_items.as_deref(),
        ),
        input: to_input_value(&input)?,
    };
    llm::invoke(model, request).await
}

// --- Flujo de corrección ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrectAnswerInput {
    pub original_answer: String,
    pub edited_answer: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrectAnswerOutput {
    pub saved_answer: String,
}

/// No llama al modelo ni persiste nada: la respuesta editada es la guardada.
pub fn correct_answer(input: CorrectAnswerInput) -> CorrectAnswerOutput {
    CorrectAnswerOutput {
        saved_answer: input.edited_answer,
    }
}

/// Aplana una respuesta estructurada para el flujo de corrección.
pub fn stringify_response(res: &BotResponse) -> String {
    fn or_na(value: Option<&str>) -> &str {
        value.filter(|v| !v.is_empty()).unwrap_or("N/A")
    }
    format!(
        "Summary: {}\nExplanation: {}\nReferences: {}\nCalculation Logic: {}\nReference Tables: {}\nCalculation Examples: {}",
        res.summary,
        res.explanation,
        or_na(Some(res.references.as_str())),
        or_na(res.calculation_logic.as_deref()),
        or_na(res.reference_tables.as_deref()),
        or_na(res.calculation_examples.as_deref()),
    )
}

// --- Flujo de resumen ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizeSessionInput {
    pub messages: Vec<ConversationTurn>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SummarizeSessionOutput {
    /// A concise summary (1-2 sentences) of the chat session.
    pub summary: String,
}

pub async fn summarize_session(
    model: &dyn PromptModel,
    input: SummarizeSessionInput,
) -> Result<SummarizeSessionOutput, FlowError> {
    if input.messages.is_empty() {
        return Ok(SummarizeSessionOutput {
            summary: EMPTY_SESSION_SUMMARY.to_string(),
        });
    }

    let request = PromptRequest {
        flow: "summarizeChatSession",
        preamble: llm::structured_preamble::<SummarizeSessionOutput>(prompts::SUMMARIZE_PREAMBLE),
        prompt: prompts::render_summarize_prompt(&input.messages),
        input: to_input_value(&input)?,
    };
    llm::invoke(model, request).await
}

// --- Orquestación ---

/// Errores de las operaciones de chat que tocan el almacén.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error(transparent)]
    Flow(#[from] FlowError),
    #[error("{0}")]
    NotFound(String),
    #[error("Error en el almacén de sesiones: {0}")]
    Store(#[from] anyhow::Error),
}

/// Resultado de una pregunta respondida y persistida.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Exchange {
    pub session_id: String,
    pub user_message: ChatMessage,
    pub bot_message: ChatMessage,
}

/// Mensaje de bienvenida con preguntas sugeridas; no se persiste.
pub fn welcome_message() -> ChatMessage {
    ChatMessage {
        id: WELCOME_MESSAGE_ID.to_string(),
        timestamp: Utc::now(),
        content: MessageContent::Bot {
            response: BotResponse {
                summary: "Welcome to the Basel 3 SA Chatbot!".into(),
                explanation: "I can help you with questions about U.S. banking regulations (CFR Title 12), focusing on Risk-Weighted Assets (RWA) calculations based on the standardized approach. Ask me anything, or try one of these suggestions:".into(),
                references: prompts::CFR_PART_217_URL.into(),
                calculation_logic: None,
                reference_tables: None,
                calculation_examples: None,
            },
            suggestions: Some(vec![
                "What is the risk weight for a AAA-rated corporate exposure?".into(),
                "Explain the standardized approach for credit risk.".into(),
                "How are off-balance sheet items treated for RWA calculation?".into(),
                "Detail the RWA for residential mortgage exposures under the standardized approach.".into(),
            ]),
        },
        is_editing: false,
        edited: false,
    }
}

/// Historial para el prompt: últimos `max_turns` pares, sin la bienvenida.
/// Del bot sólo se envía el resumen.
pub fn build_history(messages: &[ChatMessage], max_turns: usize) -> Vec<ConversationTurn> {
    let relevant: Vec<&ChatMessage> = messages
        .iter()
        .filter(|m| m.id != WELCOME_MESSAGE_ID)
        .collect();
    let start = relevant.len().saturating_sub(max_turns.saturating_mul(2));

    relevant[start..]
        .iter()
        .map(|m| match &m.content {
            MessageContent::User { text } => ConversationTurn::new(USER_SPEAKER, text.clone()),
            MessageContent::Bot { response, .. } => {
                ConversationTurn::new(HISTORY_BOT_SPEAKER, response.summary.clone())
            }
        })
        .collect()
}

/// Turnos completos de una sesión para el flujo de resumen.
fn summary_turns(session: &ChatSession) -> Vec<ConversationTurn> {
    session
        .messages
        .iter()
        .map(|m| match &m.content {
            MessageContent::User { text } => ConversationTurn::new(USER_SPEAKER, text.clone()),
            MessageContent::Bot { response, .. } => {
                ConversationTurn::new(SUMMARY_BOT_SPEAKER, response.summary.clone())
            }
        })
        .collect()
}

/// Responde una pregunta dentro de una sesión y persiste el intercambio.
pub async fn ask(
    model: &dyn PromptModel,
    store: &Mutex<SessionStore>,
    session_id: &str,
    session_start: DateTime<Utc>,
    question: &str,
    max_turns: usize,
) -> Result<Exchange, ChatError> {
    if question.trim().is_empty() {
        return Err(FlowError::InvalidInput("La pregunta no puede estar vacía.".into()).into());
    }

    let previous = lock(store)?.get_session(session_id)?;
    let history = previous
        .as_ref()
        .map(|s| build_history(&s.messages, max_turns))
        .unwrap_or_default();

    let user_message = ChatMessage::user(question, Utc::now());

    let response = answer_question(
        model,
        AnswerQuestionInput {
            question: question.to_string(),
            conversation_history_items: if history.is_empty() { None } else { Some(history) },
        },
    )
    .await
    .map_err(|e| {
        error!("Error obteniendo la respuesta del bot para la sesión {session_id}: {e}");
        e
    })?;

    let bot_message = ChatMessage::bot(response, Utc::now());
    {
        let mut store = lock(store)?;
        store.append_message(session_id, user_message.clone(), Some(session_start))?;
        store.append_message(session_id, bot_message.clone(), Some(session_start))?;
    }
    info!("Pregunta respondida en la sesión {session_id}");

    Ok(Exchange {
        session_id: session_id.to_string(),
        user_message,
        bot_message,
    })
}

/// Sustituye la respuesta de un mensaje del bot por la versión editada.
pub fn save_edited_response(
    store: &Mutex<SessionStore>,
    session_id: &str,
    message_id: &str,
    edited: BotResponse,
) -> Result<ChatMessage, ChatError> {
    let mut store = lock(store)?;
    let session = store
        .get_session(session_id)?
        .ok_or_else(|| ChatError::NotFound(format!("Sesión no encontrada: {session_id}")))?;

    let mut message = session
        .messages
        .into_iter()
        .find(|m| m.id == message_id && m.bot_response().is_some())
        .ok_or_else(|| ChatError::NotFound(format!("Mensaje original no encontrado: {message_id}")))?;

    let MessageContent::Bot { response, .. } = &mut message.content else {
        return Err(ChatError::NotFound(format!("Mensaje original no encontrado: {message_id}")));
    };

    let saved = correct_answer(CorrectAnswerInput {
        original_answer: stringify_response(response),
        edited_answer: stringify_response(&edited),
    });
    info!("Respuesta {message_id} corregida ({} caracteres)", saved.saved_answer.len());

    *response = edited;
    message.timestamp = Utc::now();
    message.is_editing = false;
    message.edited = true;

    store.replace_message(session_id, message.clone())?;
    Ok(message)
}

/// Devuelve el resumen de la sesión, calculándolo sólo si no existe o se pide
/// regenerarlo.
pub async fn summarize_stored_session(
    model: &dyn PromptModel,
    store: &Mutex<SessionStore>,
    session_id: &str,
    regenerate: bool,
) -> Result<String, ChatError> {
    let session = lock(store)?
        .get_session(session_id)?
        .ok_or_else(|| ChatError::NotFound(format!("Sesión no encontrada: {session_id}")))?;

    if let (Some(summary), false) = (&session.summary, regenerate) {
        return Ok(summary.clone());
    }

    let output = summarize_session(
        model,
        SummarizeSessionInput {
            messages: summary_turns(&session),
        },
    )
    .await?;

    lock(store)?.update_summary(session_id, &output.summary)?;
    Ok(output.summary)
}

fn lock(store: &Mutex<SessionStore>) -> Result<std::sync::MutexGuard<'_, SessionStore>, ChatError> {
    store
        .lock()
        .map_err(|_| ChatError::Store(anyhow!("El almacén de sesiones está envenenado")))
}

fn to_input_value<T: Serialize>(input: &T) -> Result<serde_json::Value, FlowError> {
    serde_json::to_value(input).map_err(|e| FlowError::InvalidInput(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::FakeModel;
    use serde_json::json;

    fn bot_reply(summary: &str) -> serde_json::Value {
        json!({
            "summary": summary,
            "explanation": "Corporate exposures rated AAA receive a 100 percent risk weight under the U.S. standardized approach.",
            "references": "12 CFR 217.32(f)",
        })
    }

    fn response(summary: &str) -> BotResponse {
        serde_json::from_value(bot_reply(summary)).unwrap()
    }

    #[tokio::test]
    async fn first_question_sends_no_history_and_persists_exchange() {
        let model = FakeModel::replying(bot_reply("100% risk weight"));
        let store = Mutex::new(SessionStore::in_memory());
        let question = "What is the risk weight for a AAA-rated corporate exposure?";

        let exchange = ask(&model, &store, "s1", Utc::now(), question, 5).await.unwrap();

        let request = model.last_request();
        assert_eq!(request.flow, "answerRegQQuestion");
        assert_eq!(request.input, json!({ "question": question }));
        assert!(request.input.get("conversationHistoryItems").is_none());

        let session = store.lock().unwrap().get_session("s1").unwrap().unwrap();
        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.messages[1], exchange.bot_message);
        assert_eq!(exchange.bot_message.bot_response().unwrap().summary, "100% risk weight");
    }

    #[tokio::test]
    async fn follow_up_sends_user_text_and_bot_summaries() {
        let model = FakeModel::replying(bot_reply("first answer"));
        let store = Mutex::new(SessionStore::in_memory());
        let start = Utc::now();
        ask(&model, &store, "s1", start, "first question", 5).await.unwrap();
        ask(&model, &store, "s1", start, "second question", 5).await.unwrap();

        let request = model.last_request();
        assert_eq!(
            request.input["conversationHistoryItems"],
            json!([
                {"speaker": "User", "text": "first question"},
                {"speaker": "AI Summary", "text": "first answer"},
            ])
        );
    }

    #[tokio::test]
    async fn failed_answer_leaves_session_untouched() {
        let model = FakeModel::failing("provider down");
        let store = Mutex::new(SessionStore::in_memory());

        let err = ask(&model, &store, "s1", Utc::now(), "question", 5).await.unwrap_err();
        assert!(matches!(err, ChatError::Flow(FlowError::Model { .. })));
        assert!(store.lock().unwrap().get_session("s1").unwrap().is_none());
    }

    #[tokio::test]
    async fn blank_question_never_reaches_the_model() {
        let model = FakeModel::replying(bot_reply("x"));
        let store = Mutex::new(SessionStore::in_memory());

        let err = ask(&model, &store, "s1", Utc::now(), "   ", 5).await.unwrap_err();
        assert!(matches!(err, ChatError::Flow(FlowError::InvalidInput(_))));
        assert_eq!(model.calls(), 0);
    }

    #[test]
    fn history_is_limited_to_recent_pairs_and_skips_welcome() {
        let now = Utc::now();
        let mut messages = vec![welcome_message()];
        for i in 0..4 {
            messages.push(ChatMessage::user(format!("q{i}"), now));
            messages.push(ChatMessage::bot(response(&format!("a{i}")), now));
        }

        let history = build_history(&messages, 2);
        let texts: Vec<&str> = history.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["q2", "a2", "q3", "a3"]);
        assert!(build_history(&[welcome_message()], 5).is_empty());
    }

    #[test]
    fn huge_turn_limit_keeps_whole_history() {
        let now = Utc::now();
        let messages = vec![
            ChatMessage::user("q0", now),
            ChatMessage::bot(response("a0"), now),
        ];
        assert_eq!(build_history(&messages, usize::MAX).len(), 2);
    }

    #[tokio::test]
    async fn empty_summary_input_short_circuits() {
        let model = FakeModel::replying(json!({"summary": "should not be used"}));
        let out = summarize_session(&model, SummarizeSessionInput { messages: vec![] })
            .await
            .unwrap();
        assert_eq!(out.summary, EMPTY_SESSION_SUMMARY);
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn stored_summary_is_computed_once_unless_regenerated() {
        let model = FakeModel::replying(bot_reply("answer"));
        let store = Mutex::new(SessionStore::in_memory());
        ask(&model, &store, "s1", Utc::now(), "question", 5).await.unwrap();

        let summarizer = FakeModel::replying(json!({"summary": "Discussed AAA corporate risk weights."}));
        let first = summarize_stored_session(&summarizer, &store, "s1", false).await.unwrap();
        let second = summarize_stored_session(&summarizer, &store, "s1", false).await.unwrap();

        assert_eq!(first, "Discussed AAA corporate risk weights.");
        assert_eq!(second, first);
        assert_eq!(summarizer.calls(), 1);

        summarize_stored_session(&summarizer, &store, "s1", true).await.unwrap();
        assert_eq!(summarizer.calls(), 2);
        let request = summarizer.last_request();
        assert_eq!(request.flow, "summarizeChatSession");
        assert_eq!(request.input["messages"][0]["speaker"], "User");
        assert_eq!(request.input["messages"][1]["speaker"], "AI");
    }

    #[tokio::test]
    async fn summary_of_unknown_session_is_not_found() {
        let model = FakeModel::replying(json!({"summary": "x"}));
        let store = Mutex::new(SessionStore::in_memory());
        let err = summarize_stored_session(&model, &store, "ghost", false).await.unwrap_err();
        assert!(matches!(err, ChatError::NotFound(_)));
    }

    #[tokio::test]
    async fn edited_response_is_persisted() {
        let model = FakeModel::replying(bot_reply("original"));
        let store = Mutex::new(SessionStore::in_memory());
        let exchange = ask(&model, &store, "s1", Utc::now(), "question", 5).await.unwrap();

        let mut edited = response("corrected");
        edited.calculation_logic = Some("RWA = exposure × 100%".into());
        let saved = save_edited_response(&store, "s1", &exchange.bot_message.id, edited.clone()).unwrap();
        assert!(saved.edited);

        let session = store.lock().unwrap().get_session("s1").unwrap().unwrap();
        assert_eq!(session.messages[1].bot_response(), Some(&edited));

        let err = save_edited_response(&store, "s1", &exchange.user_message.id, edited).unwrap_err();
        assert!(matches!(err, ChatError::NotFound(_)));
    }

    #[test]
    fn correction_echoes_edited_text() {
        let out = correct_answer(CorrectAnswerInput {
            original_answer: "old".into(),
            edited_answer: "new".into(),
        });
        assert_eq!(out.saved_answer, "new");
    }

    #[test]
    fn stringify_marks_missing_fields() {
        let flat = stringify_response(&response("s"));
        assert!(flat.starts_with("Summary: s\nExplanation: "));
        assert!(flat.contains("References: 12 CFR 217.32(f)"));
        assert!(flat.ends_with("Calculation Examples: N/A"));
    }
}
