//! Modelos de dominio: mensajes y sesiones de chat, respuestas estructuradas
//! del bot, parámetros de cálculo RWA y obligaciones regulatorias.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Identificador del mensaje de bienvenida; nunca forma parte del historial.
pub const WELCOME_MESSAGE_ID: &str = "initial-bot-message";

/// Respuesta estructurada del bot a una pregunta sobre CFR Title 12.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BotResponse {
    /// A concise summary of the answer.
    pub summary: String,
    /// A detailed explanation of the answer.
    pub explanation: String,
    /// Relevant references to CFR Title 12 sections.
    pub references: String,
    /// Any necessary calculation logic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calculation_logic: Option<String>,
    /// Any reference tables needed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_tables: Option<String>,
    /// Step-by-step calculation examples, particularly for RWA under the standardized approach.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calculation_examples: Option<String>,
}

/// Un turno de conversación tal y como se envía a los prompts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ConversationTurn {
    /// Who spoke, e.g. 'User' or 'AI Summary'.
    pub speaker: String,
    /// The text of that turn.
    pub text: String,
}

impl ConversationTurn {
    pub fn new(speaker: &str, text: impl Into<String>) -> Self {
        Self {
            speaker: speaker.to_string(),
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MessageContent {
    User {
        text: String,
    },
    Bot {
        response: BotResponse,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        suggestions: Option<Vec<String>>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub content: MessageContent,
    #[serde(default)]
    pub is_editing: bool,
    #[serde(default)]
    pub edited: bool,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: format!("user-{}", uuid::Uuid::new_v4()),
            timestamp,
            content: MessageContent::User { text: text.into() },
            is_editing: false,
            edited: false,
        }
    }

    pub fn bot(response: BotResponse, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: format!("bot-{}", uuid::Uuid::new_v4()),
            timestamp,
            content: MessageContent::Bot {
                response,
                suggestions: None,
            },
            is_editing: false,
            edited: false,
        }
    }

    pub fn bot_response(&self) -> Option<&BotResponse> {
        match &self.content {
            MessageContent::Bot { response, .. } => Some(response),
            MessageContent::User { .. } => None,
        }
    }
}

/// Sesión de chat persistida en el almacén local.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub id: String,
    pub start_time: DateTime<Utc>,
    pub messages: Vec<ChatMessage>,
    /// `None` = nunca calculado; `Some("")` es un resumen calculado (vacío).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl ChatSession {
    pub fn new(id: impl Into<String>, start_time: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            start_time,
            messages: Vec::new(),
            summary: None,
        }
    }
}

/// Tipo de dato esperado para un parámetro del formulario RWA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    Number,
    Text,
    /// A number used as a percentage (e.g. 50 for 50%).
    Percentage,
}

impl InputType {
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Number | Self::Percentage)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct InputParameter {
    /// Machine-readable camelCase name (e.g. 'exposureAmount').
    pub name: String,
    /// User-friendly label (e.g. 'Exposure Amount ($)').
    pub label: String,
    #[serde(rename = "type")]
    pub input_type: InputType,
    /// Brief help text, referencing CFR Title 12 if applicable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Valor de un parámetro de cálculo. El orden de las variantes importa
/// para la deserialización `untagged`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputValue {
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
}

impl std::fmt::Display for InputValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Obligation {
    /// Concise description of the regulatory obligation or requirement.
    pub obligation: String,
    /// Specific rule or citation (e.g. '12 CFR § 217.10').
    pub rule: String,
    /// Additional context or key details about the obligation.
    pub details: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn messages_serialize_with_type_tag() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let mut msg = ChatMessage::user("hola", ts);
        msg.id = "user-1".into();

        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "user");
        assert_eq!(value["text"], "hola");
        assert_eq!(value["isEditing"], false);

        let back: ChatMessage = serde_json::from_value(value).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn bot_message_without_flags_still_parses() {
        let value = json!({
            "id": "bot-1",
            "type": "bot",
            "timestamp": "2024-05-01T10:00:00.000Z",
            "response": {
                "summary": "s",
                "explanation": "e",
                "references": "12 CFR 217.32"
            }
        });
        let msg: ChatMessage = serde_json::from_value(value).unwrap();
        assert!(!msg.edited);
        let response = msg.bot_response().unwrap();
        assert_eq!(response.calculation_logic, None);
    }

    #[test]
    fn input_values_keep_their_json_kind() {
        let values: Vec<InputValue> =
            serde_json::from_value(json!([true, 50, 0.2, "text"])).unwrap();
        assert_eq!(values[0], InputValue::Bool(true));
        assert_eq!(values[1], InputValue::Number(50.into()));
        assert!(matches!(values[2], InputValue::Number(_)));
        assert_eq!(values[3], InputValue::Text("text".into()));
    }

    #[test]
    fn summary_absent_is_not_empty_summary() {
        let ts = Utc::now();
        let mut session = ChatSession::new("s1", ts);
        let json_none = serde_json::to_value(&session).unwrap();
        assert!(json_none.get("summary").is_none());

        session.summary = Some(String::new());
        let json_empty = serde_json::to_value(&session).unwrap();
        assert_eq!(json_empty["summary"], "");
    }
}
