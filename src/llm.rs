//! Frontera con el modelo generativo.
//!
//! Cada flujo construye un `PromptRequest` (preámbulo con el JSON Schema de la
//! salida, prompt renderizado y el objeto de entrada) y lo entrega a un
//! `PromptModel`. La respuesta cruda se valida contra el tipo de salida con
//! `parse_structured`. En producción el modelo es `LlmManager` (Rig); en los
//! tests se sustituye por un doble que registra las peticiones.

use crate::config::{AppConfig, LlmProvider};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rig::completion::Prompt;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

/// Errores de un flujo. El llamante decide cómo presentarlos.
#[derive(Debug, Error)]
pub enum FlowError {
    /// Validación previa a cualquier llamada externa.
    #[error("{0}")]
    InvalidInput(String),
    #[error("Error en la llamada al modelo ({flow}): {source}")]
    Model {
        flow: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error("El modelo no devolvió salida estructurada ({flow})")]
    MissingOutput { flow: &'static str },
    #[error("La salida del modelo no cumple el esquema ({flow}): {source}")]
    InvalidOutput {
        flow: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Petición completa a un modelo para un flujo concreto.
#[derive(Debug, Clone)]
pub struct PromptRequest {
    pub flow: &'static str,
    pub preamble: String,
    pub prompt: String,
    /// Objeto de entrada ya validado, tal y como llega al modelo.
    pub input: Value,
}

#[async_trait]
pub trait PromptModel: Send + Sync {
    /// Devuelve el texto crudo generado por el modelo.
    async fn generate(&self, request: &PromptRequest) -> Result<String>;
}

/// Construye el preámbulo de un flujo añadiendo el esquema de salida.
pub fn structured_preamble<O: JsonSchema>(instructions: &str) -> String {
    let schema = schemars::schema_for!(O);
    let schema_json = serde_json::to_string_pretty(&schema).unwrap_or_else(|_| "{}".to_string());
    format!(
        "{}\n\nLa salida DEBE ser un único objeto JSON válido que cumpla este JSON Schema:\n{}\nNo incluyas explicaciones, solo el JSON.",
        instructions.trim(),
        schema_json
    )
}

/// Ejecuta un flujo: llama al modelo y valida la salida contra `O`.
pub async fn invoke<O: DeserializeOwned>(
    model: &dyn PromptModel,
    request: PromptRequest,
) -> Result<O, FlowError> {
    let flow = request.flow;
    debug!("Invocando flujo '{flow}'");
    let raw = model
        .generate(&request)
        .await
        .map_err(|source| FlowError::Model { flow, source })?;
    parse_structured(flow, &raw)
}

/// Limpia la respuesta del LLM (vallas ```json) y la deserializa.
pub fn parse_structured<O: DeserializeOwned>(flow: &'static str, raw: &str) -> Result<O, FlowError> {
    let json_response = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    if json_response.is_empty() || json_response == "null" {
        return Err(FlowError::MissingOutput { flow });
    }

    serde_json::from_str::<O>(json_response).map_err(|source| {
        warn!("No se pudo parsear la salida del flujo '{flow}'. Error: {source}. Respuesta LLM: '{raw}'");
        FlowError::InvalidOutput { flow, source }
    })
}

/// Gestor de LLMs sobre Rig.
#[derive(Debug, Clone)]
pub struct LlmManager {
    pub provider: LlmProvider,
    pub chat_model: String,
}

impl LlmManager {
    /// Construye el manager a partir de la configuración.
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        if cfg.llm_provider != LlmProvider::OpenAI {
            warn!(
                "Proveedor LLM {:?} configurado, pero sólo OpenAI está implementado para chat",
                cfg.llm_provider
            );
        }
        Ok(Self {
            provider: cfg.llm_provider.clone(),
            chat_model: cfg.llm_chat_model.clone(),
        })
    }

    async fn generate_with_openai(&self, request: &PromptRequest) -> Result<String> {
        use rig::providers::openai;
        // Trait para client.agent(...)
        use rig::client::CompletionClient as _;

        debug!("Entrada del flujo '{}': {}", request.flow, request.input);
        let client = openai::Client::from_env();

        let model_name = if self.chat_model.is_empty() {
            "gpt-4o-mini"
        } else {
            self.chat_model.as_str()
        };

        let agent = client
            .agent(model_name)
            .preamble(&request.preamble)
            .build();

        let response = agent.prompt(request.prompt.as_str()).await?;
        Ok(response)
    }
}

#[async_trait]
impl PromptModel for LlmManager {
    async fn generate(&self, request: &PromptRequest) -> Result<String> {
        match self.provider {
            LlmProvider::OpenAI => self.generate_with_openai(request).await,
            ref other => Err(anyhow!(
                "Proveedor LLM {:?} aún no implementado para chat",
                other
            )),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FakeModel;
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, JsonSchema)]
    struct Out {
        value: i64,
    }

    fn request() -> PromptRequest {
        PromptRequest {
            flow: "testFlow",
            preamble: structured_preamble::<Out>("Devuelve un valor."),
            prompt: "dame un valor".into(),
            input: json!({}),
        }
    }

    #[test]
    fn fenced_json_is_accepted() {
        let out: Out = parse_structured("f", "```json\n{\"value\": 3}\n```").unwrap();
        assert_eq!(out.value, 3);
    }

    #[test]
    fn empty_or_null_output_is_missing() {
        assert!(matches!(
            parse_structured::<Out>("f", "  "),
            Err(FlowError::MissingOutput { .. })
        ));
        assert!(matches!(
            parse_structured::<Out>("f", "null"),
            Err(FlowError::MissingOutput { .. })
        ));
    }

    #[test]
    fn schema_mismatch_is_invalid_output() {
        assert!(matches!(
            parse_structured::<Out>("f", "{\"value\": \"tres\"}"),
            Err(FlowError::InvalidOutput { .. })
        ));
    }

    #[test]
    fn preamble_embeds_output_schema() {
        let preamble = structured_preamble::<Out>("Instrucciones.");
        assert!(preamble.starts_with("Instrucciones."));
        assert!(preamble.contains("\"value\""));
    }

    #[tokio::test]
    async fn model_failure_is_reported_with_flow_name() {
        let model = FakeModel::failing("timeout");
        let err = invoke::<Out>(&model, request()).await.unwrap_err();
        assert!(matches!(err, FlowError::Model { flow: "testFlow", .. }));
        assert_eq!(model.calls(), 1);
    }

    #[test]
    fn invoke_parses_reply() {
        let model = FakeModel::replying(json!({"value": 7}));
        let out: Out = tokio_test::block_on(invoke(&model, request())).unwrap();
        assert_eq!(out.value, 7);
    }
}
