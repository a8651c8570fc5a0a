//! Extracción de obligaciones regulatorias a partir de un documento (eCFR).
//!
//! El documento se descarga y se reduce a texto plano antes de pasarlo al
//! LLM. Sólo se descargan hosts de `FETCH_ALLOWED_HOSTS`, con timeout y un
//! tope de bytes. Si la descarga falla, el modelo razona sólo a partir de la URL.

use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{bail, Result};
use regex::Regex;
use reqwest::redirect::Policy;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use url::Url;

use crate::{
    config::AppConfig,
    llm::{self, FlowError, PromptModel, PromptRequest},
    models::Obligation,
    prompts,
};

const ECFR_DOMAIN: &str = "ecfr.gov";
const MAX_REDIRECTS: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseDocumentInput {
    pub document_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ParseDocumentOutput {
    /// Title of the regulatory document, if identifiable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_title: Option<String>,
    /// Extracted obligations and rules.
    pub obligations: Vec<Obligation>,
}

/// Exige una URL absoluta http(s).
pub fn validate_document_url(raw: &str) -> Result<Url, FlowError> {
    let url = Url::parse(raw.trim())
        .map_err(|e| FlowError::InvalidInput(format!("URL no válida '{raw}': {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(FlowError::InvalidInput(format!(
            "La URL debe ser http o https: {raw}"
        )));
    }
    if !url.host_str().is_some_and(|h| host_matches(h, ECFR_DOMAIN)) {
        warn!("La URL {url} no apunta a eCFR; la calidad de la extracción puede variar");
    }
    Ok(url)
}

pub async fn parse_regulatory_document(
    model: &dyn PromptModel,
    input: ParseDocumentInput,
    document_text: Option<&str>,
) -> Result<ParseDocumentOutput, FlowError> {
    let url = validate_document_url(&input.document_url)?;

    let request = PromptRequest {
        flow: "parseRegulatoryDocument",
        preamble: llm::structured_preamble::<ParseDocumentOutput>(prompts::PARSE_DOCUMENT_PREAMBLE),
        prompt: prompts::render_parse_document_prompt(url.as_str(), document_text),
        input: serde_json::json!({ "documentUrl": url.as_str() }),
    };
    let output: ParseDocumentOutput = llm::invoke(model, request).await?;
    info!("{} obligaciones extraídas de {url}", output.obligations.len());
    Ok(output)
}

/// `host` es `domain` o un subdominio suyo.
fn host_matches(host: &str, domain: &str) -> bool {
    host == domain
        || host
            .strip_suffix(domain)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

pub fn host_is_allowed(url: &Url, allowed_hosts: &[String]) -> bool {
    url.host_str()
        .is_some_and(|host| allowed_hosts.iter().any(|domain| host_matches(host, domain)))
}

/// Cliente de descarga de documentos regulatorios.
#[derive(Debug, Clone)]
pub struct DocumentFetcher {
    client: reqwest::Client,
    allowed_hosts: Vec<String>,
    char_limit: usize,
    byte_limit: usize,
}

impl DocumentFetcher {
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        let redirect_hosts = cfg.fetch_allowed_hosts.clone();
        // Las redirecciones tampoco pueden salir de la lista de hosts permitidos.
        let policy = Policy::custom(move |attempt| {
            if attempt.previous().len() >= MAX_REDIRECTS {
                attempt.error("demasiadas redirecciones")
            } else if host_is_allowed(attempt.url(), &redirect_hosts) {
                attempt.follow()
            } else {
                attempt.stop()
            }
        });

        let client = reqwest::Client::builder()
            .user_agent(concat!("regq-assistant/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(cfg.fetch_timeout_secs))
            .redirect(policy)
            .build()?;

        Ok(Self {
            client,
            allowed_hosts: cfg.fetch_allowed_hosts.clone(),
            char_limit: cfg.document_char_limit,
            byte_limit: cfg.document_byte_limit,
        })
    }

    /// Descarga el documento y lo devuelve como texto plano truncado.
    pub async fn fetch(&self, url: &Url) -> Result<String> {
        if !host_is_allowed(url, &self.allowed_hosts) {
            bail!("El host de {url} no está en FETCH_ALLOWED_HOSTS");
        }

        info!("Descargando documento regulatorio {url}...");
        let mut response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            bail!("Respuesta {status} al descargar {url}");
        }

        let mut body: Vec<u8> = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            let remaining = self.byte_limit - body.len();
            if chunk.len() >= remaining {
                body.extend_from_slice(&chunk[..remaining]);
                warn!("Documento {url} truncado a {} bytes", self.byte_limit);
                break;
            }
            body.extend_from_slice(&chunk);
        }

        Ok(html_to_text(&String::from_utf8_lossy(&body), self.char_limit))
    }
}

fn html_to_text(html: &str, char_limit: usize) -> String {
    static BLOCKS: OnceLock<Regex> = OnceLock::new();
    static TAGS: OnceLock<Regex> = OnceLock::new();
    static SPACES: OnceLock<Regex> = OnceLock::new();

    let blocks = BLOCKS.get_or_init(|| {
        Regex::new(r"(?is)<(script|style|head)\b.*?</(script|style|head)>").expect("regex válida")
    });
    let tags = TAGS.get_or_init(|| Regex::new(r"(?s)<[^>]*>").expect("regex válida"));
    let spaces = SPACES.get_or_init(|| Regex::new(r"\s+").expect("regex válida"));

    let without_blocks = blocks.replace_all(html, " ");
    let without_tags = tags.replace_all(&without_blocks, " ");
    let decoded = without_tags
        .replace("&nbsp;", " ")
        .replace("&sect;", "§")
        .replace("&#167;", "§")
        .replace("&amp;", "&");
    let text = spaces.replace_all(&decoded, " ");
    text.trim().chars().take(char_limit).collect()
}
