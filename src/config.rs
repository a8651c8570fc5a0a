//! Carga y gestión de configuración de la aplicación (servidor, LLM, almacén de sesiones).

use std::env;
use std::path::PathBuf;
use anyhow::{anyhow, Result};

#[derive(Clone, Debug, PartialEq)]
pub enum LlmProvider {
    OpenAI,
    Gemini,
    Ollama,
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "gemini" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            other => Err(anyhow!("Proveedor LLM no soportado: {other}")),
        }
    }
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_addr: String,
    pub frontend_dir: PathBuf,

    pub llm_provider: LlmProvider,
    pub llm_chat_model: String,

    /// Directorio donde el `FileStorage` guarda el historial de chats.
    /// `None` (variable vacía) = historial sólo en memoria.
    pub session_store_dir: Option<PathBuf>,
    /// Número de pares usuario/bot que se envían como historial al LLM.
    pub history_turns: usize,

    pub fetch_documents: bool,
    /// Dominios (y sus subdominios) desde los que se pueden descargar documentos.
    pub fetch_allowed_hosts: Vec<String>,
    pub fetch_timeout_secs: u64,
    /// Tope de bytes leídos de la respuesta, antes de convertirla a texto.
    pub document_byte_limit: usize,
    pub document_char_limit: usize,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Igual que `from_env`, pero leyendo de una función arbitraria.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var_or = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let server_addr = var_or("SERVER_ADDR", "127.0.0.1:3322");
        let frontend_dir = PathBuf::from(var_or("FRONTEND_DIR", "frontend"));

        let llm_provider = LlmProvider::from_str(&var_or("LLM_PROVIDER", "openai"))?;
        let llm_chat_model = var_or("LLM_CHAT_MODEL", "gpt-4o-mini");

        let session_store_dir = Some(var_or("SESSION_STORE_DIR", "data"))
            .filter(|dir| !dir.trim().is_empty())
            .map(PathBuf::from);
        let history_turns = var_or("HISTORY_TURNS", "5")
            .parse::<usize>()
            .map_err(|e| anyhow!("HISTORY_TURNS no es un entero válido: {e}"))?;

        let fetch_documents = parse_bool(&var_or("FETCH_DOCUMENTS", "true"))
            .ok_or_else(|| anyhow!("FETCH_DOCUMENTS debe ser true o false"))?;
        let fetch_allowed_hosts: Vec<String> = var_or("FETCH_ALLOWED_HOSTS", "ecfr.gov")
            .split(',')
            .map(|host| host.trim().trim_start_matches('.').to_lowercase())
            .filter(|host| !host.is_empty())
            .collect();
        let fetch_timeout_secs = var_or("FETCH_TIMEOUT_SECS", "20")
            .parse::<u64>()
            .map_err(|e| anyhow!("FETCH_TIMEOUT_SECS no es un entero válido: {e}"))?;
        let document_byte_limit = var_or("DOCUMENT_BYTE_LIMIT", "2000000")
            .parse::<usize>()
            .map_err(|e| anyhow!("DOCUMENT_BYTE_LIMIT no es un entero válido: {e}"))?;
        let document_char_limit = var_or("DOCUMENT_CHAR_LIMIT", "60000")
            .parse::<usize>()
            .map_err(|e| anyhow!("DOCUMENT_CHAR_LIMIT no es un entero válido: {e}"))?;

        Ok(Self {
            server_addr,
            frontend_dir,
            llm_provider,
            llm_chat_model,
            session_store_dir,
            history_turns,
            fetch_documents,
            fetch_allowed_hosts,
            fetch_timeout_secs,
            document_byte_limit,
            document_char_limit,
        })
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let cfg = AppConfig::from_lookup(|_| None).unwrap();
        assert_eq!(cfg.server_addr, "127.0.0.1:3322");
        assert_eq!(cfg.llm_provider, LlmProvider::OpenAI);
        assert_eq!(cfg.llm_chat_model, "gpt-4o-mini");
        assert_eq!(cfg.history_turns, 5);
        assert!(cfg.fetch_documents);
        assert_eq!(cfg.document_char_limit, 60_000);
        assert_eq!(cfg.document_byte_limit, 2_000_000);
        assert_eq!(cfg.fetch_timeout_secs, 20);
        assert_eq!(cfg.fetch_allowed_hosts, vec!["ecfr.gov".to_string()]);
        assert_eq!(cfg.session_store_dir, Some(PathBuf::from("data")));
    }

    #[test]
    fn overrides_are_read() {
        let cfg = AppConfig::from_lookup(lookup_from(&[
            ("LLM_PROVIDER", "Ollama"),
            ("HISTORY_TURNS", "3"),
            ("FETCH_DOCUMENTS", "no"),
            ("SESSION_STORE_DIR", ""),
            ("FETCH_ALLOWED_HOSTS", "ecfr.gov, .FederalRegister.gov,,"),
        ]))
        .unwrap();
        assert_eq!(cfg.fetch_allowed_hosts, vec!["ecfr.gov", "federalregister.gov"]);
        assert_eq!(cfg.session_store_dir, None);
        assert_eq!(cfg.llm_provider, LlmProvider::Ollama);
        assert_eq!(cfg.history_turns, 3);
        assert!(!cfg.fetch_documents);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(AppConfig::from_lookup(lookup_from(&[("LLM_PROVIDER", "bard")])).is_err());
        assert!(AppConfig::from_lookup(lookup_from(&[("HISTORY_TURNS", "many")])).is_err());
        assert!(AppConfig::from_lookup(lookup_from(&[("FETCH_DOCUMENTS", "maybe")])).is_err());
        assert!(AppConfig::from_lookup(lookup_from(&[("FETCH_TIMEOUT_SECS", "-1")])).is_err());
    }
}
