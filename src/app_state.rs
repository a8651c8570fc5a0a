use std::sync::{Arc, Mutex};

use crate::{config::AppConfig, llm::PromptModel, regulatory::DocumentFetcher, store::SessionStore};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub model: Arc<dyn PromptModel>,
    pub store: Arc<Mutex<SessionStore>>,
    pub documents: DocumentFetcher,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub llm_provider: String,
    pub chat_model: String,
    pub session_count: usize,
    pub storage_keys: Vec<String>,
}
