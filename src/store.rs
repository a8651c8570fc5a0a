//! Almacén de sesiones de chat sobre un almacenamiento clave-valor inyectable.
//!
//! Todo el historial vive serializado bajo una única clave (`regqChatHistory`)
//! como un objeto JSON `id de sesión → sesión`. Cada operación lee, modifica
//! y vuelve a escribir el blob completo; si dos escritores se solapan gana el
//! último. Un JSON corrupto se descarta y se trata como almacén vacío.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::models::{ChatMessage, ChatSession};

pub const CHAT_HISTORY_KEY: &str = "regqChatHistory";

/// Almacenamiento clave-valor de cadenas.
pub trait KeyValueStorage: Send {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&mut self, key: &str, value: &str) -> Result<()>;
    fn delete(&mut self, key: &str) -> Result<()>;
    fn keys(&self) -> Result<Vec<String>>;
}

#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    entries: HashMap<String, String>,
}

impl KeyValueStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self.entries.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

/// Un fichero `<clave>.json` por clave dentro de `dir`.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("No se pudo crear el directorio {}", dir.display()))?;
        info!("Almacén de sesiones en {}", dir.display());
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl KeyValueStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("Error leyendo {}", path.display()))?;
        Ok(Some(raw))
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key);
        fs::write(&path, value).with_context(|| format!("Error escribiendo {}", path.display()))
    }

    fn delete(&mut self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Error borrando {}", path.display()))?;
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem() {
                    keys.push(stem.to_string_lossy().to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

type History = BTreeMap<String, ChatSession>;

pub struct SessionStore {
    storage: Box<dyn KeyValueStorage>,
}

impl SessionStore {
    pub fn new(storage: impl KeyValueStorage + 'static) -> Self {
        Self {
            storage: Box::new(storage),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryStorage::default())
    }

    fn load_history(&mut self) -> Result<History> {
        let Some(raw) = self.storage.get(CHAT_HISTORY_KEY)? else {
            return Ok(History::new());
        };
        match serde_json::from_str::<History>(&raw) {
            Ok(history) => Ok(history),
            Err(e) => {
                error!("Historial de chat corrupto, se descarta: {e}");
                self.storage.delete(CHAT_HISTORY_KEY)?;
                Ok(History::new())
            }
        }
    }

    fn save_history(&mut self, history: &History) -> Result<()> {
        let raw = serde_json::to_string(history)?;
        self.storage.set(CHAT_HISTORY_KEY, &raw)
    }

    /// Añade un mensaje, creando la sesión si no existe.
    pub fn append_message(
        &mut self,
        session_id: &str,
        message: ChatMessage,
        session_start: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut history = self.load_history()?;
        history
            .entry(session_id.to_string())
            .or_insert_with(|| ChatSession::new(session_id, session_start.unwrap_or_else(Utc::now)))
            .messages
            .push(message);
        self.save_history(&history)
    }

    /// Sustituye un mensaje existente por id. Devuelve `false` si no existe.
    pub fn replace_message(&mut self, session_id: &str, message: ChatMessage) -> Result<bool> {
        let mut history = self.load_history()?;
        let Some(slot) = history
            .get_mut(session_id)
            .and_then(|s| s.messages.iter_mut().find(|m| m.id == message.id))
        else {
            return Ok(false);
        };
        *slot = message;
        self.save_history(&history)?;
        Ok(true)
    }

    /// No hace nada si la sesión no existe.
    pub fn update_summary(&mut self, session_id: &str, summary: &str) -> Result<bool> {
        let mut history = self.load_history()?;
        let Some(session) = history.get_mut(session_id) else {
            return Ok(false);
        };
        session.summary = Some(summary.to_string());
        self.save_history(&history)?;
        Ok(true)
    }

    /// Todas las sesiones, de la más reciente a la más antigua.
    pub fn list_sessions(&mut self) -> Result<Vec<ChatSession>> {
        let mut sessions: Vec<ChatSession> = self.load_history()?.into_values().collect();
        sessions.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(sessions)
    }

    pub fn get_session(&mut self, session_id: &str) -> Result<Option<ChatSession>> {
        Ok(self.load_history()?.remove(session_id))
    }

    pub fn delete_session(&mut self, session_id: &str) -> Result<bool> {
        let mut history = self.load_history()?;
        if history.remove(session_id).is_none() {
            return Ok(false);
        }
        self.save_history(&history)?;
        Ok(true)
    }

    pub fn clear(&mut self) -> Result<()> {
        self.storage.delete(CHAT_HISTORY_KEY)
    }

    pub fn storage_keys(&self) -> Result<Vec<String>> {
        self.storage.keys()
    }
}
