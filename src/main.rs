// Módulos de la aplicación
mod api;
mod app_state;
mod cfr;
mod chat;
mod config;
mod llm;
mod models;
mod prompts;
mod regulatory;
mod rwa;
mod store;

use crate::app_state::AppState;
use crate::store::{FileStorage, SessionStore};
use anyhow::Context;
use axum::Router;
use std::sync::{Arc, Mutex};
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 2. Cargar configuración
    let cfg = config::AppConfig::from_env().context("Error al cargar la configuración")?;

    // 3. Abrir el almacén de sesiones
    let store = match &cfg.session_store_dir {
        Some(dir) => SessionStore::new(FileStorage::open(dir)?),
        None => {
            warn!("SESSION_STORE_DIR vacío: el historial de chat sólo vivirá en memoria.");
            SessionStore::in_memory()
        }
    };

    // 4. Inicializar gestor de LLMs
    let llm_manager = llm::LlmManager::from_config(&cfg).context("Error inicializando LLM Manager")?;

    // 5. Crear estado compartido de la aplicación
    let app_state = AppState {
        config: cfg.clone(),
        model: Arc::new(llm_manager),
        store: Arc::new(Mutex::new(store)),
        documents: regulatory::DocumentFetcher::from_config(&cfg)
            .context("Error creando el cliente de descarga de documentos")?,
    };

    // 6. Configurar el router de la API y el servicio de ficheros estáticos
    let app = Router::new()
        .merge(api::create_router(app_state.clone()))
        .fallback_service(ServeDir::new(&cfg.frontend_dir))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // 7. Iniciar el servidor
    let server_addr = &app_state.config.server_addr;
    let listener = tokio::net::TcpListener::bind(server_addr)
        .await
        .with_context(|| format!("No se pudo escuchar en {server_addr}"))?;
    info!("🚀 Servidor escuchando en http://{}", server_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await?;

    info!("✅ Servidor cerrado correctamente.");
    Ok(())
}
