mod http_server;

use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

use aqar_chat::{AgentDeps, ChatService, ChatbotConfig, KnowledgeBase, LLMManager, MySqlUnitStore};
use http_server::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::var_os("CHATBOT_CONFIG").map(PathBuf::from);
    let config = ChatbotConfig::load(config_path.as_deref())
        .map_err(|e| anyhow!("Invalid configuration: {}", e))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.app.log_level)),
        )
        .with_target(false)
        .init();

    tracing::info!(
        title = %config.app.title,
        version = %config.app.version,
        model = %config.llm.model,
        config_file = ?config_path,
        "Starting chatbot"
    );

    let llm = LLMManager::from_settings(&config.llm).context("Failed to build LLM client")?;
    let store = MySqlUnitStore::connect(&config.database).context("Failed to configure database pool")?;

    let rag = config.rag.clone();
    let knowledge = tokio::task::spawn_blocking(move || KnowledgeBase::open(&rag))
        .await
        .context("Knowledge base initialisation panicked")?;
    tracing::info!(chunks = knowledge.len(), "Knowledge base ready");

    let deps = AgentDeps {
        llm,
        store: Arc::new(store),
        knowledge: Arc::new(knowledge),
        rag_chunk_count: config.rag.chunk_count,
    };

    let state = AppState {
        service: Arc::new(ChatService::new(&config, deps)),
        title: config.app.title.clone(),
        version: config.app.version.clone(),
    };

    http_server::start_server(state, &config.server.host, config.server.port).await
}
