use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use taxi_agent::api::api_routes;
use taxi_agent::backend::HttpDispatchBackend;
use taxi_agent::booking::{CityZoneValidator, ColombianAddressParser};
use taxi_agent::config::{AgentConfig, BackendConfig, ServerConfig, UsageConfig};
use taxi_agent::dialogue::{
    DialogueEngine, DispatchController, EscalationNotice, FileUsageLog, SessionAccountant,
    StageDeps,
};
use taxi_agent::llm::{LlmConfig, Reasoning, create_provider};
use taxi_agent::store::{CheckpointStore, InMemoryCheckpointStore, LibSqlCheckpointStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let server_config = ServerConfig::from_env()?;

    // Console plus a plain-text daily file under the log directory.
    let file_appender = tracing_appender::rolling::daily(&server_config.log_dir, "taxi-agent.log");
    let (file_writer, _log_guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(false))
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .init();

    let agent_config = AgentConfig::from_env()?;
    let backend_config = BackendConfig::from_env()?;
    let usage_config = UsageConfig::from_env()?;
    let llm_config = LlmConfig::from_env().context("LLM configuration")?;

    eprintln!("🚕 Taxi Agent v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Assistant: {}", agent_config.name);
    eprintln!("   Model: {}", llm_config.model);
    eprintln!("   Backend: {}", backend_config.base_url);
    eprintln!("   Usage log: {}", usage_config.log_path.display());

    let llm = create_provider(&llm_config)?;
    let costs = llm.cost_per_token();
    let backend = Arc::new(HttpDispatchBackend::new(backend_config)?);

    // ── Checkpoint store ─────────────────────────────────────────────────
    let store: Arc<dyn CheckpointStore> = match &server_config.db_path {
        Some(path) => {
            let store = LibSqlCheckpointStore::new_local(path)
                .await
                .with_context(|| format!("opening checkpoint database at {}", path.display()))?;
            eprintln!("   Checkpoints: {}", path.display());
            Arc::new(store)
        }
        None => {
            eprintln!("   Checkpoints: in-memory");
            Arc::new(InMemoryCheckpointStore::new())
        }
    };

    // ── Escalation queue ─────────────────────────────────────────────────
    let (notice_tx, mut notice_rx) = tokio::sync::mpsc::channel::<EscalationNotice>(256);
    tokio::spawn(async move {
        while let Some(notice) = notice_rx.recv().await {
            tracing::warn!(
                thread_id = %notice.thread_id,
                client_id = %notice.client_id,
                stage = %notice.stage,
                reason = %notice.reason,
                "Conversation handed to a human"
            );
        }
    });

    // ── Engine ───────────────────────────────────────────────────────────
    let deps = StageDeps {
        reasoning: Reasoning::new(llm)
            .with_limits(agent_config.max_tokens, agent_config.temperature),
        backend: backend.clone(),
        parser: Arc::new(ColombianAddressParser::new()),
        zones: Arc::new(CityZoneValidator::new()),
        config: agent_config,
    };
    let engine = Arc::new(DialogueEngine::new(
        store,
        deps,
        DispatchController::new(backend).with_notices(notice_tx),
        SessionAccountant::new(Arc::new(FileUsageLog::new(usage_config.log_path)), costs),
    ));

    let app = api_routes(engine);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", server_config.port))
        .await
        .with_context(|| format!("binding port {}", server_config.port))?;
    eprintln!("   Chat API: http://0.0.0.0:{}/api/v1/chat\n", server_config.port);
    tracing::info!(port = server_config.port, "HTTP server started");

    axum::serve(listener, app).await?;
    Ok(())
}
