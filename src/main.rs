use std::sync::Arc;

use wa_agent::agent::{AgentSettings, ChatCompletionAgent};
use wa_agent::arbiter::ControlArbiter;
use wa_agent::config::{DEFAULT_SYSTEM_PROMPT, ServiceConfig};
use wa_agent::credentials::{CredentialResolver, PlatformCredentials};
use wa_agent::dispatch::CloudApiSender;
use wa_agent::media::{SpeechGateway, SttConfig, TtsConfig};
use wa_agent::pipeline::MessagePipeline;
use wa_agent::store::{ConnectionStore, ControlStore, HistoryStore, LibSqlBackend};
use wa_agent::webhook::{AppState, webhook_routes};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    // Read required secrets from environment
    let verify_token = std::env::var("WHATSAPP_WEBHOOK_VERIFY_TOKEN").unwrap_or_else(|_| {
        eprintln!("Error: WHATSAPP_WEBHOOK_VERIFY_TOKEN not set");
        eprintln!("  export WHATSAPP_WEBHOOK_VERIFY_TOKEN=<token from your app dashboard>");
        std::process::exit(1);
    });

    let api_key = std::env::var("OPENAI_API_KEY").unwrap_or_else(|_| {
        eprintln!("Error: OPENAI_API_KEY not set");
        eprintln!("  export OPENAI_API_KEY=sk-...");
        std::process::exit(1);
    });

    let model = std::env::var("WA_AGENT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());

    let chat_endpoint = std::env::var("WA_AGENT_CHAT_ENDPOINT")
        .unwrap_or_else(|_| "https://api.openai.com/v1".to_string())
        .trim_end_matches('/')
        .to_string();

    let system_prompt = std::env::var("WA_AGENT_SYSTEM_PROMPT")
        .unwrap_or_else(|_| DEFAULT_SYSTEM_PROMPT.to_string());

    let port: u16 = std::env::var("WA_AGENT_PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse()
        .unwrap_or(8080);

    let history_turns: usize = std::env::var("WA_AGENT_HISTORY_TURNS")
        .unwrap_or_else(|_| "20".to_string())
        .parse()
        .unwrap_or(20);

    let service_config = ServiceConfig::from_env();

    eprintln!("📞 WA Agent v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", model);
    eprintln!("   Webhook: http://0.0.0.0:{}/webhook", port);
    eprintln!("   Health:  http://0.0.0.0:{}/health", port);

    // ── Database ─────────────────────────────────────────────────────────
    let db_path =
        std::env::var("WA_AGENT_DB_PATH").unwrap_or_else(|_| "./data/wa-agent.db".to_string());

    let store = Arc::new(
        LibSqlBackend::new_local(std::path::Path::new(&db_path))
            .await
            .unwrap_or_else(|e| {
                eprintln!("Error: Failed to open database at {}: {}", db_path, e);
                std::process::exit(1);
            }),
    );

    eprintln!("   Database: {}", db_path);

    let history: Arc<dyn HistoryStore> = store.clone();
    let control: Arc<dyn ControlStore> = store.clone();
    let connections: Arc<dyn ConnectionStore> = store.clone();

    // ── Credentials ──────────────────────────────────────────────────────
    let static_creds = PlatformCredentials::from_env();
    match &static_creds {
        Some(creds) => eprintln!("   Sending from: {} (static credentials)", creds.endpoint_id),
        None => eprintln!("   Sending from: most recently connected account"),
    }
    let credentials = Arc::new(CredentialResolver::new(connections, static_creds));

    // ── Voice services ───────────────────────────────────────────────────
    let stt = SttConfig::from_env();
    let tts = TtsConfig::from_env();
    eprintln!(
        "   Transcription: {}",
        if stt.is_some() { "enabled" } else { "disabled" }
    );
    eprintln!(
        "   Voice replies: {}",
        if tts.is_some() { "enabled" } else { "disabled" }
    );

    let media = Arc::new(SpeechGateway::new(
        credentials.clone(),
        service_config.graph_base_url.clone(),
        stt,
        tts,
    ));

    // ── Pipeline ─────────────────────────────────────────────────────────
    let sender = Arc::new(CloudApiSender::new(
        credentials.clone(),
        service_config.graph_base_url.clone(),
    ));

    let agent = Arc::new(ChatCompletionAgent::new(
        AgentSettings {
            api_key: secrecy::SecretString::from(api_key),
            model,
            endpoint: chat_endpoint,
            system_prompt,
            history_turns,
        },
        history.clone(),
    ));

    let pipeline = Arc::new(MessagePipeline::new(
        history,
        ControlArbiter::new(control),
        media,
        sender,
        agent,
        service_config.session_prefix.clone(),
    ));

    let app = webhook_routes(AppState {
        pipeline,
        verify_token,
    });

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    tracing::info!(port, "Webhook server started");
    axum::serve(listener, app).await?;

    Ok(())
}
