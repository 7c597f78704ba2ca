use std::sync::Arc;

use mailflow::api::{ApiState, api_routes};
use mailflow::approval::ApprovalGate;
use mailflow::capability::HttpCapabilityClient;
use mailflow::config::EngineConfig;
use mailflow::engine::Orchestrator;
use mailflow::store::{LibSqlStore, Store};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let webhook_url = std::env::var("MAILFLOW_WEBHOOK_URL").unwrap_or_else(|_| {
        eprintln!("Error: MAILFLOW_WEBHOOK_URL not set");
        eprintln!("  export MAILFLOW_WEBHOOK_URL=http://localhost:5678");
        std::process::exit(1);
    });

    let db_path =
        std::env::var("MAILFLOW_DB_PATH").unwrap_or_else(|_| "./data/mailflow.db".to_string());

    let port: u16 = std::env::var("MAILFLOW_PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse()
        .unwrap_or(8080);

    let mut config = EngineConfig::default();
    if let Ok(threshold) = std::env::var("MAILFLOW_IMPORTANCE_THRESHOLD") {
        match threshold.parse::<u8>() {
            Ok(value) if value <= 10 => config.importance_threshold = value,
            _ => {
                eprintln!("Error: MAILFLOW_IMPORTANCE_THRESHOLD must be 0-10, got '{threshold}'");
                std::process::exit(1);
            }
        }
    }

    eprintln!("📬 Mailflow v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Webhooks: {}", webhook_url);
    eprintln!("   Database: {}", db_path);
    eprintln!("   API: http://0.0.0.0:{}/api", port);
    eprintln!("   Importance threshold: {}", config.importance_threshold);

    let store: Arc<dyn Store> = Arc::new(
        LibSqlStore::new_local(std::path::Path::new(&db_path))
            .await
            .unwrap_or_else(|e| {
                eprintln!("Error: Failed to open database at {}: {}", db_path, e);
                std::process::exit(1);
            }),
    );

    let client = Arc::new(HttpCapabilityClient::new(&webhook_url));
    let engine = Arc::new(Orchestrator::new(store, client, config));
    let gate = Arc::new(ApprovalGate::new(Arc::clone(&engine)));

    let app = api_routes(ApiState { engine, gate });
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    tracing::info!(port, "Mailflow listening");
    axum::serve(listener, app).await?;

    Ok(())
}
