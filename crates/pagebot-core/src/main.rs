use anyhow::Result;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pagebot_core::ai::ChatCompletionsClient;
use pagebot_core::background::TokioSpawner;
use pagebot_core::contact::RegexContactExtractor;
use pagebot_core::leads::{HourlyContactTimeEstimator, KeywordStageAnalyzer};
use pagebot_core::messenger::GraphMessenger;
use pagebot_core::webhook::{self, WebhookState};
use pagebot_core::{Collaborators, Config, PgStore, Pipeline};
use pagebot_graph::GraphClient;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "pagebot=debug,pagebot_core=debug,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("📬 Pagebot starting up...");

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    info!("Configuration loaded");
    info!("  Graph API: {}", config.graph_api_url);
    info!("  AI API: {} ({})", config.ai_api_url, config.ai_model);
    info!(
        "  Batching: {} ({}ms window)",
        if config.batching_enabled { "on" } else { "off" },
        config.batch_window.as_millis()
    );

    // Run database migrations first
    {
        use diesel::prelude::*;
        use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
        pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

        let mut conn = diesel::PgConnection::establish(&config.database_url)?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|e| anyhow::anyhow!("Migration failed: {}", e))?;
        info!("Database migrations applied");
    }

    let store = Arc::new(PgStore::new(&config.database_url)?);

    if config.page_access_token.is_none() {
        info!("PAGE_ACCESS_TOKEN not set, only pages with stored tokens can be answered");
    }
    let graph = GraphClient::new(&config.graph_api_url)?;
    let messenger = Arc::new(GraphMessenger::new(
        graph,
        store.clone(),
        config.page_access_token.clone(),
    ));

    let ai = Arc::new(
        ChatCompletionsClient::new(&config.ai_api_url, config.ai_api_key.clone(), &config.ai_model)?
            .with_vision_model(&config.ai_vision_model)
            .with_history(store.clone()),
    );

    let collaborators = Collaborators {
        messenger,
        catalog: store.clone(),
        leads: store.clone(),
        takeover: store.clone(),
        generator: ai.clone(),
        classifier: ai,
        contacts: Arc::new(RegexContactExtractor::new()?),
        stages: Arc::new(KeywordStageAnalyzer::default()),
        estimator: Arc::new(HourlyContactTimeEstimator::new(config.business_timezone)),
        spawner: Arc::new(TokioSpawner),
    };

    let pipeline = Arc::new(Pipeline::new(config.pipeline_settings(), collaborators));
    let app = webhook::router(Arc::new(WebhookState {
        pipeline,
        verify_token: config.verify_token.clone(),
    }));

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.http_port)).await?;
    info!("📬 Pagebot listening on port {}", config.http_port);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutting down...");
        })
        .await?;

    info!("📬 Pagebot has shut down.");
    Ok(())
}
