//! Sales Agent - purchase readiness webhook
//!
//! Receives customer messages over a webhook, tracks which catalog products
//! each customer is interested in, classifies where they are in the sales
//! funnel, and flags the turn where they are ready to buy.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod conversation;
mod core;
mod providers;
mod routes;

use config::{AgentConfig, ClassifierBackend, Config, PromptTemplate};
use core::{
    ConversationStore, LlmClassifier, ProductCatalog, ResponseComposer, RuleClassifier, SalesClassifier,
    SalesEngine,
};
use providers::Provider;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub agent: Arc<AgentConfig>,
    pub engine: Arc<SalesEngine>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sales_agent=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let agent = AgentConfig::load_or_default(&config.agent_config)?;

    // One database for conversations and the catalog
    let pool = core::memory::open_pool(&config.database_path()).await?;

    let catalog = ProductCatalog::from_pool(pool.clone(), agent.catalog.clone()).await?;
    if let Some(seed) = &agent.catalog.seed_file {
        let count = catalog.seed_from_file(seed).await?;
        tracing::info!("Seeded {} product(s) from {}", count, seed.display());
    }

    let store = ConversationStore::from_pool(pool).await?;
    let classifier = build_classifier(&agent, &config).await?;
    tracing::info!("Using {} classifier", classifier.name());

    let engine = Arc::new(SalesEngine::new(
        store,
        Arc::new(catalog),
        classifier,
        ResponseComposer::new(&agent.agent.name, &agent.agent.currency),
        agent.conversation.clone(),
    ));

    let state = AppState {
        agent: Arc::new(agent),
        engine,
    };

    let app = Router::new()
        .merge(routes::router())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    tracing::info!("Sales agent listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn build_classifier(agent: &AgentConfig, config: &Config) -> anyhow::Result<Arc<dyn SalesClassifier>> {
    match agent.classifier.backend {
        ClassifierBackend::Rules => Ok(Arc::new(RuleClassifier::new())),
        ClassifierBackend::Ollama => {
            let provider = Provider::ollama(&agent.classifier, config)?;
            tracing::info!("Classifier model {} at {}", agent.classifier.model, provider.endpoint());
            let mut classifier = LlmClassifier::new(provider, agent.classifier.model.clone());
            if let Some(path) = &agent.classifier.prompt_file {
                let template = PromptTemplate::load_from_file(path).await?;
                tracing::info!("Loaded classifier prompt '{}'", template.persona.name);
                classifier = classifier.with_system_prompt(template.system_prompt.content);
            }
            Ok(Arc::new(classifier))
        }
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutting down"),
        Err(e) => {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
