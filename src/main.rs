//! Kashshaf search service entry point.

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use kashshaf::cache::InflightMap;
use kashshaf::repos::{NullMetadataRepository, NullTranslationRepository};
use kashshaf::search::{
    ChatCompleter, DisabledChat, OpenRouterChat, QueryExpander, Reranker, SearchOrchestrator,
};
use kashshaf::translation::TranslationMerger;
use kashshaf::{
    ApiState, ApiEmbeddingClient, Config, ElasticClient, EmbeddingModel, QdrantSearcher,
    TieredEmbedder,
};

/// Kashshaf: hybrid Arabic/Islamic search service
#[derive(Parser, Debug)]
#[command(name = "kashshaf")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Listen port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable JSON logging format
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!("Starting kashshaf v{}", env!("CARGO_PKG_VERSION"));

    let mut config = if let Some(path) = &args.config {
        Config::from_file(path)?
    } else {
        Config::load()?
    };
    if let Some(port) = args.port {
        config.server.port = port;
    }

    tracing::info!(
        elastic = %config.elastic.url,
        qdrant = %config.qdrant.url,
        environment = %config.server.environment,
        "Configuration loaded"
    );

    let lexical = Arc::new(ElasticClient::from_config(&config.elastic)?);
    let vector = Arc::new(QdrantSearcher::from_config(&config.qdrant)?);
    let chat: Arc<dyn ChatCompleter> = match OpenRouterChat::from_config(&config.llm) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            tracing::warn!(error = %e, "reranking and query expansion disabled");
            Arc::new(DisabledChat)
        }
    };

    // Repository implementations are wired by the deploying service; the
    // bare binary runs without them.
    let metadata = Arc::new(NullMetadataRepository);
    let translations = Arc::new(NullTranslationRepository);
    if config.database.url.is_none() {
        tracing::warn!("DATABASE_URL not set; metadata joins and translations are disabled");
    }

    let mut builder = SearchOrchestrator::builder(config.clone())
        .lexical(lexical)
        .vector(vector)
        .metadata(metadata.clone())
        .reranker(Arc::new(Reranker::new(chat.clone(), &config.llm)))
        .expander(Arc::new(QueryExpander::new(
            chat,
            &config.llm,
            &config.search,
        )))
        .merger(Arc::new(TranslationMerger::new(
            translations,
            metadata,
            Arc::new(InflightMap::new()),
        )));

    for model in [EmbeddingModel::Large, EmbeddingModel::Jina] {
        match ApiEmbeddingClient::from_config(&config.embedding, model) {
            Ok(client) => {
                builder = builder.embedder(
                    model,
                    Arc::new(TieredEmbedder::new(
                        &config.embedding,
                        model,
                        Arc::new(client),
                        None,
                    )),
                );
            }
            Err(e) => {
                tracing::warn!(model = model.api_name(), error = %e, "embedding back-end not configured");
            }
        }
    }

    let orchestrator = Arc::new(builder.build()?);
    let app = kashshaf::router(ApiState { orchestrator });

    let addr = format!("0.0.0.0:{}", config.server.port);
    tracing::info!(%addr, "Listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
