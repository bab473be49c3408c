//! Inquiry Server
//!
//! Axum server exposing the research pipeline over HTTP with a live SSE
//! event stream, plus a `run` subcommand that drives one analysis in the
//! terminal.

mod api;

use anyhow::Context;
use axum::{response::Json, routing::get, Router};
use clap::{Args as ClapArgs, Parser, Subcommand};
use inquiry_core::models::LlmProvider;
use inquiry_core::state::{InquiryDb, SnapshotStore, SqliteSnapshotStore};
use inquiry_core::swarm::{
    Coordinator, CoordinatorConfig, PipelineError, SwarmEvent, SwarmEventKind,
};
use std::io::Write;
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tokio::{
    net::TcpListener,
    sync::{broadcast, mpsc},
};
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi;

use api::pipeline::{self, pipeline_routes};

/// Application state
pub struct AppState {
    coordinator: Arc<Coordinator>,
    event_tx: broadcast::Sender<SwarmEvent>,
    /// Default base for share links
    public_url: String,
}

pub type SharedState = Arc<AppState>;

// === CLI ===

#[derive(Parser, Clone)]
#[command(author, version, about = "Inquiry - multi-stage research assistant")]
struct Args {
    #[command(subcommand)]
    command: Option<CliCommand>,
}

/// Settings shared by every subcommand; flags win over the config file
#[derive(ClapArgs, Clone, Default)]
struct ConfigArgs {
    /// JSON file with a `CoordinatorConfig`
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Completion backend: `local` or `gemini`
    #[arg(long)]
    provider: Option<String>,
    /// Model for every stage
    #[arg(long)]
    model: Option<String>,
    /// Completion endpoint override
    #[arg(long)]
    base_url: Option<String>,
    /// Tool service URL
    #[arg(long)]
    tools_url: Option<String>,
    /// Run without the tool service
    #[arg(long)]
    no_tools: bool,
    /// Database file for snapshots
    #[arg(long, default_value = ".inquiry/inquiry.db")]
    db: PathBuf,
}

#[derive(Subcommand, Clone)]
enum CliCommand {
    /// Start the HTTP server
    Serve {
        #[arg(short, long, default_value = "8080")]
        port: u16,
        #[command(flatten)]
        settings: ConfigArgs,
    },
    /// Run one analysis in the terminal and print the report
    Run {
        topic: String,
        #[command(flatten)]
        settings: ConfigArgs,
    },
}

/// Defaults, then the config file, then flags
fn load_config(args: &ConfigArgs) -> anyhow::Result<CoordinatorConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse config {}", path.display()))?
        }
        None => CoordinatorConfig::default(),
    };

    if let Some(provider) = &args.provider {
        let provider: LlmProvider = provider.parse()?;
        if provider != config.model.provider {
            config.model.provider = provider;
            config.model.model = provider.default_model().to_string();
            config.model.base_url = None;
        }
    }
    if let Some(model) = &args.model {
        config.model.model = model.clone();
    }
    if let Some(url) = &args.base_url {
        config.model.base_url = Some(url.clone());
    }
    if let Some(url) = &args.tools_url {
        config.tools.base_url = Some(url.clone());
    }
    if args.no_tools {
        config.tools.base_url = None;
    }
    Ok(config)
}

fn build_coordinator(
    settings: &ConfigArgs,
    event_tx: mpsc::Sender<SwarmEvent>,
) -> anyhow::Result<Coordinator> {
    let config = load_config(settings)?;
    let db = InquiryDb::open_at(&settings.db).context("Failed to open InquiryDb")?;
    let store: Arc<dyn SnapshotStore> = Arc::new(SqliteSnapshotStore::new(&db));

    println!(
        "🤖 Backend: {} ({})",
        config.model.provider.display_name(),
        config.model.model
    );
    Ok(Coordinator::new(config)?
        .with_event_channel(event_tx)
        .with_snapshot_store(store))
}

// === OpenAPI Definition ===

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Inquiry API",
        version = "1.0.0",
        description = "API for the Inquiry multi-stage research pipeline"
    ),
    paths(
        pipeline::get_state,
        pipeline::start_run,
        pipeline::revise_run,
        pipeline::restart_run,
        pipeline::resume_run,
        pipeline::set_view,
        pipeline::share_link,
        pipeline::restore_link,
        pipeline::restore_autosave,
        pipeline::restore_run,
        pipeline::events,
        pipeline::list_snapshots,
        pipeline::delete_snapshot,
        pipeline::get_report,
        pipeline::tools_health
    ),
    components(
        schemas(
            pipeline::ApiResponse,
            pipeline::StartRequest,
            pipeline::ReviseRequest,
            pipeline::RestartRequest,
            pipeline::RunAccepted,
            pipeline::ViewRequest,
            pipeline::ViewResponse,
            pipeline::ShareQuery,
            pipeline::ShareResponse,
            pipeline::RestoreLinkRequest,
            pipeline::RestoreRunRequest,
            pipeline::SnapshotResponse,
            pipeline::ReportResponse,
            pipeline::ToolHealthResponse
        )
    ),
    tags(
        (name = "pipeline", description = "Run control and live events"),
        (name = "snapshots", description = "Share links, autosave and checkpoints"),
        (name = "tools", description = "External tool service")
    )
)]
struct ApiDoc;

async fn serve_openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

// === Entry points ===

async fn run_server(port: u16, settings: ConfigArgs) -> anyhow::Result<()> {
    let (event_tx, _) = broadcast::channel::<SwarmEvent>(256);
    let (coordinator_tx, mut coordinator_rx) = mpsc::channel::<SwarmEvent>(256);

    let coordinator = Arc::new(build_coordinator(&settings, coordinator_tx)?);

    // Fan coordinator events out to SSE subscribers
    let fanout = event_tx.clone();
    tokio::spawn(async move {
        while let Some(event) = coordinator_rx.recv().await {
            let _ = fanout.send(event);
        }
    });

    match coordinator.restore_autosave().await {
        Ok(()) => {
            let restored = coordinator.snapshot().await;
            println!("💾 Restored autosave: \"{}\"", restored.topic);
        }
        Err(PipelineError::NoAutosave) => {}
        Err(e) => eprintln!("⚠️ Failed to restore autosave: {}", e),
    }

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let state: SharedState = Arc::new(AppState {
        coordinator,
        event_tx,
        public_url: format!("http://{}/", addr),
    });

    let app = Router::new()
        .nest("/api/v1/pipeline", pipeline_routes())
        .route("/api/v1/tools/health", get(pipeline::tools_health))
        .route("/api/v1/openapi.json", get(serve_openapi))
        .with_state(state);

    println!("🚀 Inquiry Server running at http://{}", addr);
    println!("   API v1 Routes:");
    println!("   Pipeline:  /api/v1/pipeline/state, /start, /revise, /restart, /resume, /events");
    println!("   Snapshots: /api/v1/pipeline/share, /restore, /snapshots");
    println!("   Tools:     /api/v1/tools/health");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Drive one analysis, streaming fragments to stdout
async fn run_once(topic: String, settings: ConfigArgs) -> anyhow::Result<()> {
    println!("🚀 Researching: {}", topic);
    let (tx, mut rx) = mpsc::channel::<SwarmEvent>(256);
    let coordinator = build_coordinator(&settings, tx)?;

    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match (event.kind, event.stage) {
                (SwarmEventKind::StageStarted, Some(stage)) => {
                    println!("\n\n=== {} ===", stage.display_name());
                }
                (SwarmEventKind::Fragment, _) => {
                    if let Some(text) = event.data.as_ref().and_then(|d| d["text"].as_str()) {
                        print!("{}", text);
                        let _ = std::io::stdout().flush();
                    }
                }
                (SwarmEventKind::StageWarning, Some(stage)) => {
                    eprintln!("\n⚠️ {} fell back to default output", stage.display_name());
                }
                (SwarmEventKind::RestartRequested, _) => println!("\n🔁 Restarting research"),
                _ => {}
            }
        }
    });

    let result = coordinator.start(&topic).await;
    drop(coordinator);
    let _ = printer.await;

    match result {
        Ok(state) => {
            println!("\n\n✅ Analysis complete (thread {})", state.thread_id);
            println!("   Facts:     {}", state.stylized_facts.len());
            println!("   Questions: {}", state.stylized_questions.len());
            println!("   Restarts:  {}", state.restart_count);
        }
        Err(e) => eprintln!("\n❌ Analysis failed: {}", e),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,inquiry_core=debug")),
        )
        .init();

    let args = Args::parse();

    println!("╔══════════════════════════════════════╗");
    println!("║           INQUIRY SERVER             ║");
    println!("╚══════════════════════════════════════╝");

    match args.command {
        Some(CliCommand::Run { topic, settings }) => run_once(topic, settings).await,
        Some(CliCommand::Serve { port, settings }) => run_server(port, settings).await,
        None => run_server(8080, ConfigArgs::default_settings()).await,
    }
}

impl ConfigArgs {
    /// Flag defaults when no subcommand is given
    fn default_settings() -> Self {
        Self {
            db: PathBuf::from(".inquiry/inquiry.db"),
            ..Self::default()
        }
    }
}
