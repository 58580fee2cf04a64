use anyhow::{Context, Result};
use chrono::Utc;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use alertgest_ai::{OllamaProvider, Summarizer};
use alertgest_notify::{ChatChannel, TeamsChannel};
use alertgest_server::app;
use alertgest_server::capture::WindowManager;
use alertgest_server::config::ServerConfig;
use alertgest_server::digest::{DeliveryCoordinator, DigestGenerator, GeneratorSettings};
use alertgest_server::retention::RetentionTask;
use alertgest_server::scheduler::DigestScheduler;
use alertgest_server::state::AppState;
use alertgest_storage::Store;

const DEFAULT_CONFIG_PATH: &str = "config/server.toml";

#[allow(clippy::print_stderr)]
fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  alertgest-server [config.toml]             Start the server");
    eprintln!("  alertgest-server run-once [config.toml]    Run one digest cycle and exit");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some("--help" | "-h") => {
            print_usage();
            Ok(())
        }
        Some("run-once") => {
            let config = load_config(args.get(2).map(String::as_str))?;
            run_once(config).await
        }
        path => {
            let config = load_config(path)?;
            run_server(config).await
        }
    }
}

fn load_config(path: Option<&str>) -> Result<ServerConfig> {
    let path = path.unwrap_or(DEFAULT_CONFIG_PATH);
    let config = ServerConfig::load(path)
        .with_context(|| format!("Failed to load config from '{path}'"))?;

    // 优先使用 RUST_LOG，否则按配置的级别输出本项目日志
    let directive = format!("alertgest={}", config.log_level);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive.parse()?))
        .init();
    Ok(config)
}

struct Services {
    store: Arc<Store>,
    windows: Arc<WindowManager>,
    delivery: Arc<DeliveryCoordinator>,
    scheduler: Arc<DigestScheduler>,
}

async fn build_services(config: &ServerConfig) -> Result<Services> {
    if let Some(dir) = config.database.sqlite_parent_dir() {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create data directory {}", dir.display()))?;
    }
    let store = Arc::new(Store::new(&config.database.url, config.database.max_connections).await?);

    let interval = config.capture_interval()?;
    let digest_tz = config.digest_timezone()?;
    let windows = Arc::new(WindowManager::new(store.clone(), interval));

    let summarizer: Arc<dyn Summarizer> = Arc::new(OllamaProvider::new(
        config.ollama.base_url.clone(),
        config.ollama.model.clone(),
        config.ollama.fallback_model.clone(),
        config.ollama.timeout_secs,
    )?);
    let generator = Arc::new(DigestGenerator::new(
        store.clone(),
        summarizer,
        GeneratorSettings {
            timezone: digest_tz,
            max_tokens: config.ollama.max_tokens,
            temperature: config.ollama.temperature,
            call_timeout: config.generation_timeout(),
            max_attempts: config.digest.max_generation_attempts,
            samples_per_alertname: config.digest.samples_per_alertname,
        },
    ));

    let channel: Option<Arc<dyn ChatChannel>> = match config.teams_webhook_url() {
        Some(url) => Some(Arc::new(TeamsChannel::new(url, config.teams.timeout_secs)?)),
        None => {
            tracing::warn!(
                "No Teams webhook configured, digests will be generated but not delivered"
            );
            None
        }
    };
    let delivery = Arc::new(DeliveryCoordinator::new(
        store.clone(),
        channel,
        digest_tz,
        Duration::from_secs(config.teams.timeout_secs),
        config.digest.max_delivery_attempts,
    ));

    let scheduler = Arc::new(DigestScheduler::new(
        store.clone(),
        windows.clone(),
        generator,
        delivery.clone(),
        config.digest_schedule()?,
        digest_tz,
        config.digest.max_concurrent,
    ));

    Ok(Services {
        store,
        windows,
        delivery,
        scheduler,
    })
}

async fn run_once(config: ServerConfig) -> Result<()> {
    let services = build_services(&config).await?;
    let report = services.scheduler.tick(Utc::now()).await;
    if report.errors > 0 {
        anyhow::bail!("digest cycle finished with {} error(s)", report.errors);
    }
    Ok(())
}

async fn run_server(config: ServerConfig) -> Result<()> {
    tracing::info!(
        http_port = config.http_port,
        capture_window = %format!(
            "{}-{} {}",
            config.capture_window.start, config.capture_window.end, config.capture_window.timezone
        ),
        digest_cron = %config.digest.cron,
        model = %config.ollama.model,
        "alertgest-server starting"
    );

    let services = build_services(&config).await?;

    let state = AppState {
        store: services.store.clone(),
        windows: services.windows.clone(),
        delivery: services.delivery.clone(),
        scheduler_status: services.scheduler.subscribe(),
    };

    let http_addr: SocketAddr = format!("0.0.0.0:{}", config.http_port).parse()?;
    let app = app::build_http_app(state);
    let http_listener = tokio::net::TcpListener::bind(http_addr).await?;
    let http_server = axum::serve(http_listener, app);

    let scheduler = services.scheduler.clone();
    let scheduler_handle = tokio::spawn(async move {
        scheduler.start().await;
    });

    let retention = Arc::new(RetentionTask::new(
        services.store.clone(),
        config.retention.alert_retention_days,
        Duration::from_secs(config.retention.cleanup_interval_secs),
    ));
    let cleanup_handle = tokio::spawn(async move {
        retention.start().await;
    });

    tracing::info!(http = %http_addr, "Server started");

    tokio::select! {
        result = http_server.with_graceful_shutdown(async { signal::ctrl_c().await.ok(); }) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server error");
            }
        }
        _ = signal::ctrl_c() => {
            tracing::info!("Shutting down gracefully");
        }
    }

    scheduler_handle.abort();
    cleanup_handle.abort();
    tracing::info!("Server stopped");

    Ok(())
}
