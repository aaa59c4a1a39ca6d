use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use pr_cli::config::{Config, Secret, DEFAULT_CONFIG_FILE_PATH};
use pr_cli::engine::process::start_workers;
use pr_cli::engine::EngineContext;
use pr_cli::platform::github::GithubClient;
use pr_cli::platform::gitlab::GitlabClient;
use pr_cli::platform::{PlatformClient, PlatformKind};
use pr_cli::results::ResultSink;
use pr_cli::server::metrics::Metrics;
use pr_cli::server::{create_app, ServerState};

#[derive(clap::Parser)]
struct Opts {
    /// Path to the configuration file.
    #[arg(long, default_value = DEFAULT_CONFIG_FILE_PATH)]
    config: PathBuf,

    /// Address the HTTP server binds to.
    #[arg(long, default_value = "0.0.0.0:8080")]
    bind: SocketAddr,

    /// API token used for platform calls.
    #[arg(long, env = "PR_CLI_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Token used for posting comments, when different from the API token.
    #[arg(long, env = "PR_CLI_COMMENT_TOKEN", hide_env_values = true)]
    comment_token: Option<String>,

    /// Secret used to authenticate webhooks.
    #[arg(long, env = "PR_CLI_WEBHOOK_SECRET", hide_env_values = true)]
    webhook_secret: Option<String>,
}

async fn run(opts: Opts) -> anyhow::Result<()> {
    let mut config = Config::load(&opts.config)?;
    if let Some(token) = opts.token {
        config.token = Some(Secret::new(token));
    }
    if let Some(token) = opts.comment_token {
        config.comment_token = Some(Secret::new(token));
    }
    if let Some(secret) = opts.webhook_secret {
        config.webhook_secret = Some(Secret::new(secret));
    }
    let config = Arc::new(config);

    let client: Arc<dyn PlatformClient> = match config.platform {
        PlatformKind::Github => Arc::new(GithubClient::new(&config)?),
        PlatformKind::Gitlab => Arc::new(GitlabClient::new(&config)?),
    };
    let results = ResultSink::new(config.results_dir.clone());
    let metrics = Arc::new(Metrics::new());
    let engine = Arc::new(EngineContext::new(
        config.clone(),
        client,
        results,
        metrics,
    ));
    let (queue, pool) = start_workers(engine.clone(), config.queue_size, config.worker_count);

    let app = create_app(ServerState::new(config.clone(), engine, queue));
    let listener = tokio::net::TcpListener::bind(opts.bind)
        .await
        .with_context(|| format!("Cannot bind to {}", opts.bind))?;
    tracing::info!("Listening on {}", opts.bind);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server failed")?;

    tracing::info!("Draining workers");
    pool.shutdown(config.shutdown_grace()).await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Cannot install ctrl-c handler");
    };
    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Cannot install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();
    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn try_main(opts: Opts) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Cannot build tokio runtime")?;
    runtime.block_on(run(opts))
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();
    if let Err(error) = try_main(opts) {
        eprintln!("Error: {error:?}");
        std::process::exit(1);
    }
}
