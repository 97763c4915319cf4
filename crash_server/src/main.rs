use std::future::IntoFuture;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use sqlx::sqlite::SqlitePoolOptions;
use chrono::Utc;
use tracing::{error, info};

use crash_core::{HmacSeedSource, RoundEngine};
use crash_server::{
    build_router, cli::ServerCli, config::Config, store, store::Recorder, AppState, EngineTask, TokioClock,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = ServerCli::parse();

    let log_filter = if cli.debug {
        "debug"
    } else {
        "crash_server=info,crash_core=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_filter));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(cli.debug)
        .with_thread_ids(cli.debug)
        .with_file(cli.debug)
        .with_line_number(cli.debug)
        .init();

    let mut cfg = Config::load_or_create(&cli.config)
        .with_context(|| format!("loading or creating config '{}'", cli.config.display()))?;
    if let Some(bind) = cli.bind {
        cfg.bind = bind;
    }
    if let Some(url) = cli.database_url {
        cfg.database_url = url;
    }
    if let Some(seed) = cli.client_seed {
        cfg.client_seed = seed;
    }
    if cli.persist {
        cfg.save(&cli.config)
            .with_context(|| format!("saving updated config '{}'", cli.config.display()))?;
    }

    let db = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&cfg.database_url)
        .await
        .with_context(|| format!("connecting to '{}'", cfg.database_url))?;
    store::init_db(&db).await?;

    let engine_config = cfg.engine_config();
    let restored = store::recent_rounds(&db, engine_config.history_cap).await?;
    let last_round_id = store::last_round_id(&db).await?;
    info!(restored = restored.len(), last_round_id, client_seed = %cfg.client_seed, "restored history");
    let engine = RoundEngine::resume(
        engine_config,
        TokioClock,
        HmacSeedSource::new(cfg.client_seed.clone()),
        restored,
        last_round_id,
    );
    // the first commitment is on disk before anyone can see it
    let first = engine.snapshot();
    store::record_opened(&db, first.round_id, &first.commitment, Utc::now()).await?;

    let mut task = EngineTask::spawn(engine, cfg.tick_interval());
    let recorder = Recorder::spawn(db.clone(), task.subscribe(), first.round_id);

    let state = Arc::new(AppState {
        feed: task.feed(),
        db,
        instant_crash_probability: cfg.engine.instant_crash_probability,
    });
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&cfg.bind)
        .await
        .with_context(|| format!("binding {}", cfg.bind))?;
    info!(addr = %cfg.bind, "listening");
    let serve = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .into_future();
    let outcome = tokio::select! {
        res = serve => res.context("http server failed"),
        err = task.failed() => {
            error!(error = %format!("{err:#}"), "engine stopped, shutting down");
            Err(err)
        }
    };

    task.stop().await?;
    recorder.finish().await?;
    outcome
}
