//! Solo pool daemon.
//!
//! Single entry point: `solopoold <config.toml>`. Exits 0 on clean
//! shutdown, 1 on a fatal initialization error (bad config, node
//! unreachable, port in use).

use std::env;
use std::path::Path;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal::unix::{self, SignalKind};
use tokio::sync::mpsc;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use solopool::api;
use solopool::config::Config;
use solopool::jobs::{self, JobStore};
use solopool::node::{BlockSubmitter, NodeClient, TemplateSource};
use solopool::records::RecordWriter;
use solopool::server::Server;
use solopool::share::ShareValidator;
use solopool::stats::PoolCounters;
use solopool::stratum::{SessionContext, SessionRegistry};
use solopool::tracing::{self as pool_tracing, prelude::*};

#[tokio::main]
async fn main() {
    pool_tracing::init();

    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        eprintln!("Usage: solopoold <config.toml>");
        process::exit(1);
    }

    if let Err(e) = run(Path::new(&args[1])).await {
        error!(error = format!("{e:#}"), "fatal error");
        process::exit(1);
    }
}

async fn run(config_path: &Path) -> Result<()> {
    let config = Config::load_from(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    let client =
        Arc::new(NodeClient::new(&config.rpc).context("building node RPC client")?);

    // Fail fast on an unreachable or misconfigured node; once running,
    // node outages are ridden out instead.
    let template = client
        .get_block_template()
        .await
        .with_context(|| format!("probing node at {}", config.rpc.url))?;
    info!(
        height = template.height,
        network = %config.network,
        "Connected to node"
    );

    let listener = tokio::net::TcpListener::bind(config.stratum_addr())
        .await
        .with_context(|| format!("binding Stratum listener on {}", config.stratum_addr()))?;

    let records = match &config.records.path {
        Some(path) => Arc::new(
            RecordWriter::open(path)
                .await
                .with_context(|| format!("opening record file {}", path.display()))?,
        ),
        None => Arc::new(RecordWriter::disabled()),
    };

    let mut sigint =
        unix::signal(SignalKind::interrupt()).context("installing SIGINT handler")?;
    let mut sigterm =
        unix::signal(SignalKind::terminate()).context("installing SIGTERM handler")?;

    let counters = Arc::new(PoolCounters::new());
    let store = Arc::new(JobStore::new());
    let registry = Arc::new(SessionRegistry::new());
    let submitter = Arc::new(BlockSubmitter::new(client.clone()));
    let validator = Arc::new(ShareValidator::new(
        store.clone(),
        submitter,
        records,
        counters.clone(),
    ));

    let ctx = Arc::new(SessionContext {
        network: config.network,
        stratum: config.stratum.clone(),
        registry: registry.clone(),
        validator,
        jobs: store.clone(),
        counters: counters.clone(),
    });

    let running = CancellationToken::new();
    let tracker = TaskTracker::new();
    let (template_tx, template_rx) = mpsc::channel(4);

    tracker.spawn(
        TemplateSource::new(
            client,
            config.zmq.endpoint.clone(),
            template_tx,
            running.clone(),
        )
        .run(),
    );
    tracker.spawn(jobs::builder_task(
        template_rx,
        store.clone(),
        registry.clone(),
        running.clone(),
    ));
    tracker.spawn(Server::new(ctx, listener).run(running.clone()));

    if let Some(listen) = config.api.listen.clone() {
        let state = api::ApiState {
            network: config.network,
            counters,
            registry,
            jobs: store,
        };
        let shutdown = running.clone();
        tracker.spawn(async move {
            if let Err(e) = api::serve(listen, state, shutdown).await {
                error!(error = %e, "status API failed");
            }
        });
    }

    tracker.close();
    info!("Started.");

    tokio::select! {
        _ = sigint.recv() => {}
        _ = sigterm.recv() => {}
    }

    trace!("Shutting down.");
    running.cancel();
    tracker.wait().await;
    info!("Exiting.");
    Ok(())
}
