mod check;
mod classify;
mod cli;
mod clock;
mod config;
mod error;
mod heapster;
mod kubernetes;
mod logs;
mod metrics;
mod monitor;
mod sink;
#[cfg(test)]
mod testing;
mod types;
mod watermark;

use clap::Parser;
use kube::{Client, config as kubeconfig};
use regex::Regex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use cli::{Cli, Command, MonitorArgs};
use clock::TokioClock;
use config::{FileConfig, MonitorConfig};
use heapster::HeapsterClient;
use kubernetes::KubeCluster;
use logs::LogTailer;
use monitor::Monitor;
use sink::{ChannelSink, print_emitted};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let file = match &cli.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    let args: &MonitorArgs = match &cli.command {
        Command::Monitor(args) => args,
        Command::Check(check) => &check.monitor,
    };
    let config = MonitorConfig::resolve(file, args)?;
    let grep = compile_grep(args.grep.as_deref())?;

    let client = initialize_client(cli.context.as_deref()).await?;
    let cluster = KubeCluster::new(client, &config.namespace);

    let (sink, rx) = ChannelSink::new();
    let printer = tokio::spawn(print_emitted(rx, grep));

    let result = match &cli.command {
        Command::Monitor(_) => run_monitor(cluster, config, sink).await,
        Command::Check(check) => {
            let tailer = LogTailer::new(Arc::new(cluster.clone()), config.fetch_timeout);
            let result =
                check::run_check(&cluster, &config, &tailer, &sink, &check.service, check.dns).await;
            drop(sink);
            result
        }
    };

    // All senders are gone once the command returns; let the printer drain.
    let _ = printer.await;
    result
}

async fn run_monitor(
    cluster: KubeCluster,
    config: MonitorConfig,
    sink: ChannelSink,
) -> anyhow::Result<()> {
    let heapster = HeapsterClient::new(&config.heapster_url, config.fetch_timeout)?;
    let cluster = Arc::new(cluster);
    let mut monitor = Monitor::new(
        config,
        cluster.clone(),
        cluster,
        Arc::new(heapster),
        Arc::new(sink),
    )
    .with_clock(Arc::new(TokioClock));

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received interrupt, stopping after current tick");
            on_signal.cancel();
        }
    });

    let summary = monitor.run(cancel).await?;
    info!(
        state = ?monitor.state(),
        tracked_sources = monitor.store().len(),
        ticks = summary.ticks,
        failed_ticks = summary.failed_ticks,
        failed_sources = summary.failed_sources,
        events = summary.events,
        samples = summary.samples,
        "Monitor stopped"
    );
    Ok(())
}

async fn initialize_client(context: Option<&str>) -> anyhow::Result<Client> {
    let config = match context {
        Some(ctx) => kubeconfig::Config::from_kubeconfig(&kubeconfig::KubeConfigOptions {
            context: Some(ctx.to_string()),
            ..Default::default()
        })
        .await
        .map_err(|e| anyhow::anyhow!("Context '{}' not found in kubeconfig: {}", ctx, e))?,
        None => kubeconfig::Config::infer().await?,
    };
    let client = Client::try_from(config)?;
    info!("Initialized client for context: {}", context.unwrap_or("current"));
    Ok(client)
}

fn compile_grep(pattern: Option<&str>) -> anyhow::Result<Option<Regex>> {
    pattern
        .map(|p| {
            Regex::new(p).map_err(|e| {
                error!("Invalid regex pattern '{}': {}", p, e);
                anyhow::anyhow!("Invalid regex pattern '{}': {}", p, e)
            })
        })
        .transpose()
}
