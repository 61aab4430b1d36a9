use crate::config::EnumerationPolicy;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "kube-dns-monitor")]
#[command(about = "Watch kube-dns pods, logs and metrics incrementally")]
pub struct Cli {
    /// Kubeconfig context
    #[arg(long, global = true)]
    pub context: Option<String>,

    /// Enable debug logging
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    /// YAML file with monitor settings
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Poll logs and metrics of the DNS pods until cancelled
    Monitor(MonitorArgs),
    /// One-shot check of pods, logs, service and endpoints
    Check(CheckArgs),
}

#[derive(Args, Debug, Default, Clone)]
pub struct MonitorArgs {
    /// Namespace of the DNS pods
    #[arg(short = 'n', long)]
    pub namespace: Option<String>,

    /// Label selector for the DNS pods
    #[arg(short = 'l', long)]
    pub selector: Option<String>,

    /// Container to tail (repeatable)
    #[arg(short = 'c', long = "container")]
    pub containers: Vec<String>,

    /// Pod metric to poll (repeatable)
    #[arg(short = 'm', long = "metric")]
    pub metrics: Vec<String>,

    /// Do not poll heapster metrics
    #[arg(long)]
    pub no_metrics: bool,

    /// Seconds between ticks
    #[arg(long)]
    pub interval: Option<u64>,

    /// Seconds to wait before the first tick
    #[arg(long)]
    pub initial_delay: Option<u64>,

    /// Total run time in seconds, 0 for no limit
    #[arg(long)]
    pub max_run_time: Option<u64>,

    /// Per-source fetch timeout in seconds
    #[arg(long)]
    pub fetch_timeout: Option<u64>,

    /// Sources fetched concurrently within a tick
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Base URL of the heapster model API for the namespace
    #[arg(long)]
    pub heapster_url: Option<String>,

    /// Behaviour when listing pods fails
    #[arg(long, value_enum)]
    pub on_enumeration_error: Option<EnumerationPolicy>,

    /// Only print events matching this regex
    #[arg(long)]
    pub grep: Option<String>,
}

#[derive(Args, Debug, Default, Clone)]
pub struct CheckArgs {
    #[command(flatten)]
    pub monitor: MonitorArgs,

    /// Name of the DNS service
    #[arg(long, default_value = "kube-dns")]
    pub service: String,

    /// Also resolve every service name in the cluster
    #[arg(long)]
    pub dns: bool,
}
