use clap::Parser;
use std::path::PathBuf;

/// Server CLI for crash-server
#[derive(Parser, Debug, Clone)]
#[command(name = "crash-server", version, about = "Headless crash round authority")]
pub struct ServerCli {
    /// Path to config file
    #[arg(long, default_value = "crash.toml")]
    pub config: PathBuf,

    /// Address to listen on (overrides config.bind)
    #[arg(long, env = "BIND")]
    pub bind: Option<String>,

    /// Database URL (overrides config.database_url)
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Public client seed salting every draw (overrides config.client_seed)
    #[arg(long)]
    pub client_seed: Option<String>,

    /// Persist CLI overrides back to the config file
    #[arg(long, default_value_t = false)]
    pub persist: bool,

    /// Verbose logging with targets, threads and source locations
    #[arg(long, default_value_t = false)]
    pub debug: bool,
}
