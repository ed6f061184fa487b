use anyhow::Context;
use clap::Parser;
use dashprint_browser::{run_capture, CaptureReport};
use dashprint_core::{CaptureConfig, ConfigOverrides, Paths, Protocol};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "dashprint")]
#[command(about = "Render a Grafana dashboard to PDF with a headless browser", long_about = None)]
#[command(version)]
struct Cli {
    /// Grafana host
    #[arg(long = "grafana_host")]
    grafana_host: Option<String>,

    /// Grafana port [default: 3000]
    #[arg(long = "grafana_port")]
    grafana_port: Option<u16>,

    /// Grafana protocol (http|https)
    #[arg(long = "grafana_protocol")]
    grafana_protocol: Option<Protocol>,

    /// Grafana API token, sent as a bearer token
    #[arg(long = "grafana_api_token")]
    grafana_api_token: Option<String>,

    /// Grafana path prefix (e.g. grafana)
    #[arg(long = "grafana_prefix")]
    grafana_prefix: Option<String>,

    /// Grafana dashboard ID
    #[arg(long = "grafana_dashboard_id")]
    grafana_dashboard_id: Option<String>,

    /// Grafana variables as a query fragment (e.g. var-env=prod&var-host=web01)
    #[arg(long = "grafana_variables")]
    grafana_variables: Option<String>,

    /// Output file [default: output.pdf]
    #[arg(long = "output_file")]
    output_file: Option<PathBuf>,

    /// Seconds to wait after page load before printing [default: 10]
    #[arg(long = "wait_time")]
    wait_time: Option<u64>,

    /// JSON config file [default: ~/.dashprint/config.json when present]
    #[arg(long)]
    config: Option<PathBuf>,

    /// Browser executable (auto-detected when omitted)
    #[arg(long = "browser_path")]
    browser_path: Option<PathBuf>,

    /// Show the browser window
    #[arg(long)]
    headed: bool,

    /// Launch the browser with --no-sandbox
    #[arg(long = "no_sandbox")]
    no_sandbox: bool,

    /// Seconds allowed for browser startup, each browser command and the page load [default: 60]
    #[arg(long)]
    timeout: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            host: self.grafana_host.clone(),
            port: self.grafana_port,
            protocol: self.grafana_protocol,
            api_token: self.grafana_api_token.clone(),
            prefix: self.grafana_prefix.clone(),
            dashboard_id: self.grafana_dashboard_id.clone(),
            variables: self.grafana_variables.clone(),
            output_file: self.output_file.clone(),
            wait_time: self.wait_time,
            browser_binary: self.browser_path.clone(),
            headed: self.headed,
            no_sandbox: self.no_sandbox,
            timeout_secs: self.timeout,
        }
    }
}

fn resolve_config(cli: &Cli) -> anyhow::Result<CaptureConfig> {
    let mut config = match &cli.config {
        Some(path) => CaptureConfig::load(path)
            .with_context(|| format!("loading config file {}", path.display()))?,
        None => CaptureConfig::load_or_default(&Paths::new())?,
    };
    config.apply(cli.overrides());
    config.validate()?;
    Ok(config)
}

async fn run(cli: &Cli) -> anyhow::Result<CaptureReport> {
    let config = resolve_config(cli)?;
    info!(config = ?config, "Capture configuration");
    let report = run_capture(&config).await?;
    Ok(report)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let started = Instant::now();
    let cli = Cli::parse();

    // Setup tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match run(&cli).await {
        Ok(report) => {
            info!(
                url = %report.url,
                path = %report.output_file.display(),
                bytes = report.bytes_written,
                "Done! Took: {:.2?}",
                started.elapsed()
            );
            Ok(())
        }
        Err(e) => {
            error!("Capture failed: {:#}", e);
            std::process::exit(1);
        }
    }
}
