use anyhow::{bail, Context, Result};
use clap::Parser;
use reqwest::Method;

use tokio::runtime::Builder;
use tracing::{debug, info};

use backoff_client::cli::{self, parse_header, Cli, RequestSummary};
use backoff_client::config::HttpServiceConfig;
use backoff_client::http::ReqwestExecutor;
use backoff_client::outcome::RequestSpec;

fn main() -> Result<()> {
    let num_cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);

    // IO-bound: a couple of threads over the core count, capped at 16
    let worker_threads = std::cmp::min(num_cpus + 2, 16);

    debug!("Configuring Tokio runtime with {} worker threads", worker_threads);

    let runtime = Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()
        .context("Failed to create Tokio runtime")?;

    runtime.block_on(async_main())
}

async fn async_main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = cli.service_config();
    config.validate().context("Invalid retry settings")?;

    match &cli.command {
        cli::Commands::Request {
            url,
            method,
            headers,
            data,
        } => {
            let method = Method::from_bytes(method.to_uppercase().as_bytes())
                .with_context(|| format!("Invalid HTTP method '{}'", method))?;

            let mut spec = RequestSpec::new(method, url.as_str());
            for raw in headers {
                let (name, value) = parse_header(raw)?;
                spec = spec.header(name, value);
            }
            if let Some(data) = data {
                spec = spec.body(data.as_bytes());
            }

            run_request(&config, spec).await?;
        }
        cli::Commands::Schedule { count } => {
            let waits: Vec<f64> = config
                .backoff_option()?
                .iter()
                .take(*count)
                .map(|wait| wait.as_secs_f64())
                .collect();
            println!("{}", serde_json::to_string_pretty(&waits)?);
        }
    }

    Ok(())
}

async fn run_request(config: &HttpServiceConfig, spec: RequestSpec) -> Result<()> {
    let client = config.build_client(ReqwestExecutor::new()?)?;

    info!("Requesting {} {}", spec.method, spec.url);
    let report = client.request_with_report(spec).await?;

    let summary = RequestSummary::from_report(&report);
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if report.exhausted {
        bail!(
            "Retries exhausted after {} attempts, last status {}",
            report.attempts,
            summary.status
        );
    }

    Ok(())
}
