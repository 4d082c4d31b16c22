// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use anyhow::Context;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use fritz_scraper::log_file::LogFile;
use fritz_scraper::{server, Config, Labels, MetricsSink, PrometheusSink, Scraper, Series};
use fritzbox::client::REQUEST_TIMEOUT;
use fritzbox::{Credentials, FritzClient};
use loki::{Pusher, RetryStrategy};

const LOKI_TIMEOUT: Duration = Duration::from_secs(10);
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
pub async fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            // The subscriber needs the configured level, so this goes straight to stderr.
            eprintln!("Invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_logging(&config.log_level) {
        eprintln!("Cannot set up logging: {e:#}");
        return ExitCode::FAILURE;
    }

    match run(config).await {
        Ok(()) => {
            info!("Shut down cleanly");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(log_level: &str) -> anyhow::Result<()> {
    let env_filter = format!("hyper=off,reqwest=off,rustls=off,{log_level}");

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).context("could not parse log level in configuration")?,
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    debug!("Logging subsystem enabled");
    Ok(())
}

async fn run(config: Config) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    tokio::spawn(wait_for_shutdown(cancel.clone()));

    let metrics = Arc::new(PrometheusSink::new().context("cannot register metrics")?);
    let revision = option_env!("FRITZ_EXPORTER_REVISION").unwrap_or("unknown");
    metrics
        .set_gauge(Series::BuildInfo, &Labels::new([VERSION, revision]), 1.0)
        .context("cannot publish build info")?;

    let listener = server::bind(config.metrics_addr()?).await?;
    info!(
        "Serving metrics on http://{}{}",
        config.metrics_address,
        server::METRICS_ENDPOINT_PATH
    );
    let server_handle = tokio::spawn(server::serve(listener, metrics.clone(), cancel.clone()));

    let client = FritzClient::new(config.device_url()?, REQUEST_TIMEOUT)
        .context("cannot create device client")?;
    info!("Scraping device at {}", client.base_url());
    let credentials = Credentials::new(config.username.clone(), config.password.clone());
    let mut scraper = Scraper::new(Arc::new(client), credentials, metrics);

    if let Some(path) = &config.log_path {
        let file = LogFile::new(path);
        if let Err(e) = file.truncate() {
            warn!("Cannot create log file {}: {e}", path.display());
        }
        scraper = scraper.with_log_file(file);
    }
    if let Some(loki_url) = &config.loki_url {
        let pusher = Pusher::new(loki_url, LOKI_TIMEOUT, RetryStrategy::default())
            .context("cannot create Loki pusher")?;
        info!("Forwarding device log to {}", pusher.url());
        scraper = scraper.with_log_sink(Arc::new(pusher));
    }
    if !config.log_forwarding_enabled() {
        debug!("No log destination configured, device log is not read");
    }

    info!("Starting FRITZ!Box exporter {VERSION}");
    let scraped = scraper.run(cancel.clone()).await;
    cancel.cancel();

    match server_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Metrics endpoint failed: {e}"),
        Err(e) => warn!("Metrics endpoint task failed: {e}"),
    }
    scraped.context("scraper failed to start")?;
    Ok(())
}

/// Cancels `cancel` on Ctrl-C or, on Unix, SIGTERM.
async fn wait_for_shutdown(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = terminate.recv() => {},
                }
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {e}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("Shutdown requested, finishing the current cycle");
    cancel.cancel();
}
