// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

mod settings;

use std::sync::Arc;

use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use service_config_fetcher::{
    ConfigLoader, FetcherConfig, HttpCaller, PollOutcome, RolloutResolver, SecuredTransport,
    ServiceConfigPoller, ServiceManagementClient, TokenProvider, TokenSource,
};

use settings::PollerSettings;

#[tokio::main]
pub async fn main() {
    let settings = PollerSettings::from_os_env();
    let log_level = settings
        .as_ref()
        .map(|s| s.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", log_level);

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let settings = match settings {
        Ok(settings) => settings,
        Err(e) => {
            error!("Invalid poller configuration: {e}");
            return;
        }
    };
    let config = FetcherConfig::from_os_env();

    let pollers = match build_pollers(&config, &settings.service_names) {
        Ok(pollers) => pollers,
        Err(e) => {
            error!("Unable to start service config poller: {e}");
            return;
        }
    };

    let cancel = CancellationToken::new();
    let mut tasks = Vec::with_capacity(pollers.len());
    for poller in pollers {
        info!(
            service = %poller.service_name(),
            interval = ?settings.poll_interval,
            "polling service"
        );
        tasks.push(tokio::spawn(run_poller(
            poller,
            settings.poll_interval,
            cancel.clone(),
        )));
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Unable to listen for shutdown signal: {e}");
    }
    info!("Shutting down service config poller");
    cancel.cancel();
    for task in tasks {
        if let Err(e) = task.await {
            error!("Poller task ended abnormally: {e}");
        }
    }
}

/// Builds one poller per service, all sharing a single transport and token provider.
fn build_pollers(
    config: &FetcherConfig,
    service_names: &[String],
) -> Result<Vec<ServiceConfigPoller>, Box<dyn std::error::Error>> {
    let transport = SecuredTransport::new(&config.root_certs_path, config.http_request_timeout)?;
    let client = ServiceManagementClient::new(
        Arc::new(HttpCaller::new(&transport)),
        config.service_management_url.clone(),
    );
    // Key-file signing is not bundled with this binary; a configured key path
    // surfaces as a credential configuration error on the first cycle.
    let provider = TokenProvider::select(config, None)?;
    debug!(?provider, "credential strategy selected");
    let tokens: Arc<dyn TokenSource> = Arc::new(provider);

    Ok(service_names
        .iter()
        .map(|name| {
            ServiceConfigPoller::new(
                name.clone(),
                RolloutResolver::new(client.clone(), Arc::clone(&tokens)),
                ConfigLoader::new(client.clone(), Arc::clone(&tokens)),
            )
        })
        .collect())
}

async fn run_poller(poller: ServiceConfigPoller, period: Duration, cancel: CancellationToken) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        match poller.poll_once().await {
            Ok(PollOutcome::Unchanged) => {
                debug!(service = %poller.service_name(), "no rollout change");
            }
            Ok(PollOutcome::RolloutAdvanced(selection)) => {
                info!(
                    service = %poller.service_name(),
                    rollout_id = %selection.rollout_id,
                    "rollout advanced without config change"
                );
            }
            Ok(PollOutcome::ConfigChanged { selection, config }) => {
                info!(
                    service = %poller.service_name(),
                    rollout_id = %selection.rollout_id,
                    config_id = %selection.config_id,
                    title = %config.title,
                    "new service config ready"
                );
            }
            Err(e) => {
                warn!(
                    service = %poller.service_name(),
                    kind = ?e.kind(),
                    error = %e,
                    "poll cycle failed"
                );
            }
        }
    }
}
