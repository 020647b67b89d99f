mod config;

use common::domain::{LogSink, NeverProcessed};
use common::nats::NatsClient;
use common::telemetry::{init_telemetry, shutdown_telemetry, TelemetryConfig, TelemetryProviders};
use config::ServiceConfig;
use stage_worker::domain::{ForwardStage, Logger, LoggerConfig, TracingLogSink};
use stage_worker::nats::NatsLogSink;
use stage_worker::stage_worker::{StageWorker, StageWorkerConfig};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[tokio::main]
async fn main() {
    // Initialize configuration and tracing
    let config = match ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let telemetry_providers: Option<TelemetryProviders> = match init_telemetry(&TelemetryConfig {
        service_name: config.service_name.clone(),
        otel_endpoint: config.otel_endpoint.clone(),
        otel_enabled: config.otel_enabled,
        log_level: config.log_level.clone(),
        json_output: config.managed_environment,
    }) {
        Ok(providers) => providers,
        Err(e) => {
            eprintln!("Failed to initialize telemetry: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        otel_enabled = config.otel_enabled,
        managed = config.managed_environment,
        stages = %config.stages,
        "Starting sigroute-all-in-one service"
    );
    debug!("Configuration: {:?}", config);

    let nats_client = match initialize_nats(&config).await {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to initialize NATS: {}", e);
            std::process::exit(1);
        }
    };

    let workers = match build_workers(&config, &nats_client).await {
        Ok(workers) => workers,
        Err(e) => {
            error!("Failed to initialize stage workers: {}", e);
            std::process::exit(1);
        }
    };

    run_until_shutdown(workers).await;

    info!("Running cleanup tasks...");
    if let Ok(client) = Arc::try_unwrap(nats_client) {
        client.close().await;
    }
    shutdown_telemetry(telemetry_providers);
    info!("Cleanup complete");
}

async fn initialize_nats(config: &ServiceConfig) -> anyhow::Result<Arc<NatsClient>> {
    info!("Initializing NATS...");
    let client = NatsClient::connect(
        &config.nats_url,
        Duration::from_secs(config.startup_timeout_secs),
    )
    .await?;
    client
        .ensure_stream(&config.nats_stream, &config.channel_prefix)
        .await?;
    Ok(Arc::new(client))
}

fn stage_logger(config: &ServiceConfig, nats_client: &NatsClient, stage_name: &str) -> Arc<Logger> {
    let mut secondary: Vec<Arc<dyn LogSink>> = Vec::new();
    if !config.log_subject.is_empty() {
        secondary.push(Arc::new(NatsLogSink::new(
            nats_client.create_publisher_client(),
            config.log_subject.clone(),
        )));
    }

    let resource_labels = BTreeMap::from([
        ("function_name".to_string(), stage_name.to_string()),
        ("service_name".to_string(), config.service_name.clone()),
    ]);

    Arc::new(Logger::new(
        LoggerConfig {
            resource_labels,
            console_echo: !config.managed_environment,
        },
        Arc::new(TracingLogSink),
        secondary,
    ))
}

async fn build_workers(config: &ServiceConfig, nats_client: &NatsClient) -> anyhow::Result<Vec<StageWorker>> {
    let stage_names = config.stage_names();
    if stage_names.is_empty() {
        anyhow::bail!("no stages configured");
    }

    let mut workers = Vec::with_capacity(stage_names.len());
    for name in stage_names {
        let worker = StageWorker::new(
            Arc::new(ForwardStage::new(&name)),
            stage_logger(config, nats_client, &name),
            Arc::new(NeverProcessed),
            nats_client.create_consumer_client(),
            nats_client.create_publisher_client(),
            StageWorkerConfig {
                stream: config.nats_stream.clone(),
                channel_prefix: config.channel_prefix.clone(),
                nats_batch_size: config.nats_batch_size,
                nats_batch_wait_secs: config.nats_batch_wait_secs,
            },
        )
        .await?;
        workers.push(worker);
    }
    Ok(workers)
}

/// Run every worker until a signal arrives or one of them stops
async fn run_until_shutdown(workers: Vec<StageWorker>) {
    let token = CancellationToken::new();
    let mut join_set = JoinSet::new();

    for worker in workers {
        let worker_token = token.clone();
        join_set.spawn(async move {
            let name = worker.stage_name().to_string();
            (name, worker.run(worker_token).await)
        });
    }

    let signal_token = token.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        signal_token.cancel();
    });

    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((name, Ok(()))) => info!(stage = %name, "Stage worker stopped"),
            Ok((name, Err(e))) => {
                error!(stage = %name, error = %e, "Stage worker failed, shutting down");
                token.cancel();
            }
            Err(e) => {
                error!(error = %e, "Stage worker task panicked, shutting down");
                token.cancel();
            }
        }
    }
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received shutdown signal"),
                    _ = sigterm.recv() => info!("Received SIGTERM signal"),
                }
                return;
            }
            Err(e) => error!("Failed to set up SIGTERM handler: {}", e),
        }
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal"),
        Err(e) => error!("Error setting up signal handler: {}", e),
    }
}
