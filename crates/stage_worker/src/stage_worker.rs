use crate::domain::{
    channel_name, Dispatcher, DispatcherConfig, Logger, Stage, StagePipeline, StageRunner,
};
use crate::nats::{create_stage_processor, NatsMessagePublisher};
use common::domain::ProcessedCheck;
use common::nats::{JetStreamConsumer, JetStreamPublisher, NatsConsumer};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct StageWorkerConfig {
    pub stream: String,
    pub channel_prefix: String,
    pub nats_batch_size: usize,
    pub nats_batch_wait_secs: u64,
}

/// One stage bound to its JetStream channel
pub struct StageWorker {
    stage_name: String,
    consumer: NatsConsumer,
}

impl StageWorker {
    pub async fn new(
        stage: Arc<dyn Stage>,
        logger: Arc<Logger>,
        processed_check: Arc<dyn ProcessedCheck>,
        consumer_client: Arc<dyn JetStreamConsumer>,
        publisher_client: Arc<dyn JetStreamPublisher>,
        config: StageWorkerConfig,
    ) -> anyhow::Result<Self> {
        let stage_name = stage.name().to_string();
        info!(stage = %stage_name, "Initializing stage worker");

        let dispatcher = Arc::new(Dispatcher::new(
            DispatcherConfig {
                channel_prefix: config.channel_prefix.clone(),
            },
            Arc::new(NatsMessagePublisher::new(publisher_client)),
            Arc::clone(&logger),
        ));
        let runner = StageRunner::new(dispatcher, Arc::clone(&logger));
        let pipeline = Arc::new(StagePipeline::new(stage, runner, logger, processed_check));

        let subject = channel_name(&config.channel_prefix, None, Some(&stage_name));
        let consumer = NatsConsumer::new(
            consumer_client,
            &config.stream,
            &format!("sigroute-stage-{}", stage_name),
            &subject,
            config.nats_batch_size,
            config.nats_batch_wait_secs,
            create_stage_processor(pipeline),
        )
        .await?;

        info!(stage = %stage_name, subject = %subject, "Stage worker initialized");

        Ok(Self {
            stage_name,
            consumer,
        })
    }

    pub fn stage_name(&self) -> &str {
        &self.stage_name
    }

    pub async fn run(self, ctx: CancellationToken) -> anyhow::Result<()> {
        self.consumer.run(ctx).await
    }
}
