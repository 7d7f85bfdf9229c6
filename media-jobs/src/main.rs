use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use media_jobs::api::{ApiServer, AppState};
use media_jobs::config::EngineConfig;
use media_jobs::engines::{
    EngineSet, FetchChain, FfmpegEngine, HttpStrategy, LocalFileStrategy, WhisperCppEngine,
};
use media_jobs::lifecycle::JobLifecycleManager;
use media_jobs::logging::init_logging;
use media_jobs::pipeline::{JobPurgeService, ProcessorRegistry};
use media_jobs::policy::ResourcePolicy;
use media_jobs::scheduler::Scheduler;
use media_jobs::store::FileJobRepository;
use media_jobs::telemetry::{SystemProbe, TelemetryProbe};

/// Time running jobs get to finish after shutdown is requested.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = EngineConfig::from_env();

    let (logging, _log_guard) = init_logging(&config.store.log_dir)?;
    let shutdown = CancellationToken::new();
    logging.start_retention_cleanup(shutdown.clone());

    let repo = Arc::new(FileJobRepository::open(&config.store.jobs_dir).await?);
    let lifecycle = Arc::new(JobLifecycleManager::new(
        repo,
        &config.store.temp_dir,
        &config.store.output_dir,
    ));
    let recovered = lifecycle.recover().await?;
    info!(
        requeued = recovered.requeued,
        interrupted = recovered.interrupted,
        jobs_dir = %config.store.jobs_dir.display(),
        "Job store opened"
    );

    let fetcher = FetchChain::new()
        .with_strategy(Arc::new(LocalFileStrategy::new(
            config.pipeline.local_input_roots.clone(),
        )))
        .with_strategy(Arc::new(HttpStrategy::new(Duration::from_secs(
            config.pipeline.fetch_timeout_secs,
        ))?));
    let engines = EngineSet {
        fetcher,
        media: Arc::new(FfmpegEngine::new(
            config.binaries.ffmpeg.clone(),
            config.binaries.ffprobe.clone(),
        )),
        transcriber: Arc::new(WhisperCppEngine::new(
            config.binaries.whisper.clone(),
            config.binaries.models_dir.clone(),
        )),
    };

    let probe: Arc<dyn TelemetryProbe> = Arc::new(SystemProbe::new());
    let scheduler = Arc::new(Scheduler::new(
        config.scheduler.clone(),
        lifecycle.clone(),
        probe,
        Arc::new(ResourcePolicy::new(config.policy.clone())),
        ProcessorRegistry::standard(),
        engines,
    ));
    let scheduler_task = tokio::spawn(scheduler.clone().run(shutdown.clone()));

    Arc::new(JobPurgeService::new(config.purge.clone(), lifecycle.clone()))
        .start_background_task(shutdown.clone());

    let state = AppState::new(lifecycle)
        .with_scheduler(scheduler.clone())
        .with_logging_config(logging);
    let server = ApiServer::new(config.api.clone(), state, shutdown.clone());

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            return;
        }
        info!("Shutdown requested");
        signal_token.cancel();
    });

    let served = server.run().await;
    shutdown.cancel();
    if let Err(e) = scheduler_task.await {
        error!(error = %e, "Scheduler task panicked");
    }
    scheduler.shutdown(SHUTDOWN_GRACE).await;

    served?;
    info!("media-jobs stopped");
    Ok(())
}
