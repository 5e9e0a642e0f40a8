use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use log::{error, info, warn};
use tracing_subscriber::EnvFilter;

use audioshelf::config::{default_config_path, load_config, CONFIG_ENV_VAR};
use audioshelf::db::default_database_path;
use audioshelf::pipeline::PollTiming;
use audioshelf::provider::Fetcher;
use audioshelf::{
    BundleCredentialResolver, ConfigError, ContentProvider, ConvertWorker, Database,
    DownloadWorker, FfmpegTranscoder, HttpContentProvider, JobProgressBroadcaster, JobStore,
    RecoveryManager, StorageError, TranscodeStage, WorkerError,
};

fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    tracing_log::LogTracer::init()?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// First argument, then `AUDIOSHELF_CONFIG`, then `~/.audioshelf/config.json`.
fn config_path() -> Result<PathBuf, ConfigError> {
    std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from))
        .or_else(default_config_path)
        .ok_or(ConfigError::NoConfigPath)
}

fn run() -> audioshelf::Result<()> {
    let path = config_path()?;
    info!("Starting audioshelf-daemon v{}", env!("CARGO_PKG_VERSION"));
    info!("Using config {}", path.display());
    let config = load_config(&path)?;

    let db_path = config
        .database_path
        .clone()
        .or_else(default_database_path)
        .ok_or_else(|| ConfigError::Validation {
            message: "database_path is not set and there is no home directory".to_string(),
        })?;
    let db = Database::open(&db_path)?;
    let store = JobStore::with_broadcaster(db, Arc::new(JobProgressBroadcaster::default()));

    std::fs::create_dir_all(&config.artifact_root).map_err(|e| StorageError::CreateDirectory {
        path: config.artifact_root.clone(),
        source: e,
    })?;

    // Workers must not start until recovery has finished.
    RecoveryManager::new(store.clone(), &config.artifact_root).run()?;

    let provider: Arc<dyn ContentProvider> = Arc::new(HttpContentProvider::new(
        &config.provider.gateway_url,
        config.provider.request_timeout(),
    )?);
    let transcoder = Arc::new(FfmpegTranscoder::new(
        &config.transcode.ffmpeg_path,
        &config.transcode.ffprobe_path,
        &config.transcode.default_bitrate,
    ));
    let stage = TranscodeStage::new(
        transcoder,
        config.transcode.parallelism,
        &config.transcode.default_bitrate,
    );
    let timing = PollTiming::from(&config.workers);

    let mut workers = vec![
        DownloadWorker::new(store.clone(), provider, Fetcher::new()?, &config.artifact_root)
            .spawn(timing)?,
        ConvertWorker::new(
            store,
            Arc::new(BundleCredentialResolver),
            stage,
            &config.artifact_root,
            config.transcode.intro_threshold_ms,
        )
        .spawn(timing)?,
    ];

    let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })
    .map_err(|e| WorkerError::SpawnFailed(format!("signal handler: {}", e)))?;

    info!("Workers running ({} transcode thread(s)); press Ctrl-C to stop", config.transcode.parallelism);
    let _ = stop_rx.recv();

    info!("Shutting down...");
    for worker in &mut workers {
        if let Err(e) = worker.stop(config.workers.shutdown_timeout()) {
            warn!("{}", e);
        }
    }
    info!("Stopped");
    Ok(())
}

fn main() -> ExitCode {
    if let Err(e) = init_logging() {
        eprintln!("Failed to initialize logging: {}", e);
    }

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
