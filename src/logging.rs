// logging.rs - File logging for the host. stdout carries framed responses, so
// nothing is ever logged there; stderr only gets warnings and up.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::Context;
use flexi_logger::{Cleanup, Criterion, Duplicate, FileSpec, Logger, LoggerHandle, Naming};

use embed_pipeline::config::{self, embedding};

/// Start the rotating file logger. Keep the handle alive for the whole run so the
/// file writer is flushed on exit.
pub fn init_logging() -> anyhow::Result<LoggerHandle> {
    let log_dir = resolve_log_dir(std::env::var_os(config::logging::LOG_DIR_ENV))?;
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("failed creating log dir {}", log_dir.display()))?;

    let handle = Logger::try_with_env_or_str(config::logging::DEFAULT_LEVEL)?
        .log_to_file(
            FileSpec::default()
                .directory(&log_dir)
                .basename(config::logging::LOG_FILE_NAME),
        )
        .rotate(
            Criterion::Size(config::logging::LOG_ROTATE_SIZE_BYTES),
            Naming::Numbers,
            Cleanup::KeepLogFiles(config::logging::LOG_ROTATE_KEEP_FILES),
        )
        .duplicate_to_stderr(Duplicate::Warn)
        .format(flexi_logger::detailed_format)
        .start()
        .context("failed to start logger")?;

    log_startup_banner(&log_dir);
    Ok(handle)
}

fn resolve_log_dir(override_dir: Option<OsString>) -> anyhow::Result<PathBuf> {
    if let Some(dir) = override_dir.filter(|d| !d.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    let home = config::home_dir().context("cannot determine home directory for logs")?;
    Ok(home.join(config::logging::LOG_DIR_REL))
}

fn log_startup_banner(log_dir: &Path) {
    let engines = if cfg!(feature = "onnx") {
        "candle, onnx"
    } else {
        "candle"
    };
    log::info!("{}", "=".repeat(60));
    log::info!(
        "embed_helper {} starting on {}",
        config::HOST_VERSION,
        std::env::consts::OS
    );
    log::info!("Logs: {}", log_dir.display());
    log::info!("Engines: {engines}");
    log::info!(
        "Defaults: model={} batch_size={}",
        embedding::DEFAULT_MODEL_NAME,
        embedding::DEFAULT_BATCH_SIZE
    );
    log::info!("{}", "=".repeat(60));
}
