use std::path::{Path, PathBuf};
use std::sync::Once;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;

const LOG_FILE_NAME: &str = "gm-tui.log";

/// Installs the file logger. The terminal belongs to the UI, so nothing is
/// ever written to stdout/stderr. Keep the returned guard alive until exit or
/// buffered lines are lost.
pub fn init(cfg: &LogConfig) -> Result<Option<WorkerGuard>> {
    let path = match cfg.file.clone().or_else(default_path) {
        Some(path) => path,
        None => return Ok(None),
    };
    let (dir, file) = split_path(&path);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("logging: create directory {}", dir.display()))?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let appender = tracing_appender::rolling::never(&dir, file);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    match tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init()
    {
        Ok(()) => {
            install_panic_hook();
            tracing::info!(version = crate::VERSION, log = %path.display(), "logging initialised");
            Ok(Some(guard))
        }
        // A subscriber is already installed (tests, embedding).
        Err(_) => Ok(None),
    }
}

fn split_path(path: &Path) -> (PathBuf, String) {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let file = path
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| LOG_FILE_NAME.to_string());
    (dir, file)
}

fn install_panic_hook() {
    static HOOK: Once = Once::new();
    HOOK.call_once(|| {
        let default_panic = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            tracing::error!(target: "runtime.panic", ?info, "panic");
            default_panic(info);
        }));
    });
}

pub fn default_path() -> Option<PathBuf> {
    dirs::cache_dir().map(|dir| dir.join("gm-tui").join(LOG_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_path_defaults() {
        let (dir, file) = split_path(Path::new("/tmp/gm/out.log"));
        assert_eq!(dir, PathBuf::from("/tmp/gm"));
        assert_eq!(file, "out.log");
        let (dir, file) = split_path(Path::new("bare.log"));
        assert_eq!(dir, PathBuf::from("."));
        assert_eq!(file, "bare.log");
    }
}
