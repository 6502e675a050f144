use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::api;
use crate::clipboard::{Clipboard, MemoryClipboard, SystemClipboard};
use crate::config::{self, Config};
use crate::data::{self, BookmarkService, RepoService, ToolService};
use crate::library::SortOrder;
use crate::logging;
use crate::storage;
use crate::ui;

/// Command-line overrides applied on top of the loaded configuration.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub config_file: Option<PathBuf>,
    pub server: Option<String>,
    pub repo: Option<String>,
    /// Offline session backed by in-memory sample data.
    pub demo: bool,
}

pub fn run(opts: RunOptions) -> Result<()> {
    let mut cfg = load_config(&opts)?;
    let _log_guard = logging::init(&cfg.log).unwrap_or_else(|err| {
        eprintln!("warning: logging disabled: {err:#}");
        None
    });

    let store = match storage::Store::open(storage::Options::default()) {
        Ok(store) => Some(Arc::new(store)),
        Err(err) => {
            warn!(error = %err, "preferences unavailable");
            None
        }
    };
    let mut sort = SortOrder::default();
    if let Some(store) = &store {
        let prefs = store.load_preferences().context("load preferences")?;
        prefs.apply(&mut cfg);
        sort = prefs.sort_order.unwrap_or_default();
    }
    // Flags win over stored preferences.
    if let Some(repo) = opts.repo.as_deref() {
        cfg.server.repo = repo.to_string();
    }

    let config_path = opts.config_file.clone().or_else(config::default_path);
    info!(
        server = %cfg.server.url,
        repo = %cfg.server.repo,
        demo = opts.demo,
        config = %friendly_path(config_path.as_ref()),
        "starting"
    );

    let (bookmarks, repos, tools, clipboard, status) = if opts.demo {
        let bookmarks = Arc::new(data::MockBookmarkService::sample());
        cfg.server.repo = "main".to_string();
        let repos: Arc<dyn RepoService> = Arc::new(data::MockRepoService::new(bookmarks.clone()));
        let tools: Arc<dyn ToolService> = Arc::new(data::MockToolService);
        let clipboard: Box<dyn Clipboard> = Box::new(MemoryClipboard::default());
        let bookmarks: Arc<dyn BookmarkService> = bookmarks;
        (
            bookmarks,
            repos,
            tools,
            clipboard,
            "Demo mode: changes live in memory only. Press ? for help.".to_string(),
        )
    } else {
        let client = Arc::new(connect(&cfg)?);
        let bookmarks: Arc<dyn BookmarkService> =
            Arc::new(data::ApiBookmarkService::new(client.clone()));
        let repos: Arc<dyn RepoService> = Arc::new(data::ApiRepoService::new(client.clone()));
        let tools: Arc<dyn ToolService> = Arc::new(data::ApiToolService::new(client));
        let clipboard: Box<dyn Clipboard> = Box::new(SystemClipboard::new());
        (
            bookmarks,
            repos,
            tools,
            clipboard,
            format!("Connected to {}. Press ? for help.", cfg.server.url),
        )
    };

    let options = ui::Options {
        config: cfg,
        bookmarks,
        repos,
        tools,
        store: store.clone(),
        clipboard,
        sort,
        status_message: status,
    };

    let mut model = ui::Model::new(options);
    model.run()?;
    drop(model);

    if let Some(store) = store.and_then(|store| Arc::try_unwrap(store).ok()) {
        if let Err(err) = store.close() {
            warn!(error = %err, "closing preferences store");
        }
    }
    info!("bye");
    Ok(())
}

/// Loads the configuration and checks that the server answers, printing a
/// short summary of the active repository.
pub fn check(opts: RunOptions) -> Result<()> {
    let cfg = load_config(&opts)?;
    let client = connect(&cfg)?;
    client
        .health()
        .with_context(|| format!("server {} is not reachable", cfg.server.url))?;
    let stats = client
        .repo_info(&cfg.server.repo)
        .with_context(|| format!("read repository {}", cfg.server.repo))?;
    println!(
        "{} ok: repository {} holds {} bookmarks, {} tags, {} favorites",
        cfg.server.url, stats.name, stats.bookmarks, stats.tags, stats.favorites
    );
    Ok(())
}

fn load_config(opts: &RunOptions) -> Result<Config> {
    let mut cfg = config::load(config::LoadOptions {
        config_file: opts.config_file.clone(),
        env_prefix: None,
    })
    .context("load config")?;
    if let Some(server) = opts.server.as_deref() {
        cfg.server.url = server.trim().trim_end_matches('/').to_string();
    }
    if let Some(repo) = opts.repo.as_deref() {
        cfg.server.repo = repo.to_string();
    }
    Ok(cfg)
}

fn connect(cfg: &Config) -> Result<api::Client> {
    api::Client::new(api::ClientConfig {
        base_url: cfg.server.url.clone(),
        user_agent: cfg.server.user_agent.clone(),
        csrf_token: cfg.server.csrf_token.clone(),
        dev_mode: cfg.server.dev_mode,
        repo: cfg.server.repo.clone(),
        timeout: cfg.server.timeout,
        http_client: None,
    })
    .with_context(|| format!("create client for {}", cfg.server.url))
}

fn friendly_path(path: Option<&PathBuf>) -> String {
    if let Some(path) = path {
        if let Some(home) = dirs::home_dir() {
            if let Ok(stripped) = path.strip_prefix(&home) {
                let mut display = String::from("~");
                if !stripped.as_os_str().is_empty() {
                    display.push_str(&format!("/{}", stripped.display()));
                }
                return display;
            }
        }
        path.display().to_string()
    } else {
        "~/.config/gm-tui/config.yaml".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_replace_loaded_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "server:\n  url: http://old:1\n  repo: old\n").unwrap();
        let cfg = load_config(&RunOptions {
            config_file: Some(path),
            server: Some("http://new:2/".into()),
            repo: Some("work".into()),
            demo: false,
        })
        .unwrap();
        assert_eq!(cfg.server.url, "http://new:2");
        assert_eq!(cfg.server.repo, "work");
    }

    #[test]
    fn friendly_path_falls_back() {
        assert_eq!(friendly_path(None), "~/.config/gm-tui/config.yaml");
        let outside = PathBuf::from("/etc/gm-tui.yaml");
        assert_eq!(friendly_path(Some(&outside)), "/etc/gm-tui.yaml");
    }
}
