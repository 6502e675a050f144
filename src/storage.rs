use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::config::{Config, ThemeMode};
use crate::library::SortOrder;

pub const PREF_VIM_MODE: &str = "vim_mode";
pub const PREF_COMPACT_MODE: &str = "compact_mode";
pub const PREF_THEME_MODE: &str = "theme_mode";
pub const PREF_ITEMS_PER_PAGE: &str = "items_per_page";
pub const PREF_DEFAULT_REPO: &str = "default_repo";
pub const PREF_SORT_ORDER: &str = "sort_order";

#[derive(Debug, Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preference {
    pub key: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

/// UI preferences persisted between sessions. `None` means "use the
/// configured value".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Preferences {
    pub vim_mode: Option<bool>,
    pub compact_mode: Option<bool>,
    pub theme_mode: Option<ThemeMode>,
    pub items_per_page: Option<usize>,
    pub default_repo: Option<String>,
    pub sort_order: Option<SortOrder>,
}

impl Preferences {
    /// Overlays stored preferences onto the loaded configuration.
    pub fn apply(&self, config: &mut Config) {
        if let Some(vim) = self.vim_mode {
            config.keyboard.vim_mode = vim;
        }
        if let Some(compact) = self.compact_mode {
            config.ui.compact = compact;
        }
        if let Some(theme) = self.theme_mode {
            config.ui.theme = theme;
        }
        if let Some(per_page) = self.items_per_page.filter(|n| *n > 0) {
            config.ui.items_per_page = per_page;
        }
        if let Some(repo) = self.default_repo.as_deref().filter(|r| !r.is_empty()) {
            config.server.repo = repo.to_string();
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct Options {
    pub path: Option<PathBuf>,
}

impl Store {
    pub fn open(opts: Options) -> Result<Self> {
        let path = if let Some(path) = opts.path {
            path
        } else {
            default_path().context("storage: resolve default path")?
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("storage: create directory {}", parent.display()))?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("storage: open database at {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", &"WAL")
            .context("storage: set WAL")?;
        conn.pragma_update(None, "busy_timeout", &5000)
            .context("storage: set busy timeout")?;
        migrate(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn close(self) -> Result<()> {
        let conn = Arc::try_unwrap(self.conn)
            .map_err(|_| anyhow!("storage: connection still in use"))?
            .into_inner();
        conn.close()
            .map_err(|(_, err)| err)
            .context("storage: close connection")
    }

    pub fn get_pref(&self, key: &str) -> Result<Option<Preference>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT key, value, updated_at FROM preferences WHERE key = ?1",
            params![key],
            |row| {
                let updated: i64 = row.get(2)?;
                Ok(Preference {
                    key: row.get(0)?,
                    value: row.get(1)?,
                    updated_at: Utc
                        .timestamp_opt(updated, 0)
                        .single()
                        .unwrap_or_else(Utc::now),
                })
            },
        )
        .optional()
        .with_context(|| format!("storage: query preference {key}"))
    }

    pub fn set_pref(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
INSERT INTO preferences (key, value, updated_at)
VALUES (?1, ?2, ?3)
ON CONFLICT(key) DO UPDATE SET
  value = excluded.value,
  updated_at = excluded.updated_at
"#,
            params![key, value, Utc::now().timestamp()],
        )
        .with_context(|| format!("storage: save preference {key}"))?;
        Ok(())
    }

    pub fn delete_pref(&self, key: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let removed = conn
            .execute("DELETE FROM preferences WHERE key = ?1", params![key])
            .with_context(|| format!("storage: delete preference {key}"))?;
        Ok(removed > 0)
    }

    /// Reads every known preference; unparsable values are ignored.
    pub fn load_preferences(&self) -> Result<Preferences> {
        let value = |key: &str| -> Result<Option<String>> {
            Ok(self.get_pref(key)?.map(|pref| pref.value))
        };
        Ok(Preferences {
            vim_mode: value(PREF_VIM_MODE)?.and_then(|v| parse_bool(&v)),
            compact_mode: value(PREF_COMPACT_MODE)?.and_then(|v| parse_bool(&v)),
            theme_mode: value(PREF_THEME_MODE)?.and_then(|v| ThemeMode::parse(&v)),
            items_per_page: value(PREF_ITEMS_PER_PAGE)?.and_then(|v| v.trim().parse().ok()),
            default_repo: value(PREF_DEFAULT_REPO)?,
            sort_order: value(PREF_SORT_ORDER)?.and_then(|v| SortOrder::parse(&v)),
        })
    }

    pub fn save_preferences(&self, prefs: &Preferences) -> Result<()> {
        if let Some(vim) = prefs.vim_mode {
            self.set_pref(PREF_VIM_MODE, &vim.to_string())?;
        }
        if let Some(compact) = prefs.compact_mode {
            self.set_pref(PREF_COMPACT_MODE, &compact.to_string())?;
        }
        if let Some(theme) = prefs.theme_mode {
            self.set_pref(PREF_THEME_MODE, theme.as_str())?;
        }
        if let Some(per_page) = prefs.items_per_page {
            self.set_pref(PREF_ITEMS_PER_PAGE, &per_page.to_string())?;
        }
        if let Some(repo) = prefs.default_repo.as_deref() {
            self.set_pref(PREF_DEFAULT_REPO, repo)?;
        }
        if let Some(order) = prefs.sort_order {
            self.set_pref(PREF_SORT_ORDER, order.as_str())?;
        }
        Ok(())
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at INTEGER NOT NULL
)
"#,
        [],
    )?;

    let current: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    for (idx, sql) in migrations().iter().enumerate() {
        let version = (idx + 1) as i64;
        if version <= current {
            continue;
        }
        conn.execute_batch(sql)?;
        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            params![
                version,
                SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or(Duration::from_secs(0))
                    .as_secs() as i64,
            ],
        )?;
    }
    Ok(())
}

fn migrations() -> Vec<&'static str> {
    vec![
        r#"
CREATE TABLE IF NOT EXISTS preferences (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL,
  updated_at INTEGER NOT NULL
);
"#,
    ]
}

pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("gm-tui").join("state.db"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open(dir: &tempfile::TempDir) -> Store {
        Store::open(Options {
            path: Some(dir.path().join("nested").join("state.db")),
        })
        .unwrap()
    }

    #[test]
    fn open_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let store = open(&dir);
        assert!(dir.path().join("nested").join("state.db").exists());
        store.close().unwrap();
    }

    #[test]
    fn set_pref_overwrites() {
        let dir = tempdir().unwrap();
        let store = open(&dir);
        assert_eq!(store.get_pref(PREF_THEME_MODE).unwrap(), None);
        store.set_pref(PREF_THEME_MODE, "dark").unwrap();
        store.set_pref(PREF_THEME_MODE, "light").unwrap();
        assert_eq!(store.get_pref(PREF_THEME_MODE).unwrap().unwrap().value, "light");
        assert!(store.delete_pref(PREF_THEME_MODE).unwrap());
        assert!(!store.delete_pref(PREF_THEME_MODE).unwrap());
    }

    #[test]
    fn preferences_survive_reopen() {
        let dir = tempdir().unwrap();
        let store = open(&dir);
        let prefs = Preferences {
            vim_mode: Some(false),
            compact_mode: Some(true),
            theme_mode: Some(ThemeMode::Light),
            items_per_page: Some(64),
            default_repo: Some("work".into()),
            sort_order: Some(SortOrder::Favorites),
        };
        store.save_preferences(&prefs).unwrap();
        store.close().unwrap();

        let store = open(&dir);
        let loaded = store.load_preferences().unwrap();
        assert_eq!(loaded, prefs);

        let mut config = Config::default();
        loaded.apply(&mut config);
        assert!(!config.keyboard.vim_mode);
        assert!(config.ui.compact);
        assert_eq!(config.ui.theme, ThemeMode::Light);
        assert_eq!(config.ui.items_per_page, 64);
        assert_eq!(config.server.repo, "work");
    }

    #[test]
    fn garbage_values_are_ignored() {
        let dir = tempdir().unwrap();
        let store = open(&dir);
        store.set_pref(PREF_VIM_MODE, "maybe").unwrap();
        store.set_pref(PREF_ITEMS_PER_PAGE, "lots").unwrap();
        let loaded = store.load_preferences().unwrap();
        assert_eq!(loaded.vim_mode, None);
        assert_eq!(loaded.items_per_page, None);
    }
}
