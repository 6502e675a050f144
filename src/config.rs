use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::keys::KeyPress;

const DEFAULT_ENV_PREFIX: &str = "GMTUI";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub ui: UIConfig,
    #[serde(default)]
    pub keyboard: KeyboardConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_server_url")]
    pub url: String,
    #[serde(default = "default_repo")]
    pub repo: String,
    #[serde(default)]
    pub csrf_token: String,
    #[serde(default)]
    pub dev_mode: bool,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: default_server_url(),
            repo: default_repo(),
            csrf_token: String::new(),
            dev_mode: false,
            user_agent: default_user_agent(),
            timeout: default_timeout(),
        }
    }
}

fn default_server_url() -> String {
    "http://localhost:8080".into()
}

fn default_repo() -> String {
    "main".into()
}

fn default_user_agent() -> String {
    format!("gm-tui/{}", crate::VERSION)
}

fn default_timeout() -> Duration {
    Duration::from_secs(20)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ThemeMode {
    #[default]
    Dark,
    Light,
}

impl ThemeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThemeMode::Dark => "dark",
            ThemeMode::Light => "light",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "dark" => Some(ThemeMode::Dark),
            "light" => Some(ThemeMode::Light),
            _ => None,
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            ThemeMode::Dark => ThemeMode::Light,
            ThemeMode::Light => ThemeMode::Dark,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UIConfig {
    #[serde(default)]
    pub theme: ThemeMode,
    #[serde(default)]
    pub compact: bool,
    #[serde(default = "default_items_per_page")]
    pub items_per_page: usize,
}

impl Default for UIConfig {
    fn default() -> Self {
        Self {
            theme: ThemeMode::default(),
            compact: false,
            items_per_page: default_items_per_page(),
        }
    }
}

pub const ITEMS_PER_PAGE_CHOICES: [usize; 4] = [16, 32, 64, 128];

fn default_items_per_page() -> usize {
    32
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeyboardConfig {
    #[serde(default = "default_vim_mode")]
    pub vim_mode: bool,
    #[serde(default)]
    pub keybinds: Keybinds,
}

impl Default for KeyboardConfig {
    fn default() -> Self {
        Self {
            vim_mode: default_vim_mode(),
            keybinds: Keybinds::default(),
        }
    }
}

fn default_vim_mode() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".into()
}

/// One entry of the key-binding table. `shortcut` is the label shown in help
/// when it differs from `key` (`CR`, `Ctrl-k`). Entries with `done: false`
/// are listed in the table but never fire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Keybind {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shortcut: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_done")]
    pub done: bool,
}

fn default_done() -> bool {
    true
}

impl Keybind {
    fn new(key: &str, description: &str) -> Self {
        Self {
            key: key.to_string(),
            shortcut: None,
            description: description.to_string(),
            done: true,
        }
    }

    fn with_shortcut(mut self, shortcut: &str) -> Self {
        self.shortcut = Some(shortcut.to_string());
        self
    }

    fn pending(mut self) -> Self {
        self.done = false;
        self
    }

    pub fn label(&self) -> &str {
        self.shortcut.as_deref().unwrap_or(&self.key)
    }

    fn needs_ctrl(&self) -> bool {
        self.shortcut
            .as_deref()
            .map(|s| s.starts_with("Ctrl-"))
            .unwrap_or(false)
    }

    /// Whether `press` activates this binding. Disabled entries never match.
    pub fn matches(&self, press: &KeyPress) -> bool {
        if !self.done || press.alt {
            return false;
        }
        if self.needs_ctrl() {
            return press.ctrl && press.key.eq_ignore_ascii_case(&self.key);
        }
        if press.ctrl {
            return false;
        }
        if let Some(base) = self.key.strip_prefix("S-") {
            return press.shift && press.key == base;
        }
        press.key == self.key
    }

    /// Matches a shifted binding; the press must carry shift.
    pub fn matches_shifted(&self, press: &KeyPress) -> bool {
        press.shift && self.matches(press)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct NavigationKeys {
    pub up: Keybind,
    pub down: Keybind,
    pub top: Keybind,
    pub bottom: Keybind,
    pub middle: Keybind,
    pub page_next: Keybind,
    pub page_prev: Keybind,
}

impl Default for NavigationKeys {
    fn default() -> Self {
        Self {
            up: Keybind::new("k", "Navigate up"),
            down: Keybind::new("j", "Navigate down"),
            top: Keybind::new("gg", "Go to top"),
            bottom: Keybind::new("G", "Go to bottom"),
            middle: Keybind::new("M", "Go to the middle"),
            page_next: Keybind::new("n", "Next page"),
            page_prev: Keybind::new("p", "Prev page"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ActionKeys {
    pub enter: Keybind,
    pub open_tab: Keybind,
    pub edit: Keybind,
    pub favorite: Keybind,
    pub new_bookmark: Keybind,
    pub delete: Keybind,
    pub qrcode: Keybind,
    pub paste: Keybind,
    pub yank: Keybind,
    pub selection: Keybind,
}

impl Default for ActionKeys {
    fn default() -> Self {
        Self {
            enter: Keybind::new("Enter", "Open highlighted").with_shortcut("CR"),
            open_tab: Keybind::new("O", "Open in new tab"),
            edit: Keybind::new("e", "Edit bookmark"),
            favorite: Keybind::new("f", "Mark as favorite"),
            new_bookmark: Keybind::new("a", "New bookmark"),
            delete: Keybind::new("D", "Delete bookmark"),
            qrcode: Keybind::new("c", "Show QR code"),
            paste: Keybind::new("P", "Add from clipboard"),
            yank: Keybind::new("Y", "Copy link to clipboard"),
            selection: Keybind::new("V", "Multi-selection"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SearchKeys {
    pub search: Keybind,
    pub focus: Keybind,
    pub tags: Keybind,
}

impl Default for SearchKeys {
    fn default() -> Self {
        Self {
            search: Keybind::new("/", "Search bookmark"),
            focus: Keybind::new("k", "Focus search bar").with_shortcut("Ctrl-k"),
            tags: Keybind::new("t", "Search by #tag").pending(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct DropdownKeys {
    pub up_ctrl: Keybind,
    pub down_ctrl: Keybind,
    pub accept: Keybind,
    pub tab: Keybind,
    pub tab_shift: Keybind,
}

impl Default for DropdownKeys {
    fn default() -> Self {
        Self {
            up_ctrl: Keybind::new("u", "Navigate up").with_shortcut("Ctrl-u"),
            down_ctrl: Keybind::new("d", "Navigate down").with_shortcut("Ctrl-d"),
            accept: Keybind::new("y", "Accept item").with_shortcut("Ctrl-y"),
            tab: Keybind::new("Tab", "Next"),
            tab_shift: Keybind::new("S-Tab", "Prev"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct UtilityKeys {
    pub help: Keybind,
    pub settings: Keybind,
    pub theme_toggle: Keybind,
    pub reload: Keybind,
    pub escape: Keybind,
    pub close: Keybind,
    pub sort: Keybind,
    pub repositories: Keybind,
    pub quit: Keybind,
}

impl Default for UtilityKeys {
    fn default() -> Self {
        Self {
            help: Keybind::new("?", "Show help"),
            settings: Keybind::new("S", "Show settings"),
            theme_toggle: Keybind::new("T", "Toggle dark/light mode"),
            reload: Keybind::new("R", "Reload page"),
            escape: Keybind::new("Escape", "Close modal"),
            close: Keybind::new("q", "Close modal"),
            sort: Keybind::new("s", "Sort menu"),
            repositories: Keybind::new("r", "Switch repository"),
            quit: Keybind::new("Q", "Quit"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Keybinds {
    pub navigation: NavigationKeys,
    pub actions: ActionKeys,
    pub search: SearchKeys,
    pub dropdown: DropdownKeys,
    pub utility: UtilityKeys,
}

impl Keybinds {
    /// Categories in display order, each with its bindings in table order.
    pub fn categories(&self) -> Vec<(&'static str, Vec<&Keybind>)> {
        let n = &self.navigation;
        let a = &self.actions;
        let s = &self.search;
        let d = &self.dropdown;
        let u = &self.utility;
        vec![
            (
                "Navigation",
                vec![
                    &n.up,
                    &n.down,
                    &n.top,
                    &n.bottom,
                    &n.middle,
                    &n.page_next,
                    &n.page_prev,
                ],
            ),
            (
                "Actions",
                vec![
                    &a.enter,
                    &a.open_tab,
                    &a.edit,
                    &a.favorite,
                    &a.new_bookmark,
                    &a.delete,
                    &a.qrcode,
                    &a.paste,
                    &a.yank,
                    &a.selection,
                ],
            ),
            ("Search", vec![&s.search, &s.focus, &s.tags]),
            (
                "Dropdown",
                vec![&d.up_ctrl, &d.down_ctrl, &d.accept, &d.tab, &d.tab_shift],
            ),
            (
                "Utility",
                vec![
                    &u.help,
                    &u.settings,
                    &u.theme_toggle,
                    &u.reload,
                    &u.escape,
                    &u.close,
                    &u.sort,
                    &u.repositories,
                    &u.quit,
                ],
            ),
        ]
    }

    /// The rows the help surface lists: enabled bindings minus the keys that
    /// are self-evident there (escape, middle, help itself).
    pub fn help_rows(&self) -> Vec<(&'static str, Vec<&Keybind>)> {
        let ignore = [
            self.utility.escape.key.as_str(),
            self.navigation.middle.key.as_str(),
            self.utility.help.key.as_str(),
        ];
        self.categories()
            .into_iter()
            .map(|(name, binds)| {
                let kept = binds
                    .into_iter()
                    .filter(|bind| bind.done && !ignore.contains(&bind.key.as_str()))
                    .collect::<Vec<_>>();
                (name, kept)
            })
            .filter(|(_, binds)| !binds.is_empty())
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        if path.exists() {
            cfg = read_config_file(path)?;
        }
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            cfg = read_config_file(&default_path)?;
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    apply_env(&mut cfg, prefix);
    normalize(&mut cfg);

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    if data.trim().is_empty() {
        return Ok(Config::default());
    }
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

fn normalize(cfg: &mut Config) {
    cfg.server.url = cfg.server.url.trim().trim_end_matches('/').to_string();
    if cfg.server.url.is_empty() {
        cfg.server.url = default_server_url();
    }
    if cfg.server.repo.trim().is_empty() {
        cfg.server.repo = default_repo();
    }
    if cfg.server.user_agent.trim().is_empty() {
        cfg.server.user_agent = default_user_agent();
    }
    if cfg.ui.items_per_page == 0 {
        cfg.ui.items_per_page = default_items_per_page();
    }
}

fn apply_env(cfg: &mut Config, prefix: &str) {
    let upper_prefix = format!("{}_", prefix.to_uppercase());
    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            apply_env_value(cfg, &normalized, value);
        }
    }
}

fn env_bool(value: &str) -> bool {
    matches!(value, "1" | "true" | "TRUE" | "True" | "yes")
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "server.url" => cfg.server.url = value,
        "server.repo" => cfg.server.repo = value,
        "server.csrf_token" => cfg.server.csrf_token = value,
        "server.dev_mode" => cfg.server.dev_mode = env_bool(&value),
        "server.user_agent" => cfg.server.user_agent = value,
        "server.timeout" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.server.timeout = duration;
            }
        }
        "ui.theme" => {
            if let Some(theme) = ThemeMode::parse(&value) {
                cfg.ui.theme = theme;
            }
        }
        "ui.compact" => cfg.ui.compact = env_bool(&value),
        "ui.items_per_page" => {
            if let Ok(parsed) = value.parse::<usize>() {
                cfg.ui.items_per_page = parsed;
            }
        }
        "keyboard.vim_mode" => cfg.keyboard.vim_mode = env_bool(&value),
        "log.level" => cfg.log.level = value,
        "log.file" => cfg.log.file = Some(PathBuf::from(value)),
        _ => {}
    }
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("gm-tui").join("config.yaml"))
}
