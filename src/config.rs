use anyhow::{Context, Result};
use reqwest::Url;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::platform::LinkButton;

/// Placeholder shipped in example configs; a warning is logged if it survives.
pub const SESSION_PLACEHOLDER: &str = "PUT_SESSION_HERE";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub panel: PanelConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub buttons: ButtonsConfig,
    #[serde(default)]
    pub relay: RelayConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PanelConfig {
    #[serde(default = "default_panel_url")]
    pub url: String,
    #[serde(default = "default_panel_referer")]
    pub referer: String,
    /// PHPSESSID cookie value
    #[serde(default = "default_session_id")]
    pub session_id: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    /// Numeric chat ids or `@channel` usernames
    #[serde(default)]
    pub chat_ids: Vec<String>,
}

/// URLs behind the inline keyboard attached to every notification.
#[derive(Debug, Deserialize, Clone)]
pub struct ButtonsConfig {
    #[serde(default = "default_developer_url")]
    pub developer_url: String,
    #[serde(default = "default_numbers_url_1")]
    pub numbers_url_1: String,
    #[serde(default = "default_numbers_url_2")]
    pub numbers_url_2: String,
    #[serde(default = "default_support_url_1")]
    pub support_url_1: String,
    #[serde(default = "default_support_url_2")]
    pub support_url_2: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RelayConfig {
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    #[serde(default = "default_error_backoff")]
    pub error_backoff_secs: u64,
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
    /// Brand line rendered at the bottom of each notification
    #[serde(default = "default_footer")]
    pub footer: String,
}

fn default_panel_url() -> String {
    "http://213.32.24.208/ints/client/res/data_smscdr.php".to_string()
}

fn default_panel_referer() -> String {
    "http://213.32.24.208/ints/client/smscdr.php".to_string()
}

fn default_session_id() -> String {
    SESSION_PLACEHOLDER.to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string()
}

fn default_developer_url() -> String {
    "https://t.me/botcasx".to_string()
}

fn default_numbers_url_1() -> String {
    "https://t.me/CyberOTPCore".to_string()
}

fn default_numbers_url_2() -> String {
    "https://t.me/example2".to_string()
}

fn default_support_url_1() -> String {
    "https://t.me/example3".to_string()
}

fn default_support_url_2() -> String {
    "https://t.me/example4".to_string()
}

fn default_check_interval() -> u64 {
    10
}

fn default_error_backoff() -> u64 {
    30
}

fn default_state_file() -> PathBuf {
    PathBuf::from("state.json")
}

fn default_footer() -> String {
    "POWERED BY @Rasel424282".to_string()
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            url: default_panel_url(),
            referer: default_panel_referer(),
            session_id: default_session_id(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for ButtonsConfig {
    fn default() -> Self {
        Self {
            developer_url: default_developer_url(),
            numbers_url_1: default_numbers_url_1(),
            numbers_url_2: default_numbers_url_2(),
            support_url_1: default_support_url_1(),
            support_url_2: default_support_url_2(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval(),
            error_backoff_secs: default_error_backoff(),
            state_file: default_state_file(),
            footer: default_footer(),
        }
    }
}

/// Button URLs that can be overridden from the environment
pub const BUTTON_ENV_VARS: [&str; 4] = [
    "NUMBERS_URL_1",
    "NUMBERS_URL_2",
    "SUPPORT_URL_1",
    "SUPPORT_URL_2",
];

impl ButtonsConfig {
    /// Two-row inline keyboard: developer and number channels, then support.
    pub fn keyboard(&self) -> Result<Vec<Vec<LinkButton>>> {
        let button = |label: &str, url: &str| -> Result<LinkButton> {
            let url = Url::parse(url)
                .with_context(|| format!("Invalid URL for button '{}': {}", label, url))?;
            Ok(LinkButton {
                label: label.to_string(),
                url,
            })
        };

        Ok(vec![
            vec![
                button("🧑‍💻 Dev", &self.developer_url)?,
                button("📱 Numbers 1", &self.numbers_url_1)?,
                button("📱 Numbers 2", &self.numbers_url_2)?,
            ],
            vec![
                button("🆘 Support 1", &self.support_url_1)?,
                button("🆘 Support 2", &self.support_url_2)?,
            ],
        ])
    }
}

impl Config {
    /// Load from a TOML file, then apply environment overrides.
    ///
    /// A missing file is not an error: every field has a default and the
    /// secrets usually come from the environment.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config: Config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            info!(
                "Config file {} not found, using defaults and environment",
                path.display()
            );
            Config::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply `BOT_TOKEN`, `PHPSESSID` and the button URL variables.
    /// Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(token) = get("BOT_TOKEN") {
            self.telegram.bot_token = token;
        }
        if let Some(session) = get("PHPSESSID") {
            self.panel.session_id = session;
        }
        if let Some(url) = get("NUMBERS_URL_1") {
            self.buttons.numbers_url_1 = url;
        }
        if let Some(url) = get("NUMBERS_URL_2") {
            self.buttons.numbers_url_2 = url;
        }
        if let Some(url) = get("SUPPORT_URL_1") {
            self.buttons.support_url_1 = url;
        }
        if let Some(url) = get("SUPPORT_URL_2") {
            self.buttons.support_url_2 = url;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.telegram.bot_token.trim().is_empty() {
            anyhow::bail!("Telegram bot token is not set (config [telegram] bot_token or BOT_TOKEN)");
        }
        if self.telegram.chat_ids.is_empty() {
            anyhow::bail!("No destination chats configured ([telegram] chat_ids)");
        }
        if self.relay.check_interval_secs == 0 {
            anyhow::bail!("[relay] check_interval_secs must be greater than zero");
        }
        Url::parse(&self.panel.url)
            .with_context(|| format!("Invalid panel URL: {}", self.panel.url))?;
        self.buttons.keyboard()?;

        if self.panel.session_id == SESSION_PLACEHOLDER {
            warn!("Panel session id is still the placeholder; set PHPSESSID");
        }
        Ok(())
    }
}
