//! Bridge configuration loaded from `.askbridge/config.toml`.

use color_eyre::eyre::{Result, bail, eyre};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory under the root that holds config, registrations, PID and log.
pub const STATE_DIR: &str = ".askbridge";

/// Environment variable that overrides `telegram.bot_token`.
pub const TOKEN_ENV: &str = "TELEGRAM_BOT_TOKEN";

/// Starter config written by `askbridge init`.
pub const TEMPLATE: &str = r#"# askbridge configuration

# Telegram users allowed to talk to the bot. Empty = everyone.
allowed_user_ids = []

[telegram]
# Bot API token from @BotFather. May be left empty when TELEGRAM_BOT_TOKEN is set.
bot_token = ""

[socket]
host = "localhost"
port = 8765
"#;

/// Top-level bridge configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    /// Default log filter (overridden by `RUST_LOG`).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// User IDs allowed to interact with the bot. Empty = allow all users.
    #[serde(default)]
    pub allowed_user_ids: Vec<i64>,

    /// Where task → chat registrations are persisted.
    #[serde(default = "default_registration_file")]
    pub registration_file: PathBuf,

    pub telegram: TelegramConfig,

    #[serde(default)]
    pub socket: SocketConfig,
}

/// Telegram-specific configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,

    /// Long-poll timeout passed to `getUpdates` (seconds).
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,

    /// Retries for outbound Bot API calls on rate limits and server errors.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay (seconds) for exponential backoff between retries.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

/// Where the editor connects.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SocketConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_registration_file() -> PathBuf {
    PathBuf::from(STATE_DIR).join("registrations.json")
}

fn default_poll_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_factor() -> f64 {
    0.3
}

fn default_host() -> String {
    "localhost".into()
}

fn default_port() -> u16 {
    8765
}

/// `<root>/.askbridge/config.toml`
pub fn config_path(root: &Path) -> PathBuf {
    root.join(STATE_DIR).join("config.toml")
}

impl BridgeConfig {
    /// Load and validate config under `root`.
    pub fn load(root: &Path) -> Result<Self> {
        let config = Self::read(root)?;
        config.validate()?;
        Ok(config)
    }

    /// Read config under `root`, applying the `TELEGRAM_BOT_TOKEN` override,
    /// without requiring a usable token.
    pub fn read(root: &Path) -> Result<Self> {
        let path = config_path(root);
        let content = std::fs::read_to_string(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                eyre!(
                    "No config found at {}\n\n\
                     Run `askbridge init`, or create it manually:\n\n\
                     [telegram]\n\
                     bot_token = \"your-token-here\"\n",
                    path.display()
                )
            } else {
                eyre!("failed to read {}: {e}", path.display())
            }
        })?;
        let config = Self::parse(&content)
            .map_err(|e| eyre!("failed to parse {}: {e}", path.display()))?
            .with_token_override(std::env::var(TOKEN_ENV).ok());
        Ok(config)
    }

    pub fn parse(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Replace the bot token when a non-empty override is given.
    pub fn with_token_override(mut self, token: Option<String>) -> Self {
        if let Some(token) = token.filter(|t| !t.trim().is_empty()) {
            self.telegram.bot_token = token.trim().to_owned();
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.telegram.bot_token.trim().is_empty() {
            bail!("telegram.bot_token is empty; set it in the config or via {TOKEN_ENV}");
        }
        if !self.telegram.backoff_factor.is_finite() || self.telegram.backoff_factor < 0.0 {
            bail!("telegram.backoff_factor must be a non-negative number");
        }
        Ok(())
    }

    /// Resolve the registration file relative to the root.
    pub fn resolved_registration_path(&self, root: &Path) -> PathBuf {
        if self.registration_file.is_absolute() {
            self.registration_file.clone()
        } else {
            root.join(&self.registration_file)
        }
    }

    /// `host:port` for the editor socket.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.socket.host, self.socket.port)
    }
}

impl TelegramConfig {
    /// Delay before retry number `attempt` (1-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        Duration::from_secs_f64(self.backoff_factor * f64::from(1u32 << exp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
log_level = "debug"
allowed_user_ids = [111, 222]
registration_file = "/var/lib/askbridge/registrations.json"

[telegram]
bot_token = "7000000000:AAxxxxxxxxxxxxxxxxx"
poll_timeout_secs = 10
max_retries = 5
backoff_factor = 0.5

[socket]
host = "127.0.0.1"
port = 9000
"#;
        let config = BridgeConfig::parse(toml).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.allowed_user_ids, vec![111, 222]);
        assert_eq!(
            config.registration_file,
            PathBuf::from("/var/lib/askbridge/registrations.json")
        );
        assert_eq!(config.telegram.bot_token, "7000000000:AAxxxxxxxxxxxxxxxxx");
        assert_eq!(config.telegram.poll_timeout_secs, 10);
        assert_eq!(config.telegram.max_retries, 5);
        assert_eq!(config.telegram.backoff_factor, 0.5);
        assert_eq!(config.socket_addr(), "127.0.0.1:9000");
    }

    #[test]
    fn test_parse_minimal_config() {
        let config = BridgeConfig::parse("[telegram]\nbot_token = \"tok\"\n").unwrap();
        assert_eq!(config.log_level, "info");
        assert!(config.allowed_user_ids.is_empty());
        assert_eq!(config.telegram.poll_timeout_secs, 30);
        assert_eq!(config.telegram.max_retries, 3);
        assert_eq!(config.telegram.backoff_factor, 0.3);
        assert_eq!(config.socket_addr(), "localhost:8765");
        assert_eq!(
            config.resolved_registration_path(Path::new("/work")),
            PathBuf::from("/work/.askbridge/registrations.json")
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_template_parses() {
        let config = BridgeConfig::parse(TEMPLATE).unwrap();
        assert!(config.validate().is_err(), "template has no token");
        let config = config.with_token_override(Some("tok".into()));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_token_override() {
        let config = BridgeConfig::parse("[telegram]\nbot_token = \"from-file\"\n").unwrap();
        let config = config.with_token_override(Some("  ".into()));
        assert_eq!(config.telegram.bot_token, "from-file");
        let config = config.with_token_override(Some("from-env".into()));
        assert_eq!(config.telegram.bot_token, "from-env");
    }

    #[test]
    fn test_absolute_registration_path_kept() {
        let config = BridgeConfig::parse(
            "registration_file = \"/abs/regs.json\"\n[telegram]\nbot_token = \"tok\"\n",
        )
        .unwrap();
        assert_eq!(
            config.resolved_registration_path(Path::new("/work")),
            PathBuf::from("/abs/regs.json")
        );
    }

    #[test]
    fn test_backoff_delay_doubles() {
        let config = BridgeConfig::parse("[telegram]\nbot_token = \"tok\"\n").unwrap();
        let t = &config.telegram;
        assert_eq!(t.backoff_delay(1), Duration::from_secs_f64(0.3));
        assert_eq!(t.backoff_delay(2), Duration::from_secs_f64(0.6));
        assert_eq!(t.backoff_delay(3), Duration::from_secs_f64(1.2));
    }

    #[test]
    fn test_reject_unknown_fields() {
        let result = BridgeConfig::parse("bogus_field = true\n[telegram]\nbot_token = \"tok\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_telegram_section_rejected() {
        assert!(BridgeConfig::parse("log_level = \"info\"\n").is_err());
    }
}
