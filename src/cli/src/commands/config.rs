//! CLI configuration.
//!
//! Stored in `~/.crm/config.toml` (or the file named by `CRM_CONFIG`). Flags
//! and environment variables take precedence over the file; see
//! [`Settings::resolve`].

use anyhow::{bail, Context, Result};
use clap::{Subcommand, ValueEnum};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::output::{self, OutputFormat};

const DEFAULT_API_URL: &str = "http://localhost:8080";

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Set a configuration value
    Set {
        key: ConfigKey,
        /// Value to set
        value: String,
    },

    /// Get a configuration value
    Get {
        key: ConfigKey,
    },

    /// Remove a configuration value
    Unset {
        key: ConfigKey,
    },

    /// Show all configuration
    Show,

    /// Delete the configuration file
    Reset {
        /// Skip confirmation
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ConfigKey {
    /// Base URL of the CRM server
    ApiUrl,
    /// Bearer token sent with every request
    Token,
    /// Organization id sent as `X-Organization-Id`
    Organization,
}

impl ConfigKey {
    const ALL: [ConfigKey; 3] = [ConfigKey::ApiUrl, ConfigKey::Token, ConfigKey::Organization];

    fn name(self) -> &'static str {
        match self {
            ConfigKey::ApiUrl => "api-url",
            ConfigKey::Token => "token",
            ConfigKey::Organization => "organization",
        }
    }
}

/// Persistent CLI configuration stored on disk.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CliConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<Uuid>,
}

impl CliConfig {
    /// Validate and store `value` under `key`.
    pub fn set(&mut self, key: ConfigKey, value: &str) -> Result<()> {
        let value = value.trim();
        match key {
            ConfigKey::ApiUrl => self.api_url = Some(parse_api_url(value)?),
            ConfigKey::Token => {
                let token = value.strip_prefix("Bearer ").unwrap_or(value).trim();
                if token.is_empty() {
                    bail!("token must not be empty");
                }
                self.token = Some(token.to_string());
            }
            ConfigKey::Organization => self.organization = Some(parse_organization(value)?),
        }
        Ok(())
    }

    pub fn unset(&mut self, key: ConfigKey) -> bool {
        match key {
            ConfigKey::ApiUrl => self.api_url.take().is_some(),
            ConfigKey::Token => self.token.take().is_some(),
            ConfigKey::Organization => self.organization.take().is_some(),
        }
    }

    pub fn get(&self, key: ConfigKey) -> Option<String> {
        match key {
            ConfigKey::ApiUrl => self.api_url.clone(),
            ConfigKey::Token => self.token.clone(),
            ConfigKey::Organization => self.organization.map(|o| o.to_string()),
        }
    }

    /// Like [`get`](Self::get), with the token masked.
    fn display(&self, key: ConfigKey) -> Option<String> {
        let value = self.get(key)?;
        Some(match key {
            ConfigKey::Token => mask_token(&value),
            _ => value,
        })
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write {}", path.display()))
    }
}

/// Connection settings after merging flags, environment and the config file.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub api_url: String,
    pub token: Option<String>,
    pub organization: Option<Uuid>,
}

impl Settings {
    /// Flag or environment values win over the file. The organization is
    /// validated here so a typo fails before any request is sent.
    pub fn resolve(
        api_url: Option<String>,
        token: Option<String>,
        organization: Option<String>,
        file: &CliConfig,
    ) -> Result<Self> {
        let api_url = match api_url {
            Some(url) => parse_api_url(&url)?,
            None => file
                .api_url
                .clone()
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
        };
        let organization = match organization {
            Some(org) => Some(parse_organization(&org)?),
            None => file.organization,
        };
        Ok(Self {
            api_url,
            token: token.or_else(|| file.token.clone()),
            organization,
        })
    }
}

fn parse_api_url(value: &str) -> Result<String> {
    let url = Url::parse(value).with_context(|| format!("invalid api-url '{}'", value))?;
    if !matches!(url.scheme(), "http" | "https") {
        bail!("api-url must use http or https, got '{}'", url.scheme());
    }
    Ok(value.trim_end_matches('/').to_string())
}

fn parse_organization(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value.trim())
        .with_context(|| format!("organization must be a UUID, got '{}'", value))
}

/// Tokens are never echoed in full.
fn mask_token(value: &str) -> String {
    if value.chars().count() > 8 {
        format!("{}...", value.chars().take(8).collect::<String>())
    } else {
        "***".to_string()
    }
}

fn config_path() -> Result<PathBuf> {
    if let Some(path) = std::env::var_os("CRM_CONFIG") {
        return Ok(PathBuf::from(path));
    }
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".crm").join("config.toml"))
}

/// The configuration file, or defaults when it is missing.
pub fn load() -> Result<CliConfig> {
    CliConfig::load_from(&config_path()?)
}

pub async fn execute(cmd: ConfigCommands, format: OutputFormat) -> Result<()> {
    let path = config_path()?;
    match cmd {
        ConfigCommands::Set { key, value } => {
            let mut cfg = CliConfig::load_from(&path)?;
            cfg.set(key, &value)?;
            cfg.save_to(&path)?;
            let shown = cfg.display(key).unwrap_or_default();
            match format {
                OutputFormat::Table => output::print_success(&format!("{} = {}", key.name(), shown)),
                _ => output::print_item(&serde_json::json!({ "key": key.name(), "value": shown }), format),
            }
        }

        ConfigCommands::Get { key } => {
            let cfg = CliConfig::load_from(&path)?;
            let Some(value) = cfg.get(key) else {
                bail!("'{}' is not set", key.name());
            };
            match format {
                OutputFormat::Table => println!("{}", value),
                _ => output::print_item(&serde_json::json!({ "key": key.name(), "value": value }), format),
            }
        }

        ConfigCommands::Unset { key } => {
            let mut cfg = CliConfig::load_from(&path)?;
            if cfg.unset(key) {
                cfg.save_to(&path)?;
                output::print_success(&format!("{} removed", key.name()));
            } else {
                output::print_info(&format!("{} was not set", key.name()));
            }
        }

        ConfigCommands::Show => {
            let cfg = CliConfig::load_from(&path)?;
            match format {
                OutputFormat::Table => {
                    output::print_header(&format!("Configuration ({})", path.display()));
                    for key in ConfigKey::ALL {
                        let value = cfg.display(key).unwrap_or_else(|| "-".to_string());
                        output::print_detail(key.name(), &value);
                    }
                }
                _ => {
                    let shown: serde_json::Map<String, serde_json::Value> = ConfigKey::ALL
                        .into_iter()
                        .filter_map(|key| Some((key.name().to_string(), cfg.display(key)?.into())))
                        .collect();
                    output::print_item(&shown, format)
                }
            }
        }

        ConfigCommands::Reset { force } => {
            if !force {
                output::print_info("This will delete the CLI configuration. Use --force to confirm.");
                return Ok(());
            }
            if path.exists() {
                std::fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
            }
            output::print_success("Configuration reset to defaults");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_is_masked() {
        let mut cfg = CliConfig::default();
        cfg.set(ConfigKey::Token, "Bearer eyJhbGciOiJIUzI1NiJ9.payload").unwrap();
        assert_eq!(cfg.token.as_deref(), Some("eyJhbGciOiJIUzI1NiJ9.payload"));
        assert_eq!(cfg.display(ConfigKey::Token).unwrap(), "eyJhbGci...");
        assert_eq!(mask_token("short"), "***");
    }

    #[test]
    fn test_organization_must_be_uuid() {
        let mut cfg = CliConfig::default();
        assert!(cfg.set(ConfigKey::Organization, "acme").is_err());
        let org = Uuid::new_v4();
        cfg.set(ConfigKey::Organization, &format!(" {} ", org)).unwrap();
        assert_eq!(cfg.organization, Some(org));
        assert!(cfg.unset(ConfigKey::Organization));
        assert!(!cfg.unset(ConfigKey::Organization));
    }

    #[test]
    fn test_api_url_validation() {
        let mut cfg = CliConfig::default();
        cfg.set(ConfigKey::ApiUrl, "https://crm.example.com/").unwrap();
        assert_eq!(cfg.api_url.as_deref(), Some("https://crm.example.com"));
        assert!(cfg.set(ConfigKey::ApiUrl, "crm.example.com").is_err());
        assert!(cfg.set(ConfigKey::ApiUrl, "ftp://crm.example.com").is_err());
    }

    #[test]
    fn test_flags_override_file() {
        let file_org = Uuid::new_v4();
        let file = CliConfig {
            api_url: Some("http://file:8080".into()),
            token: Some("file-token".into()),
            organization: Some(file_org),
        };

        let from_file = Settings::resolve(None, None, None, &file).unwrap();
        assert_eq!(from_file.api_url, "http://file:8080");
        assert_eq!(from_file.token.as_deref(), Some("file-token"));
        assert_eq!(from_file.organization, Some(file_org));

        let flag_org = Uuid::new_v4();
        let from_flags = Settings::resolve(
            Some("http://flag:9090".into()),
            Some("flag-token".into()),
            Some(flag_org.to_string()),
            &file,
        )
        .unwrap();
        assert_eq!(from_flags.api_url, "http://flag:9090");
        assert_eq!(from_flags.token.as_deref(), Some("flag-token"));
        assert_eq!(from_flags.organization, Some(flag_org));

        assert!(Settings::resolve(None, None, Some("not-a-uuid".into()), &file).is_err());
        let defaults = Settings::resolve(None, None, None, &CliConfig::default()).unwrap();
        assert_eq!(defaults.api_url, DEFAULT_API_URL);
    }

    #[test]
    fn test_config_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        assert_eq!(CliConfig::load_from(&path).unwrap(), CliConfig::default());

        let mut cfg = CliConfig::default();
        cfg.set(ConfigKey::Organization, &Uuid::new_v4().to_string()).unwrap();
        cfg.save_to(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("organization = "));
        assert!(!content.contains("token"));
        assert_eq!(CliConfig::load_from(&path).unwrap(), cfg);
    }
}
