use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use clap::ArgAction::Append;
use clap::Parser;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Service configuration, loaded from CLI arguments and optionally merged
/// with a TOML file.
///
/// Example configuration file content
/// # Video access configuration
///
/// listen_on_port = 32145
/// internal_port = 32146
/// workspace = "./data"
/// audit_backend = "file"          # Options: "file" or "memory"
/// catalog = "./data/catalog.toml"
///
/// # Abuse controls
/// rate_limit_requests = 120
/// rate_limit_window_secs = 60
/// check_timeout_ms = 2000
/// entitlement_staleness_secs = 30
/// stream_rate = 0                 # bytes per second per response, 0 = unlimited
/// trusted_proxies = ["10.0.0.1"]  # peers whose X-Forwarded-For is honoured
///
/// identity_secret = "change-me"
///
/// [access_keys]
/// 1 = "base64-encoded 32 byte key"
#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
#[serde(default)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Port for the external streaming API
    #[arg(short, long, default_value_t = 32145)]
    #[serde(default = "default_port")]
    pub listen_on_port: u16,

    /// Port for the internal API (token issuance, audit, entitlements)
    #[arg(long, default_value_t = 32146)]
    #[serde(default = "default_internal_port")]
    pub internal_port: u16,

    /// Root directory holding `videos/` and `audit/`
    #[arg(short = 'w', long, default_value = ".")]
    #[serde(default = "default_workspace")]
    pub workspace: String,

    /// Configuration file path
    #[arg(short, long)]
    #[serde(skip)]
    pub config: Option<String>,

    /// Audit store: file or memory
    #[arg(long, default_value = "file")]
    #[serde(default = "default_audit_backend")]
    pub audit_backend: String,

    /// TOML file seeding video and subscription records
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog: Option<String>,

    /// Access token keys (kid -> base64 encoded 32-byte key).
    /// Can be specified multiple times as --access-key 1:base64key.
    /// The highest kid signs new tokens.
    #[arg(long = "access-key", value_parser = parse_access_key, action = Append)]
    #[serde(
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "de_access_keys"
    )]
    pub access_keys: Vec<(u8, [u8; 32])>,

    /// HMAC secret for bearer credentials. Without it every bearer
    /// credential is rejected.
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_secret: Option<String>,

    /// Requests admitted per rate-limit window and key
    #[arg(long, default_value_t = 120)]
    #[serde(default = "default_rate_limit_requests")]
    pub rate_limit_requests: usize,

    /// Rate-limit window length in seconds
    #[arg(long, default_value_t = 60)]
    #[serde(default = "default_rate_limit_window_secs")]
    pub rate_limit_window_secs: u64,

    /// Maximum age of a cached subscription record
    #[arg(long, default_value_t = 30)]
    #[serde(default = "default_entitlement_staleness_secs")]
    pub entitlement_staleness_secs: u64,

    /// Timeout for entitlement and video record lookups
    #[arg(long, default_value_t = 2000)]
    #[serde(default = "default_check_timeout_ms")]
    pub check_timeout_ms: u64,

    /// Per-response bandwidth in bytes per second (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    #[serde(default = "default_stream_rate")]
    pub stream_rate: u64,

    /// Reverse proxies allowed to report the client address through
    /// X-Forwarded-For. Can be specified multiple times.
    /// Every other peer is identified by its socket address.
    #[arg(long = "trusted-proxy", action = Append)]
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub trusted_proxies: Vec<IpAddr>,
}

/// Parse an access key from command line format "kid:base64_key"
fn parse_access_key(s: &str) -> Result<(u8, [u8; 32]), String> {
    let Some((kid, key)) = s.split_once(':') else {
        return Err("Invalid format. Use kid:base64_key".to_string());
    };

    let kid = kid
        .parse::<u8>()
        .map_err(|_| format!("Invalid kid '{kid}'. Must be a number between 0-255"))?;
    let key = decode_key(key).map_err(|error| format!("Access key {kid}: {error}"))?;

    Ok((kid, key))
}

fn decode_key(encoded: &str) -> Result<[u8; 32], String> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|error| format!("invalid base64: {error}"))?;
    bytes
        .try_into()
        .map_err(|bytes: Vec<u8>| format!("expected 32 bytes, got {}", bytes.len()))
}

fn de_access_keys<'de, D>(de: D) -> Result<Vec<(u8, [u8; 32])>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(repr) = Option::<HashMap<String, String>>::deserialize(de)? else {
        return Ok(Vec::new());
    };

    let mut out = Vec::with_capacity(repr.len());
    for (kid, encoded) in repr {
        let kid: u8 = kid.parse().map_err(serde::de::Error::custom)?;
        let key = decode_key(&encoded)
            .map_err(|error| serde::de::Error::custom(format!("access_keys[{kid}]: {error}")))?;
        out.push((kid, key));
    }

    out.sort_unstable_by_key(|(kid, _)| *kid);
    Ok(out)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_on_port: default_port(),
            internal_port: default_internal_port(),
            workspace: default_workspace(),
            config: None,
            audit_backend: default_audit_backend(),
            catalog: None,
            access_keys: Vec::new(),
            identity_secret: None,
            rate_limit_requests: default_rate_limit_requests(),
            rate_limit_window_secs: default_rate_limit_window_secs(),
            entitlement_staleness_secs: default_entitlement_staleness_secs(),
            check_timeout_ms: default_check_timeout_ms(),
            stream_rate: default_stream_rate(),
            trusted_proxies: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from CLI args, optionally merging with a config file
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Config::parse();

        if let Some(config_path) = &config.config {
            let file_config = Self::from_file(Path::new(config_path))?;
            config = config.merge_with_file(file_config);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Merge with file config, CLI args take precedence
    fn merge_with_file(mut self, file_config: Config) -> Self {
        if self.listen_on_port == default_port() {
            self.listen_on_port = file_config.listen_on_port;
        }
        if self.internal_port == default_internal_port() {
            self.internal_port = file_config.internal_port;
        }
        if self.workspace == default_workspace() {
            self.workspace = file_config.workspace;
        }
        if self.audit_backend == default_audit_backend() {
            self.audit_backend = file_config.audit_backend;
        }
        if self.rate_limit_requests == default_rate_limit_requests() {
            self.rate_limit_requests = file_config.rate_limit_requests;
        }
        if self.rate_limit_window_secs == default_rate_limit_window_secs() {
            self.rate_limit_window_secs = file_config.rate_limit_window_secs;
        }
        if self.entitlement_staleness_secs == default_entitlement_staleness_secs() {
            self.entitlement_staleness_secs = file_config.entitlement_staleness_secs;
        }
        if self.check_timeout_ms == default_check_timeout_ms() {
            self.check_timeout_ms = file_config.check_timeout_ms;
        }
        if self.stream_rate == default_stream_rate() {
            self.stream_rate = file_config.stream_rate;
        }

        if self.catalog.is_none() {
            self.catalog = file_config.catalog;
        }
        if self.identity_secret.is_none() {
            self.identity_secret = file_config.identity_secret;
        }
        if self.access_keys.is_empty() {
            self.access_keys = file_config.access_keys;
        }
        if self.trusted_proxies.is_empty() {
            self.trusted_proxies = file_config.trusted_proxies;
        }

        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        match self.audit_backend.as_str() {
            "file" | "memory" => {}
            backend => {
                anyhow::bail!("Unsupported audit backend: {backend}. Use 'file' or 'memory'")
            }
        }

        if self.rate_limit_requests == 0 {
            anyhow::bail!("rate_limit_requests must be at least 1");
        }
        if self.rate_limit_window_secs == 0 {
            anyhow::bail!("rate_limit_window_secs must be at least 1");
        }
        if self.check_timeout_ms == 0 {
            anyhow::bail!("check_timeout_ms must be at least 1");
        }
        if self
            .identity_secret
            .as_ref()
            .is_some_and(|secret| secret.is_empty())
        {
            anyhow::bail!("identity_secret cannot be empty");
        }

        Ok(())
    }

    pub fn videos_dir(&self) -> PathBuf {
        Path::new(&self.workspace).join("videos")
    }

    pub fn audit_path(&self) -> PathBuf {
        Path::new(&self.workspace).join("audit").join("audit.jsonl")
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    pub fn entitlement_staleness(&self) -> Duration {
        Duration::from_secs(self.entitlement_staleness_secs)
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_millis(self.check_timeout_ms)
    }
}

// Default value functions
fn default_port() -> u16 {
    32145
}

fn default_internal_port() -> u16 {
    32146
}

fn default_workspace() -> String {
    ".".to_string()
}

fn default_audit_backend() -> String {
    "file".to_string()
}

fn default_rate_limit_requests() -> usize {
    120
}

fn default_rate_limit_window_secs() -> u64 {
    60
}

fn default_entitlement_staleness_secs() -> u64 {
    30
}

fn default_check_timeout_ms() -> u64 {
    2000
}

fn default_stream_rate() -> u64 {
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_with_access_keys_from_cli() {
        let key1 = STANDARD.encode([3u8; 32]);

        let config = Config::try_parse_from([
            "video-access".to_string(),
            "--listen-on-port".to_string(),
            "8080".to_string(),
            "--internal-port".to_string(),
            "8081".to_string(),
            "--workspace".to_string(),
            "/tmp/test".to_string(),
            "--rate-limit-requests".to_string(),
            "10".to_string(),
            "--access-key".to_string(),
            format!("1:{key1}"),
            "--access-key".to_string(),
            "2:uBhfVeH0b7KQKfwOJqhwzLXKBpg7xLPBe5HjCksDDWg=".to_string(),
            "--trusted-proxy".to_string(),
            "10.0.0.1".to_string(),
        ])
        .unwrap();

        assert_eq!(config.listen_on_port, 8080);
        assert_eq!(config.rate_limit_requests, 10);
        assert_eq!(config.access_keys.len(), 2);
        assert_eq!(config.access_keys[0], (1, [3u8; 32]));
        assert_eq!(config.trusted_proxies, vec!["10.0.0.1".parse::<IpAddr>().unwrap()]);
        assert_eq!(config.videos_dir(), Path::new("/tmp/test/videos"));
    }

    #[test]
    fn test_config_from_toml() {
        let key1 = STANDARD.encode([3u8; 32]);

        let toml_content = format!(
            r#"
            listen_on_port = 8080
            workspace = "/tmp/test"
            audit_backend = "memory"
            identity_secret = "hunter2"
            check_timeout_ms = 250
            trusted_proxies = ["10.0.0.1", "::1"]

            [access_keys]
            1 = "{key1}"
            2 = "uBhfVeH0b7KQKfwOJqhwzLXKBpg7xLPBe5HjCksDDWg="
        "#
        );

        let config: Config = toml::from_str(&toml_content).unwrap();

        assert_eq!(config.listen_on_port, 8080);
        assert_eq!(config.internal_port, 32146);
        assert_eq!(config.audit_backend, "memory");
        assert_eq!(config.identity_secret.as_deref(), Some("hunter2"));
        assert_eq!(config.check_timeout(), Duration::from_millis(250));
        assert_eq!(config.rate_limit_requests, 120);
        assert_eq!(config.access_keys.len(), 2);
        assert_eq!(config.access_keys[0], (1, [3u8; 32]));
        assert_eq!(config.trusted_proxies.len(), 2);
        assert!(config.trusted_proxies[1].is_loopback());
        config.validate().unwrap();
    }

    #[test]
    fn test_toml_rejects_short_keys() {
        let short = STANDARD.encode([1u8; 16]);
        let toml_content = format!("[access_keys]\n1 = \"{short}\"\n");
        assert!(toml::from_str::<Config>(&toml_content).is_err());
    }

    #[test]
    fn test_parse_access_key() {
        let key1 = STANDARD.encode([3u8; 32]);
        assert_eq!(parse_access_key(&format!("1:{key1}")), Ok((1, [3u8; 32])));

        assert!(
            parse_access_key("invalid_format")
                .unwrap_err()
                .contains("Invalid format")
        );
        assert!(
            parse_access_key("256:IaNHoHtWetGMPkHj6Iy8MZe5L3KlH8F6j6nRvJpYQYU=")
                .unwrap_err()
                .contains("Invalid kid")
        );
        assert!(
            parse_access_key(&format!("1:{}", STANDARD.encode([0u8; 31])))
                .unwrap_err()
                .contains("expected 32 bytes")
        );
    }

    #[test]
    fn test_config_merge_prefers_cli() {
        let file_config = Config {
            listen_on_port: 7000,
            trusted_proxies: vec!["10.0.0.1".parse().unwrap()],
            rate_limit_requests: 5,
            access_keys: vec![(1, [1u8; 32]), (2, [2u8; 32])],
            identity_secret: Some("from-file".to_string()),
            ..Default::default()
        };

        let cli_config = Config {
            listen_on_port: 9000,
            ..Default::default()
        };

        let merged = cli_config.merge_with_file(file_config);

        assert_eq!(merged.listen_on_port, 9000);
        assert_eq!(merged.rate_limit_requests, 5);
        assert_eq!(merged.access_keys.len(), 2);
        assert_eq!(merged.identity_secret.as_deref(), Some("from-file"));
        assert_eq!(merged.trusted_proxies.len(), 1);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        Config::default().validate().unwrap();

        let cases = [
            Config {
                audit_backend: "kafka".to_string(),
                ..Default::default()
            },
            Config {
                rate_limit_requests: 0,
                ..Default::default()
            },
            Config {
                rate_limit_window_secs: 0,
                ..Default::default()
            },
            Config {
                check_timeout_ms: 0,
                ..Default::default()
            },
            Config {
                identity_secret: Some(String::new()),
                ..Default::default()
            },
        ];
        for config in cases {
            assert!(config.validate().is_err(), "{config:?}");
        }
    }
}
