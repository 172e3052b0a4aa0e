use serde_derive::{Deserialize, Serialize};
use serde_json;
use serdeconv;
use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;

pub const DEFAULT_ADDRESS: &str = "127.0.0.1";

#[derive(Debug)]
pub enum ConfigError {
    Load(String),
    UnknownSection(String),
    UnknownKey(String, String),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::Load(msg) => write!(f, "error loading configuration: {}", msg),
            ConfigError::UnknownSection(section) => write!(f, "unknown config section [{}]", section),
            ConfigError::UnknownKey(section, key) => {
                write!(f, "unknown config key {}.{}", section, key)
            }
            ConfigError::Invalid(msg) => write!(f, "invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct NetworkConfig {
    pub address: String,
    pub port: u16,
    pub read_timeout_secs: u64,
    pub ping_interval_secs: u64,
    pub handshake_timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> NetworkConfig {
        NetworkConfig {
            address: DEFAULT_ADDRESS.to_string(),
            port: crate::DEFAULT_PORT,
            read_timeout_secs: 30,
            ping_interval_secs: 5,
            handshake_timeout_secs: 10,
        }
    }
}

impl NetworkConfig {
    /// Resolves the configured endpoint. Accepts bracketed IPv6 literals (`[::1]`).
    pub fn endpoint(&self) -> Result<SocketAddr, ConfigError> {
        let host = self
            .address
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();

        let candidates = (host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|err| ConfigError::Invalid(format!("address {}: {}", self.address, err)))?;

        candidates
            .into_iter()
            .next()
            .ok_or_else(|| ConfigError::Invalid(format!("address {} resolves to nothing", self.address)))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ClientConfig {
    pub name: String,
    pub server_key: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> ClientConfig {
        ClientConfig {
            name: "anonymous".to_string(),
            server_key: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub max_clients: u16,
    pub client_keys: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> ServerConfig {
        ServerConfig {
            max_clients: 64,
            client_keys: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub frame_samples: usize,
    pub ring_capacity: usize,
    pub jitter_samples: usize,
}

impl Default for AudioConfig {
    fn default() -> AudioConfig {
        AudioConfig {
            sample_rate: 48_000,
            frame_samples: 960,
            ring_capacity: 16_384,
            jitter_samples: 2_048,
        }
    }
}

/// Renderer palette settings. Opaque to the core; forwarded to the terminal renderer.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct PaletteConfig {
    pub chars: String,
    pub color: bool,
}

impl Default for PaletteConfig {
    fn default() -> PaletteConfig {
        PaletteConfig {
            chars: " .:-=+*#%@".to_string(),
            color: true,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct CryptoConfig {
    pub key: Option<String>,
    pub no_encrypt: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub destination: String,
}

impl Default for LoggingConfig {
    fn default() -> LoggingConfig {
        LoggingConfig {
            level: "info".to_string(),
            destination: "stderr".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub network: NetworkConfig,
    pub client: ClientConfig,
    pub server: ServerConfig,
    pub audio: AudioConfig,
    pub palette: PaletteConfig,
    pub crypto: CryptoConfig,
    pub logging: LoggingConfig,
}

const KNOWN_SECTIONS: &[(&str, &[&str])] = &[
    (
        "network",
        &[
            "address",
            "port",
            "read_timeout_secs",
            "ping_interval_secs",
            "handshake_timeout_secs",
        ],
    ),
    ("client", &["name", "server_key"]),
    ("server", &["max_clients", "client_keys"]),
    (
        "audio",
        &["sample_rate", "frame_samples", "ring_capacity", "jitter_samples"],
    ),
    ("palette", &["chars", "color"]),
    ("crypto", &["key", "no_encrypt"]),
    ("logging", &["level", "destination"]),
];

impl Config {
    /// Loads a TOML configuration file. In strict mode unknown sections and keys are
    /// rejected; otherwise they are silently ignored.
    pub fn load<P: AsRef<Path>>(path: P, strict: bool) -> Result<Config, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|err| ConfigError::Load(err.to_string()))?;
        Self::from_toml_str(&content, strict)
    }

    pub fn from_toml_str(content: &str, strict: bool) -> Result<Config, ConfigError> {
        if strict {
            let document: serde_json::Value = serdeconv::from_toml_str(content)
                .map_err(|err| ConfigError::Load(err.to_string()))?;
            Self::check_unknown(&document)?;
        }

        serdeconv::from_toml_str(content).map_err(|err| ConfigError::Load(err.to_string()))
    }

    fn check_unknown(document: &serde_json::Value) -> Result<(), ConfigError> {
        let sections = match document.as_object() {
            Some(sections) => sections,
            None => return Ok(()),
        };

        for (section_name, section) in sections {
            let known_keys = KNOWN_SECTIONS
                .iter()
                .find(|(name, _)| name == section_name)
                .map(|(_, keys)| *keys)
                .ok_or_else(|| ConfigError::UnknownSection(section_name.clone()))?;

            if let Some(keys) = section.as_object() {
                for key in keys.keys() {
                    if !known_keys.contains(&key.as_str()) {
                        return Err(ConfigError::UnknownKey(section_name.clone(), key.clone()));
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[network]
address = "[::1]"
port = 28100

[client]
name = "ada"

[logging]
level = "debug"
"#;

    #[test]
    fn test_defaults() {
        let config = Config::default();

        assert_eq!(config.network.port, crate::DEFAULT_PORT);
        assert_eq!(config.audio.sample_rate, 48_000);
        assert_eq!(config.audio.jitter_samples, 2_048);
        assert!(!config.crypto.no_encrypt);
    }

    #[test]
    fn test_parse_sample() {
        let config = Config::from_toml_str(SAMPLE, true).unwrap();

        assert_eq!(config.network.address, "[::1]");
        assert_eq!(config.network.port, 28100);
        assert_eq!(config.client.name, "ada");
        assert_eq!(config.logging.level, "debug");
        // untouched sections keep defaults
        assert_eq!(config.server.max_clients, 64);
    }

    #[test]
    fn test_endpoint_bracketed_ipv6() {
        let config = Config::from_toml_str(SAMPLE, false).unwrap();
        let endpoint = config.network.endpoint().unwrap();

        assert!(endpoint.is_ipv6());
        assert_eq!(endpoint.port(), 28100);
    }

    #[test]
    fn test_unknown_key_ignored_by_default() {
        let content = "[network]\nbogus = 1\n";
        let config = Config::from_toml_str(content, false).unwrap();

        assert_eq!(config.network.port, crate::DEFAULT_PORT);
    }

    #[test]
    fn test_unknown_key_rejected_in_strict_mode() {
        let content = "[network]\nbogus = 1\n";

        match Config::from_toml_str(content, true) {
            Err(ConfigError::UnknownKey(section, key)) => {
                assert_eq!(section, "network");
                assert_eq!(key, "bogus");
            }
            other => panic!("Unexpected result {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_unknown_section_rejected_in_strict_mode() {
        let content = "[telemetry]\nenabled = true\n";

        match Config::from_toml_str(content, true) {
            Err(ConfigError::UnknownSection(section)) => assert_eq!(section, "telemetry"),
            other => panic!("Unexpected result {:?}", other.map(|_| ())),
        }
    }
}
