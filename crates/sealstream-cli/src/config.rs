use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use sealstream::CipherId;

/// Top-level CLI configuration (loaded from sealstream.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SealstreamConfig {
    pub logging: LoggingConfig,
    pub crypto: CryptoConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or EnvFilter directive (default: warn)
    pub level: String,
    /// Log format
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Text,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// File holding the stream key: raw bytes or base64 text
    pub key_file: Option<PathBuf>,
    /// Cipher for newly written streams
    pub cipher: CipherId,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".into(),
            format: LogFormat::Text,
        }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            key_file: None,
            cipher: CipherId::ChaCha20Poly1305,
        }
    }
}
