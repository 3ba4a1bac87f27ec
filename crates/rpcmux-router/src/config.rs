use std::fmt;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, RouterError};

/// Router settings.
///
/// Deserializes from JSON with every field optional:
///
/// ```json
/// {"id": "dev1", "psk": "secret", "max_queue_length": 25,
///  "default_out_channel_idle_close_timeout": 10}
/// ```
#[derive(Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RouterConfig {
    /// Local peer id, written as `src` of outgoing frames. Empty accepts
    /// frames for any destination.
    pub id: String,
    /// Pre-shared key handed to the digest verifier. Never logged.
    pub psk: Option<String>,
    /// Per-channel bound on queued outgoing frames. Must be greater than zero.
    pub max_queue_length: usize,
    /// Seconds of inactivity after which an idle outgoing channel is closed.
    /// Zero or negative disables idle close.
    pub default_out_channel_idle_close_timeout: i64,
}

impl RouterConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Parse and validate a JSON config document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_queue_length == 0 {
            return Err(RouterError::Config(
                "max_queue_length must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Idle-close timeout, or `None` when disabled.
    pub fn idle_close_timeout(&self) -> Option<Duration> {
        u64::try_from(self.default_out_channel_idle_close_timeout)
            .ok()
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            psk: None,
            max_queue_length: 25,
            default_out_channel_idle_close_timeout: 10,
        }
    }
}

impl fmt::Debug for RouterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("RouterConfig");
        dbg.field("id", &self.id);
        if let Some(psk) = &self.psk {
            dbg.field("psk", &format_args!("<redacted:{} bytes>", psk.len()));
        } else {
            dbg.field("psk", &Option::<String>::None);
        }
        dbg.field("max_queue_length", &self.max_queue_length)
            .field(
                "default_out_channel_idle_close_timeout",
                &self.default_out_channel_idle_close_timeout,
            )
            .finish()
    }
}
