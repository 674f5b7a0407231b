// ============================================================================
// Logging Configuration
// ============================================================================

use crate::Env;
use anyhow::{Result, bail};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct LoggingConfig {
    /// Output format of the fmt layer (LOG_FORMAT=text|json)
    pub format: LogFormat,
}

impl LoggingConfig {
    pub(crate) fn from_env(env: &Env<'_>) -> Result<Self> {
        let format = match env.string("LOG_FORMAT").as_deref() {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => bail!("Invalid value for LOG_FORMAT: '{}' (expected text/json)", other),
        };
        Ok(Self { format })
    }
}
