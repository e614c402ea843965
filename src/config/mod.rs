//! Configuration (layered: defaults < TOML file < environment).

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::TurnError;
use crate::guard::GuardConfig;
use crate::tools::HISTORY_REMOVE_TOOL;

/// Config file name looked up under the user's `.turnwise` directory.
pub const CONFIG_FILE_NAME: &str = "turnwise.toml";

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "TURNWISE_CONFIG";

/// Which instruction the recovery run starts with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum RecoveryMode {
    /// Remove or summarize a few large items.
    #[default]
    Targeted,
    /// Summarize most of the history.
    Compaction,
}

/// Overflow recovery tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub mode: RecoveryMode,
    pub candidate_limit: usize,
    /// Candidate limit once recovery falls back to compaction.
    pub compaction_candidate_limit: usize,
    /// Characters of content shown per candidate preview.
    pub preview_chars: usize,
    /// Name of the only tool offered during recovery.
    pub removal_tool: String,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            mode: RecoveryMode::Targeted,
            candidate_limit: 40,
            compaction_candidate_limit: 200,
            preview_chars: 120,
            removal_tool: HISTORY_REMOVE_TOOL.to_string(),
        }
    }
}

/// Round and turn loop tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Rounds a single turn may take before giving up.
    pub max_rounds: usize,
    pub tool_timeout_ms: u64,
    /// Longest gap between streamed events before the stream is abandoned.
    pub stream_idle_timeout_ms: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_rounds: 20,
            tool_timeout_ms: 120_000,
            stream_idle_timeout_ms: 120_000,
        }
    }
}

impl RunnerConfig {
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_millis(self.tool_timeout_ms)
    }

    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.stream_idle_timeout_ms)
    }
}

/// Complete configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnwiseConfig {
    pub guard: GuardConfig,
    pub recovery: RecoveryConfig,
    pub runner: RunnerConfig,
}

impl TurnwiseConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, TurnError> {
        toml::from_str(raw).map_err(|e| TurnError::Configuration(format!("invalid config: {e}")))
    }

    pub fn to_toml_string(&self) -> Result<String, TurnError> {
        toml::to_string(self).map_err(|e| TurnError::Configuration(e.to_string()))
    }

    /// Load a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TurnError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw).map_err(|e| {
            TurnError::Configuration(format!("{}: {e}", path.display()))
        })
    }

    /// `~/.turnwise/turnwise.toml`.
    pub fn default_path() -> PathBuf {
        directories::UserDirs::new()
            .map(|dirs| dirs.home_dir().join(".turnwise"))
            .unwrap_or_else(|| PathBuf::from(".turnwise"))
            .join(CONFIG_FILE_NAME)
    }

    /// Defaults with `TURNWISE_*` environment overrides (a `.env` file is honored).
    pub fn from_env() -> Result<Self, TurnError> {
        let _ = dotenvy::dotenv();
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Defaults, then the config file (if present), then the environment.
    ///
    /// The file is `$TURNWISE_CONFIG` when set, otherwise [`Self::default_path`].
    pub fn load_layered() -> Result<Self, TurnError> {
        let _ = dotenvy::dotenv();
        let path = std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::default_path());
        let mut config = match std::fs::read_to_string(&path) {
            Ok(raw) => Self::from_toml_str(&raw)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(err) => return Err(err.into()),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Apply `TURNWISE_*` overrides resolved through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), TurnError>
    where
        F: Fn(&str) -> Option<String>,
    {
        override_parsed(&lookup, "TURNWISE_GUARD_WINDOW_SIZE", &mut self.guard.window_size)?;
        override_parsed(
            &lookup,
            "TURNWISE_GUARD_WINDOW_THRESHOLD",
            &mut self.guard.window_threshold,
        )?;
        override_parsed(&lookup, "TURNWISE_RECOVERY_MODE", &mut self.recovery.mode)?;
        override_parsed(
            &lookup,
            "TURNWISE_RECOVERY_CANDIDATE_LIMIT",
            &mut self.recovery.candidate_limit,
        )?;
        override_parsed(
            &lookup,
            "TURNWISE_RECOVERY_COMPACTION_CANDIDATE_LIMIT",
            &mut self.recovery.compaction_candidate_limit,
        )?;
        override_parsed(
            &lookup,
            "TURNWISE_RECOVERY_PREVIEW_CHARS",
            &mut self.recovery.preview_chars,
        )?;
        if let Some(tool) = lookup("TURNWISE_REMOVAL_TOOL").filter(|t| !t.trim().is_empty()) {
            self.recovery.removal_tool = tool.trim().to_string();
        }
        override_parsed(&lookup, "TURNWISE_MAX_ROUNDS", &mut self.runner.max_rounds)?;
        override_parsed(&lookup, "TURNWISE_TOOL_TIMEOUT_MS", &mut self.runner.tool_timeout_ms)?;
        override_parsed(
            &lookup,
            "TURNWISE_STREAM_IDLE_TIMEOUT_MS",
            &mut self.runner.stream_idle_timeout_ms,
        )?;
        Ok(())
    }
}

fn override_parsed<F, T>(lookup: &F, key: &str, slot: &mut T) -> Result<(), TurnError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return Ok(());
    };
    *slot = raw
        .trim()
        .parse()
        .map_err(|e| TurnError::Configuration(format!("{key}={raw}: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = TurnwiseConfig::from_toml_str(
            r#"
            [recovery]
            mode = "compaction"
            "#,
        )
        .expect("parse");
        assert_eq!(config.recovery.mode, RecoveryMode::Compaction);
        assert_eq!(config.recovery.candidate_limit, 40);
        assert_eq!(config.guard, GuardConfig::default());
    }

    #[test]
    fn recovery_mode_parses_case_insensitively() {
        assert_eq!("Targeted".parse::<RecoveryMode>().ok(), Some(RecoveryMode::Targeted));
        assert_eq!(RecoveryMode::Compaction.to_string(), "compaction");
    }
}
