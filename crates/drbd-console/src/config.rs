//! Console configuration loading and validation.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use thiserror::Error;

pub const CONFIG_DIR_NAME: &str = "drbd-console";
pub const CONFIG_FILE_NAME: &str = "config.toml";

pub const DEFAULT_DRBDSETUP: &str = "/usr/sbin/drbdsetup";
pub const DEFAULT_RESPAWN_DELAY_MS: u64 = 3000;
pub const DEFAULT_INTERVAL_MS: u64 = 250;
const MIN_INTERVAL_MS: u64 = 50;
const MAX_INTERVAL_MS: u64 = 10_000;
const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    InvalidConfig(SmolStr),
    #[error("config file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorScheme {
    #[default]
    Default,
    Dark,
    Light,
    Mono,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TaskSettings {
    pub discard_finished: bool,
    pub discard_succeeded: bool,
    pub suspend_new: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplaySettings {
    pub interval_ms: u64,
    pub enable_mouse_nav: bool,
    pub problem_mode: bool,
    pub color_scheme: ColorScheme,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_INTERVAL_MS,
            enable_mouse_nav: false,
            problem_mode: false,
            color_scheme: ColorScheme::Default,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSettings {
    /// Program and arguments of the events source.
    pub command: Vec<String>,
    pub respawn_delay_ms: u64,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            command: default_events_command(DEFAULT_DRBDSETUP),
            respawn_delay_ms: DEFAULT_RESPAWN_DELAY_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrbdSettings {
    pub drbdadm: String,
    pub drbdsetup: String,
}

impl Default for DrbdSettings {
    fn default() -> Self {
        Self {
            drbdadm: drbd_tasks::DEFAULT_DRBDADM.to_owned(),
            drbdsetup: DEFAULT_DRBDSETUP.to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub level: SmolStr,
    pub file: Option<PathBuf>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: SmolStr::new_inline("warn"),
            file: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConsoleConfig {
    pub tasks: TaskSettings,
    pub display: DisplaySettings,
    pub events: EventSettings,
    pub drbd: DrbdSettings,
    pub log: LogSettings,
}

fn default_events_command(drbdsetup: &str) -> Vec<String> {
    [drbdsetup, "events2", "all", "--timestamps", "--statistics"]
        .into_iter()
        .map(str::to_owned)
        .collect()
}

/// Per-user config location, `None` when no config directory is known.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

impl ConsoleConfig {
    /// Loads `path`. With `required` unset a missing file yields the defaults.
    pub fn load(path: &Path, required: bool) -> Result<Self, ConfigError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if !required && err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let file_name = path.display().to_string();
        Self::parse_text(&text, &file_name)
    }

    pub fn parse_text(text: &str, file_name: &str) -> Result<Self, ConfigError> {
        let raw: ConfigFile = toml::from_str(text)
            .map_err(|err| ConfigError::InvalidConfig(format!("{file_name}: {err}").into()))?;
        raw.into_config()
            .map_err(|err| prefix_invalid_config(file_name, err))
    }

    /// Renders the complete settings as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(&ConfigFile::from(self))
            .map_err(|err| ConfigError::InvalidConfig(format!("serialize: {err}").into()))
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let text = self.to_toml()?;
        let io_error = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
        fs::write(path, text).map_err(io_error)
    }
}

fn prefix_invalid_config(file_name: &str, err: ConfigError) -> ConfigError {
    match err {
        ConfigError::InvalidConfig(message) => {
            ConfigError::InvalidConfig(format!("{file_name}: {message}").into())
        }
        other => other,
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    tasks: Option<TasksSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    display: Option<DisplaySection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    events: Option<EventsSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    drbd: Option<DrbdSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    log: Option<LogSection>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct TasksSection {
    discard_finished: Option<bool>,
    discard_succeeded: Option<bool>,
    suspend_new: Option<bool>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct DisplaySection {
    interval_ms: Option<u64>,
    enable_mouse_nav: Option<bool>,
    problem_mode: Option<bool>,
    color_scheme: Option<ColorScheme>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct EventsSection {
    command: Option<Vec<String>>,
    respawn_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct DrbdSection {
    drbdadm: Option<String>,
    drbdsetup: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct LogSection {
    level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    file: Option<PathBuf>,
}

impl ConfigFile {
    fn into_config(self) -> Result<ConsoleConfig, ConfigError> {
        let defaults = ConsoleConfig::default();

        let tasks = self.tasks.unwrap_or_default();
        let tasks = TaskSettings {
            discard_finished: tasks.discard_finished.unwrap_or(false),
            discard_succeeded: tasks.discard_succeeded.unwrap_or(false),
            suspend_new: tasks.suspend_new.unwrap_or(false),
        };

        let display = self.display.unwrap_or_default();
        let interval_ms = display.interval_ms.unwrap_or(defaults.display.interval_ms);
        if !(MIN_INTERVAL_MS..=MAX_INTERVAL_MS).contains(&interval_ms) {
            return Err(ConfigError::InvalidConfig(
                format!(
                    "display.interval_ms must be between {MIN_INTERVAL_MS} and {MAX_INTERVAL_MS}"
                )
                .into(),
            ));
        }
        let display = DisplaySettings {
            interval_ms,
            enable_mouse_nav: display.enable_mouse_nav.unwrap_or(false),
            problem_mode: display.problem_mode.unwrap_or(false),
            color_scheme: display.color_scheme.unwrap_or_default(),
        };

        let drbd = self.drbd.unwrap_or_default();
        let drbd = DrbdSettings {
            drbdadm: non_empty_path(drbd.drbdadm, "drbd.drbdadm", defaults.drbd.drbdadm)?,
            drbdsetup: non_empty_path(drbd.drbdsetup, "drbd.drbdsetup", defaults.drbd.drbdsetup)?,
        };

        let events = self.events.unwrap_or_default();
        let command = match events.command {
            Some(command) if command.is_empty() || command[0].trim().is_empty() => {
                return Err(ConfigError::InvalidConfig(
                    "events.command must name a program".into(),
                ));
            }
            Some(command) => command,
            None => default_events_command(&drbd.drbdsetup),
        };
        let respawn_delay_ms = events
            .respawn_delay_ms
            .unwrap_or(DEFAULT_RESPAWN_DELAY_MS);
        if respawn_delay_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "events.respawn_delay_ms must be >= 1".into(),
            ));
        }
        let events = EventSettings {
            command,
            respawn_delay_ms,
        };

        let log = self.log.unwrap_or_default();
        let level = match log.level {
            Some(level) => {
                let level = level.trim().to_ascii_lowercase();
                if !LOG_LEVELS.contains(&level.as_str()) {
                    return Err(ConfigError::InvalidConfig(
                        format!("log.level must be one of {}", LOG_LEVELS.join(", ")).into(),
                    ));
                }
                SmolStr::new(level)
            }
            None => defaults.log.level,
        };
        let log = LogSettings {
            level,
            file: log.file,
        };

        Ok(ConsoleConfig {
            tasks,
            display,
            events,
            drbd,
            log,
        })
    }
}

fn non_empty_path(
    value: Option<String>,
    field: &str,
    default: String,
) -> Result<String, ConfigError> {
    match value {
        Some(path) if path.trim().is_empty() => Err(ConfigError::InvalidConfig(
            format!("{field} must not be empty").into(),
        )),
        Some(path) => Ok(path),
        None => Ok(default),
    }
}

impl From<&ConsoleConfig> for ConfigFile {
    fn from(config: &ConsoleConfig) -> Self {
        Self {
            tasks: Some(TasksSection {
                discard_finished: Some(config.tasks.discard_finished),
                discard_succeeded: Some(config.tasks.discard_succeeded),
                suspend_new: Some(config.tasks.suspend_new),
            }),
            display: Some(DisplaySection {
                interval_ms: Some(config.display.interval_ms),
                enable_mouse_nav: Some(config.display.enable_mouse_nav),
                problem_mode: Some(config.display.problem_mode),
                color_scheme: Some(config.display.color_scheme),
            }),
            events: Some(EventsSection {
                command: Some(config.events.command.clone()),
                respawn_delay_ms: Some(config.events.respawn_delay_ms),
            }),
            drbd: Some(DrbdSection {
                drbdadm: Some(config.drbd.drbdadm.clone()),
                drbdsetup: Some(config.drbd.drbdsetup.clone()),
            }),
            log: Some(LogSection {
                level: Some(config.log.level.to_string()),
                file: config.log.file.clone(),
            }),
        }
    }
}
