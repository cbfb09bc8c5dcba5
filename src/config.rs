use crate::game::gameplay::SessionConfig;
use crate::game::judgment::JudgeOffsets;
use crate::game::note::{GameMode, LinearNoteField};
use crate::game::timing::CountdownSettings;
use ini::Ini;
use log::{info, warn};
use std::path::Path;
use std::str::FromStr;
use std::sync::{LazyLock, Mutex, PoisonError};
use thiserror::Error;

const CONFIG_PATH: &str = "conductor.ini";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] ini::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] ini::ParseError),

    #[error("failed to write config: {0}")]
    Write(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Error => "Error",
            Self::Warn => "Warn",
            Self::Info => "Info",
            Self::Debug => "Debug",
            Self::Trace => "Trace",
        }
    }

    pub const fn as_level_filter(self) -> log::LevelFilter {
        match self {
            Self::Error => log::LevelFilter::Error,
            Self::Warn => log::LevelFilter::Warn,
            Self::Info => log::LevelFilter::Info,
            Self::Debug => log::LevelFilter::Debug,
            Self::Trace => log::LevelFilter::Trace,
        }
    }
}

impl FromStr for LogLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            _ => Err(()),
        }
    }
}

const fn game_mode_str(mode: GameMode) -> &'static str {
    match mode {
        GameMode::Standard => "Standard",
        GameMode::Arcade => "Arcade",
    }
}

fn parse_game_mode(s: &str) -> Option<GameMode> {
    match s.trim().to_ascii_lowercase().as_str() {
        "standard" => Some(GameMode::Standard),
        "arcade" => Some(GameMode::Arcade),
        _ => None,
    }
}

fn parse_flag(s: &str) -> Option<bool> {
    let v = s.trim();
    if v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes") || v.eq_ignore_ascii_case("on") {
        Some(true)
    } else if v.eq_ignore_ascii_case("false") || v.eq_ignore_ascii_case("no") || v.eq_ignore_ascii_case("off") {
        Some(false)
    } else {
        v.parse::<u8>().ok().map(|n| n != 0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Config {
    // [Judge]
    pub perfect_offset: f32,
    pub good_offset: f32,
    pub okay_offset: f32,
    // [Timing]
    pub beats_shown_in_advance: f32,
    pub countdown_steps: u32,
    pub countdown_step_seconds: f64,
    pub music_rate: f32,
    // [Field]
    pub game_mode: GameMode,
    pub offscreen_distance: f32,
    // [Options]
    pub log_level: LogLevel,
    pub tick_rate: u32,
    pub autoplay: bool,
}

impl Default for Config {
    fn default() -> Self {
        let judge = JudgeOffsets::default();
        let countdown = CountdownSettings::default();
        let session = SessionConfig::default();
        Self {
            perfect_offset: judge.perfect,
            good_offset: judge.good,
            okay_offset: judge.okay,
            beats_shown_in_advance: session.beats_shown_in_advance,
            countdown_steps: countdown.steps,
            countdown_step_seconds: countdown.step_seconds,
            music_rate: 1.0,
            game_mode: GameMode::Standard,
            offscreen_distance: 0.5,
            log_level: LogLevel::Info,
            tick_rate: 60,
            autoplay: true,
        }
    }
}

impl Config {
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            judge_offsets: JudgeOffsets {
                perfect: self.perfect_offset,
                good: self.good_offset,
                okay: self.okay_offset,
            },
            beats_shown_in_advance: self.beats_shown_in_advance,
            countdown: CountdownSettings {
                steps: self.countdown_steps,
                step_seconds: self.countdown_step_seconds,
            },
        }
    }

    pub fn note_field(&self) -> LinearNoteField {
        LinearNoteField::uniform(self.game_mode, self.offscreen_distance)
    }

    /// Reads every known key, keeping the default for anything missing or
    /// unparsable.
    fn from_ini(conf: &Ini) -> Self {
        let default = Self::default();
        let get = |sec: &str, key: &str| conf.get_from(Some(sec), key);
        let f32_or = |sec: &str, key: &str, fallback: f32| {
            get(sec, key)
                .and_then(|v| v.trim().parse::<f32>().ok())
                .filter(|v| v.is_finite())
                .unwrap_or(fallback)
        };

        Self {
            perfect_offset: f32_or("Judge", "PerfectOffset", default.perfect_offset),
            good_offset: f32_or("Judge", "GoodOffset", default.good_offset),
            okay_offset: f32_or("Judge", "OkayOffset", default.okay_offset),
            beats_shown_in_advance: f32_or("Timing", "BeatsShownInAdvance", default.beats_shown_in_advance),
            countdown_steps: get("Timing", "CountdownSteps")
                .and_then(|v| v.trim().parse::<u32>().ok())
                .unwrap_or(default.countdown_steps),
            countdown_step_seconds: get("Timing", "CountdownStepSeconds")
                .and_then(|v| v.trim().parse::<f64>().ok())
                .filter(|v| v.is_finite() && *v >= 0.0)
                .unwrap_or(default.countdown_step_seconds),
            music_rate: f32_or("Timing", "MusicRate", default.music_rate),
            game_mode: get("Field", "GameMode")
                .and_then(parse_game_mode)
                .unwrap_or(default.game_mode),
            offscreen_distance: f32_or("Field", "OffscreenDistance", default.offscreen_distance),
            log_level: get("Options", "LogLevel")
                .and_then(|v| LogLevel::from_str(v).ok())
                .unwrap_or(default.log_level),
            tick_rate: get("Options", "TickRate")
                .and_then(|v| v.trim().parse::<u32>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(default.tick_rate),
            autoplay: get("Options", "Autoplay")
                .and_then(parse_flag)
                .unwrap_or(default.autoplay),
        }
    }

    fn to_ini(&self) -> Ini {
        let mut conf = Ini::new();
        conf.with_section(Some("Judge"))
            .set("PerfectOffset", self.perfect_offset.to_string())
            .set("GoodOffset", self.good_offset.to_string())
            .set("OkayOffset", self.okay_offset.to_string());
        conf.with_section(Some("Timing"))
            .set("BeatsShownInAdvance", self.beats_shown_in_advance.to_string())
            .set("CountdownSteps", self.countdown_steps.to_string())
            .set("CountdownStepSeconds", self.countdown_step_seconds.to_string())
            .set("MusicRate", self.music_rate.to_string());
        conf.with_section(Some("Field"))
            .set("GameMode", game_mode_str(self.game_mode))
            .set("OffscreenDistance", self.offscreen_distance.to_string());
        conf.with_section(Some("Options"))
            .set("Autoplay", if self.autoplay { "1" } else { "0" })
            .set("LogLevel", self.log_level.as_str())
            .set("TickRate", self.tick_rate.to_string());
        conf
    }
}

// Every key written by `Config::to_ini`, used to detect files from older builds.
const KNOWN_KEYS: [(&str, &str); 12] = [
    ("Judge", "PerfectOffset"),
    ("Judge", "GoodOffset"),
    ("Judge", "OkayOffset"),
    ("Timing", "BeatsShownInAdvance"),
    ("Timing", "CountdownSteps"),
    ("Timing", "CountdownStepSeconds"),
    ("Timing", "MusicRate"),
    ("Field", "GameMode"),
    ("Field", "OffscreenDistance"),
    ("Options", "Autoplay"),
    ("Options", "LogLevel"),
    ("Options", "TickRate"),
];

static CONFIG: LazyLock<Mutex<Config>> = LazyLock::new(|| Mutex::new(Config::default()));

pub fn parse(content: &str) -> Result<Config, ConfigError> {
    let conf = Ini::load_from_str(content)?;
    Ok(Config::from_ini(&conf))
}

fn load_from<P: AsRef<Path>>(path: P) -> Result<(Config, bool), ConfigError> {
    let conf = Ini::load_from_file(path)?;
    let missing = KNOWN_KEYS
        .iter()
        .any(|(sec, key)| conf.get_from(Some(*sec), key).is_none());
    Ok((Config::from_ini(&conf), missing))
}

fn write_to<P: AsRef<Path>>(path: P, config: &Config) -> Result<(), ConfigError> {
    config.to_ini().write_to_file(path)?;
    Ok(())
}

/// Loads `conductor.ini` into the global config, creating it with defaults
/// when it does not exist. Never fails; problems are logged and defaults kept.
pub fn load() {
    if !Path::new(CONFIG_PATH).exists() {
        info!("'{CONFIG_PATH}' not found, creating with default values.");
        if let Err(e) = write_to(CONFIG_PATH, &Config::default()) {
            warn!("Failed to create default config file: {e}");
        }
    }

    match load_from(CONFIG_PATH) {
        Ok((loaded, missing)) => {
            *CONFIG.lock().unwrap_or_else(PoisonError::into_inner) = loaded;
            info!("Configuration loaded from '{CONFIG_PATH}'.");
            if missing {
                match write_to(CONFIG_PATH, &loaded) {
                    Ok(()) => info!("'{CONFIG_PATH}' updated with default values for any missing fields."),
                    Err(e) => warn!("Failed to update '{CONFIG_PATH}': {e}"),
                }
            } else {
                info!("Configuration OK; no write needed.");
            }
        }
        Err(e) => {
            warn!("Failed to load '{CONFIG_PATH}': {e}. Using default values.");
        }
    }
}

pub fn get() -> Config {
    *CONFIG.lock().unwrap_or_else(PoisonError::into_inner)
}
