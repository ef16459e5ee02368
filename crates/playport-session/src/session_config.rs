//! Session configuration: engagement timings, per-game profile, payment wiring.
//!
//! Configuration is TOML. Every timing has a default; only `[game].game_id`
//! is required.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_BACK_PROMPT_AUTO_CLOSE_MS: u64 = 5_000;
pub const DEFAULT_INFORMER_ARM_DELAY_MS: u64 = 120_000;
pub const DEFAULT_INFORMER_AUTO_CLOSE_MS: u64 = 10_000;
pub const DEFAULT_AUTH_DELAY_MS: u64 = 300_000;
pub const DEFAULT_PAYMENT_REQUEST_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `DeviceClass` values.
pub enum DeviceClass {
    Mobile,
    #[default]
    Desktop,
}

impl DeviceClass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mobile => "mobile",
            Self::Desktop => "desktop",
        }
    }

    /// Touch-class devices get the software stretch instead of native fullscreen.
    pub fn is_touch(self) -> bool {
        matches!(self, Self::Mobile)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub class: DeviceClass,
    #[serde(default)]
    pub progressive_app: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionTimings {
    pub back_prompt_auto_close_ms: u64,
    pub informer_arm_delay_ms: u64,
    pub informer_auto_close_ms: u64,
    pub default_auth_delay_ms: u64,
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self {
            back_prompt_auto_close_ms: DEFAULT_BACK_PROMPT_AUTO_CLOSE_MS,
            informer_arm_delay_ms: DEFAULT_INFORMER_ARM_DELAY_MS,
            informer_auto_close_ms: DEFAULT_INFORMER_AUTO_CLOSE_MS,
            default_auth_delay_ms: DEFAULT_AUTH_DELAY_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
/// Per-game flags that shape the session.
pub struct GameProfile {
    pub game_id: String,
    #[serde(default)]
    pub auth_delay_mobile_ms: Option<u64>,
    #[serde(default)]
    pub auth_delay_desktop_ms: Option<u64>,
    #[serde(default)]
    pub auth_nudge_exempt: bool,
    #[serde(default)]
    pub autoplay_mobile: bool,
    #[serde(default)]
    pub autoplay_desktop: bool,
    #[serde(default)]
    pub software_fullscreen: bool,
}

impl GameProfile {
    pub fn new(game_id: impl Into<String>) -> Self {
        Self {
            game_id: game_id.into(),
            ..Self::default()
        }
    }

    pub fn auth_delay_ms(&self, class: DeviceClass, timings: &SessionTimings) -> u64 {
        let configured = match class {
            DeviceClass::Mobile => self.auth_delay_mobile_ms,
            DeviceClass::Desktop => self.auth_delay_desktop_ms,
        };
        configured.unwrap_or(timings.default_auth_delay_ms)
    }

    pub fn autoplays_on(&self, class: DeviceClass) -> bool {
        match class {
            DeviceClass::Mobile => self.autoplay_mobile,
            DeviceClass::Desktop => self.autoplay_desktop,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaymentSettings {
    pub exchange_url: Option<String>,
    pub preference_path: Option<PathBuf>,
    pub request_timeout_ms: u64,
}

impl Default for PaymentSettings {
    fn default() -> Self {
        Self {
            exchange_url: None,
            preference_path: None,
            request_timeout_ms: DEFAULT_PAYMENT_REQUEST_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FrameSessionConfig {
    #[serde(default)]
    pub timings: SessionTimings,
    pub game: GameProfile,
    #[serde(default)]
    pub payment: PaymentSettings,
}

impl FrameSessionConfig {
    pub fn for_game(game: GameProfile) -> Self {
        Self {
            timings: SessionTimings::default(),
            game,
            payment: PaymentSettings::default(),
        }
    }
}

pub fn parse_frame_session_config(raw: &str) -> Result<FrameSessionConfig> {
    let config = toml::from_str::<FrameSessionConfig>(raw)
        .context("failed to parse frame session config")?;
    validate_frame_session_config(&config)?;
    Ok(config)
}

pub fn load_frame_session_config(path: &Path) -> Result<FrameSessionConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read frame session config {}", path.display()))?;
    parse_frame_session_config(&raw)
        .with_context(|| format!("invalid frame session config {}", path.display()))
}

pub fn validate_frame_session_config(config: &FrameSessionConfig) -> Result<()> {
    if config.game.game_id.trim().is_empty() {
        bail!("game.game_id cannot be empty");
    }
    let timings = &config.timings;
    for (name, value) in [
        ("timings.back_prompt_auto_close_ms", timings.back_prompt_auto_close_ms),
        ("timings.informer_arm_delay_ms", timings.informer_arm_delay_ms),
        ("timings.informer_auto_close_ms", timings.informer_auto_close_ms),
        ("timings.default_auth_delay_ms", timings.default_auth_delay_ms),
        ("payment.request_timeout_ms", config.payment.request_timeout_ms),
    ] {
        if value == 0 {
            bail!("{name} must be greater than 0");
        }
    }
    if timings.informer_auto_close_ms >= timings.informer_arm_delay_ms {
        bail!(
            "timings.informer_auto_close_ms ({}) must be shorter than timings.informer_arm_delay_ms ({})",
            timings.informer_auto_close_ms,
            timings.informer_arm_delay_ms
        );
    }
    for (name, value) in [
        ("game.auth_delay_mobile_ms", config.game.auth_delay_mobile_ms),
        ("game.auth_delay_desktop_ms", config.game.auth_delay_desktop_ms),
    ] {
        if value == Some(0) {
            bail!("{name} must be greater than 0 when set");
        }
    }
    if let Some(url) = &config.payment.exchange_url {
        let url = url.trim();
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            bail!("payment.exchange_url '{url}' must be an http(s) url");
        }
    }
    Ok(())
}
