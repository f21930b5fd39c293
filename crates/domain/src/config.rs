//! Configuration types, layered the way the teacher's `sa_domain::config`
//! is: a `#[derive(Deserialize)]` struct tree with `#[serde(default)]`
//! everywhere, loaded from TOML and overridable by environment variables,
//! validated once at startup into a list of severity-tagged issues.

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level server configuration (§6 "Configuration (enumerated)")
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            relay: RelayConfig::default(),
            auth: AuthConfig::default(),
            upstream: UpstreamConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Config {
    /// Validate cross-field invariants not already enforced by serde
    /// defaults. Mirrors `sa_domain::config::Config::validate`'s shape:
    /// collect issues rather than failing fast, so `doctor`/`config
    /// validate` can report everything wrong at once.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.upstream.ws_base.is_none() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "upstream.ws_base is not set and no session supplies a websocket_url"
                    .to_string(),
            });
        }

        if self.relay.max_sessions_per_tenant == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: "relay.max_sessions_per_tenant is 0 — no tenant will ever be admitted"
                    .to_string(),
            });
        }

        if self.auth.jwt_secret.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: "auth.jwt_secret is empty — running in dev mode, tokens are not verified"
                    .to_string(),
            });
        }

        issues
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server (bind address, path prefix)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_port")]
    pub port: u16,
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_path_prefix")]
    pub path_prefix: String,
    #[serde(default)]
    pub cors: CorsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: d_port(),
            host: d_host(),
            path_prefix: d_path_prefix(),
            cors: CorsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    #[serde(default = "d_cors_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: d_cors_origins(),
        }
    }
}

fn d_port() -> u16 {
    8080
}
fn d_host() -> String {
    "0.0.0.0".into()
}
fn d_path_prefix() -> String {
    "/ws/voice".into()
}
fn d_cors_origins() -> Vec<String> {
    vec!["http://localhost:*".into(), "http://127.0.0.1:*".into()]
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Relay-wide limits (§6 configuration table)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "d_max_sessions_per_tenant")]
    pub max_sessions_per_tenant: u32,
    #[serde(default = "d_max_session_duration_ms")]
    pub max_session_duration_ms: u64,
    #[serde(default = "d_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "d_inactivity_timeout_ms")]
    pub inactivity_timeout_ms: u64,
    #[serde(default = "d_max_audio_buffer_bytes")]
    pub max_audio_buffer_bytes: usize,
    #[serde(default = "d_watchdog_interval_ms")]
    pub watchdog_interval_ms: u64,
    #[serde(default = "d_pronunciation_threshold")]
    pub pronunciation_feedback_threshold: f32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_sessions_per_tenant: d_max_sessions_per_tenant(),
            max_session_duration_ms: d_max_session_duration_ms(),
            heartbeat_interval_ms: d_heartbeat_interval_ms(),
            inactivity_timeout_ms: d_inactivity_timeout_ms(),
            max_audio_buffer_bytes: d_max_audio_buffer_bytes(),
            watchdog_interval_ms: d_watchdog_interval_ms(),
            pronunciation_feedback_threshold: d_pronunciation_threshold(),
        }
    }
}

fn d_max_sessions_per_tenant() -> u32 {
    50
}
fn d_max_session_duration_ms() -> u64 {
    1_800_000
}
fn d_heartbeat_interval_ms() -> u64 {
    30_000
}
fn d_inactivity_timeout_ms() -> u64 {
    120_000
}
fn d_max_audio_buffer_bytes() -> usize {
    1_048_576
}
fn d_watchdog_interval_ms() -> u64 {
    10_000
}
fn d_pronunciation_threshold() -> f32 {
    0.6
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Auth
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    /// HMAC secret used to verify bearer tokens. Empty = dev mode (no
    /// verification), matching the teacher's `api_token_hash: Option<..>`
    /// "`None` = dev mode" convention.
    #[serde(default)]
    pub jwt_secret: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Upstream (AI provider dial-out)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpstreamConfig {
    /// Base websocket URL used to synthesize a per-agent URL when the
    /// session record does not carry its own `websocket_url`.
    #[serde(default)]
    pub ws_base: Option<String>,
    /// Tenant-scoped API key attached to the upstream dial as a header.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "d_dial_timeout_ms")]
    pub dial_timeout_ms: u64,
}

fn d_dial_timeout_ms() -> u64 {
    10_000
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-session configuration (§3 "Configuration")
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Pcm16000,
}

impl Default for AudioFormat {
    fn default() -> Self {
        AudioFormat::Pcm16000
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    #[serde(default)]
    pub format: AudioFormat,
    #[serde(default = "d_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "d_channels")]
    pub channels: u8,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            format: AudioFormat::default(),
            sample_rate: d_sample_rate(),
            channels: d_channels(),
        }
    }
}

fn d_sample_rate() -> u32 {
    16_000
}
fn d_channels() -> u8 {
    1
}

/// The mutable, whitelisted-tunable subset of per-session configuration.
/// Every field is independently clampable, matching the teacher's
/// `session.config` handling note: "Values out of range are clamped."
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default = "d_vad_sensitivity")]
    pub vad_sensitivity: f32,
    #[serde(default = "d_interruption_threshold")]
    pub interruption_threshold: f32,
    #[serde(default = "d_turn_timeout_ms")]
    pub turn_timeout_ms: u64,
    #[serde(default = "d_pronunciation_feedback_enabled")]
    pub pronunciation_feedback_enabled: bool,
    #[serde(default = "d_max_duration_ms")]
    pub max_duration_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
            vad_sensitivity: d_vad_sensitivity(),
            interruption_threshold: d_interruption_threshold(),
            turn_timeout_ms: d_turn_timeout_ms(),
            pronunciation_feedback_enabled: d_pronunciation_feedback_enabled(),
            max_duration_ms: d_max_duration_ms(),
        }
    }
}

fn d_vad_sensitivity() -> f32 {
    0.5
}
fn d_interruption_threshold() -> f32 {
    0.5
}
fn d_turn_timeout_ms() -> u64 {
    3_000
}
fn d_pronunciation_feedback_enabled() -> bool {
    true
}
fn d_max_duration_ms() -> u64 {
    1_800_000
}

/// Patch applied by a `session.config` control message. Every field is
/// optional (only supplied fields are tuned) and gets clamped to its
/// declared range before being applied.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfigPatch {
    #[serde(default, rename = "vadSensitivity")]
    pub vad_sensitivity: Option<f32>,
    #[serde(default, rename = "interruptionThreshold")]
    pub interruption_threshold: Option<f32>,
    #[serde(default, rename = "turnTimeout")]
    pub turn_timeout_ms: Option<u64>,
    #[serde(default, rename = "pronunciationFeedback")]
    pub pronunciation_feedback: Option<bool>,
}

impl SessionConfig {
    /// Apply a patch, clamping every tunable field to its declared range
    /// (§3: VAD sensitivity and interruption threshold in `[0,1]`, turn
    /// timeout in `[500, 10_000]` ms).
    pub fn apply_patch(&mut self, patch: &SessionConfigPatch) {
        if let Some(v) = patch.vad_sensitivity {
            self.vad_sensitivity = v.clamp(0.0, 1.0);
        }
        if let Some(v) = patch.interruption_threshold {
            self.interruption_threshold = v.clamp(0.0, 1.0);
        }
        if let Some(v) = patch.turn_timeout_ms {
            self.turn_timeout_ms = v.clamp(500, 10_000);
        }
        if let Some(v) = patch.pronunciation_feedback {
            self.pronunciation_feedback_enabled = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_vad_sensitivity_above_range() {
        let mut cfg = SessionConfig::default();
        cfg.apply_patch(&SessionConfigPatch {
            vad_sensitivity: Some(2.0),
            ..Default::default()
        });
        assert_eq!(cfg.vad_sensitivity, 1.0);
    }

    #[test]
    fn clamp_vad_sensitivity_below_range() {
        let mut cfg = SessionConfig::default();
        cfg.apply_patch(&SessionConfigPatch {
            vad_sensitivity: Some(-1.0),
            ..Default::default()
        });
        assert_eq!(cfg.vad_sensitivity, 0.0);
    }

    #[test]
    fn clamp_turn_timeout_bounds() {
        let mut cfg = SessionConfig::default();
        cfg.apply_patch(&SessionConfigPatch {
            turn_timeout_ms: Some(50),
            ..Default::default()
        });
        assert_eq!(cfg.turn_timeout_ms, 500);

        cfg.apply_patch(&SessionConfigPatch {
            turn_timeout_ms: Some(99_999),
            ..Default::default()
        });
        assert_eq!(cfg.turn_timeout_ms, 10_000);
    }

    #[test]
    fn unset_fields_are_left_unchanged() {
        let mut cfg = SessionConfig::default();
        let before = cfg.pronunciation_feedback_enabled;
        cfg.apply_patch(&SessionConfigPatch::default());
        assert_eq!(cfg.pronunciation_feedback_enabled, before);
        assert_eq!(cfg.vad_sensitivity, d_vad_sensitivity());
    }

    #[test]
    fn deserialize_empty_uses_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg.relay.max_sessions_per_tenant, 50);
        assert_eq!(cfg.server.path_prefix, "/ws/voice");
    }

    #[test]
    fn validate_flags_missing_upstream_base() {
        let cfg = Config::default();
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error && i.message.contains("ws_base")));
    }
}
