//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER__HOST, APP_SESSION__IDLE_TIMEOUT_SECS, etc.)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)
//!
//! ## The upstream credential
//! The STT vendor key is deliberately *not* part of [`AppConfig`]. It is read from
//! `ELEVENLABS_API_KEY` each time a bridge session starts (see [`BridgeOptions`]),
//! so it never shows up in `/api/v1/config` and a missing key only fails the
//! session that needed it.

use anyhow::Result;              // Better error handling with context
use serde::{Deserialize, Serialize};  // For converting to/from TOML, JSON, etc.
use std::env;                    // For reading environment variables

/// Environment variable holding the upstream STT credential.
pub const CREDENTIAL_ENV: &str = "ELEVENLABS_API_KEY";

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// Breaking configuration into logical groups (server, upstream, session)
/// keeps the listener settings apart from the vendor protocol constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub session: SessionConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,  // u16 = unsigned 16-bit integer (0-65535), perfect for port numbers
}

/// Fixed protocol parameters for the upstream realtime STT connection.
///
/// These are sent as query parameters when the bridge opens the upstream socket.
/// They are the same for every session; clients cannot negotiate them.
///
/// ## Fields:
/// - `url`: Realtime endpoint (`ws://` or `wss://`)
/// - `model_id`: Vendor model identifier
/// - `audio_format`: Encoding of the base64 payloads clients send (e.g. "pcm_16000")
/// - `sample_rate`: Stamped onto every upstream audio frame
/// - `commit_strategy`: "vad" lets the vendor commit on detected silence
/// - `vad_*` / `min_*`: Voice activity detection thresholds
/// - `language_code`: Optional language hint, omitted from the URL when unset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub url: String,
    pub model_id: String,
    pub audio_format: String,
    pub sample_rate: u32,
    pub commit_strategy: String,
    pub vad_silence_threshold_secs: f32,
    pub vad_threshold: f32,
    pub min_speech_duration_ms: u32,
    pub min_silence_duration_ms: u32,
    #[serde(default)]
    pub language_code: Option<String>,
}

/// Per-session behaviour of the bridge.
///
/// ## Fields:
/// - `max_concurrent_sessions`: Upgrade requests beyond this are refused with 503
/// - `pending_audio_frames`: Audio frames held while the upstream handshake is in
///   flight. `0` means audio arriving before the upstream is ready is dropped.
/// - `idle_timeout_secs`: Close a session with no traffic for this long (`0` = never)
/// - `max_session_secs`: Hard cap on session length (`0` = unlimited)
/// - `max_frame_bytes`: Largest client WebSocket frame accepted. Audio messages
///   carry base64 payloads, so this sits well above the 64 KiB actix default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub max_concurrent_sessions: usize,
    pub pending_audio_frames: usize,
    pub idle_timeout_secs: u64,
    pub max_session_secs: u64,
    pub max_frame_bytes: usize,
}

/// Provides default configuration values.
///
/// ## Why defaults matter:
/// The upstream protocol constants live here as compiled-in defaults, so the
/// bridge runs with nothing but a credential in the environment.
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),  // Localhost only (safe for development)
                port: 8080,                     // Common development port
            },
            upstream: UpstreamConfig {
                url: "wss://api.elevenlabs.io/v1/speech-to-text/realtime".to_string(),
                model_id: "scribe_v2_realtime".to_string(),
                audio_format: "pcm_16000".to_string(),
                sample_rate: 16000,
                commit_strategy: "vad".to_string(),
                vad_silence_threshold_secs: 1.5,
                vad_threshold: 0.4,
                min_speech_duration_ms: 100,
                min_silence_duration_ms: 100,
                language_code: None,
            },
            session: SessionConfig {
                max_concurrent_sessions: 50,
                pending_audio_frames: 0,   // Drop pre-handshake audio
                idle_timeout_secs: 0,      // Sessions live as long as their sockets
                max_session_secs: 0,
                max_frame_bytes: 4 * 1024 * 1024,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle special cases for HOST and PORT environment variables
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__HOST=0.0.0.0`: Override server host
    /// - `APP_UPSTREAM__MODEL_ID=scribe_v2_realtime`: Override the vendor model
    /// - `APP_SESSION__PENDING_AUDIO_FRAMES=25`: Buffer audio during the handshake
    /// - `HOST=0.0.0.0` / `PORT=3000`: Special cases for deployment platforms
    ///
    /// Nested keys use a double underscore because several field names already
    /// contain single underscores.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            // 1. Start with defaults - converts our Default impl to config format
            .add_source(config::Config::try_from(&AppConfig::default())?)
            // 2. Load from config.toml file (if it exists) - required(false) means "don't error if missing"
            .add_source(config::File::with_name("config").required(false))
            // 3. Load from environment variables with APP_ prefix
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        // Handle special environment variables used by deployment platforms
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0
    /// - At least one concurrent session is allowed
    /// - The upstream URL is a WebSocket URL
    /// - The upstream sample rate is non-zero
    /// - The VAD sensitivity lies in (0, 1]
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.session.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }

        if self.session.max_frame_bytes == 0 {
            return Err(anyhow::anyhow!("Max frame size must be greater than 0"));
        }

        if !(self.upstream.url.starts_with("ws://") || self.upstream.url.starts_with("wss://")) {
            return Err(anyhow::anyhow!(
                "Upstream URL must use ws:// or wss://, got '{}'",
                self.upstream.url
            ));
        }

        if self.upstream.sample_rate == 0 {
            return Err(anyhow::anyhow!("Upstream sample rate must be greater than 0"));
        }

        if !(self.upstream.vad_threshold > 0.0 && self.upstream.vad_threshold <= 1.0) {
            return Err(anyhow::anyhow!("VAD threshold must be in (0, 1]"));
        }

        if self.upstream.vad_silence_threshold_secs <= 0.0 {
            return Err(anyhow::anyhow!("VAD silence threshold must be positive"));
        }

        Ok(())  // All validation passed
    }
}

/// Everything one bridge session needs to know at construction time.
///
/// Built fresh for every accepted client connection. The credential is an
/// explicit value rather than something the session looks up on its own, which
/// keeps the missing-credential path testable without touching the process
/// environment.
#[derive(Debug, Clone)]
pub struct BridgeOptions {
    /// Upstream API key. `None` (or blank) fails the session in `INIT`.
    pub credential: Option<String>,
    pub upstream: UpstreamConfig,
    pub pending_audio_frames: usize,
    pub idle_timeout_secs: u64,
    pub max_session_secs: u64,
}

impl BridgeOptions {
    /// Build session options from the app config and a credential.
    ///
    /// Whitespace-only credentials are treated as absent.
    pub fn new(config: &AppConfig, credential: Option<String>) -> Self {
        Self {
            credential: credential.filter(|value| !value.trim().is_empty()),
            upstream: config.upstream.clone(),
            pending_audio_frames: config.session.pending_audio_frames,
            idle_timeout_secs: config.session.idle_timeout_secs,
            max_session_secs: config.session.max_session_secs,
        }
    }

    /// Read the credential from the process environment at session start.
    pub fn from_env(config: &AppConfig) -> Self {
        Self::new(config, env::var(CREDENTIAL_ENV).ok())
    }

    pub fn has_credential(&self) -> bool {
        self.credential.is_some()
    }
}

/// Whether the upstream credential is currently present in the environment.
/// Used by the health endpoint; sessions read it themselves via [`BridgeOptions::from_env`].
pub fn credential_configured() -> bool {
    env::var(CREDENTIAL_ENV)
        .map(|value| !value.trim().is_empty())
        .unwrap_or(false)
}
