//! Centralized configuration defaults.
//!
//! Constants for stream buffering, network timeouts and the HTTP surface.
//! Tunable settings (`RetryConfig`, dispatcher and client configs) take their
//! defaults from here.

use std::time::Duration;

/// Stream buffering and lifetime defaults.
pub struct StreamConfig;

impl StreamConfig {
    /// Slots in a stream channel before the producer is suspended.
    pub const DEFAULT_CHANNEL_CAPACITY: usize = 16;
    /// Longest a single stream may run before the Application closes it.
    pub const MAX_STREAM_DURATION: Duration = Duration::from_secs(120);
    /// Time a cancelled producer gets to exit on its own before it is aborted.
    pub const CANCEL_GRACE: Duration = Duration::from_secs(1);
    /// Interval between server-push keep-alive comments.
    pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);
}

/// Engine-side network defaults.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const PER_CALL_TIMEOUT: Duration = Duration::from_secs(30);
    pub const PER_STREAM_EVENT_TIMEOUT: Duration = Duration::from_secs(30);
    pub const STREAM_OPEN_TIMEOUT: Duration = Duration::from_secs(30);
    pub const CANCEL_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
    pub const MAX_RETRY_ATTEMPTS: u32 = 3;
    pub const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);
    pub const RETRY_MAX_DELAY: Duration = Duration::from_secs(10);
    pub const USER_AGENT: &'static str = "Tandem-Engine/0.1";
    pub const MAX_SSE_FRAME_BYTES: usize = 1_048_576; // 1MB
}

/// Application HTTP surface.
pub struct ServerConfig;

impl ServerConfig {
    pub const DEFAULT_HOST: &'static str = "127.0.0.1";
    pub const DEFAULT_PORT: u16 = 8100;
    pub const RPC_PATH: &'static str = "/rpc";
    pub const HEALTH_PATH: &'static str = "/health";
    pub const MAX_BODY_BYTES: usize = 1_048_576; // 1MB
    pub const MAX_CONCURRENT_REQUESTS: usize = 256;
}
