use serde::Deserialize;

/// Top-level configuration for a nexq process.
///
/// Aggregates the network parameters of the server, the operational
/// parameters of the broker engine, and the client-side timing knobs.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    /// Where the TCP listener binds.
    pub server: ServerSettings,
    /// Broker engine parameters: ack timeout, frame cap, sweep cadence.
    pub broker: BrokerSettings,
    /// Client-side timing: reconnect cadence and query/ack timeouts.
    pub client: ClientSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    /// The host address (e.g. "127.0.0.1" or "0.0.0.0") to bind.
    pub host: String,
    /// The port the broker listens on.
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BrokerSettings {
    /// Milliseconds an un-acked delivery may stay outstanding before the
    /// subscriber is presumed dead for that item.
    pub ack_timeout_ms: i64,
    /// Upper bound on a single frame's payload, in bytes.
    pub max_frame_bytes: usize,
    /// Cadence of the maintenance sweep (expiry, delivery reaping).
    pub sweep_interval_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClientSettings {
    /// Supervisor tick: reconnect attempts and ack-slot reaping.
    pub reconnect_interval_ms: u64,
    /// Default wait for a query's correlated reply.
    pub query_timeout_ms: u64,
    /// How long a sent command may wait for its ack.
    pub ack_timeout_ms: u64,
}

/// Partial configuration loaded from files or environment.
///
/// Allows partial specification of settings; missing values fall back to
/// the defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub broker: Option<PartialBrokerSettings>,
    pub client: Option<PartialClientSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize)]
pub struct PartialBrokerSettings {
    pub ack_timeout_ms: Option<i64>,
    pub max_frame_bytes: Option<usize>,
    pub sweep_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialClientSettings {
    pub reconnect_interval_ms: Option<u64>,
    pub query_timeout_ms: Option<u64>,
    pub ack_timeout_ms: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 45_784,
            },
            broker: BrokerSettings {
                ack_timeout_ms: 15_000,
                max_frame_bytes: 16 * 1024 * 1024,
                sweep_interval_ms: 1_000,
            },
            client: ClientSettings {
                reconnect_interval_ms: 1_000,
                query_timeout_ms: 60_000,
                ack_timeout_ms: 15_000,
            },
        }
    }
}
