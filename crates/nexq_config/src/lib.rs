pub mod settings;

use crate::settings::PartialSettings;
use config::{Config, ConfigError, Environment, File};

pub use settings::Settings;

pub use settings::{BrokerSettings, ClientSettings, ServerSettings};

pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(Environment::default().separator("_"));

    let config = builder.build()?;
    let partial: PartialSettings = config.try_deserialize()?;
    let default = Settings::default();

    Ok(Settings {
        server: ServerSettings {
            host: partial
                .server
                .as_ref()
                .and_then(|s| s.host.clone())
                .unwrap_or(default.server.host),
            port: partial
                .server
                .as_ref()
                .and_then(|s| s.port)
                .unwrap_or(default.server.port),
        },
        broker: BrokerSettings {
            ack_timeout_ms: partial
                .broker
                .as_ref()
                .and_then(|b| b.ack_timeout_ms)
                .unwrap_or(default.broker.ack_timeout_ms),
            max_frame_bytes: partial
                .broker
                .as_ref()
                .and_then(|b| b.max_frame_bytes)
                .unwrap_or(default.broker.max_frame_bytes),
            sweep_interval_ms: partial
                .broker
                .as_ref()
                .and_then(|b| b.sweep_interval_ms)
                .unwrap_or(default.broker.sweep_interval_ms),
        },
        client: ClientSettings {
            reconnect_interval_ms: partial
                .client
                .as_ref()
                .and_then(|c| c.reconnect_interval_ms)
                .unwrap_or(default.client.reconnect_interval_ms),
            query_timeout_ms: partial
                .client
                .as_ref()
                .and_then(|c| c.query_timeout_ms)
                .unwrap_or(default.client.query_timeout_ms),
            ack_timeout_ms: partial
                .client
                .as_ref()
                .and_then(|c| c.ack_timeout_ms)
                .unwrap_or(default.client.ack_timeout_ms),
        },
    })
}
