//! MQTT client construction from `BrokerConfig`.

use std::time::Duration;

use rumqttc::{AsyncClient, EventLoop, MqttOptions, QoS};

use nichoir_core::config::BrokerConfig;
use nichoir_core::error::NichoirError;

/// Request channel capacity between `AsyncClient` and `EventLoop`.
const REQUEST_CAPACITY: usize = 10;

/// Longest client identifier an MQTT 3.1.1 broker must accept.
const MAX_CLIENT_ID_LEN: usize = 23;

/// Builds an `AsyncClient`/`EventLoop` pair for the configured broker.
pub struct ClientBuilder {
    opts: MqttOptions,
    qos: QoS,
    cap: usize,
}

impl ClientBuilder {
    /// Translate the broker section into rumqttc options.
    ///
    /// An empty `client_id` is replaced with a random `nichoir-` prefixed one.
    pub fn from_config(config: &BrokerConfig) -> Result<Self, NichoirError> {
        let client_id = if config.client_id.is_empty() {
            generate_client_id("nichoir")
        } else {
            config.client_id.clone()
        };
        Self::with_client_id(config, client_id)
    }

    /// Same as `from_config` with an explicit identifier, e.g. for a
    /// short-lived publisher running next to the ingest service.
    pub fn with_client_id(
        config: &BrokerConfig,
        client_id: impl Into<String>,
    ) -> Result<Self, NichoirError> {
        let mut opts = MqttOptions::new(client_id, config.host.clone(), config.port);
        opts.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        opts.set_clean_session(true);
        opts.set_max_packet_size(config.max_packet_size, config.max_packet_size);

        match (&config.username, &config.password) {
            (Some(user), pass) => {
                opts.set_credentials(user.clone(), pass.clone().unwrap_or_default());
            }
            (None, Some(_)) => {
                return Err(NichoirError::Config(
                    "broker.password is set without broker.username".into(),
                ))
            }
            (None, None) => {}
        }

        Ok(Self {
            opts,
            qos: qos_from_level(config.qos)?,
            cap: REQUEST_CAPACITY,
        })
    }

    pub fn capacity(mut self, cap: usize) -> Self {
        self.cap = cap.max(1);
        self
    }

    /// QoS level used for subscriptions and publishes.
    pub fn qos(&self) -> QoS {
        self.qos
    }

    pub fn options(&self) -> &MqttOptions {
        &self.opts
    }

    pub fn build(self) -> (AsyncClient, EventLoop) {
        AsyncClient::new(self.opts, self.cap)
    }
}

/// Map a configured QoS number onto rumqttc's enum.
pub fn qos_from_level(level: u8) -> Result<QoS, NichoirError> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(NichoirError::Config(format!(
            "QoS must be 0, 1 or 2, got {}",
            other
        ))),
    }
}

/// `<prefix>-<random hex>`, short enough for any 3.1.1 broker.
pub fn generate_client_id(prefix: &str) -> String {
    let id = format!("{}-{}", prefix, uuid::Uuid::new_v4().simple());
    id.chars().take(MAX_CLIENT_ID_LEN).collect()
}
