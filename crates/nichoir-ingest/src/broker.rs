//! Broker session management and the inbound message loop.
//!
//! `BrokerLink` drives the rumqttc event loop, (re)subscribes to the image
//! and telemetry topics on every successful connect-ack, and hands each
//! publish to the `TopicRouter` sequentially, in arrival order.
//!
//! Failure policy:
//! - an error before the first connect-ack is fatal;
//! - a refused connect-ack is fatal;
//! - after a session was established, transport errors are retried with
//!   bounded exponential backoff, and exhausting it is fatal.

use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, Packet, QoS,
    SubscribeReasonCode,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use nichoir_core::error::NichoirError;

use crate::backoff::Backoff;
use crate::client::ClientBuilder;
use crate::router::TopicRouter;

/// Connection lifecycle as seen by the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    /// Connect-ack received, subscriptions not yet acknowledged.
    Connected,
    /// At least one subscription granted; messages are dispatched.
    Subscribed,
}

impl LinkState {
    pub fn accepts_messages(self) -> bool {
        self == LinkState::Subscribed
    }
}

/// Owns the MQTT session and feeds the router.
pub struct BrokerLink {
    client: AsyncClient,
    eventloop: EventLoop,
    address: String,
    qos: QoS,
    topics: Vec<String>,
    backoff: Backoff,
    state: LinkState,
    ever_connected: bool,
    received: u64,
}

impl BrokerLink {
    pub fn new(builder: ClientBuilder, topics: Vec<String>, backoff: Backoff) -> Self {
        let (host, port) = builder.options().broker_address();
        let qos = builder.qos();
        let (client, eventloop) = builder.build();
        Self::from_parts(client, eventloop, format!("{}:{}", host, port), qos, topics, backoff)
    }

    /// Assemble a link around an existing client/event loop pair.
    pub fn from_parts(
        client: AsyncClient,
        eventloop: EventLoop,
        address: String,
        qos: QoS,
        topics: Vec<String>,
        backoff: Backoff,
    ) -> Self {
        Self {
            client,
            eventloop,
            address,
            qos,
            topics,
            backoff,
            state: LinkState::Disconnected,
            ever_connected: false,
            received: 0,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Publishes seen on the wire, dispatched or not.
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Run until `cancel` fires or the link fails fatally.
    ///
    /// Returns `Ok(())` after a clean disconnect and
    /// `Err(NichoirError::Connection)` on a fatal failure.
    pub async fn run(
        &mut self,
        router: &mut TopicRouter,
        cancel: CancellationToken,
    ) -> Result<(), NichoirError> {
        info!(broker = %self.address, topics = ?self.topics, "Connecting to broker");

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    self.disconnect().await;
                    return Ok(());
                }

                polled = self.eventloop.poll() => match polled {
                    Ok(event) => self.handle_event(event, router).await?,
                    Err(e) => {
                        let delay = self.handle_error(e)?;
                        tokio::select! {
                            _ = cancel.cancelled() => {
                                info!("Shutdown requested while waiting to reconnect");
                                return Ok(());
                            }
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                },
            }
        }
    }

    /// Apply one event to the link state, dispatching publishes.
    pub async fn handle_event(
        &mut self,
        event: Event,
        router: &mut TopicRouter,
    ) -> Result<(), NichoirError> {
        let packet = match event {
            Event::Incoming(packet) => packet,
            Event::Outgoing(outgoing) => {
                trace!(?outgoing, "Outgoing packet");
                return Ok(());
            }
        };

        match packet {
            Packet::ConnAck(ack) => {
                if ack.code != ConnectReturnCode::Success {
                    self.state = LinkState::Disconnected;
                    return Err(NichoirError::Connection(format!(
                        "{} refused the connection: {:?}",
                        self.address, ack.code
                    )));
                }
                info!(
                    broker = %self.address,
                    session_present = ack.session_present,
                    "Connected to broker"
                );
                self.ever_connected = true;
                self.backoff.reset();
                self.state = LinkState::Connected;
                self.subscribe_all().await;
            }
            Packet::SubAck(ack) => {
                let mut granted = 0;
                for code in &ack.return_codes {
                    match code {
                        SubscribeReasonCode::Success(qos) => {
                            debug!(pkid = ack.pkid, ?qos, "Subscription granted");
                            granted += 1;
                        }
                        SubscribeReasonCode::Failure => {
                            warn!(pkid = ack.pkid, "Subscription rejected by broker");
                        }
                    }
                }
                if granted > 0 && self.state == LinkState::Connected {
                    info!("Subscribed, waiting for messages");
                    self.state = LinkState::Subscribed;
                }
            }
            Packet::Publish(publish) => {
                self.received += 1;
                if self.state.accepts_messages() {
                    let outcome = router.dispatch(&publish.topic, &publish.payload);
                    trace!(topic = %publish.topic, ?outcome, "Message dispatched");
                } else {
                    debug!(
                        topic = %publish.topic,
                        state = ?self.state,
                        "Dropping message received before subscription"
                    );
                }
            }
            Packet::Disconnect => {
                warn!(broker = %self.address, "Disconnected by broker");
                self.state = LinkState::Disconnected;
            }
            Packet::PingReq | Packet::PingResp => {}
            other => trace!(?other, "Ignoring packet"),
        }
        Ok(())
    }

    /// Decide what to do after the event loop failed.
    ///
    /// Returns the delay before the next poll, or the fatal error.
    pub fn handle_error(&mut self, err: ConnectionError) -> Result<Duration, NichoirError> {
        self.state = LinkState::Disconnected;

        if !self.ever_connected {
            error!(broker = %self.address, error = %err, "Unable to connect to broker");
            return Err(NichoirError::Connection(format!(
                "failed to connect to {}: {}",
                self.address, err
            )));
        }

        if let ConnectionError::ConnectionRefused(code) = &err {
            error!(broker = %self.address, ?code, "Broker refused reconnection");
            return Err(NichoirError::Connection(format!(
                "{} refused the connection: {:?}",
                self.address, code
            )));
        }

        match self.backoff.next_sleep() {
            Ok(delay) => {
                warn!(
                    broker = %self.address,
                    error = %err,
                    attempt = self.backoff.attempt(),
                    "Connection lost, reconnecting in {:.2}s",
                    delay.as_secs_f64()
                );
                Ok(delay)
            }
            Err(e) => {
                error!(broker = %self.address, error = %err, "{}", e);
                Err(NichoirError::Connection(format!("{}: {}", e, err)))
            }
        }
    }

    async fn subscribe_all(&mut self) {
        for topic in &self.topics {
            match self.client.subscribe(topic.as_str(), self.qos).await {
                Ok(()) => debug!(topic = %topic, qos = ?self.qos, "Subscribe requested"),
                Err(e) => warn!(topic = %topic, error = %e, "Failed to request subscription"),
            }
        }
    }

    async fn disconnect(&mut self) {
        info!(broker = %self.address, "Disconnecting from broker");
        if let Err(e) = self.client.disconnect().await {
            warn!(error = %e, "Error sending disconnect packet");
        }
        self.state = LinkState::Disconnected;
    }
}
