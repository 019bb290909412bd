//! `nichoir publish`: push test telemetry and images through the broker.
//!
//! Each round publishes the telemetry reading (if any) before the image (if
//! any), so an ingest service on the other side files the image with that
//! reading attached.

use std::time::Duration;

use rumqttc::{ConnectReturnCode, Event, EventLoop, Outgoing, Packet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use nichoir_core::config::NichoirConfig;
use nichoir_core::error::NichoirError;
use nichoir_ingest::client::{generate_client_id, ClientBuilder};

use crate::cli::PublishArgs;

/// Topic and payload pairs for one round, in publish order.
pub fn build_messages(
    args: &PublishArgs,
    config: &NichoirConfig,
) -> Result<Vec<(String, Vec<u8>)>, NichoirError> {
    let mut messages = Vec::with_capacity(2);

    if let Some(value) = args.telemetry {
        messages.push((
            config.broker.telemetry_topic.clone(),
            value.to_string().into_bytes(),
        ));
    }

    if let Some(ref path) = args.image {
        let bytes = std::fs::read(path).map_err(|e| {
            NichoirError::Config(format!("Cannot read image {}: {}", path.display(), e))
        })?;
        if bytes.len() > config.broker.max_packet_size {
            return Err(NichoirError::Config(format!(
                "Image {} is {} bytes, above broker.max_packet_size ({})",
                path.display(),
                bytes.len(),
                config.broker.max_packet_size
            )));
        }
        messages.push((config.broker.image_topic.clone(), bytes));
    }

    Ok(messages)
}

/// Connect, publish `args.repeat` rounds, and disconnect.
///
/// Returns the number of messages written to the broker.
pub async fn run(
    args: &PublishArgs,
    config: &NichoirConfig,
    cancel: CancellationToken,
) -> Result<u64, NichoirError> {
    let messages = build_messages(args, config)?;
    let builder = ClientBuilder::with_client_id(&config.broker, generate_client_id("nichoir-pub"))?;
    let qos = builder.qos();
    let (client, mut eventloop) = builder.build();

    info!(
        broker = %format!("{}:{}", config.broker.host, config.broker.port),
        rounds = args.repeat,
        "Publishing test messages"
    );

    let mut sent = 0u64;
    for round in 1..=args.repeat {
        for (topic, payload) in &messages {
            client
                .publish(topic.as_str(), qos, false, payload.clone())
                .await
                .map_err(|e| NichoirError::Connection(format!("Failed to queue publish: {}", e)))?;
        }

        let target = sent + messages.len() as u64;
        tokio::select! {
            _ = cancel.cancelled() => break,
            result = drive_until_sent(&mut eventloop, &mut sent, target) => result?,
        }
        info!(round, sent, "Round published");

        if round < args.repeat {
            let pause = tokio::time::sleep(Duration::from_secs(args.interval_secs));
            tokio::pin!(pause);
            // Keep polling so keep-alives flow while waiting.
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = &mut pause => break,
                    polled = eventloop.poll() => {
                        polled.map_err(|e| NichoirError::Connection(e.to_string()))?;
                    }
                }
            }
            if cancel.is_cancelled() {
                break;
            }
        }
    }

    if let Err(e) = client.disconnect().await {
        debug!(error = %e, "Disconnect request not queued");
    } else {
        // Flush the disconnect packet; the broker closing the socket ends the loop.
        while let Ok(event) = eventloop.poll().await {
            if matches!(event, Event::Outgoing(Outgoing::Disconnect)) {
                break;
            }
        }
    }

    Ok(sent)
}

/// Poll the event loop until `sent` reaches `target` outgoing publishes.
async fn drive_until_sent(
    eventloop: &mut EventLoop,
    sent: &mut u64,
    target: u64,
) -> Result<(), NichoirError> {
    while *sent < target {
        let event = eventloop
            .poll()
            .await
            .map_err(|e| NichoirError::Connection(e.to_string()))?;
        match event {
            Event::Incoming(Packet::ConnAck(ack)) if ack.code != ConnectReturnCode::Success => {
                return Err(NichoirError::Connection(format!(
                    "broker refused the connection: {:?}",
                    ack.code
                )));
            }
            Event::Outgoing(Outgoing::Publish(pkid)) => {
                *sent += 1;
                debug!(pkid, "Publish written");
            }
            _ => {}
        }
    }
    Ok(())
}
