// ==============================================================================
// events.rs - Completion Event Subscriber
// ==============================================================================
// Description: Relays worker completion events from Redis pub/sub to live sockets
// Author: Sales Platform Team
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 1.0.0
// ==============================================================================

use std::sync::Arc;
use std::time::Duration;

use redis::Client as RedisClient;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use sales_processor::notifier::{CompletionMessage, CompletionNotifier, COMPLETIONS_CHANNEL};

const READ_TIMEOUT: Duration = Duration::from_secs(1);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Deliver one published payload to the in-process notifier.
/// Returns whether a live connection received it.
pub fn dispatch(notifier: &CompletionNotifier, payload: &str) -> bool {
    let message: CompletionMessage = match serde_json::from_str(payload) {
        Ok(message) => message,
        Err(e) => {
            warn!("Ignoring malformed completion message: {}", e);
            return false;
        }
    };

    let delivered = notifier.push(&message.user_id, &message.event);
    if delivered {
        info!(
            "Delivered completion of {} to user {}",
            message.event.result_name, message.user_id
        );
    } else {
        debug!("User {} not connected, completion event dropped", message.user_id);
    }
    delivered
}

/// Subscribe to the completion channel until `shutdown` flips to true.
///
/// The redis pub/sub API is blocking, so the subscription lives on a blocking
/// thread; a short read timeout lets it notice shutdown.
pub fn spawn_subscriber(
    client: RedisClient,
    notifier: Arc<CompletionNotifier>,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        while !*shutdown.borrow() {
            if let Err(e) = subscribe(&client, &notifier, &shutdown) {
                error!("Completion subscriber error: {}", e);
                std::thread::sleep(RECONNECT_DELAY);
            }
        }
        info!("Completion subscriber stopped");
    })
}

fn subscribe(
    client: &RedisClient,
    notifier: &CompletionNotifier,
    shutdown: &watch::Receiver<bool>,
) -> redis::RedisResult<()> {
    let mut conn = client.get_connection()?;
    let mut pubsub = conn.as_pubsub();
    pubsub.set_read_timeout(Some(READ_TIMEOUT))?;
    pubsub.subscribe(COMPLETIONS_CHANNEL)?;
    info!("Subscribed to {}", COMPLETIONS_CHANNEL);

    while !*shutdown.borrow() {
        match pubsub.get_message() {
            Ok(msg) => match msg.get_payload::<String>() {
                Ok(payload) => {
                    dispatch(notifier, &payload);
                }
                Err(e) => warn!("Unreadable completion payload: {}", e),
            },
            Err(e) if e.is_timeout() => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
