use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use murmur_db::Database;
use murmur_types::events::{GatewayCommand, GatewayEvent};
use murmur_types::UserId;

use crate::bus::{CancelSubscription, EventBus, Subscription};
use crate::filter::EventFilter;
use crate::presence::PresenceTracker;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Shared context handed to every WebSocket connection.
#[derive(Clone)]
pub struct GatewayState {
    pub db: Arc<Database>,
    pub bus: EventBus,
    pub presence: PresenceTracker,
}

/// Cancel handles for every live subscription this connection owns, keyed by
/// subscription id. Drained synchronously at teardown so no event is ever
/// delivered to a torn-down connection.
type SubscriptionMap = Arc<Mutex<HashMap<u64, Box<dyn CancelSubscription>>>>;

/// Handle a pre-authenticated WebSocket connection. The JWT was already
/// validated at the HTTP upgrade layer, so we go straight to Ready and the
/// event loop.
pub async fn handle_connection(
    socket: WebSocket,
    state: GatewayState,
    user_id: UserId,
    username: String,
) {
    let (mut sender, mut receiver) = socket.split();
    let conn_id = Uuid::new_v4();

    info!("{} ({}) connected to gateway", username, user_id);

    let ready = GatewayEvent::Ready {
        user_id,
        username: username.clone(),
    };
    if sender
        .send(Message::Text(serde_json::to_string(&ready).unwrap().into()))
        .await
        .is_err()
    {
        return;
    }

    // Storage write commits before the presence transition is published.
    if !set_online(&state, user_id, conn_id, true).await {
        return;
    }

    // Outbound queue: subscription forwarders and command acks both feed it.
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<GatewayEvent>();

    let subscriptions: SubscriptionMap = Arc::new(Mutex::new(HashMap::new()));

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward queued events -> client, with heartbeat.
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = out_rx.recv() => {
                    let event = match result {
                        Some(event) => event,
                        None => break,
                    };
                    let text = serde_json::to_string(&event).unwrap();
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client.
    let state_recv = state.clone();
    let username_recv = username.clone();
    let out_tx_recv = out_tx.clone();
    let subscriptions_recv = subscriptions.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(
                            &state_recv,
                            user_id,
                            &username_recv,
                            cmd,
                            &subscriptions_recv,
                            &out_tx_recv,
                        );
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            username_recv,
                            user_id,
                            e,
                            excerpt(&text)
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    // Unsubscribe everything before presence goes down; forwarder tasks end
    // on their own once their registry entries are gone.
    let handles: Vec<Box<dyn CancelSubscription>> = {
        let mut map = subscriptions.lock().expect("subscription map poisoned");
        map.drain().map(|(_, h)| h).collect()
    };
    for handle in handles {
        handle.cancel();
    }

    set_online(&state, user_id, conn_id, false).await;
    info!("{} ({}) disconnected from gateway", username, user_id);
}

/// Persist the online flag, then publish the transition if there was an
/// edge. Returns false if the storage write failed (nothing is published).
async fn set_online(state: &GatewayState, user_id: UserId, conn_id: Uuid, online: bool) -> bool {
    let db = state.db.clone();
    match tokio::task::spawn_blocking(move || db.set_user_online(user_id, online)).await {
        Ok(Ok(())) => {
            let transition = if online {
                state.presence.mark_online(user_id, conn_id)
            } else {
                state.presence.mark_offline(user_id, conn_id)
            };
            if let Some(event) = transition {
                state.bus.publish_presence_changed(event);
            }
            true
        }
        Ok(Err(e)) => {
            warn!("Failed to persist online={} for {}: {}", online, user_id, e);
            false
        }
        Err(e) => {
            warn!("spawn_blocking join error: {}", e);
            false
        }
    }
}

fn handle_command(
    state: &GatewayState,
    user_id: UserId,
    username: &str,
    cmd: GatewayCommand,
    subscriptions: &SubscriptionMap,
    out_tx: &mpsc::UnboundedSender<GatewayEvent>,
) {
    match cmd {
        GatewayCommand::SubscribeMessages { user_id: counterpart_id } => {
            let sub = state.bus.subscribe_messages(Some(user_id), counterpart_id);
            info!(
                "{} ({}) subscribed to messages with {} (sub {})",
                username,
                user_id,
                counterpart_id,
                sub.id()
            );
            register(sub, subscriptions, out_tx, GatewayEvent::MessageCreated);
        }

        GatewayCommand::SubscribeNotifications => {
            let sub = state.bus.subscribe_notifications(Some(user_id));
            info!(
                "{} ({}) subscribed to notifications (sub {})",
                username,
                user_id,
                sub.id()
            );
            register(sub, subscriptions, out_tx, GatewayEvent::NotificationChanged);
        }

        GatewayCommand::SubscribePresence { user_id: watched_user_id } => {
            let sub = state.bus.subscribe_presence(watched_user_id);
            info!(
                "{} ({}) subscribed to presence of {} (sub {})",
                username,
                user_id,
                watched_user_id,
                sub.id()
            );
            register(sub, subscriptions, out_tx, GatewayEvent::PresenceChanged);
        }

        GatewayCommand::Unsubscribe { subscription_id } => {
            let handle = subscriptions
                .lock()
                .expect("subscription map poisoned")
                .remove(&subscription_id);
            match handle {
                Some(handle) => handle.cancel(),
                // Idempotent: unsubscribing an unknown id is a no-op.
                None => {}
            }
        }
    }
}

/// First 200 characters of an unparseable frame for logging. Cut on a char
/// boundary, never a byte offset, so multibyte input cannot panic.
fn excerpt(text: &str) -> &str {
    match text.char_indices().nth(200) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Store the cancel handle, spawn a forwarder pumping bus events into the
/// outbound queue, and acknowledge the subscription.
fn register<F, M>(
    mut sub: Subscription<F>,
    subscriptions: &SubscriptionMap,
    out_tx: &mpsc::UnboundedSender<GatewayEvent>,
    wrap: M,
) where
    F: EventFilter,
    M: Fn(F::Event) -> GatewayEvent + Send + 'static,
{
    let subscription_id = sub.id();
    subscriptions
        .lock()
        .expect("subscription map poisoned")
        .insert(subscription_id, Box::new(sub.cancel_handle()));

    let tx = out_tx.clone();
    tokio::spawn(async move {
        while let Some(event) = sub.recv().await {
            if tx.send(wrap(event)).is_err() {
                break;
            }
        }
    });

    let _ = out_tx.send(GatewayEvent::Subscribed { subscription_id });
}
