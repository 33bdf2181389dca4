//! Observer WebSocket
//!
//! `GET /ws/:game?participant=` sends the round snapshot first, then every bus
//! event in order. Inbound text frames are commands (`{"type": "place", ...}`)
//! and are answered on the same socket. An observer that falls behind the bus
//! gets a fresh snapshot instead of a gap.

use super::{
    errors::ApiError,
    handlers::{parse_game, AppState},
    middleware::RequestId,
    models::{ObserverQuery, SocketReply},
};
use crate::games::{ActionGateway, BusMessage, Command, Delivery, GameKind, RoundEvent, Subscription};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::Response,
    Extension,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// GET /ws/:game
pub async fn observer_handler(
    ws: WebSocketUpgrade,
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(game): Path<String>,
    Query(query): Query<ObserverQuery>,
) -> Result<Response, ApiError> {
    let game = parse_game(&request_id, &game)?;
    let gateway = state.gateway(game).clone();
    let participant = query.participant.filter(|p| !p.trim().is_empty());

    Ok(ws.on_upgrade(move |socket| async move {
        Observer::new(gateway, participant).serve(socket).await
    }))
}

struct Observer {
    id: String,
    gateway: Arc<ActionGateway>,
    participant: Option<String>,
}

impl Observer {
    fn new(gateway: Arc<ActionGateway>, participant: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            gateway,
            participant,
        }
    }

    fn game(&self) -> GameKind {
        self.gateway.game()
    }

    async fn serve(self, socket: WebSocket) {
        let game = self.game();
        let metrics = self.gateway.engine().metrics().clone();
        metrics.observer_joined(game);
        info!(%game, observer = %self.id, participant = ?self.participant, "Observer connected");

        let (mut sender, mut receiver) = socket.split();
        let mut subscription = self.gateway.engine().subscribe().await;

        if self.send_snapshot(&mut sender, &subscription).await {
            loop {
                tokio::select! {
                    delivery = subscription.next() => match delivery {
                        Delivery::Event(message) => {
                            if !send_json(&mut sender, message.as_ref()).await {
                                break;
                            }
                        }
                        Delivery::Lagged(missed) => {
                            warn!(%game, observer = %self.id, missed, "Observer lagged, resending snapshot");
                            subscription = self.gateway.engine().subscribe().await;
                            if !self.send_snapshot(&mut sender, &subscription).await {
                                break;
                            }
                        }
                        Delivery::Closed => break,
                    },
                    inbound = receiver.next() => match inbound {
                        Some(Ok(Message::Text(text))) => {
                            let reply = self.handle_command(&text).await;
                            if !send_json(&mut sender, &reply).await {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            debug!(%game, observer = %self.id, error = %e, "Observer socket error");
                            break;
                        }
                    },
                }
            }
        }

        metrics.observer_left(game);
        info!(%game, observer = %self.id, "Observer disconnected");
    }

    async fn send_snapshot(
        &self,
        sender: &mut SplitSink<WebSocket, Message>,
        subscription: &Subscription,
    ) -> bool {
        let message = BusMessage {
            game: self.game(),
            seq: subscription.snapshot.seq,
            event: RoundEvent::Snapshot {
                snapshot: subscription.snapshot.clone(),
            },
        };
        send_json(sender, &message).await
    }

    async fn handle_command(&self, text: &str) -> SocketReply {
        let command: Command = match serde_json::from_str(text) {
            Ok(command) => command,
            Err(e) => {
                return SocketReply::Error {
                    message: format!("Unreadable command: {}", e),
                }
            }
        };
        let Some(participant) = self.participant.as_deref() else {
            return SocketReply::Error {
                message: "Connect with ?participant= to send commands".to_string(),
            };
        };

        SocketReply::CommandResult {
            command: command.name(),
            result: self.gateway.execute(participant, command).await,
        }
    }
}

/// False once the socket is gone
async fn send_json<T: Serialize>(sender: &mut SplitSink<WebSocket, Message>, value: &T) -> bool {
    let text = match serde_json::to_string(value) {
        Ok(text) => text,
        Err(e) => {
            warn!(error = %e, "Failed to serialize observer frame");
            return true;
        }
    };
    sender.send(Message::Text(text)).await.is_ok()
}
