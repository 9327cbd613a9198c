use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
};
use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::api::http_routes::AppState;
use crate::domain::gateways::StatusUpdate;
use crate::domain::types::PaymentId;

/// WebSocket de estado: un mensaje JSON por transición.
///
/// Al conectar se emite el estado actual (los suscriptores que se
/// reconectan no ven los eventos perdidos, ven el presente); después se
/// reenvía cada transición del bus hasta que el pago alcanza un estado
/// terminal o el cliente corta.
pub async fn payment_status_ws(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    upgrade: WebSocketUpgrade,
) -> Response {
    upgrade.on_upgrade(move |socket| stream_status(state, PaymentId(id), socket))
}

async fn stream_status(state: Arc<AppState>, payment_id: PaymentId, mut socket: WebSocket) {
    let Ok(payment) = state.get_payment_use_case.execute_public(payment_id).await else {
        let _ = socket
            .send(Message::Text(
                r#"{"error":{"code":"NOT_FOUND","message":"Unknown payment"}}"#.into(),
            ))
            .await;
        return;
    };

    let current = StatusUpdate {
        payment_id,
        status: payment.status,
        tx_hash: payment.tx_hash.clone(),
        timestamp: Utc::now(),
    };
    if send_update(&mut socket, &current).await.is_err() {
        return;
    }
    if payment.status.is_terminal() {
        return;
    }

    let mut updates = match state.fanout.subscribe(payment_id).await {
        Ok(updates) => updates,
        Err(e) => {
            warn!("Status subscription failed for {}: {}", payment_id, e);
            return;
        }
    };

    loop {
        tokio::select! {
            update = updates.recv() => {
                let Some(update) = update else { break };
                let terminal = update.status.is_terminal();
                if send_update(&mut socket, &update).await.is_err() {
                    break;
                }
                if terminal {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    // Solo atendemos cierres; el canal es de salida
                    None | Some(Ok(Message::Close(_))) => {
                        debug!("WS client for {} disconnected", payment_id);
                        break;
                    }
                    Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

async fn send_update(socket: &mut WebSocket, update: &StatusUpdate) -> Result<(), ()> {
    let Ok(payload) = serde_json::to_string(update) else {
        return Err(());
    };
    socket
        .send(Message::Text(payload.into()))
        .await
        .map_err(|_| ())
}
