use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    Json,
};
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::{select, sync::mpsc};

use crate::{
    domain::Bridge,
    startup::{AppState, WalletInfo},
};

pub async fn wallet_info(State(state): State<Arc<AppState>>) -> Json<WalletInfo> {
    Json(state.wallet.clone())
}

/// One websocket per embedded surface
pub async fn bridge_socket(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_page(socket, state))
}

async fn serve_page(socket: WebSocket, state: Arc<AppState>) {
    let (mut outbound, mut inbound) = socket.split();
    let (page_tx, mut page_rx) = mpsc::unbounded_channel::<String>();

    let bridge = Bridge::new(
        state.bridge_config.clone(),
        state.dispatcher.clone(),
        Arc::new(page_tx),
        &state.background_tasks,
        &state.cancel_token,
    );
    info!("Page attached to bridge");

    // Ends once every handle to the session is gone
    state.background_tasks.spawn(async move {
        while let Some(message) = page_rx.recv().await {
            if let Err(e) = outbound.send(Message::Text(message.into())).await {
                debug!("Page socket closed while sending: {}", e);
                break;
            }
        }
    });

    loop {
        select! {
            frame = inbound.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Err(e) = bridge.on_message(text.as_str()).await {
                        warn!("Dropping page connection: {}", e);
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("Page socket error: {}", e);
                    break;
                }
            },
            _ = state.cancel_token.cancelled() => break,
        }
    }

    bridge.shutdown();
    info!("Page detached from bridge");
}
