//! Client Endpoint (C6, spec §4.5): per-connection inbound/outbound tasks
//! sharing one WebSocket, split the way `valence_network`'s `PacketIo`
//! splits a `TcpStream` into a reader task and a writer task talking over a
//! channel (`crates_ref: valence_network::packet_io`). Either task ending
//! unregisters the connection; the partner observes the closed channel/
//! socket and exits on its own (§4.5 Cancellation).

use std::net::SocketAddr;
use std::time::Instant;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};
use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::facade::SyncFacade;
use crate::ids::{ClientId, SessionId};
use crate::wire::{client_tags, server_tags, Frame};

pub async fn accept_loop(engine: Engine, listen_addr: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    info!(%listen_addr, "worldsync listening");
    loop {
        let (stream, remote_addr) = listener.accept().await?;
        let engine = engine.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(engine, stream, remote_addr).await {
                warn!(%remote_addr, error = %e, "connection ended with error");
            }
        });
    }
}

async fn handle_connection(
    engine: Engine,
    stream: TcpStream,
    remote_addr: SocketAddr,
) -> anyhow::Result<()> {
    stream.set_nodelay(true).ok();
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let client_id = ClientId::generate();
    let (outbound_tx, outbound_rx) =
        flume::bounded::<bytes::Bytes>(engine.config.websocket_client_outbound_queue_size);
    engine.hub.register(client_id.clone(), outbound_tx);
    debug!(%client_id, %remote_addr, "connection registered");

    let mut session_id: Option<SessionId> = None;
    let max_size = engine.config.websocket_max_message_size;
    let pong_timeout = engine.config.websocket_pong_timeout();
    let mut deadline = Instant::now() + pong_timeout;

    let outbound_engine = engine.clone();
    let writer = tokio::spawn(async move {
        run_outbound(outbound_engine, outbound_rx, ws_tx).await;
    });

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let next = tokio::time::timeout(remaining, ws_rx.next()).await;
        let message = match next {
            Ok(Some(Ok(message))) => message,
            Ok(Some(Err(e))) => {
                debug!(%client_id, error = %e, "read error, closing connection");
                break;
            }
            Ok(None) => break, // stream closed
            Err(_) => {
                debug!(%client_id, "read deadline exceeded, closing connection");
                break;
            }
        };

        match message {
            Message::Pong(_) => {
                deadline = Instant::now() + pong_timeout;
            }
            Message::Close(_) => break,
            Message::Text(text) => {
                // One byte over `max_message_size` is rejected without
                // refreshing the deadline (§8 boundary behavior); exactly at
                // the limit is accepted.
                if text.len() > max_size {
                    warn!(%client_id, len = text.len(), max_size, "frame exceeds max_message_size, ignoring");
                    continue;
                }
                deadline = Instant::now() + pong_timeout;
                handle_text_frame(&engine, &client_id, &mut session_id, &text).await;
            }
            Message::Binary(bytes) => {
                deadline = Instant::now() + pong_timeout;
                match std::str::from_utf8(&bytes) {
                    Ok(text) => handle_text_frame(&engine, &client_id, &mut session_id, text).await,
                    Err(_) => {
                        // Undecodable: opaque relay for forward compatibility (§4.9).
                        engine.broadcast.broadcast_all(Frame::new(
                            "opaque_binary",
                            serde_json::json!({"len": bytes.len()}),
                        ));
                    }
                }
            }
            Message::Ping(_) | Message::Frame(_) => {}
        }
    }

    engine.hub.unregister(client_id.clone());
    if let Some(session_id) = &session_id {
        if let Some(world_key) = engine
            .store
            .get_session(session_id)
            .ok()
            .map(|s| crate::world::WorldRegistry::world_key(s.world_id.as_deref(), &s.id))
        {
            engine.world.leave(&world_key, &client_id, crate::ids::now_millis());
        }
    }
    writer.abort();
    info!(%client_id, "connection unregistered");
    Ok(())
}

async fn handle_text_frame(
    engine: &Engine,
    client_id: &ClientId,
    session_id: &mut Option<SessionId>,
    text: &str,
) {
    let frame = match Frame::decode(text) {
        Ok(frame) => frame,
        Err(_) => {
            // Decode failure: forward as a global broadcast, no disconnect (§4.9).
            engine.broadcast.broadcast_all(Frame::new(
                "opaque_text",
                serde_json::json!({"raw": text}),
            ));
            return;
        }
    };

    match frame.kind.as_str() {
        client_tags::VERSION_CHECK => {
            let client_version = frame
                .data
                .as_ref()
                .and_then(|d| d.get("version"))
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            if client_version != engine.config.sync_protocol_tag {
                engine.hub.deliver_now(
                    &Frame::new(
                        server_tags::VERSION_MISMATCH,
                        serde_json::json!({"expected": engine.config.sync_protocol_tag}),
                    ),
                    &crate::hub::Targets::Clients(vec![client_id.clone()]),
                );
            }
        }
        client_tags::CLIENT_INFO => {
            let info: crate::model::ClientInfo = frame
                .data
                .clone()
                .and_then(|d| serde_json::from_value(d).ok())
                .unwrap_or_default();
            engine.hub.update_client_info(client_id, info);
            debug!(%client_id, "client_info updated");
        }
        client_tags::PING => {
            let ping_id = frame.data.as_ref().and_then(|d| d.get("ping_id")).cloned();
            engine.hub.deliver_now(
                &Frame::new(
                    server_tags::PONG,
                    serde_json::json!({"ping_id": ping_id, "timestamp": crate::ids::now_millis()}),
                ),
                &crate::hub::Targets::Clients(vec![client_id.clone()]),
            );
        }
        client_tags::SESSION_ASSOCIATE => {
            if let Some(id) = frame
                .data
                .as_ref()
                .and_then(|d| d.get("session_id"))
                .and_then(|v| v.as_str())
            {
                let resolved = SessionId(id.to_owned());
                *session_id = Some(resolved.clone());
                // Unknown session: association recorded, world join skipped,
                // no error surfaced (§4.9).
                if engine.store.get_session(&resolved).is_ok() {
                    engine
                        .synchronize_new_client(client_id.clone(), resolved)
                        .await;
                } else {
                    warn!(%client_id, session_id = %resolved, "session_associate: unknown session");
                }
            }
        }
        client_tags::AVATAR_ASSET_REQUEST => {
            let name = frame
                .data
                .as_ref()
                .and_then(|d| d.get("name"))
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_owned();
            match crate::asset::read_avatar_asset_base64(&engine.config.avatars_dir, &name).await {
                Ok(encoded) => {
                    engine.hub.deliver_now(
                        &Frame::new(
                            server_tags::AVATAR_ASSET_RESPONSE,
                            serde_json::json!({"name": name, "data_base64": encoded}),
                        ),
                        &crate::hub::Targets::Clients(vec![client_id.clone()]),
                    );
                }
                Err(e) => {
                    engine.hub.deliver_now(
                        &Frame::new(
                            server_tags::AVATAR_ASSET_ERROR,
                            serde_json::json!({"name": name, "error": e.to_string()}),
                        ),
                        &crate::hub::Targets::Clients(vec![client_id.clone()]),
                    );
                }
            }
        }
        client_tags::INTERACTION => {
            engine.hub.touch_last_seen(client_id);
            // Broadcast globally (DESIGN NOTES §9 flags this as likely
            // wrong for multi-tenant deployments; the source does it and
            // the spec preserves that).
            engine.broadcast.broadcast_all(frame);
        }
        _ => {
            engine.broadcast.broadcast_all(frame);
        }
    }
}

async fn run_outbound(
    engine: Engine,
    outbound_rx: flume::Receiver<bytes::Bytes>,
    mut ws_tx: futures_util::stream::SplitSink<
        tokio_tungstenite::WebSocketStream<TcpStream>,
        Message,
    >,
) {
    let ping_period = engine.config.websocket_ping_period();
    let write_timeout = engine.config.websocket_write_timeout();
    let mut ping_ticker = tokio::time::interval(ping_period);
    ping_ticker.tick().await; // first tick fires immediately

    loop {
        tokio::select! {
            bytes = outbound_rx.recv_async() => {
                // The hub already encoded this frame once for the whole
                // broadcast (§4.7); this task only ever forwards the bytes.
                let Ok(bytes) = bytes else { break };
                let Ok(text) = Utf8Bytes::try_from(bytes) else { continue };
                if tokio::time::timeout(write_timeout, ws_tx.send(Message::Text(text))).await.is_err() {
                    debug!("write deadline exceeded, closing connection");
                    break;
                }
            }
            _ = ping_ticker.tick() => {
                if tokio::time::timeout(write_timeout, ws_tx.send(Message::Ping(bytes::Bytes::new()))).await.is_err() {
                    break;
                }
            }
        }
    }
    let _ = ws_tx.close().await;
}
