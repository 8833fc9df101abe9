use std::{future::Future, net::SocketAddr};

use axum::{
    body::Bytes,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use ledger_core::{ChainStore, Snapshot};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::{message::Message, node::Node};

#[derive(Serialize)]
struct Health {
    status: &'static str,
}

#[derive(Serialize)]
pub struct Head {
    pub height: u64,
    pub hash: String,
    pub pending: usize,
}

/// `POST /message` accepts gossip from peers and always answers 202;
/// rejections stay local.
pub fn router<S: ChainStore + 'static>(node: Node<S>) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(Health { status: "ok" }) }))
        .route(
            "/message",
            post({
                let node = node.clone();
                move |body: Bytes| {
                    let node = node.clone();
                    async move {
                        let message: Message = match serde_json::from_slice(&body) {
                            Ok(message) => message,
                            Err(e) => {
                                debug!(error = %e, "ignored malformed envelope");
                                return StatusCode::ACCEPTED;
                            }
                        };
                        let kind = message.kind;
                        let handled = tokio::task::spawn_blocking(move || {
                            node.handle_incoming_message(message.kind, &message.contents)
                        })
                        .await;
                        match handled {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => debug!(%kind, error = %e, "ignored message"),
                            Err(e) => warn!(%kind, error = %e, "message handler panicked"),
                        }
                        StatusCode::ACCEPTED
                    }
                }
            }),
        )
        .route(
            "/chain/head",
            get({
                let node = node.clone();
                move || {
                    let node = node.clone();
                    async move {
                        let status = node.status();
                        Json(Head {
                            height: status.height,
                            hash: hex::encode(status.tip_hash),
                            pending: status.pending,
                        })
                    }
                }
            }),
        )
        .route(
            "/balances",
            get({
                let node = node.clone();
                move || {
                    let node = node.clone();
                    async move { Json::<Snapshot>(node.status().balances) }
                }
            }),
        )
        .layer(TraceLayer::new_for_http())
}

pub async fn serve<S, F>(node: Node<S>, addr: SocketAddr, shutdown: F) -> anyhow::Result<()>
where
    S: ChainStore + 'static,
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(node = %node.id(), "listening on http://{addr}");
    axum::serve(listener, router(node))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
