use std::{
    collections::HashMap,
    sync::{
        mpsc::{self, Receiver, Sender},
        Mutex, PoisonError,
    },
};

use anyhow::{anyhow, Result};
use tokio::runtime::Handle;
use tracing::debug;

use crate::message::{Message, MessageKind};

/// Outbound transport. The node calls `send` once per peer and does not
/// care how, or whether, the message arrives.
pub trait Messenger: Send + Sync {
    fn send(&self, kind: MessageKind, contents: &str, peer: &str) -> Result<()>;
}

/// POSTs each message to `<peer>/message` on the tokio runtime without
/// waiting for the response.
pub struct HttpMessenger {
    client: reqwest::Client,
    runtime: Handle,
}

impl HttpMessenger {
    pub fn new(runtime: Handle) -> Self {
        Self {
            client: reqwest::Client::new(),
            runtime,
        }
    }
}

impl Messenger for HttpMessenger {
    fn send(&self, kind: MessageKind, contents: &str, peer: &str) -> Result<()> {
        let url = format!("{}/message", peer.trim_end_matches('/'));
        let body = Message::new(kind, contents);
        let client = self.client.clone();
        self.runtime.spawn(async move {
            match client.post(&url).json(&body).send().await {
                Ok(resp) if !resp.status().is_success() => {
                    debug!(%url, status = %resp.status(), "peer refused {}", body.kind)
                }
                Ok(_) => {}
                Err(e) => debug!(%url, error = %e, "peer unreachable"),
            }
        });
        Ok(())
    }
}

/// In-process network: one channel per registered node id.
#[derive(Default)]
pub struct LocalNetwork {
    routes: Mutex<HashMap<String, Sender<Message>>>,
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id` and return its inbox. Registering again replaces the
    /// previous inbox.
    pub fn register(&self, id: &str) -> Receiver<Message> {
        let (tx, rx) = mpsc::channel();
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string(), tx);
        rx
    }

    pub fn disconnect(&self, id: &str) {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }

    /// Drop every route so inbox listeners run dry and exit.
    pub fn shutdown(&self) {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn deliver(&self, peer: &str, message: Message) -> Result<()> {
        let routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        let route = routes
            .get(peer)
            .ok_or_else(|| anyhow!("no route to {peer}"))?;
        route
            .send(message)
            .map_err(|_| anyhow!("inbox of {peer} is closed"))
    }
}

impl Messenger for LocalNetwork {
    fn send(&self, kind: MessageKind, contents: &str, peer: &str) -> Result<()> {
        self.deliver(peer, Message::new(kind, contents))
    }
}
