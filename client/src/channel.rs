//! One socket per remote endpoint, shared by observers.
//!
//! Channels are interned process-wide by `host@callsign`; concurrent
//! construction resolves to the same instance, and the last handle dropping
//! removes the entry and closes the socket. Inbound messages are offered to
//! the registered observers in order until one claims them, which is what
//! lets several links with different local callsigns co-tenant one socket.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use framewire_codec::header::Protocols;
use framewire_codec::Url;
use framewire_types::Message;

use crate::error::CallError;
use crate::wslink::{SocketState, WebSocketLink, WsHandler};

/// The default remote endpoint (`host:port`), taken from the environment.
pub fn default_endpoint() -> Option<String> {
    std::env::var("THUNDER_ACCESS").ok().filter(|value| !value.is_empty())
}

/// A party interested in one channel's traffic.
pub trait Observer: Send + Sync {
    /// Offered every inbound message; true claims it, false passes it to
    /// the next observer in registration order.
    fn inbound(&self, message: &Message) -> bool;
    /// The channel reached websocket state.
    fn opened(&self);
    /// The channel went down; outstanding work must be aborted.
    fn closed(&self);
}

lazy_static::lazy_static! {
    static ref CHANNELS: Mutex<HashMap<String, Weak<Channel>>> = Mutex::new(HashMap::new());
}

pub struct Channel {
    key: String,
    url: Url,
    sequence: AtomicU32,
    observers: Mutex<Vec<Weak<dyn Observer>>>,
    link: Mutex<Option<WebSocketLink>>,
    // Serializes concurrent open() calls so only one socket is dialed.
    opening: tokio::sync::Mutex<()>,
    state_tx: tokio::sync::watch::Sender<SocketState>,
    state_rx: tokio::sync::watch::Receiver<SocketState>,
}

impl Channel {
    /// The shared channel to `endpoint` (`host:port`) for `callsign`.
    pub fn instance(endpoint: &str, callsign: &str) -> Result<Arc<Channel>, CallError> {
        let key = format!("{}@{}", endpoint, callsign);

        let mut channels = CHANNELS.lock().expect("channel registry lock poisoned; qed");
        if let Some(existing) = channels.get(&key).and_then(Weak::upgrade) {
            return Ok(existing);
        }

        let url = Url::parse(&format!("ws://{}/jsonrpc/{}", endpoint, callsign))
            .map_err(|_| CallError::Unavailable)?;
        let (state_tx, state_rx) = tokio::sync::watch::channel(SocketState::WebService);
        let channel = Arc::new(Channel {
            key: key.clone(),
            url,
            sequence: AtomicU32::new(0),
            observers: Mutex::new(Vec::new()),
            link: Mutex::new(None),
            opening: tokio::sync::Mutex::new(()),
            state_tx,
            state_rx,
        });
        channels.insert(key, Arc::downgrade(&channel));
        Ok(channel)
    }

    /// Allocates the next call id. Ids wrap; they only have to be unique
    /// among outstanding calls.
    pub fn sequence(&self) -> u32 {
        self.sequence.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    pub fn register(&self, observer: Weak<dyn Observer>) {
        let opened = self.is_open();
        if let Some(strong) = observer.upgrade() {
            self.observers
                .lock()
                .expect("observer lock poisoned; qed")
                .push(observer);
            if opened {
                strong.opened();
            }
        }
    }

    pub fn unregister(&self, observer: &Weak<dyn Observer>) {
        self.observers
            .lock()
            .expect("observer lock poisoned; qed")
            .retain(|candidate| !candidate.ptr_eq(observer) && candidate.upgrade().is_some());
    }

    pub fn is_open(&self) -> bool {
        self.link
            .lock()
            .expect("link lock poisoned; qed")
            .as_ref()
            .map_or(false, WebSocketLink::is_open)
    }

    pub fn is_suspended(&self) -> bool {
        self.link
            .lock()
            .expect("link lock poisoned; qed")
            .as_ref()
            .map_or(false, WebSocketLink::is_suspended)
    }

    /// Opens the socket (when necessary) and waits up to `wait` for the
    /// websocket upgrade to complete.
    pub async fn open(self: &Arc<Self>, wait: Duration) -> Result<(), CallError> {
        let _turn = self.opening.lock().await;
        let connect = {
            let slot = self.link.lock().expect("link lock poisoned; qed");
            match slot.as_ref() {
                Some(link) if link.state() != SocketState::Closed => false,
                _ => true,
            }
        };

        if connect {
            let _ = self.state_tx.send(SocketState::WebService);
            let bridge = Bridge {
                channel: Arc::downgrade(self),
            };
            let link = WebSocketLink::connect(&self.url, Some(Protocols::single("json")), bridge, 64)
                .await
                .map_err(|_| CallError::Unavailable)?;
            *self.link.lock().expect("link lock poisoned; qed") = Some(link);
        }

        let mut state_rx = self.state_rx.clone();
        let upgraded = tokio::time::timeout(wait, async move {
            loop {
                match *state_rx.borrow_and_update() {
                    SocketState::WebSocket => return true,
                    SocketState::Closed => return false,
                    _ => {}
                }
                if state_rx.changed().await.is_err() {
                    return false;
                }
            }
        })
        .await;

        match upgraded {
            Ok(true) => Ok(()),
            _ => Err(CallError::Unavailable),
        }
    }

    /// Suspends the channel and closes the socket, bounded by `wait`.
    pub fn close(&self, wait: Duration) {
        if let Some(link) = self.link.lock().expect("link lock poisoned; qed").as_ref() {
            link.close(wait);
        }
    }

    /// Queues one outbound message. Delivery order is submission order.
    pub fn submit(&self, message: &Message) -> bool {
        let payload = match serde_json::to_vec(message) {
            Ok(payload) => payload,
            Err(error) => {
                log::error!("[channel] Cannot serialize message: {}", error);
                return false;
            }
        };
        log::debug!("[channel] Send: {}", message);
        self.link
            .lock()
            .expect("link lock poisoned; qed")
            .as_ref()
            .map_or(false, |link| link.send(payload))
    }

    fn inbound(&self, payload: &[u8]) {
        let message: Message = match serde_json::from_slice(payload) {
            Ok(message) => message,
            Err(error) => {
                log::warn!("[channel] Ignoring unparsable message: {}", error);
                return;
            }
        };
        log::debug!("[channel] Receive: {}", message);
        for observer in self.snapshot_observers() {
            if observer.inbound(&message) {
                return;
            }
        }
        log::debug!("[channel] Message claimed by no observer: {}", message);
    }

    fn state_change(&self, state: SocketState) {
        let _ = self.state_tx.send(state);
        match state {
            SocketState::WebSocket => {
                for observer in self.snapshot_observers() {
                    observer.opened();
                }
            }
            SocketState::Closed => {
                for observer in self.snapshot_observers() {
                    observer.closed();
                }
            }
            _ => {}
        }
    }

    fn snapshot_observers(&self) -> Vec<Arc<dyn Observer>> {
        self.observers
            .lock()
            .expect("observer lock poisoned; qed")
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        if let Ok(mut channels) = CHANNELS.lock() {
            if let Some(registered) = channels.get(&self.key) {
                if registered.as_ptr() == self as *const _ {
                    channels.remove(&self.key);
                }
            }
        }
        if let Some(link) = self.link.get_mut().ok().and_then(|slot| slot.take()) {
            link.close(Duration::from_millis(0));
        }
    }
}

/// Forwards wslink callbacks onto the channel.
struct Bridge {
    channel: Weak<Channel>,
}

impl WsHandler for Bridge {
    fn state_change(&mut self, state: SocketState) {
        if let Some(channel) = self.channel.upgrade() {
            channel.state_change(state);
        }
    }

    fn message(&mut self, payload: Vec<u8>) {
        if let Some(channel) = self.channel.upgrade() {
            channel.inbound(&payload);
        }
    }
}
