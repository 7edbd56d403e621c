//! Session-layer plumbing over the framewire codecs.
//!
//! The layering, bottom up:
//!
//! - [`weblink`]: a generic framed-message pump — outbound FIFO, a
//!   serializer/deserializer pair, and owner callbacks — over any byte
//!   stream.
//! - [`wslink`]: the WebSocket link state machine (`WebService` →
//!   `Upgrading` → `WebSocket`), client and server role, close-with-drain.
//! - [`channel`]: process-wide interning of one socket per `host@callsign`,
//!   shared by any number of observers.
//! - [`link`]: the JSON-RPC link itself — pending-call table, synchronous
//!   and asynchronous send, event subscription, inbound routing.
//! - [`watchdog`]: the single shared deadline timer driving every link's
//!   asynchronous call expiries.
//! - [`smart`]: a link wrapper that rides `statechange` events to re-arm
//!   subscriptions when the remote service comes (back) up.
//! - [`transfer`]: single-shot HTTP file upload/download with optional
//!   HMAC-signed bodies.

pub mod channel;
pub mod error;
pub mod link;
pub mod smart;
pub mod transfer;
pub mod weblink;
pub mod wslink;

pub(crate) mod watchdog;


pub use self::channel::Channel;
pub use self::error::CallError;
pub use self::link::{Link, LinkBuilder};
pub use self::smart::SmartLink;
pub use self::wslink::{SocketState, WebSocketLink, WsHandler};
