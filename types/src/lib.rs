//! A set of types for representing the JSON-RPC messages exchanged over a
//! framewire channel, as defined in the
//! [JSON-RPC 1.0 spec](https://www.jsonrpc.org/specification_v1) and
//! [JSON-RPC 2.0 spec](https://www.jsonrpc.org/specification).
//!
//! Unlike most JSON-RPC crates this one models a single [`Message`]
//! envelope rather than separate request/response types: the link layer
//! classifies an inbound message by the *presence* of its fields (a
//! response carries `id` plus `result` or `error`, a call carries a
//! designator), so one tolerant shape is what actually travels.
//!
//! # Usage
//!
//! ## Creating a method call
//!
//! ```rust
//! use framewire_types::Message;
//!
//! let call = Message::call(1, "Foo.1.status", None);
//! assert_eq!(
//!     serde_json::to_string(&call).unwrap(),
//!     r#"{"jsonrpc":"2.0","id":1,"method":"Foo.1.status"}"#
//! );
//! ```
//!
//! ## Picking apart a designator
//!
//! ```rust
//! use framewire_types::Message;
//!
//! let event = Message::notification("tmp1.statechange", None);
//! assert_eq!(event.callsign(), Some("tmp1".to_string()));
//! assert_eq!(event.method(), Some("statechange"));
//! assert_eq!(event.version(), None);
//! ```

mod error;
mod id;
mod message;
mod version;

pub use self::error::{Error, ErrorCode};
pub use self::id::Id;
pub use self::message::Message;
pub use self::version::Version;

pub use serde_json::Value;
