//! Generic inter-process RPC runtime.
//!
//! Every RPC-exposed interface carries a stable integer id; a process-wide
//! [`Registry`](registry::Registry) records the ids both channel ends
//! announce at startup. The [`Administrator`](admin::Administrator) owns one
//! channel's stub set and proxy cache: inbound invoke frames dispatch to a
//! [`Stub`](admin::Stub), outbound invocations go through a
//! [`Proxy`](admin::Proxy) that keeps at most one invocation in flight,
//! FIFO-ordered, and releases its remote hold when dropped.
//!
//! The interface-specific marshalling (the code a generator would emit)
//! lives with the interface owner; this crate only supplies the runtime it
//! plugs into.

pub mod admin;
pub mod frame;
pub mod message;
pub mod registry;

pub use self::admin::{Administrator, Proxy, Stub, Transport};
pub use self::frame::{FrameError, FrameReader, FrameWriter};
pub use self::message::{Announcement, InvokeRequest, Payload};
pub use self::registry::Registry;

use thiserror::Error;

/// Faults surfaced by the runtime itself, as opposed to interface-level
/// errors which travel inside the response frame.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum Fault {
    /// The channel closed while the invocation was outstanding.
    #[error("Invocation aborted by channel close")]
    Aborted,
    /// No stub is exposed under the addressed instance.
    #[error("Unknown instance {0}")]
    UnknownInstance(u32),
    /// The interface was never announced by the peer.
    #[error("Unknown interface {0}")]
    UnknownInterface(u32),
    /// The stub has no method at the addressed index.
    #[error("Unknown method {0}")]
    UnknownMethod(u8),
    /// A frame ended before the expected field.
    #[error(transparent)]
    Frame(#[from] frame::FrameError),
}
