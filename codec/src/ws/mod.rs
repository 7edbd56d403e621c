//! RFC 6455 framing and the upgrade handshake.
//!
//! [`FrameCodec`] is a pure state machine over caller buffers: it encodes
//! data frames (masking and fragmenting as configured), piggy-backs pending
//! control frames onto the same write when headroom allows, and decodes
//! inbound frames incrementally, unmasking in place with a rolling mask
//! index so payloads can span reads.

mod frame;
mod handshake;

pub use self::frame::{FrameCodec, FrameEvent, FrameKind};
pub use self::handshake::{accept_key, accept_response, accepts, request_key, upgrade_request, HANDSHAKE_GUID};
