//! Wire-level codecs for the framewire stack.
//!
//! The crate is organised leaves-first, the way the data flows:
//!
//! - [`url`]: URL splitting plus the percent and base64url codecs.
//! - [`header`]: typed header values shared by requests and responses.
//! - [`body`]: the streaming [`Body`](body::Body) attached to a message.
//! - [`Request`] / [`Response`]: the in-memory HTTP message model, every
//!   header optional.
//! - [`serialize`] / [`deserialize`]: the incremental HTTP serializer and
//!   line-oriented parser (chunked transfer, streamed gzip inflate).
//! - [`ws`]: RFC 6455 frame codec and the upgrade handshake.
//! - [`jwt`]: HS256 JSON Web Token helper.
//!
//! Neither codec owns a transport: the serializer fills caller buffers, the
//! deserializer consumes caller buffers, and both survive arbitrary splits
//! of the byte stream.

pub mod body;
pub mod deserialize;
#[cfg(test)]
mod http_tests;
pub mod header;
pub mod jwt;
pub mod request;
pub mod response;
pub mod serialize;
pub mod url;
pub mod ws;

pub use self::body::Body;
pub use self::deserialize::{BodyProvider, Deserializer};
pub use self::header::{CaseMode, Verb};
pub use self::request::Request;
pub use self::response::Response;
pub use self::serialize::{Element, Serializer, Transfer};
pub use self::url::Url;
