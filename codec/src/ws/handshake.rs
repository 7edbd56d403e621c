use rand::RngCore;
use sha1::{Digest, Sha1};

use crate::header::{Connection, Protocols, Upgrade};
use crate::request::Request;
use crate::response::{self, Response};
use crate::url;

/// The fixed GUID of RFC 6455 §4.2.2.
pub const HANDSHAKE_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// A fresh 16-byte random nonce, base64url encoded.
pub fn request_key() -> String {
    let mut nonce = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut nonce);
    url::base64url_encode(&nonce, false)
}

/// `Sec-WebSocket-Accept` for the given request key:
/// `base64(SHA1(key ‖ GUID))`.
pub fn accept_key(request_key: &str) -> String {
    let mut sha = Sha1::new();
    sha.update(request_key.as_bytes());
    sha.update(HANDSHAKE_GUID.as_bytes());
    base64::encode(sha.finalize())
}

/// Builds the client-side upgrade request. The generated key is readable
/// from the request's `websocket_key` for later validation.
pub fn upgrade_request(
    host: impl Into<String>,
    path: impl Into<String>,
    query: Option<String>,
    protocols: Option<Protocols>,
    origin: Option<String>,
) -> Request {
    let mut request = Request::get(path);
    request.query = query;
    request.host = Some(host.into());
    request.origin = origin;
    request.connection = Some(Connection::Upgrade);
    request.upgrade = Some(Upgrade::WebSocket);
    request.websocket_version = Some(13);
    request.websocket_key = Some(request_key());
    request.websocket_protocol = protocols;
    request
}

/// Builds the `101 Switching Protocols` answer to an upgrade request,
/// copying the first offered protocol.
pub fn accept_response(request: &Request) -> Response {
    let mut response = Response::status(response::STATUS_SWITCHING_PROTOCOLS);
    response.connection = Some(Connection::Upgrade);
    response.upgrade = Some(Upgrade::WebSocket);
    response.websocket_accept = request.websocket_key.as_deref().map(accept_key);
    if let Some(first) = request.websocket_protocol.as_ref().and_then(Protocols::first) {
        response.websocket_protocol = Some(Protocols::single(first));
    }
    response
}

/// True when `response` confirms the upgrade for the key we sent.
pub fn accepts(response: &Response, sent_key: &str) -> bool {
    response.code == response::STATUS_SWITCHING_PROTOCOLS
        && response.websocket_accept.as_deref() == Some(accept_key(sent_key).as_str())
}
