//! The in-memory HTTP request.
//!
//! Every header is optional and typed; presence is distinct from default
//! value. Field declaration order is the serialization order.

use crate::body::Body;
use crate::header::{
    Authorization, CaseMode, Connection, ContentHmac, ContentType, Encoding, Protocols, TransferEncoding, Upgrade,
    Verb,
};
use crate::serialize::{render_header, Element, Transfer};

#[derive(Debug)]
pub struct Request {
    pub major: u8,
    pub minor: u8,
    pub verb: Verb,
    /// Request path, leading slash included.
    pub path: String,
    pub query: Option<String>,
    pub fragment: Option<String>,

    pub host: Option<String>,
    pub origin: Option<String>,
    pub accept: Option<String>,
    pub accept_encoding: Option<Encoding>,
    pub user_agent: Option<String>,
    pub content_type: Option<ContentType>,
    pub content_length: Option<u64>,
    pub content_encoding: Option<Encoding>,
    pub transfer_encoding: Option<TransferEncoding>,
    pub connection: Option<Connection>,
    pub upgrade: Option<Upgrade>,
    pub websocket_key: Option<String>,
    pub websocket_version: Option<u32>,
    pub websocket_protocol: Option<Protocols>,
    pub websocket_extensions: Option<String>,
    pub range: Option<String>,
    pub authorization: Option<Authorization>,
    pub content_hmac: Option<ContentHmac>,

    pub mode: CaseMode,
    pub body: Option<Body>,
}

impl Default for Request {
    fn default() -> Self {
        Request {
            major: 1,
            minor: 1,
            verb: Verb::Get,
            path: "/".to_string(),
            query: None,
            fragment: None,
            host: None,
            origin: None,
            accept: None,
            accept_encoding: None,
            user_agent: None,
            content_type: None,
            content_length: None,
            content_encoding: None,
            transfer_encoding: None,
            connection: None,
            upgrade: None,
            websocket_key: None,
            websocket_version: None,
            websocket_protocol: None,
            websocket_extensions: None,
            range: None,
            authorization: None,
            content_hmac: None,
            mode: CaseMode::Raw,
            body: None,
        }
    }
}

impl Request {
    pub fn new(verb: Verb, path: impl Into<String>) -> Self {
        Request {
            verb,
            path: path.into(),
            ..Request::default()
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Verb::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Verb::Post, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Verb::Put, path)
    }

    /// True when this request asks for the websocket upgrade.
    pub fn is_websocket_upgrade(&self) -> bool {
        self.upgrade == Some(Upgrade::WebSocket) && self.connection == Some(Connection::Upgrade)
    }
}

impl Element for Request {
    fn case_mode(&self) -> CaseMode {
        self.mode
    }

    fn render_start_line(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.verb.as_str().as_bytes());
        out.push(b' ');
        out.extend_from_slice(self.path.as_bytes());
        if let Some(query) = &self.query {
            out.push(b'?');
            out.extend_from_slice(query.as_bytes());
        }
        if let Some(fragment) = &self.fragment {
            out.push(b'#');
            out.extend_from_slice(fragment.as_bytes());
        }
        out.extend_from_slice(format!(" HTTP/{}.{}", self.major, self.minor).as_bytes());
    }

    fn render_headers(&self, out: &mut Vec<u8>, computed_length: Option<u64>) {
        let mode = self.mode;
        if let Some(host) = &self.host {
            render_header(out, mode, "Host", host);
        }
        if let Some(origin) = &self.origin {
            render_header(out, mode, "Origin", origin);
        }
        if let Some(accept) = &self.accept {
            render_header(out, mode, "Accept", accept);
        }
        if let Some(encoding) = &self.accept_encoding {
            render_header(out, mode, "Accept-Encoding", encoding);
        }
        if let Some(agent) = &self.user_agent {
            render_header(out, mode, "User-Agent", agent);
        }
        if let Some(content_type) = &self.content_type {
            render_header(out, mode, "Content-Type", content_type);
        }
        let chunked = self.transfer_encoding == Some(TransferEncoding::Chunked);
        if !chunked {
            if let Some(length) = self.content_length.or(computed_length) {
                render_header(out, mode, "Content-Length", length);
            }
        }
        if let Some(encoding) = &self.content_encoding {
            render_header(out, mode, "Content-Encoding", encoding);
        }
        if let Some(transfer) = &self.transfer_encoding {
            render_header(out, mode, "Transfer-Encoding", transfer);
        }
        if let Some(connection) = &self.connection {
            render_header(out, mode, "Connection", connection);
        }
        if let Some(upgrade) = &self.upgrade {
            render_header(out, mode, "Upgrade", upgrade);
        }
        if let Some(key) = &self.websocket_key {
            render_header(out, mode, "Sec-WebSocket-Key", key);
        }
        if let Some(version) = &self.websocket_version {
            render_header(out, mode, "Sec-WebSocket-Version", version);
        }
        if let Some(protocols) = &self.websocket_protocol {
            if !protocols.is_empty() {
                render_header(out, mode, "Sec-WebSocket-Protocol", protocols);
            }
        }
        if let Some(extensions) = &self.websocket_extensions {
            render_header(out, mode, "Sec-WebSocket-Extensions", extensions);
        }
        if let Some(range) = &self.range {
            render_header(out, mode, "Range", range);
        }
        if let Some(authorization) = &self.authorization {
            render_header(out, mode, "Authorization", authorization);
        }
        if let Some(hmac) = &self.content_hmac {
            render_header(out, mode, "Content-HMAC", hmac);
        }
    }

    fn outbound_transfer(&self, hint: Option<u64>) -> Transfer {
        if self.transfer_encoding == Some(TransferEncoding::Chunked) {
            Transfer::Chunked
        } else if let Some(length) = self.content_length {
            Transfer::Length(length)
        } else if let Some(length) = hint {
            Transfer::Length(length)
        } else {
            Transfer::None
        }
    }

    fn inbound_transfer(&self) -> Transfer {
        // Chunked wins when both framing headers arrived.
        if self.transfer_encoding == Some(TransferEncoding::Chunked) {
            Transfer::Chunked
        } else {
            match self.content_length {
                Some(length) if length > 0 => Transfer::Length(length),
                _ => Transfer::None,
            }
        }
    }

    fn inflate_required(&self) -> bool {
        matches!(self.content_encoding, Some(encoding) if encoding != Encoding::Identity)
    }

    fn body(&self) -> Option<&Body> {
        self.body.as_ref()
    }

    fn body_mut(&mut self) -> Option<&mut Body> {
        self.body.as_mut()
    }

    fn parse_start_line(&mut self, line: &str) -> bool {
        let mut parts = line.split_whitespace();
        let verb = match parts.next() {
            Some(token) => token,
            None => return false,
        };
        let target = match parts.next() {
            Some(token) => token,
            None => return false,
        };
        let version = match parts.next() {
            Some(token) if token.starts_with("HTTP/") => &token[5..],
            _ => return false,
        };
        if parts.next().is_some() {
            return false;
        }

        let mut numbers = version.splitn(2, '.');
        match (
            numbers.next().and_then(|n| n.parse::<u8>().ok()),
            numbers.next().and_then(|n| n.parse::<u8>().ok()),
        ) {
            (Some(major), Some(minor)) => {
                self.major = major;
                self.minor = minor;
            }
            _ => return false,
        }

        self.verb = verb.parse().unwrap_or(Verb::Unknown);

        let (path, rest) = match target.find(|c| c == '?' || c == '#') {
            Some(stop) => (&target[..stop], &target[stop..]),
            None => (target, ""),
        };
        self.path = path.to_string();
        if rest.starts_with('?') {
            let end = rest.find('#').unwrap_or_else(|| rest.len());
            self.query = Some(rest[1..end].to_string());
        }
        if let Some(hash) = rest.find('#') {
            self.fragment = Some(rest[hash + 1..].to_string());
        }
        true
    }

    fn apply_header(&mut self, name: &str, value: &str) {
        if name.eq_ignore_ascii_case("Host") {
            self.host = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("Origin") {
            self.origin = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("Accept") {
            self.accept = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("Accept-Encoding") {
            self.accept_encoding = value.parse().ok();
        } else if name.eq_ignore_ascii_case("User-Agent") {
            self.user_agent = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("Content-Type") {
            self.content_type = value.parse().ok();
        } else if name.eq_ignore_ascii_case("Content-Length") {
            self.content_length = value.parse().ok();
        } else if name.eq_ignore_ascii_case("Content-Encoding") {
            self.content_encoding = value.parse().ok();
        } else if name.eq_ignore_ascii_case("Transfer-Encoding") {
            self.transfer_encoding = value.parse().ok();
        } else if name.eq_ignore_ascii_case("Connection") {
            self.connection = value.parse().ok();
        } else if name.eq_ignore_ascii_case("Upgrade") {
            self.upgrade = value.parse().ok();
        } else if name.eq_ignore_ascii_case("Sec-WebSocket-Key") {
            self.websocket_key = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("Sec-WebSocket-Version") {
            self.websocket_version = value.parse().ok();
        } else if name.eq_ignore_ascii_case("Sec-WebSocket-Protocol") {
            self.websocket_protocol = value.parse().ok();
        } else if name.eq_ignore_ascii_case("Sec-WebSocket-Extensions") {
            self.websocket_extensions = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("Range") {
            self.range = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("Authorization") {
            self.authorization = value.parse().ok();
        } else if name.eq_ignore_ascii_case("Content-HMAC") {
            self.content_hmac = value.parse().ok();
        }
        // Unknown header names are skipped.
    }
}
