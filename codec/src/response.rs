//! The in-memory HTTP response. Same conventions as
//! [`Request`](crate::Request): every header optional, declaration order is
//! serialization order.

use crate::body::Body;
use crate::header::{
    CacheControl, CaseMode, Connection, ContentType, Encoding, Protocols, TransferEncoding, Upgrade, VerbSet,
};
use crate::serialize::{render_header, Element, Transfer};

pub const STATUS_SWITCHING_PROTOCOLS: u16 = 101;
pub const STATUS_OK: u16 = 200;
pub const STATUS_NO_CONTENT: u16 = 204;
pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_UNAUTHORIZED: u16 = 401;
pub const STATUS_FORBIDDEN: u16 = 403;
pub const STATUS_NOT_FOUND: u16 = 404;
pub const STATUS_INTERNAL_SERVER_ERROR: u16 = 500;

/// The canonical reason phrase for a status code.
pub fn reason(code: u16) -> &'static str {
    match code {
        STATUS_SWITCHING_PROTOCOLS => "Switching Protocols",
        STATUS_OK => "OK",
        STATUS_NO_CONTENT => "No Content",
        STATUS_BAD_REQUEST => "Bad Request",
        STATUS_UNAUTHORIZED => "Unauthorized",
        STATUS_FORBIDDEN => "Forbidden",
        STATUS_NOT_FOUND => "Not Found",
        STATUS_INTERNAL_SERVER_ERROR => "Internal Server Error",
        _ => "",
    }
}

#[derive(Debug)]
pub struct Response {
    pub major: u8,
    pub minor: u8,
    pub code: u16,
    pub message: String,

    pub date: Option<String>,
    pub server: Option<String>,
    pub last_modified: Option<String>,
    pub etag: Option<String>,
    pub allow: Option<VerbSet>,
    pub content_type: Option<ContentType>,
    pub content_length: Option<u64>,
    pub content_encoding: Option<Encoding>,
    pub transfer_encoding: Option<TransferEncoding>,
    pub connection: Option<Connection>,
    pub upgrade: Option<Upgrade>,
    pub websocket_accept: Option<String>,
    pub websocket_protocol: Option<Protocols>,
    pub location: Option<String>,
    pub access_control_origin: Option<String>,
    pub access_control_methods: Option<VerbSet>,
    pub access_control_headers: Option<String>,
    pub cache_control: Option<CacheControl>,
    pub application_url: Option<String>,

    pub mode: CaseMode,
    pub body: Option<Body>,
}

impl Default for Response {
    fn default() -> Self {
        Response {
            major: 1,
            minor: 1,
            code: STATUS_OK,
            message: reason(STATUS_OK).to_string(),
            date: None,
            server: None,
            last_modified: None,
            etag: None,
            allow: None,
            content_type: None,
            content_length: None,
            content_encoding: None,
            transfer_encoding: None,
            connection: None,
            upgrade: None,
            websocket_accept: None,
            websocket_protocol: None,
            location: None,
            access_control_origin: None,
            access_control_methods: None,
            access_control_headers: None,
            cache_control: None,
            application_url: None,
            mode: CaseMode::Raw,
            body: None,
        }
    }
}

impl Response {
    pub fn status(code: u16) -> Self {
        Response {
            code,
            message: reason(code).to_string(),
            ..Response::default()
        }
    }

    /// True when this response confirms a websocket upgrade.
    pub fn is_websocket_upgrade(&self) -> bool {
        self.code == STATUS_SWITCHING_PROTOCOLS
            && self.upgrade == Some(Upgrade::WebSocket)
            && self.connection == Some(Connection::Upgrade)
    }
}

impl Element for Response {
    fn case_mode(&self) -> CaseMode {
        self.mode
    }

    fn render_start_line(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(format!("HTTP/{}.{} {} {}", self.major, self.minor, self.code, self.message).as_bytes());
    }

    fn render_headers(&self, out: &mut Vec<u8>, computed_length: Option<u64>) {
        let mode = self.mode;
        if let Some(date) = &self.date {
            render_header(out, mode, "Date", date);
        }
        if let Some(server) = &self.server {
            render_header(out, mode, "Server", server);
        }
        if let Some(modified) = &self.last_modified {
            render_header(out, mode, "Last-Modified", modified);
        }
        if let Some(etag) = &self.etag {
            render_header(out, mode, "ETag", etag);
        }
        if let Some(allow) = &self.allow {
            render_header(out, mode, "Allow", allow);
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
        if let Some(accept) = &self.websocket_accept {
            render_header(out, mode, "Sec-WebSocket-Accept", accept);
        }
        if let Some(protocols) = &self.websocket_protocol {
            if !protocols.is_empty() {
                render_header(out, mode, "Sec-WebSocket-Protocol", protocols);
            }
        }
        if let Some(location) = &self.location {
            render_header(out, mode, "Location", location);
        }
        if let Some(origin) = &self.access_control_origin {
            render_header(out, mode, "Access-Control-Allow-Origin", origin);
        }
        if let Some(methods) = &self.access_control_methods {
            render_header(out, mode, "Access-Control-Allow-Methods", methods);
        }
        if let Some(headers) = &self.access_control_headers {
            render_header(out, mode, "Access-Control-Allow-Headers", headers);
        }
        if let Some(cache) = &self.cache_control {
            render_header(out, mode, "Cache-Control", cache);
        }
        if let Some(url) = &self.application_url {
            render_header(out, mode, "Application-URL", url);
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
        let rest = match line.strip_prefix("HTTP/") {
            Some(rest) => rest,
            None => return false,
        };
        let space = match rest.find(' ') {
            Some(space) => space,
            None => return false,
        };
        let mut numbers = rest[..space].splitn(2, '.');
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

        let rest = rest[space + 1..].trim_start();
        let (code, message) = match rest.find(' ') {
            Some(space) => (&rest[..space], rest[space + 1..].trim()),
            None => (rest, ""),
        };
        self.code = match code.parse() {
            Ok(code) => code,
            Err(_) => return false,
        };
        self.message = message.to_string();
        true
    }

    fn apply_header(&mut self, name: &str, value: &str) {
        if name.eq_ignore_ascii_case("Date") {
            self.date = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("Server") {
            self.server = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("Last-Modified") {
            self.last_modified = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("ETag") {
            self.etag = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("Allow") {
            self.allow = value.parse().ok();
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
        } else if name.eq_ignore_ascii_case("Sec-WebSocket-Accept") {
            self.websocket_accept = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("Sec-WebSocket-Protocol") {
            self.websocket_protocol = value.parse().ok();
        } else if name.eq_ignore_ascii_case("Location") {
            self.location = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("Access-Control-Allow-Origin") {
            self.access_control_origin = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("Access-Control-Allow-Methods") {
            self.access_control_methods = value.parse().ok();
        } else if name.eq_ignore_ascii_case("Access-Control-Allow-Headers") {
            self.access_control_headers = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("Cache-Control") {
            self.cache_control = value.parse().ok();
        } else if name.eq_ignore_ascii_case("Application-URL") {
            self.application_url = Some(value.to_string());
        }
    }
}
