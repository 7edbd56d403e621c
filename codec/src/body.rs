//! Streaming message bodies.
//!
//! A body decouples payload from framing: the serializer asks it to *emit*
//! bytes, the deserializer asks it to *absorb* them, and neither side knows
//! whether the bytes live in memory, in a file, or get hashed on the way
//! through. The shapes are a closed sum, so the hot path carries no virtual
//! dispatch.

use std::borrow::Cow;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;

use crate::header::ContentHmac;

type HmacSha256 = Hmac<Sha256>;

/// A message body: either plain text bytes, a file on disk, a JSON value, or
/// any of those wrapped with a running HMAC.
pub enum Body {
    Text(TextBody),
    Json(JsonBody),
    File(FileBody),
    Signed(SignedBody),
}

impl Body {
    pub fn text(text: impl Into<String>) -> Body {
        Body::Text(TextBody::from(text.into()))
    }

    pub fn json(value: Value) -> Body {
        Body::Json(JsonBody::new(value))
    }

    pub fn file(path: impl Into<PathBuf>) -> Body {
        Body::File(FileBody::new(path))
    }

    pub fn signed(inner: Body, key: &[u8]) -> Body {
        Body::Signed(SignedBody::new(inner, key))
    }

    /// Called once before emission starts; returns the total length hint.
    pub fn begin_serialize(&mut self) -> u64 {
        match self {
            Body::Text(body) => body.begin_serialize(),
            Body::Json(body) => body.begin_serialize(),
            Body::File(body) => body.begin_serialize(),
            Body::Signed(body) => body.begin_serialize(),
        }
    }

    /// Produces the next run of body bytes; 0 means end of body.
    pub fn emit(&mut self, buffer: &mut [u8]) -> usize {
        match self {
            Body::Text(body) => body.emit(buffer),
            Body::Json(body) => body.emit(buffer),
            Body::File(body) => body.emit(buffer),
            Body::Signed(body) => body.emit(buffer),
        }
    }

    /// Called when inbound headers indicate a body is coming.
    pub fn begin_deserialize(&mut self) {
        match self {
            Body::Text(body) => body.begin_deserialize(),
            Body::Json(body) => body.begin_deserialize(),
            Body::File(body) => body.begin_deserialize(),
            Body::Signed(body) => body.begin_deserialize(),
        }
    }

    /// Consumes a run of inbound body bytes; returns how many were taken.
    pub fn absorb(&mut self, data: &[u8]) -> usize {
        match self {
            Body::Text(body) => body.absorb(data),
            Body::Json(body) => body.absorb(data),
            Body::File(body) => body.absorb(data),
            Body::Signed(body) => body.absorb(data),
        }
    }

    /// Completion of either direction.
    pub fn end(&mut self) {
        match self {
            Body::Text(body) => body.end(),
            Body::Json(body) => body.end(),
            Body::File(body) => body.end(),
            Body::Signed(body) => body.end(),
        }
    }

    /// The body text, when there is an in-memory representation.
    pub fn as_text(&self) -> Option<Cow<'_, str>> {
        match self {
            Body::Text(body) => Some(body.text()),
            Body::Json(body) => Some(Cow::Owned(body.value().to_string())),
            Body::Signed(body) => body.inner().as_text(),
            Body::File(_) => None,
        }
    }

    /// The parsed JSON value of a JSON body.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Body::Json(body) => Some(body.value()),
            Body::Signed(body) => body.inner().as_json(),
            _ => None,
        }
    }

    /// The signature of a signed body, as a `Content-HMAC` header value.
    pub fn content_hmac(&self) -> Option<ContentHmac> {
        match self {
            Body::Signed(body) => Some(body.content_hmac()),
            _ => None,
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Text(body) => write!(f, "Body::Text({} bytes)", body.data.len()),
            Body::Json(_) => f.write_str("Body::Json"),
            Body::File(body) => write!(f, "Body::File({:?})", body.path),
            Body::Signed(body) => write!(f, "Body::Signed({:?})", body.inner),
        }
    }
}

/// In-memory body.
#[derive(Default)]
pub struct TextBody {
    data: Vec<u8>,
    position: usize,
}

impl From<String> for TextBody {
    fn from(text: String) -> Self {
        TextBody {
            data: text.into_bytes(),
            position: 0,
        }
    }
}

impl From<&str> for TextBody {
    fn from(text: &str) -> Self {
        TextBody {
            data: text.as_bytes().to_vec(),
            position: 0,
        }
    }
}

impl TextBody {
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    fn begin_serialize(&mut self) -> u64 {
        self.position = 0;
        self.data.len() as u64
    }

    fn emit(&mut self, buffer: &mut [u8]) -> usize {
        let remaining = &self.data[self.position..];
        let size = remaining.len().min(buffer.len());
        buffer[..size].copy_from_slice(&remaining[..size]);
        self.position += size;
        size
    }

    fn begin_deserialize(&mut self) {
        self.data.clear();
    }

    fn absorb(&mut self, data: &[u8]) -> usize {
        self.data.extend_from_slice(data);
        data.len()
    }

    fn end(&mut self) {}
}

/// Body that renders a JSON value on the way out and parses one on the way
/// in. An inbound stream that is not valid JSON leaves `Value::Null` behind.
pub struct JsonBody {
    value: Value,
    staged: Vec<u8>,
    position: usize,
    inbound: Vec<u8>,
}

impl JsonBody {
    pub fn new(value: Value) -> Self {
        JsonBody {
            value,
            staged: Vec::new(),
            position: 0,
            inbound: Vec::new(),
        }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    fn begin_serialize(&mut self) -> u64 {
        self.staged = serde_json::to_vec(&self.value).unwrap_or_default();
        self.position = 0;
        self.staged.len() as u64
    }

    fn emit(&mut self, buffer: &mut [u8]) -> usize {
        let remaining = &self.staged[self.position..];
        let size = remaining.len().min(buffer.len());
        buffer[..size].copy_from_slice(&remaining[..size]);
        self.position += size;
        size
    }

    fn begin_deserialize(&mut self) {
        self.inbound.clear();
    }

    fn absorb(&mut self, data: &[u8]) -> usize {
        self.inbound.extend_from_slice(data);
        data.len()
    }

    fn end(&mut self) {
        if !self.inbound.is_empty() {
            match serde_json::from_slice(&self.inbound) {
                Ok(value) => self.value = value,
                Err(error) => {
                    log::warn!("Dropping unparsable JSON body: {}", error);
                    self.value = Value::Null;
                }
            }
            self.inbound.clear();
        }
    }
}

/// Body backed by a file.
///
/// On serialize the file is opened lazily and streamed from `start_offset`.
/// On deserialize the file is created; if the stream dies before a single
/// write lands, the file is truncated to zero at `end()`.
pub struct FileBody {
    path: PathBuf,
    file: Option<File>,
    start_offset: u64,
    truncate: bool,
}

impl FileBody {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileBody {
            path: path.into(),
            file: None,
            start_offset: 0,
            truncate: false,
        }
    }

    pub fn with_offset(path: impl Into<PathBuf>, start_offset: u64) -> Self {
        FileBody {
            path: path.into(),
            file: None,
            start_offset,
            truncate: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn begin_serialize(&mut self) -> u64 {
        match File::open(&self.path) {
            Ok(mut file) => {
                let size = file.metadata().map(|meta| meta.len()).unwrap_or(0);
                if file.seek(SeekFrom::Start(self.start_offset)).is_err() {
                    return 0;
                }
                self.file = Some(file);
                size.saturating_sub(self.start_offset)
            }
            Err(error) => {
                log::warn!("Cannot open {:?} for serialization: {}", self.path, error);
                0
            }
        }
    }

    fn emit(&mut self, buffer: &mut [u8]) -> usize {
        match self.file.as_mut() {
            Some(file) => file.read(buffer).unwrap_or(0),
            None => 0,
        }
    }

    fn begin_deserialize(&mut self) {
        self.truncate = false;
        match OpenOptions::new().write(true).create(true).truncate(true).open(&self.path) {
            Ok(file) => self.file = Some(file),
            Err(error) => {
                log::warn!("Cannot create {:?} for deserialization: {}", self.path, error);
                self.file = None;
            }
        }
    }

    fn absorb(&mut self, data: &[u8]) -> usize {
        match self.file.as_mut() {
            Some(file) => match file.write_all(data) {
                Ok(()) => data.len(),
                Err(error) => {
                    log::warn!("Write to {:?} failed: {}", self.path, error);
                    self.truncate = true;
                    0
                }
            },
            None => 0,
        }
    }

    fn end(&mut self) {
        if let Some(file) = self.file.take() {
            if self.truncate {
                let _ = file.set_len(0);
            }
        }
    }
}

/// Wraps another body and feeds every streamed byte, in either direction,
/// through an HMAC-SHA256 keyed at construction.
pub struct SignedBody {
    inner: Box<Body>,
    key: Vec<u8>,
    mac: HmacSha256,
}

impl SignedBody {
    pub fn new(inner: Body, key: &[u8]) -> Self {
        SignedBody {
            inner: Box::new(inner),
            key: key.to_vec(),
            mac: HmacSha256::new_from_slice(key).expect("HMAC accepts any key length; qed"),
        }
    }

    pub fn inner(&self) -> &Body {
        &self.inner
    }

    /// The digest over everything streamed since the last `begin_*`.
    pub fn signature(&self) -> Vec<u8> {
        self.mac.clone().finalize().into_bytes().to_vec()
    }

    pub fn content_hmac(&self) -> ContentHmac {
        ContentHmac::sha256(base64::encode(self.signature()))
    }

    fn reset(&mut self) {
        self.mac = HmacSha256::new_from_slice(&self.key).expect("HMAC accepts any key length; qed");
    }

    fn begin_serialize(&mut self) -> u64 {
        self.reset();
        self.inner.begin_serialize()
    }

    fn emit(&mut self, buffer: &mut [u8]) -> usize {
        let size = self.inner.emit(buffer);
        self.mac.update(&buffer[..size]);
        size
    }

    fn begin_deserialize(&mut self) {
        self.reset();
        self.inner.begin_deserialize();
    }

    fn absorb(&mut self, data: &[u8]) -> usize {
        let size = self.inner.absorb(data);
        self.mac.update(&data[..size]);
        size
    }

    fn end(&mut self) {
        self.inner.end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_body_streams_in_pieces() {
        let mut body = Body::text("hello world");
        assert_eq!(body.begin_serialize(), 11);
        let mut buffer = [0u8; 4];
        let mut collected = Vec::new();
        loop {
            let n = body.emit(&mut buffer);
            if n == 0 {
                break;
            }
            collected.extend_from_slice(&buffer[..n]);
        }
        assert_eq!(collected, b"hello world");

        body.begin_deserialize();
        assert_eq!(body.absorb(b"re"), 2);
        assert_eq!(body.absorb(b"filled"), 6);
        body.end();
        assert_eq!(body.as_text().unwrap(), "refilled");
    }

    #[test]
    fn json_body_roundtrip() {
        let value = serde_json::json!({"a": 1, "b": [true, null]});
        let mut body = Body::json(value.clone());
        let total = body.begin_serialize();
        let mut buffer = vec![0u8; total as usize];
        assert_eq!(body.emit(&mut buffer), total as usize);

        let mut parsed = Body::json(Value::Null);
        parsed.begin_deserialize();
        parsed.absorb(&buffer);
        parsed.end();
        assert_eq!(parsed.as_json().unwrap(), &value);
    }

    #[test]
    fn signed_body_hashes_both_directions() {
        let mut outbound = Body::signed(Body::text("payload"), b"secret");
        outbound.begin_serialize();
        let mut buffer = [0u8; 64];
        let n = outbound.emit(&mut buffer);
        assert_eq!(&buffer[..n], b"payload");

        let mut inbound = Body::signed(Body::text(""), b"secret");
        inbound.begin_deserialize();
        inbound.absorb(b"pay");
        inbound.absorb(b"load");
        inbound.end();

        assert_eq!(outbound.content_hmac(), inbound.content_hmac());

        let mut other = Body::signed(Body::text(""), b"other-key");
        other.begin_deserialize();
        other.absorb(b"payload");
        assert_ne!(outbound.content_hmac(), other.content_hmac());
    }

    #[test]
    fn file_body_roundtrip() {
        let dir = std::env::temp_dir();
        let source = dir.join("framewire-body-source.txt");
        let sink = dir.join("framewire-body-sink.txt");
        std::fs::write(&source, b"0123456789").unwrap();

        let mut outbound = Body::file(&source);
        assert_eq!(outbound.begin_serialize(), 10);
        let mut buffer = [0u8; 3];
        let mut collected = Vec::new();
        loop {
            let n = outbound.emit(&mut buffer);
            if n == 0 {
                break;
            }
            collected.extend_from_slice(&buffer[..n]);
        }
        outbound.end();
        assert_eq!(collected, b"0123456789");

        let mut inbound = Body::file(&sink);
        inbound.begin_deserialize();
        inbound.absorb(&collected);
        inbound.end();
        assert_eq!(std::fs::read(&sink).unwrap(), b"0123456789");

        std::fs::remove_file(&source).ok();
        std::fs::remove_file(&sink).ok();
    }

    #[test]
    fn file_body_offset() {
        let dir = std::env::temp_dir();
        let source = dir.join("framewire-body-offset.txt");
        std::fs::write(&source, b"skip-me:rest").unwrap();

        let mut outbound = Body::File(FileBody::with_offset(&source, 8));
        assert_eq!(outbound.begin_serialize(), 4);
        let mut buffer = [0u8; 16];
        let n = outbound.emit(&mut buffer);
        assert_eq!(&buffer[..n], b"rest");
        outbound.end();

        std::fs::remove_file(&source).ok();
    }
}
