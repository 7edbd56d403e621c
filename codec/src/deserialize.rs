//! Incremental, line-oriented parsing of HTTP elements.
//!
//! The parser consumes caller buffers byte-split-agnostically, recovers from
//! malformed input by resynchronizing on line boundaries, and streams body
//! bytes straight into the element's [`Body`] — through a windowed gzip
//! inflate when the message is content-encoded. A message that dies halfway
//! (bad start line, corrupt gzip stream) is dropped without surfacing an
//! event; the owner only ever sees complete elements.

use std::io::Write;
use std::mem;

use flate2::write::GzDecoder;

use crate::serialize::{Element, Transfer};

/// Gives the owner a chance to attach the right [`Body`] once the headers
/// of an inbound element indicate a body is coming.
pub trait BodyProvider<T> {
    fn link_body(&mut self, element: &mut T);
}

/// Attaches nothing; body bytes are counted out and discarded.
pub struct NoBody;

impl<T> BodyProvider<T> for NoBody {
    fn link_body(&mut self, _element: &mut T) {}
}

enum State {
    StartLine,
    Header,
    Body { remaining: u64 },
    ChunkSize,
    ChunkBody { remaining: u64 },
    ChunkDelimiter,
    Trailer,
}

/// Streaming parser for one element type.
pub struct Deserializer<T> {
    state: State,
    element: Option<T>,
    line: Vec<u8>,
    inflater: Option<GzDecoder<Vec<u8>>>,
    poisoned: bool,
    suppress_body: bool,
}

impl<T: Element> Default for Deserializer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Element> Deserializer<T> {
    pub fn new() -> Self {
        Deserializer {
            state: State::StartLine,
            element: None,
            line: Vec::new(),
            inflater: None,
            poisoned: false,
            suppress_body: false,
        }
    }

    /// True when no element is partially parsed.
    pub fn is_idle(&self) -> bool {
        matches!(self.state, State::StartLine) && self.line.is_empty() && self.element.is_none()
    }

    /// Arms the HEAD latch: the next element parses without a body
    /// regardless of its Content-Length. Cleared when that element is done.
    pub fn suppress_next_body(&mut self) {
        self.suppress_body = true;
    }

    /// Feeds a run of received bytes; returns every element completed by it.
    pub fn consume(&mut self, data: &[u8], provider: &mut dyn BodyProvider<T>) -> Vec<T> {
        let mut completed = Vec::new();
        let mut offset = 0;
        while offset < data.len() {
            let (consumed, element) = self.consume_one(&data[offset..], provider);
            offset += consumed;
            if let Some(element) = element {
                completed.push(element);
            }
        }
        completed
    }

    /// Like [`consume`](Self::consume), but stops right after the first
    /// element completes and reports how many bytes were eaten. Callers that
    /// switch protocols mid-stream (the websocket upgrade) need the leftover
    /// bytes back.
    pub fn consume_one(&mut self, data: &[u8], provider: &mut dyn BodyProvider<T>) -> (usize, Option<T>) {
        let mut completed = Vec::new();
        let mut offset = 0;
        while offset < data.len() && completed.is_empty() {
            offset += self.step(&data[offset..], provider, &mut completed);
        }
        (offset, completed.pop())
    }

    /// Consumes one unit of input: a run of body bytes, or (part of) a line.
    fn step(&mut self, data: &[u8], provider: &mut dyn BodyProvider<T>, completed: &mut Vec<T>) -> usize {
        match self.state {
            State::Body { remaining } => {
                let take = (remaining as usize).min(data.len());
                self.absorb(&data[..take]);
                let remaining = remaining - take as u64;
                if remaining == 0 {
                    self.finish_element(completed);
                } else {
                    self.state = State::Body { remaining };
                }
                take
            }
            State::ChunkBody { remaining } => {
                let take = (remaining as usize).min(data.len());
                self.absorb(&data[..take]);
                let remaining = remaining - take as u64;
                self.state = if remaining == 0 {
                    State::ChunkDelimiter
                } else {
                    State::ChunkBody { remaining }
                };
                take
            }
            _ => {
                // Line mode: gather bytes up to LF, strip the CR.
                match data.iter().position(|&byte| byte == b'\n') {
                    None => {
                        self.line.extend_from_slice(data);
                        data.len()
                    }
                    Some(position) => {
                        self.line.extend_from_slice(&data[..position]);
                        if self.line.last() == Some(&b'\r') {
                            self.line.pop();
                        }
                        let line = mem::replace(&mut self.line, Vec::new());
                        self.handle_line(&line, provider, completed);
                        position + 1
                    }
                }
            }
        }
    }

    fn handle_line(&mut self, line: &[u8], provider: &mut dyn BodyProvider<T>, completed: &mut Vec<T>) {
        let text = String::from_utf8_lossy(line);
        match self.state {
            State::StartLine => {
                if text.trim().is_empty() {
                    return;
                }
                let mut element = T::default();
                if element.parse_start_line(&text) {
                    self.element = Some(element);
                    self.state = State::Header;
                } else {
                    log::debug!("Discarding malformed start line: {:?}", text);
                }
            }
            State::Header => {
                if line.is_empty() {
                    self.end_of_headers(provider, completed);
                } else if let Some(colon) = text.find(':') {
                    let name = text[..colon].trim();
                    let value = text[colon + 1..].trim();
                    if let Some(element) = self.element.as_mut() {
                        element.apply_header(name, value);
                    }
                } else {
                    log::debug!("Skipping malformed header line: {:?}", text);
                }
            }
            State::ChunkSize => {
                // Chunk extensions after ';' are ignored.
                let size_text = match text.find(';') {
                    Some(semi) => &text[..semi],
                    None => &text[..],
                };
                match u64::from_str_radix(size_text.trim(), 16) {
                    Ok(0) => self.state = State::Trailer,
                    Ok(size) => self.state = State::ChunkBody { remaining: size },
                    Err(_) => {
                        log::warn!("Malformed chunk size {:?}; dropping message", text);
                        self.poisoned = true;
                        self.state = State::Trailer;
                    }
                }
            }
            State::ChunkDelimiter => {
                self.state = State::ChunkSize;
            }
            State::Trailer => {
                if line.is_empty() {
                    self.finish_element(completed);
                }
            }
            State::Body { .. } | State::ChunkBody { .. } => unreachable!("body bytes are not line mode; qed"),
        }
    }

    fn end_of_headers(&mut self, provider: &mut dyn BodyProvider<T>, completed: &mut Vec<T>) {
        let transfer = match self.element.as_ref() {
            Some(element) if !self.suppress_body => element.inbound_transfer(),
            _ => Transfer::None,
        };

        match transfer {
            Transfer::None | Transfer::Length(0) => self.finish_element(completed),
            framing => {
                let element = self.element.as_mut().expect("element present after headers; qed");
                provider.link_body(element);
                if let Some(body) = element.body_mut() {
                    body.begin_deserialize();
                }
                if element.inflate_required() {
                    // gzip wrapper, window 15 + 16
                    self.inflater = Some(GzDecoder::new(Vec::new()));
                }
                self.state = match framing {
                    Transfer::Length(length) => State::Body { remaining: length },
                    Transfer::Chunked => State::ChunkSize,
                    Transfer::None => unreachable!(),
                };
            }
        }
    }

    fn absorb(&mut self, bytes: &[u8]) {
        if self.poisoned {
            return;
        }
        let element = match self.element.as_mut() {
            Some(element) => element,
            None => return,
        };
        match self.inflater.as_mut() {
            Some(decoder) => {
                if let Err(error) = decoder.write_all(bytes) {
                    log::warn!("Inflate failed, terminating body: {}", error);
                    self.poisoned = true;
                    return;
                }
                let inflated = mem::replace(decoder.get_mut(), Vec::new());
                feed_body(element, &inflated);
            }
            None => feed_body(element, bytes),
        }
    }

    fn finish_element(&mut self, completed: &mut Vec<T>) {
        if let Some(decoder) = self.inflater.take() {
            match decoder.finish() {
                Ok(inflated) => {
                    if let Some(element) = self.element.as_mut() {
                        if !self.poisoned {
                            feed_body(element, &inflated);
                        }
                    }
                }
                Err(error) => {
                    log::warn!("Inflate did not complete cleanly: {}", error);
                    self.poisoned = true;
                }
            }
        }

        if let Some(mut element) = self.element.take() {
            if let Some(body) = element.body_mut() {
                body.end();
            }
            if self.poisoned {
                log::warn!("Dropping message with terminated body");
            } else {
                completed.push(element);
            }
        }

        self.poisoned = false;
        self.suppress_body = false;
        self.state = State::StartLine;
    }
}

fn feed_body<T: Element>(element: &mut T, mut bytes: &[u8]) {
    let body = match element.body_mut() {
        Some(body) => body,
        None => return,
    };
    while !bytes.is_empty() {
        let taken = body.absorb(bytes);
        if taken == 0 {
            log::warn!("Body absorber stalled; discarding {} bytes", bytes.len());
            return;
        }
        bytes = &bytes[taken..];
    }
}
