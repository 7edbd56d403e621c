//! Incremental serialization of HTTP elements.
//!
//! The serializer owns one element at a time, renders its head eagerly and
//! streams the body lazily, never producing more than the caller's buffer
//! allows per call. Position is kept across calls so emission resumes where
//! it stopped.

use std::fmt;

use crate::body::Body;
use crate::header::CaseMode;

/// Body framing resolved from the headers.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Transfer {
    /// No body follows.
    None,
    /// Exactly this many body bytes follow.
    Length(u64),
    /// Chunked transfer encoding.
    Chunked,
}

/// What the HTTP codec needs from a message, request or response alike.
pub trait Element: Default {
    fn case_mode(&self) -> CaseMode;

    /// Renders the start line, without the trailing CRLF.
    fn render_start_line(&self, out: &mut Vec<u8>);

    /// Renders every present header, each line CRLF-terminated.
    ///
    /// `computed_length` is the body length hint to emit as `Content-Length`
    /// when the element carries no explicit one.
    fn render_headers(&self, out: &mut Vec<u8>, computed_length: Option<u64>);

    /// Resolves the outbound framing, given the body's length hint.
    fn outbound_transfer(&self, hint: Option<u64>) -> Transfer;

    /// Resolves the inbound framing after the header block completed.
    /// Chunked wins over Content-Length when both arrived.
    fn inbound_transfer(&self) -> Transfer;

    /// True when the inbound body is content-encoded and needs inflating.
    fn inflate_required(&self) -> bool;

    fn body(&self) -> Option<&Body>;
    fn body_mut(&mut self) -> Option<&mut Body>;

    /// Applies a start line; false means the line is not one.
    fn parse_start_line(&mut self, line: &str) -> bool;

    /// Applies a header line; unknown names are ignored.
    fn apply_header(&mut self, name: &str, value: &str);
}

/// Renders one `Name: value` header line in the requested case.
pub(crate) fn render_header(out: &mut Vec<u8>, mode: CaseMode, name: &str, value: impl fmt::Display) {
    match mode {
        CaseMode::Raw => out.extend_from_slice(name.as_bytes()),
        CaseMode::Uppercase => out.extend_from_slice(name.to_ascii_uppercase().as_bytes()),
    }
    out.extend_from_slice(b": ");
    out.extend_from_slice(value.to_string().as_bytes());
    out.extend_from_slice(b"\r\n");
}

const SCRATCH: usize = 4096;

enum Phase {
    Idle,
    /// Streaming a body of known length; `remaining` bounds emission.
    Sized { remaining: u64 },
    /// Streaming a chunked body.
    Chunked,
    /// Everything generated; draining `staged` completes the element.
    Last,
}

/// Streaming serializer for one element type.
pub struct Serializer<T> {
    element: Option<T>,
    finished: Option<T>,
    staged: Vec<u8>,
    offset: usize,
    phase: Phase,
}

impl<T: Element> Default for Serializer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Element> Serializer<T> {
    pub fn new() -> Self {
        Serializer {
            element: None,
            finished: None,
            staged: Vec::new(),
            offset: 0,
            phase: Phase::Idle,
        }
    }

    /// True when no element is being emitted.
    pub fn is_idle(&self) -> bool {
        matches!(self.phase, Phase::Idle)
    }

    /// Primes the serializer with the next element. Fails when one is still
    /// in flight; queueing is the caller's business.
    pub fn submit(&mut self, mut element: T) -> Result<(), T> {
        if !self.is_idle() {
            return Err(element);
        }

        let hint = element.body_mut().map(Body::begin_serialize);
        let transfer = element.outbound_transfer(hint);

        self.staged.clear();
        self.offset = 0;
        element.render_start_line(&mut self.staged);
        self.staged.extend_from_slice(b"\r\n");
        let computed = match transfer {
            Transfer::Length(length) => Some(length),
            _ => None,
        };
        element.render_headers(&mut self.staged, computed);
        self.staged.extend_from_slice(b"\r\n");

        self.phase = match transfer {
            Transfer::None => Phase::Last,
            Transfer::Length(0) => Phase::Last,
            Transfer::Length(remaining) => Phase::Sized { remaining },
            Transfer::Chunked => Phase::Chunked,
        };
        self.element = Some(element);
        Ok(())
    }

    /// Takes the element whose emission completed, if any.
    pub fn finished(&mut self) -> Option<T> {
        self.finished.take()
    }

    /// Fills `out` with the next run of serialized bytes; 0 means idle.
    pub fn serialize(&mut self, out: &mut [u8]) -> usize {
        let mut written = 0;

        loop {
            // Drain whatever is staged first.
            if self.offset < self.staged.len() {
                let size = (self.staged.len() - self.offset).min(out.len() - written);
                out[written..written + size].copy_from_slice(&self.staged[self.offset..self.offset + size]);
                self.offset += size;
                written += size;
                if written == out.len() {
                    return written;
                }
            }
            self.staged.clear();
            self.offset = 0;

            match &mut self.phase {
                Phase::Idle => return written,
                Phase::Last => {
                    let mut element = self.element.take().expect("element present while serializing; qed");
                    if let Some(body) = element.body_mut() {
                        body.end();
                    }
                    self.finished = Some(element);
                    self.phase = Phase::Idle;
                    return written;
                }
                Phase::Sized { remaining } => {
                    let element = self.element.as_mut().expect("element present while serializing; qed");
                    let cap = (*remaining).min(SCRATCH as u64) as usize;
                    let mut scratch = [0u8; SCRATCH];
                    let produced = match element.body_mut() {
                        Some(body) if cap > 0 => body.emit(&mut scratch[..cap]),
                        _ => 0,
                    };
                    if produced == 0 {
                        self.phase = Phase::Last;
                    } else {
                        *remaining -= produced as u64;
                        self.staged.extend_from_slice(&scratch[..produced]);
                        if *remaining == 0 {
                            self.phase = Phase::Last;
                        }
                    }
                }
                Phase::Chunked => {
                    let element = self.element.as_mut().expect("element present while serializing; qed");
                    let mut scratch = [0u8; SCRATCH];
                    let produced = match element.body_mut() {
                        Some(body) => body.emit(&mut scratch),
                        None => 0,
                    };
                    if produced == 0 {
                        self.staged.extend_from_slice(b"0\r\n\r\n");
                        self.phase = Phase::Last;
                    } else {
                        self.staged.extend_from_slice(format!("{:x}\r\n", produced).as_bytes());
                        self.staged.extend_from_slice(&scratch[..produced]);
                        self.staged.extend_from_slice(b"\r\n");
                    }
                }
            }
        }
    }
}
