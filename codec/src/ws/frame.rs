use std::mem;
use std::time::{Duration, Instant};

use rand::RngCore;

const OPCODE_CONTINUATION: u8 = 0x0;
const OPCODE_TEXT: u8 = 0x1;
const OPCODE_BINARY: u8 = 0x2;
const OPCODE_CLOSE: u8 = 0x8;
const OPCODE_PING: u8 = 0x9;
const OPCODE_PONG: u8 = 0xA;

const FIN: u8 = 0x80;
const MASK: u8 = 0x80;

const REQUEST_CLOSE: u8 = 0x01;
const REQUEST_PING: u8 = 0x02;
const REQUEST_PONG: u8 = 0x04;

/// The logical classification surfaced to the owner.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FrameKind {
    Text,
    Binary,
    Close,
    Ping,
    Pong,
    /// Reserved opcode, stray continuation, or fragmented control frame.
    Violation,
    /// Declared payload length does not fit 32 bits.
    TooBig,
    /// Data opcode does not match the configured mode.
    Inconsistent,
}

impl FrameKind {
    pub fn is_error(&self) -> bool {
        matches!(self, FrameKind::Violation | FrameKind::TooBig | FrameKind::Inconsistent)
    }
}

/// One step of incremental decoding.
#[derive(Debug, Eq, PartialEq)]
pub enum FrameEvent {
    /// More input is needed before anything can be classified.
    Pending,
    /// A run of data-frame payload, unmasked in place in the input buffer
    /// at `offset..offset + length`.
    Data {
        offset: usize,
        length: usize,
        /// True when this run completes a message (FIN frame fully read).
        end_of_message: bool,
    },
    /// A complete control frame; the payload is fully assembled.
    Control { kind: FrameKind, payload: Vec<u8> },
    /// Protocol error; policy is to log and close.
    Error(FrameKind),
}

/// Frame-level state for one websocket connection, both directions.
pub struct FrameCodec {
    binary: bool,
    masked: bool,

    // outbound
    send_in_progress: bool,
    control: u8,
    ping_fired: Option<Instant>,
    rtt: Option<Duration>,

    // inbound data frame in progress
    recv_in_progress: bool,
    recv_fin: bool,
    pending: u64,
    unmask: Option<[u8; 4]>,
    mask_index: usize,

    // inbound control frame in progress
    control_kind: u8,
    control_pending: usize,
    control_unmask: Option<[u8; 4]>,
    control_mask_index: usize,
    control_buffer: Vec<u8>,
}

impl FrameCodec {
    /// `binary` selects the data opcode; `masked` must be true for the
    /// client-to-server direction and false for the reverse.
    pub fn new(binary: bool, masked: bool) -> Self {
        FrameCodec {
            binary,
            masked,
            send_in_progress: false,
            control: 0,
            ping_fired: None,
            rtt: None,
            recv_in_progress: false,
            recv_fin: true,
            pending: 0,
            unmask: None,
            mask_index: 0,
            control_kind: 0,
            control_pending: 0,
            control_unmask: None,
            control_mask_index: 0,
            control_buffer: Vec::new(),
        }
    }

    /// Requests a PING on the next outbound flush.
    pub fn request_ping(&mut self) {
        self.control |= REQUEST_PING;
    }

    /// Requests a CLOSE on the next outbound flush.
    pub fn request_close(&mut self) {
        self.control |= REQUEST_CLOSE;
    }

    /// True while control frames wait to be flushed.
    pub fn has_control_requests(&self) -> bool {
        self.control != 0
    }

    /// True when a CLOSE has been requested and not yet flushed.
    pub fn close_requested(&self) -> bool {
        (self.control & REQUEST_CLOSE) != 0
    }

    /// Round-trip time measured by the last PING/PONG exchange.
    pub fn last_rtt(&self) -> Option<Duration> {
        self.rtt
    }

    /// True when nothing outbound or inbound is half-done.
    pub fn is_idle(&self) -> bool {
        !self.send_in_progress && self.control == 0 && self.pending == 0 && self.control_pending == 0
    }

    /// Encodes one data frame followed by any pending control frames.
    ///
    /// `more` keeps the message open: the frame is emitted without FIN and
    /// subsequent frames continue it with opcode 0. The buffer must hold the
    /// whole frame; an undersized buffer encodes nothing.
    pub fn encode_data(&mut self, payload: &[u8], more: bool, out: &mut [u8]) -> usize {
        let mut written = 0;

        if !payload.is_empty() || self.send_in_progress {
            let header = self.data_header_size(payload.len());
            if out.len() < header + payload.len() {
                return 0;
            }

            let opcode = if self.send_in_progress {
                OPCODE_CONTINUATION
            } else if self.binary {
                OPCODE_BINARY
            } else {
                OPCODE_TEXT
            };
            out[0] = if more { opcode } else { FIN | opcode };

            let mask_bit = if self.masked { MASK } else { 0 };
            let mut cursor = 2;
            if payload.len() <= 125 {
                out[1] = mask_bit | payload.len() as u8;
            } else if payload.len() <= 0xFFFF {
                out[1] = mask_bit | 126;
                out[2..4].copy_from_slice(&(payload.len() as u16).to_be_bytes());
                cursor = 4;
            } else {
                out[1] = mask_bit | 127;
                out[2..10].copy_from_slice(&(payload.len() as u64).to_be_bytes());
                cursor = 10;
            }

            if self.masked {
                let key = mask_key();
                out[cursor..cursor + 4].copy_from_slice(&key);
                cursor += 4;
                for (index, byte) in payload.iter().enumerate() {
                    out[cursor + index] = byte ^ key[index & 0x3];
                }
            } else {
                out[cursor..cursor + payload.len()].copy_from_slice(payload);
            }

            self.send_in_progress = more;
            written = header + payload.len();
        }

        written + self.append_control(&mut out[written..])
    }

    /// Flushes pending control frames alone, without a data frame.
    pub fn encode_control(&mut self, out: &mut [u8]) -> usize {
        self.append_control(out)
    }

    fn append_control(&mut self, out: &mut [u8]) -> usize {
        let frame_size = if self.masked { 6 } else { 2 };
        let mut written = 0;

        for &(request, opcode) in &[
            (REQUEST_CLOSE, OPCODE_CLOSE),
            (REQUEST_PING, OPCODE_PING),
            (REQUEST_PONG, OPCODE_PONG),
        ] {
            if (self.control & request) != 0 && out.len() - written >= frame_size {
                out[written] = FIN | opcode;
                out[written + 1] = if self.masked { MASK } else { 0 };
                written += 2;
                if self.masked {
                    out[written..written + 4].copy_from_slice(&mask_key());
                    written += 4;
                }
                self.control &= !request;
                if request == REQUEST_PING {
                    self.ping_fired = Some(Instant::now());
                }
            }
        }

        written
    }

    fn data_header_size(&self, length: usize) -> usize {
        let extended = if length > 0xFFFF {
            8
        } else if length > 125 {
            2
        } else {
            0
        };
        2 + extended + if self.masked { 4 } else { 0 }
    }

    /// Decodes the next frame (or frame fragment) from `data`, unmasking
    /// data payloads in place. Returns how many bytes were consumed.
    pub fn decode(&mut self, data: &mut [u8]) -> (usize, FrameEvent) {
        // Payload continuation of a data frame.
        if self.pending > 0 {
            let take = self.pending.min(data.len() as u64) as usize;
            self.unmask_in_place(&mut data[..take]);
            self.pending -= take as u64;
            let end_of_message = self.recv_fin && self.pending == 0;
            return (
                take,
                FrameEvent::Data {
                    offset: 0,
                    length: take,
                    end_of_message,
                },
            );
        }

        // Payload continuation of a control frame.
        if self.control_pending > 0 {
            let take = self.control_pending.min(data.len());
            self.buffer_control(&data[..take]);
            return if self.control_pending == 0 {
                (take, self.finish_control())
            } else {
                (take, FrameEvent::Pending)
            };
        }

        if data.len() < 2 {
            return (0, FrameEvent::Pending);
        }

        let fin = (data[0] & FIN) != 0;
        let opcode = data[0] & 0x0F;
        let masked = (data[1] & MASK) != 0;
        let length7 = data[1] & 0x7F;

        let header = 2
            + match length7 {
                127 => 8,
                126 => 2,
                _ => 0,
            }
            + if masked { 4 } else { 0 };
        if data.len() < header {
            return (0, FrameEvent::Pending);
        }

        let length: u64 = match length7 {
            126 => u64::from(u16::from_be_bytes([data[2], data[3]])),
            127 => u64::from_be_bytes([data[2], data[3], data[4], data[5], data[6], data[7], data[8], data[9]]),
            short => u64::from(short),
        };
        let key = if masked {
            let offset = header - 4;
            Some([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]])
        } else {
            None
        };

        // Reserved opcodes are a violation outright.
        if matches!(opcode, 0x3..=0x7) || opcode > OPCODE_PONG {
            return (data.len(), FrameEvent::Error(FrameKind::Violation));
        }

        if (opcode & 0x8) != 0 {
            // Control frames must be final and short.
            if !fin || length > 125 {
                return (data.len(), FrameEvent::Error(FrameKind::Violation));
            }
            self.control_kind = opcode;
            self.control_pending = length as usize;
            self.control_unmask = key;
            self.control_mask_index = 0;
            self.control_buffer.clear();

            let available = self.control_pending.min(data.len() - header);
            self.buffer_control(&data[header..header + available]);
            let consumed = header + available;
            return if self.control_pending == 0 {
                (consumed, self.finish_control())
            } else {
                (consumed, FrameEvent::Pending)
            };
        }

        // Data frame.
        if opcode == OPCODE_CONTINUATION {
            if !self.recv_in_progress {
                return (data.len(), FrameEvent::Error(FrameKind::Violation));
            }
            if fin {
                self.recv_in_progress = false;
            }
        } else {
            let expected = if self.binary { OPCODE_BINARY } else { OPCODE_TEXT };
            if opcode != expected {
                return (data.len(), FrameEvent::Error(FrameKind::Inconsistent));
            }
            self.recv_in_progress = !fin;
        }

        if length >= (1u64 << 32) {
            return (data.len(), FrameEvent::Error(FrameKind::TooBig));
        }

        self.recv_fin = fin;
        self.pending = length;
        self.unmask = key;
        self.mask_index = 0;

        let available = self.pending.min((data.len() - header) as u64) as usize;
        self.unmask_in_place(&mut data[header..header + available]);
        self.pending -= available as u64;
        let end_of_message = fin && self.pending == 0;

        (
            header + available,
            FrameEvent::Data {
                offset: header,
                length: available,
                end_of_message,
            },
        )
    }

    fn unmask_in_place(&mut self, data: &mut [u8]) {
        if let Some(key) = self.unmask {
            for byte in data.iter_mut() {
                *byte ^= key[self.mask_index & 0x3];
                self.mask_index += 1;
            }
        }
    }

    fn buffer_control(&mut self, data: &[u8]) {
        match self.control_unmask {
            Some(key) => {
                for &byte in data {
                    self.control_buffer.push(byte ^ key[self.control_mask_index & 0x3]);
                    self.control_mask_index += 1;
                }
            }
            None => self.control_buffer.extend_from_slice(data),
        }
        self.control_pending -= data.len();
    }

    fn finish_control(&mut self) -> FrameEvent {
        let payload = mem::replace(&mut self.control_buffer, Vec::new());
        match self.control_kind {
            OPCODE_CLOSE => {
                // Echo the close on the next flush.
                self.control |= REQUEST_CLOSE;
                FrameEvent::Control {
                    kind: FrameKind::Close,
                    payload,
                }
            }
            OPCODE_PING => {
                self.control |= REQUEST_PONG;
                FrameEvent::Control {
                    kind: FrameKind::Ping,
                    payload,
                }
            }
            OPCODE_PONG => {
                match self.ping_fired.take() {
                    Some(fired) => self.rtt = Some(fired.elapsed()),
                    None => log::debug!("Pong received without an outstanding ping"),
                }
                FrameEvent::Control {
                    kind: FrameKind::Pong,
                    payload,
                }
            }
            _ => FrameEvent::Error(FrameKind::Violation),
        }
    }
}

fn mask_key() -> [u8; 4] {
    let mut key = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut key);
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(codec: &mut FrameCodec, data: &mut [u8]) -> (Vec<u8>, bool) {
        let mut collected = Vec::new();
        let mut complete = false;
        let mut cursor = 0;
        while cursor < data.len() {
            let (consumed, event) = codec.decode(&mut data[cursor..]);
            match event {
                FrameEvent::Data {
                    offset,
                    length,
                    end_of_message,
                } => {
                    collected.extend_from_slice(&data[cursor + offset..cursor + offset + length]);
                    complete = end_of_message;
                }
                FrameEvent::Pending if consumed == 0 => break,
                FrameEvent::Pending => {}
                other => panic!("unexpected event {:?}", other),
            }
            cursor += consumed;
        }
        (collected, complete)
    }

    #[test]
    fn masked_roundtrip_130_bytes() {
        let payload: Vec<u8> = (0u16..130).map(|n| n as u8).collect();
        let mut client = FrameCodec::new(false, true);
        let mut buffer = vec![0u8; 256];
        let written = client.encode_data(&payload, false, &mut buffer);
        // 2 byte base + 2 byte extended length + 4 byte mask key
        assert_eq!(written, 8 + payload.len());
        assert_eq!(buffer[0], 0x81);
        assert_eq!(buffer[1] & 0x80, 0x80);
        assert_eq!(buffer[1] & 0x7F, 126);
        assert_eq!(u16::from_be_bytes([buffer[2], buffer[3]]), 130);

        let mut server = FrameCodec::new(false, false);
        let (collected, complete) = decode_all(&mut server, &mut buffer[..written]);
        assert!(complete);
        assert_eq!(collected, payload);
    }

    #[test]
    fn unmasked_small_frame() {
        let mut server = FrameCodec::new(false, false);
        let mut buffer = vec![0u8; 64];
        let written = server.encode_data(b"hi", false, &mut buffer);
        assert_eq!(written, 4);
        assert_eq!(&buffer[..written], &[0x81, 0x02, b'h', b'i']);
    }

    #[test]
    fn payload_split_across_reads() {
        let mut client = FrameCodec::new(false, true);
        let mut frame = vec![0u8; 64];
        let written = client.encode_data(b"split-me-in-two", false, &mut frame);

        // A reader keeps unconsumed bytes around, exactly like the pump does.
        let mut server = FrameCodec::new(false, false);
        let mut collected = Vec::new();
        let mut stash: Vec<u8> = Vec::new();
        for chunk in frame[..written].to_vec().chunks(3) {
            stash.extend_from_slice(chunk);
            loop {
                let (consumed, event) = server.decode(&mut stash);
                if let FrameEvent::Data { offset, length, .. } = event {
                    collected.extend_from_slice(&stash[offset..offset + length]);
                }
                stash.drain(..consumed);
                if consumed == 0 {
                    break;
                }
            }
        }
        assert_eq!(collected, b"split-me-in-two");
    }

    #[test]
    fn fragmented_message() {
        let mut sender = FrameCodec::new(false, false);
        let mut buffer = vec![0u8; 64];
        let first = sender.encode_data(b"frag", true, &mut buffer);
        assert_eq!(buffer[0], 0x01, "no FIN, text opcode");
        let second = sender.encode_data(b"ment", false, &mut buffer[first..]);
        assert_eq!(buffer[first], 0x80, "FIN, continuation opcode");

        let mut receiver = FrameCodec::new(false, false);
        let (collected, complete) = decode_all(&mut receiver, &mut buffer[..first + second]);
        assert!(complete);
        assert_eq!(collected, b"fragment");
    }

    #[test]
    fn stray_continuation_is_violation() {
        let mut codec = FrameCodec::new(false, false);
        let mut frame = vec![0x80, 0x02, b'x', b'y'];
        let (_, event) = codec.decode(&mut frame);
        assert_eq!(event, FrameEvent::Error(FrameKind::Violation));
    }

    #[test]
    fn reserved_opcode_is_violation() {
        let mut codec = FrameCodec::new(false, false);
        let mut frame = vec![0x83, 0x00];
        let (_, event) = codec.decode(&mut frame);
        assert_eq!(event, FrameEvent::Error(FrameKind::Violation));
    }

    #[test]
    fn fragmented_control_is_violation() {
        let mut codec = FrameCodec::new(false, false);
        let mut frame = vec![0x09, 0x00]; // PING without FIN
        let (_, event) = codec.decode(&mut frame);
        assert_eq!(event, FrameEvent::Error(FrameKind::Violation));
    }

    #[test]
    fn binary_frame_on_text_link_is_inconsistent() {
        let mut codec = FrameCodec::new(false, false);
        let mut frame = vec![0x82, 0x01, 0xFF];
        let (_, event) = codec.decode(&mut frame);
        assert_eq!(event, FrameEvent::Error(FrameKind::Inconsistent));
    }

    #[test]
    fn oversized_frame_is_too_big() {
        let mut codec = FrameCodec::new(false, false);
        let mut frame = vec![0x81, 127, 0, 0, 0, 1, 0, 0, 0, 0]; // 2^32
        let (_, event) = codec.decode(&mut frame);
        assert_eq!(event, FrameEvent::Error(FrameKind::TooBig));
    }

    #[test]
    fn ping_is_answered_and_close_echoed() {
        let mut codec = FrameCodec::new(false, false);
        let mut ping = vec![0x89, 0x00];
        let (_, event) = codec.decode(&mut ping);
        assert_eq!(
            event,
            FrameEvent::Control {
                kind: FrameKind::Ping,
                payload: vec![],
            }
        );
        assert!(codec.has_control_requests());
        let mut out = [0u8; 8];
        let written = codec.encode_control(&mut out);
        assert_eq!(&out[..written], &[0x8A, 0x00], "bare PONG");

        let mut close = vec![0x88, 0x02, 0x03, 0xE8]; // status 1000
        let (_, event) = codec.decode(&mut close);
        assert_eq!(
            event,
            FrameEvent::Control {
                kind: FrameKind::Close,
                payload: vec![0x03, 0xE8],
            }
        );
        let written = codec.encode_control(&mut out);
        assert_eq!(&out[..written], &[0x88, 0x00], "close echoed");
    }

    #[test]
    fn control_frame_appended_after_data() {
        let mut codec = FrameCodec::new(false, false);
        codec.request_ping();
        let mut out = [0u8; 32];
        let written = codec.encode_data(b"data", false, &mut out);
        assert_eq!(&out[..written], &[0x81, 0x04, b'd', b'a', b't', b'a', 0x89, 0x00]);
        assert!(!codec.has_control_requests());
    }

    #[test]
    fn control_frame_held_without_headroom() {
        let mut codec = FrameCodec::new(false, false);
        codec.request_ping();
        let mut out = [0u8; 6]; // data frame fits, ping does not
        let written = codec.encode_data(b"data", false, &mut out);
        assert_eq!(written, 6);
        assert!(codec.has_control_requests(), "ping still pending");
        let mut next = [0u8; 2];
        let written = codec.encode_control(&mut next);
        assert_eq!(&next[..written], &[0x89, 0x00]);
    }

    #[test]
    fn pong_measures_rtt() {
        let mut codec = FrameCodec::new(false, true);
        codec.request_ping();
        let mut out = [0u8; 8];
        codec.encode_control(&mut out);
        assert!(codec.last_rtt().is_none());

        let mut pong = vec![0x8A, 0x00];
        codec.decode(&mut pong);
        assert!(codec.last_rtt().is_some());
    }
}
