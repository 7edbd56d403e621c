//! The WebSocket link: handshake state machine plus frame pump over one
//! `TcpStream`, in both client and server role.
//!
//! State walks `WebService → Upgrading → WebSocket`; a failed client
//! upgrade falls back to `WebService` (the owner sees it via
//! `state_change`), a `403` closes the link. `close()` suspends the link,
//! flushes a CLOSE frame and drains for a bounded time before the transport
//! goes down.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::channel::mpsc;
use futures::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt, WriteHalf};
use tokio::net::TcpStream;

use framewire_codec::deserialize::NoBody;
use framewire_codec::header::Protocols;
use framewire_codec::response::STATUS_FORBIDDEN;
use framewire_codec::serialize::Element;
use framewire_codec::ws::{self, FrameCodec, FrameEvent, FrameKind};
use framewire_codec::{Deserializer, Request, Response, Serializer, Url};

/// Close drain bound when the owner does not supply one.
const DEFAULT_CLOSE_WAIT: Duration = Duration::from_millis(1000);

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SocketState {
    /// Plain HTTP; no upgrade performed (or the upgrade fell back).
    WebService,
    /// Upgrade request in flight.
    Upgrading,
    /// RFC 6455 framing active.
    WebSocket,
    /// Transport gone.
    Closed,
}

impl SocketState {
    fn encode(self) -> u8 {
        match self {
            SocketState::WebService => 0,
            SocketState::Upgrading => 1,
            SocketState::WebSocket => 2,
            SocketState::Closed => 3,
        }
    }

    fn decode(raw: u8) -> SocketState {
        match raw {
            0 => SocketState::WebService,
            1 => SocketState::Upgrading,
            2 => SocketState::WebSocket,
            _ => SocketState::Closed,
        }
    }
}

/// Owner callbacks. All of them run on the link's IO task.
pub trait WsHandler: Send + 'static {
    /// Delivered once, before any traffic, so the owner can talk back.
    fn attached(&mut self, _link: WebSocketLink) {}
    /// Every transition of the upgrade state machine.
    fn state_change(&mut self, _state: SocketState) {}
    /// A complete, defragmented data message.
    fn message(&mut self, _payload: Vec<u8>) {}
    /// Round-trip time measured by a ping/pong exchange.
    fn pong(&mut self, _rtt: Duration) {}
    /// Server role: the upgrade response about to be sent. Setting the
    /// status to anything but 101 (plus a reason) aborts the upgrade.
    fn upgrading(&mut self, _request: &Request, _response: &mut Response) {}
}

enum Command {
    Send(Vec<u8>),
    Ping,
    Close(Duration),
}

struct Shared {
    state: AtomicU8,
    suspended: AtomicBool,
    activity: AtomicBool,
}

/// Cloneable handle onto a running websocket link task.
#[derive(Clone)]
pub struct WebSocketLink {
    to_task: mpsc::Sender<Command>,
    shared: Arc<Shared>,
}

impl WebSocketLink {
    /// Client role: connect and immediately initiate the upgrade.
    pub async fn connect(
        url: &Url,
        protocols: Option<Protocols>,
        handler: impl WsHandler,
        queue_size: usize,
    ) -> io::Result<WebSocketLink> {
        let host = url.host().unwrap_or("127.0.0.1").to_string();
        let port = url.port().unwrap_or(80);
        let stream = TcpStream::connect((host.as_str(), port)).await?;

        let path = match url.path() {
            Some(path) => format!("/{}", path),
            None => "/".to_string(),
        };
        let request = ws::upgrade_request(
            format!("{}:{}", host, port),
            path,
            url.query().map(str::to_string),
            protocols,
            None,
        );
        Ok(Self::spawn(stream, Role::Client { request }, handler, queue_size))
    }

    /// Server role: drive an accepted connection; the upgrade is performed
    /// when the peer asks for it.
    pub fn serve(stream: TcpStream, handler: impl WsHandler, queue_size: usize) -> WebSocketLink {
        Self::spawn(stream, Role::Server, handler, queue_size)
    }

    fn spawn(stream: TcpStream, role: Role, mut handler: impl WsHandler, queue_size: usize) -> WebSocketLink {
        let (to_task, commands) = mpsc::channel(queue_size);
        let shared = Arc::new(Shared {
            state: AtomicU8::new(SocketState::WebService.encode()),
            suspended: AtomicBool::new(false),
            activity: AtomicBool::new(false),
        });
        let link = WebSocketLink {
            to_task,
            shared: shared.clone(),
        };
        handler.attached(link.clone());
        tokio::spawn(run(stream, role, commands, handler, shared));
        link
    }

    /// Queues one data message; false when the FIFO is full or the task is
    /// gone.
    pub fn send(&self, payload: Vec<u8>) -> bool {
        self.to_task.clone().try_send(Command::Send(payload)).is_ok()
    }

    /// Requests a PING on the next flush.
    pub fn ping(&self) -> bool {
        self.to_task.clone().try_send(Command::Ping).is_ok()
    }

    /// Suspends the link, sends CLOSE and tears the transport down after at
    /// most `wait`.
    pub fn close(&self, wait: Duration) -> bool {
        self.shared.suspended.store(true, Ordering::Relaxed);
        self.to_task.clone().try_send(Command::Close(wait)).is_ok()
    }

    pub fn state(&self) -> SocketState {
        SocketState::decode(self.shared.state.load(Ordering::Relaxed))
    }

    pub fn is_open(&self) -> bool {
        self.state() == SocketState::WebSocket && !self.is_suspended()
    }

    pub fn is_suspended(&self) -> bool {
        self.shared.suspended.load(Ordering::Relaxed)
    }

    /// Monitor bit: any frame traffic since the last reset.
    pub fn has_activity(&self) -> bool {
        self.shared.activity.load(Ordering::Relaxed)
    }

    pub fn reset_activity(&self) {
        self.shared.activity.store(false, Ordering::Relaxed);
    }
}

enum Role {
    Client { request: Request },
    Server,
}

struct Pump<H: WsHandler> {
    writer: WriteHalf<TcpStream>,
    handler: H,
    shared: Arc<Shared>,
    codec: FrameCodec,
    state: SocketState,
    sent_key: String,
    stash: Vec<u8>,
    message: Vec<u8>,
    request_parser: Deserializer<Request>,
    response_parser: Deserializer<Response>,
    closing: bool,
}

impl<H: WsHandler> Pump<H> {
    fn enter(&mut self, state: SocketState) {
        self.state = state;
        self.shared.state.store(state.encode(), Ordering::Relaxed);
        self.handler.state_change(state);
    }

    async fn write_element<T: Element>(&mut self, element: T) -> io::Result<()> {
        let mut serializer: Serializer<T> = Serializer::new();
        serializer
            .submit(element)
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "serializer busy"))?;
        let mut buffer = [0u8; 4096];
        loop {
            let written = serializer.serialize(&mut buffer);
            if written == 0 {
                break;
            }
            self.writer.write_all(&buffer[..written]).await?;
        }
        serializer.finished();
        Ok(())
    }

    async fn flush_control(&mut self) -> io::Result<()> {
        let mut buffer = [0u8; 16];
        let written = self.codec.encode_control(&mut buffer);
        if written > 0 {
            self.writer.write_all(&buffer[..written]).await?;
        }
        Ok(())
    }

    async fn send_payload(&mut self, payload: &[u8]) -> io::Result<()> {
        // Headroom for the data frame header plus a piggy-backed control
        // frame.
        let mut frame = vec![0u8; payload.len() + 14 + 8];
        let written = self.codec.encode_data(payload, false, &mut frame);
        self.writer.write_all(&frame[..written]).await
    }

    /// Processes buffered bytes; true means the link must go down.
    async fn drain_stash(&mut self) -> io::Result<bool> {
        loop {
            match self.state {
                SocketState::WebSocket => {
                    if self.drain_frames().await? {
                        return Ok(true);
                    }
                    return Ok(false);
                }
                SocketState::Upgrading | SocketState::WebService => {
                    if !self.drain_http().await? {
                        return Ok(false);
                    }
                    if self.state == SocketState::Closed {
                        return Ok(true);
                    }
                    // A state switch happened; loop so leftover bytes are
                    // interpreted by the new protocol.
                    if self.stash.is_empty() {
                        return Ok(false);
                    }
                }
                SocketState::Closed => return Ok(true),
            }
        }
    }

    /// Frame mode. True means close the link.
    async fn drain_frames(&mut self) -> io::Result<bool> {
        loop {
            let (consumed, event) = self.codec.decode(&mut self.stash);
            match event {
                FrameEvent::Data {
                    offset,
                    length,
                    end_of_message,
                } => {
                    self.message.extend_from_slice(&self.stash[offset..offset + length]);
                    if end_of_message {
                        let payload = std::mem::replace(&mut self.message, Vec::new());
                        self.handler.message(payload);
                    }
                }
                FrameEvent::Control {
                    kind: FrameKind::Close,
                    ..
                } => {
                    // Echo queued by the codec; flush it and go down.
                    self.stash.drain(..consumed);
                    self.flush_control().await?;
                    return Ok(true);
                }
                FrameEvent::Control {
                    kind: FrameKind::Pong, ..
                } => {
                    if let Some(rtt) = self.codec.last_rtt() {
                        self.handler.pong(rtt);
                    }
                }
                FrameEvent::Control { .. } => {
                    // A PING queued its PONG; answer promptly.
                    self.stash.drain(..consumed);
                    self.flush_control().await?;
                    continue;
                }
                FrameEvent::Error(kind) => {
                    log::warn!("[wslink] Frame error {:?}; closing", kind);
                    self.codec.request_close();
                    self.stash.drain(..consumed);
                    self.flush_control().await?;
                    return Ok(true);
                }
                FrameEvent::Pending => {}
            }
            self.stash.drain(..consumed);
            if consumed == 0 {
                return Ok(false);
            }
        }
    }

    /// HTTP mode. False means nothing further can be done with the stash.
    async fn drain_http(&mut self) -> io::Result<bool> {
        // The client role is the side that sent an upgrade key.
        if !self.sent_key.is_empty() {
            let stash = std::mem::replace(&mut self.stash, Vec::new());
            let (consumed, response) = self.response_parser.consume_one(&stash, &mut NoBody);
            self.stash = stash[consumed..].to_vec();
            return match response {
                None => Ok(false),
                Some(response) if self.state == SocketState::Upgrading => {
                    if ws::accepts(&response, &self.sent_key) {
                        self.enter(SocketState::WebSocket);
                    } else if response.code == STATUS_FORBIDDEN {
                        log::warn!("[wslink] Upgrade forbidden by peer");
                        self.enter(SocketState::Closed);
                    } else {
                        log::debug!("[wslink] Upgrade declined ({}); staying HTTP", response.code);
                        self.enter(SocketState::WebService);
                    }
                    Ok(true)
                }
                Some(response) => {
                    log::debug!("[wslink] Dropping HTTP response ({}) outside an upgrade", response.code);
                    Ok(true)
                }
            };
        }

        // Server role: wait for an upgrade request.
        let stash = std::mem::replace(&mut self.stash, Vec::new());
        let (consumed, request) = self.request_parser.consume_one(&stash, &mut NoBody);
        self.stash = stash[consumed..].to_vec();
        match request {
            None => Ok(false),
            Some(request) => {
                if request.is_websocket_upgrade() {
                    self.enter(SocketState::Upgrading);
                    let mut response = ws::accept_response(&request);
                    self.handler.upgrading(&request, &mut response);
                    let upgraded = response.is_websocket_upgrade();
                    self.write_element(response).await?;
                    if upgraded {
                        self.enter(SocketState::WebSocket);
                    } else {
                        self.enter(SocketState::WebService);
                    }
                } else {
                    log::debug!(
                        "[wslink] Non-upgrade request on websocket port: {} {}",
                        request.verb,
                        request.path
                    );
                    self.write_element(Response::status(framewire_codec::response::STATUS_NOT_FOUND))
                        .await?;
                }
                Ok(true)
            }
        }
    }
}

async fn run<H: WsHandler>(
    stream: TcpStream,
    role: Role,
    mut commands: mpsc::Receiver<Command>,
    handler: H,
    shared: Arc<Shared>,
) {
    let (mut reader, writer) = tokio::io::split(stream);
    let masked = matches!(role, Role::Client { .. });

    let mut pump = Pump {
        writer,
        handler,
        shared,
        codec: FrameCodec::new(false, masked),
        state: SocketState::WebService,
        sent_key: String::new(),
        stash: Vec::new(),
        message: Vec::new(),
        request_parser: Deserializer::new(),
        response_parser: Deserializer::new(),
        closing: false,
    };

    if let Role::Client { request } = role {
        pump.sent_key = request.websocket_key.clone().unwrap_or_default();
        pump.enter(SocketState::Upgrading);
        if pump.write_element(request).await.is_err() {
            pump.enter(SocketState::Closed);
            return;
        }
    }

    let mut read_buffer = vec![0u8; 4096];
    let mut close_deadline: Option<tokio::time::Instant> = None;
    let mut commands_done = false;

    loop {
        tokio::select! {
            _ = async {
                match close_deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            }, if close_deadline.is_some() => {
                log::debug!("[wslink] Close drain expired");
                break;
            }
            command = commands.next(), if !commands_done => match command {
                Some(Command::Send(payload)) => {
                    if pump.state == SocketState::WebSocket && !pump.closing {
                        pump.shared.activity.store(true, Ordering::Relaxed);
                        if pump.send_payload(&payload).await.is_err() {
                            break;
                        }
                    } else {
                        log::warn!("[wslink] Dropping payload submitted in state {:?}", pump.state);
                    }
                }
                Some(Command::Ping) => {
                    pump.codec.request_ping();
                    if pump.flush_control().await.is_err() {
                        break;
                    }
                }
                Some(Command::Close(wait)) => {
                    pump.closing = true;
                    pump.shared.suspended.store(true, Ordering::Relaxed);
                    if pump.state == SocketState::WebSocket {
                        pump.codec.request_close();
                        let _ = pump.flush_control().await;
                        // Drain until the peer echoes the close, bounded.
                        close_deadline = Some(tokio::time::Instant::now() + wait.max(Duration::from_millis(1)));
                    } else {
                        break;
                    }
                }
                None => {
                    // Owner dropped every handle.
                    commands_done = true;
                    if pump.state == SocketState::WebSocket {
                        pump.codec.request_close();
                        let _ = pump.flush_control().await;
                        close_deadline = Some(tokio::time::Instant::now() + DEFAULT_CLOSE_WAIT);
                    } else {
                        break;
                    }
                }
            },
            result = reader.read(&mut read_buffer) => match result {
                Ok(0) => break,
                Ok(received) => {
                    pump.shared.activity.store(true, Ordering::Relaxed);
                    pump.stash.extend_from_slice(&read_buffer[..received]);
                    match pump.drain_stash().await {
                        Ok(false) => {}
                        Ok(true) => break,
                        Err(error) => {
                            log::warn!("[wslink] Write failed: {}", error);
                            break;
                        }
                    }
                }
                Err(error) => {
                    log::debug!("[wslink] Read failed: {}", error);
                    break;
                }
            },
        }
    }

    if pump.state != SocketState::Closed {
        pump.enter(SocketState::Closed);
    }
}
