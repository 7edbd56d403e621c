//! Per-channel proxy/stub administration.
//!
//! The administrator owns the channel's stub set (so nothing leaks across a
//! disconnect even when the peer never released) and deduplicates proxies
//! per `(interface, instance)`. A proxy keeps at most one invocation in
//! flight; callers queue FIFO behind it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;

use crate::frame::FrameReader;
use crate::message::{self, Announcement, Payload};
use crate::registry::Registry;
use crate::Fault;

/// The channel under the runtime: exchanges invoke frames, posts
/// fire-and-forget frames.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn exchange(&self, frame: Vec<u8>) -> Result<Vec<u8>, Fault>;
    fn post(&self, frame: Vec<u8>);
}

/// Server half of an interface: reads typed parameters off the frame,
/// invokes the real object, writes the response frame.
pub trait Stub: Send + Sync {
    fn interface(&self) -> u32;
    fn invoke(&self, method: u8, parameters: FrameReader<'_>) -> Result<Vec<u8>, Fault>;
}

/// Client half of an interface pointer living on the other channel end.
pub struct Proxy {
    transport: Arc<dyn Transport>,
    administrator: Weak<Administrator>,
    interface: u32,
    instance: u32,
    // Fair lock: one invocation in flight, the rest queue in order.
    in_flight: tokio::sync::Mutex<()>,
}

impl Proxy {
    pub fn interface(&self) -> u32 {
        self.interface
    }

    pub fn instance(&self) -> u32 {
        self.instance
    }

    /// Invokes `method` with marshalled `parameters`; resolves with the
    /// response frame, or `Aborted` when the channel dies first.
    pub async fn invoke(&self, method: u8, parameters: Vec<u8>) -> Result<Vec<u8>, Fault> {
        let _turn = self.in_flight.lock().await;
        let frame = message::InvokeRequest {
            instance: self.instance,
            interface: self.interface,
            method,
            parameters,
        }
        .encode();
        self.transport.exchange(frame).await
    }
}

impl Drop for Proxy {
    fn drop(&mut self) {
        if let Some(administrator) = self.administrator.upgrade() {
            administrator.forget(self.interface, self.instance);
        }
        // Tell the other side to drop its hold on the real object.
        self.transport.post(message::encode_release(self.instance));
    }
}

#[derive(Default)]
pub struct Administrator {
    stubs: Mutex<HashMap<u32, Arc<dyn Stub>>>,
    proxies: Mutex<HashMap<(u32, u32), Weak<Proxy>>>,
    next_instance: AtomicU32,
}

impl Administrator {
    pub fn new() -> Arc<Administrator> {
        Arc::new(Administrator::default())
    }

    /// Exposes a local object; the returned instance id addresses it from
    /// the peer.
    pub fn expose(&self, stub: Arc<dyn Stub>) -> u32 {
        if !Registry::is_announced(stub.interface()) {
            log::warn!("Exposing stub for unannounced interface 0x{:08x}", stub.interface());
        }
        let instance = self.next_instance.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        self.stubs
            .lock()
            .expect("stub lock poisoned; qed")
            .insert(instance, stub);
        instance
    }

    /// Withdraws a local object.
    pub fn revoke(&self, instance: u32) -> bool {
        self.stubs
            .lock()
            .expect("stub lock poisoned; qed")
            .remove(&instance)
            .is_some()
    }

    pub fn stub_count(&self) -> usize {
        self.stubs.lock().expect("stub lock poisoned; qed").len()
    }

    /// The proxy for a remote instance, deduplicated per channel.
    pub fn proxy(
        self: &Arc<Self>,
        transport: &Arc<dyn Transport>,
        interface: u32,
        instance: u32,
    ) -> Result<Arc<Proxy>, Fault> {
        if !Registry::is_announced(interface) {
            return Err(Fault::UnknownInterface(interface));
        }
        let mut proxies = self.proxies.lock().expect("proxy lock poisoned; qed");
        if let Some(existing) = proxies.get(&(interface, instance)).and_then(Weak::upgrade) {
            return Ok(existing);
        }
        let proxy = Arc::new(Proxy {
            transport: transport.clone(),
            administrator: Arc::downgrade(self),
            interface,
            instance,
            in_flight: tokio::sync::Mutex::new(()),
        });
        proxies.insert((interface, instance), Arc::downgrade(&proxy));
        Ok(proxy)
    }

    fn forget(&self, interface: u32, instance: u32) {
        let mut proxies = self.proxies.lock().expect("proxy lock poisoned; qed");
        if let Some(registered) = proxies.get(&(interface, instance)) {
            if registered.upgrade().is_none() {
                proxies.remove(&(interface, instance));
            }
        }
    }

    /// Handles one inbound frame. Invokes return `Some(response)`; release
    /// and announce frames return `None`.
    pub fn handle(&self, frame: &[u8]) -> Result<Option<Vec<u8>>, Fault> {
        match Payload::decode(frame)? {
            Payload::Invoke(request) => {
                if !Registry::is_announced(request.interface) {
                    return Err(Fault::UnknownInterface(request.interface));
                }
                let stub = self
                    .stubs
                    .lock()
                    .expect("stub lock poisoned; qed")
                    .get(&request.instance)
                    .cloned()
                    .ok_or(Fault::UnknownInstance(request.instance))?;
                if stub.interface() != request.interface {
                    return Err(Fault::UnknownInterface(request.interface));
                }
                stub.invoke(request.method, FrameReader::new(&request.parameters))
                    .map(Some)
            }
            Payload::Release { instance } => {
                if self
                    .stubs
                    .lock()
                    .expect("stub lock poisoned; qed")
                    .remove(&instance)
                    .is_none()
                {
                    log::debug!("Release for unknown instance {}", instance);
                }
                Ok(None)
            }
            Payload::Announce(announcement) => {
                for interface in announcement.interfaces {
                    if !Registry::is_announced(interface) {
                        log::warn!("Peer announced unknown interface 0x{:08x}", interface);
                    }
                }
                Ok(None)
            }
        }
    }

    /// This side's startup announcement.
    pub fn announcement(&self) -> Announcement {
        Announcement {
            interfaces: Registry::announced(),
        }
    }

    /// Channel teardown: every stub hold is dropped. A non-empty set means
    /// the peer leaked proxies; the memory is reclaimed here regardless.
    pub fn teardown(&self) {
        let leaked = {
            let mut stubs = self.stubs.lock().expect("stub lock poisoned; qed");
            let count = stubs.len();
            stubs.clear();
            count
        };
        if leaked > 0 {
            log::warn!("Channel teardown reclaimed {} leaked stub(s)", leaked);
        }
        self.proxies.lock().expect("proxy lock poisoned; qed").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::time::Duration;

    use crate::frame::FrameWriter;

    const IFACE_COUNTER: u32 = 0x2001;

    struct CounterStub {
        hits: AtomicUsize,
    }

    impl Stub for CounterStub {
        fn interface(&self) -> u32 {
            IFACE_COUNTER
        }

        fn invoke(&self, method: u8, mut parameters: FrameReader<'_>) -> Result<Vec<u8>, Fault> {
            match method {
                0 => {
                    let count = self.hits.fetch_add(1, Ordering::SeqCst) + 1;
                    let mut response = FrameWriter::new();
                    response.write_u32(count as u32);
                    Ok(response.finish())
                }
                1 => {
                    let echoed = parameters.read_buffer()?.to_vec();
                    let mut response = FrameWriter::new();
                    response.write_buffer(&echoed);
                    Ok(response.finish())
                }
                unknown => Err(Fault::UnknownMethod(unknown)),
            }
        }
    }

    /// Loopback channel end: frames handled synchronously by the peer's
    /// administrator, with an optional artificial latency and a kill
    /// switch.
    struct Loopback {
        peer: Arc<Administrator>,
        latency: Duration,
        closed: AtomicBool,
        concurrent: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Loopback {
        fn new(peer: Arc<Administrator>, latency: Duration) -> Arc<Loopback> {
            Arc::new(Loopback {
                peer,
                latency,
                closed: AtomicBool::new(false),
                concurrent: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Transport for Loopback {
        async fn exchange(&self, frame: Vec<u8>) -> Result<Vec<u8>, Fault> {
            if self.closed.load(Ordering::SeqCst) {
                return Err(Fault::Aborted);
            }
            let active = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(active, Ordering::SeqCst);
            tokio::time::sleep(self.latency).await;
            self.concurrent.fetch_sub(1, Ordering::SeqCst);
            match self.peer.handle(&frame)? {
                Some(response) => Ok(response),
                None => Err(Fault::Aborted),
            }
        }

        fn post(&self, frame: Vec<u8>) {
            let _ = self.peer.handle(&frame);
        }
    }

    fn setup() -> (Arc<Administrator>, Arc<Administrator>, u32) {
        Registry::announce(IFACE_COUNTER, "ICounter");
        let server = Administrator::new();
        let client = Administrator::new();
        let instance = server.expose(Arc::new(CounterStub {
            hits: AtomicUsize::new(0),
        }));
        (server, client, instance)
    }

    #[tokio::test]
    async fn invoke_roundtrip() {
        let (server, client, instance) = setup();
        let transport: Arc<dyn Transport> = Loopback::new(server, Duration::from_millis(0));
        let proxy = client.proxy(&transport, IFACE_COUNTER, instance).unwrap();

        let response = proxy.invoke(0, Vec::new()).await.unwrap();
        assert_eq!(FrameReader::new(&response).read_u32().unwrap(), 1);

        let mut parameters = FrameWriter::new();
        parameters.write_buffer(b"ping");
        let response = proxy.invoke(1, parameters.finish()).await.unwrap();
        assert_eq!(FrameReader::new(&response).read_buffer().unwrap(), b"ping");

        assert_eq!(proxy.invoke(9, Vec::new()).await, Err(Fault::UnknownMethod(9)));
    }

    #[tokio::test]
    async fn one_invocation_in_flight_per_proxy() {
        let (server, client, instance) = setup();
        let loopback = Loopback::new(server, Duration::from_millis(30));
        let transport: Arc<dyn Transport> = loopback.clone();
        let proxy = client.proxy(&transport, IFACE_COUNTER, instance).unwrap();

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let proxy = proxy.clone();
            tasks.push(tokio::spawn(async move { proxy.invoke(0, Vec::new()).await }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(loopback.peak.load(Ordering::SeqCst), 1, "calls serialized");
    }

    #[tokio::test]
    async fn proxies_deduplicate_and_release_on_drop() {
        let (server, client, instance) = setup();
        let transport: Arc<dyn Transport> = Loopback::new(server.clone(), Duration::from_millis(0));

        let first = client.proxy(&transport, IFACE_COUNTER, instance).unwrap();
        let second = client.proxy(&transport, IFACE_COUNTER, instance).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        assert_eq!(server.stub_count(), 1);
        drop(first);
        assert_eq!(server.stub_count(), 1, "still held by the second proxy handle");
        drop(second);
        assert_eq!(server.stub_count(), 0, "release reached the stub set");
    }

    #[tokio::test]
    async fn close_aborts_and_teardown_reclaims() {
        let (server, client, instance) = setup();
        let loopback = Loopback::new(server.clone(), Duration::from_millis(0));
        let transport: Arc<dyn Transport> = loopback.clone();
        let proxy = client.proxy(&transport, IFACE_COUNTER, instance).unwrap();

        loopback.closed.store(true, Ordering::SeqCst);
        assert_eq!(proxy.invoke(0, Vec::new()).await, Err(Fault::Aborted));

        assert_eq!(server.stub_count(), 1);
        server.teardown();
        assert_eq!(server.stub_count(), 0, "leaked stubs reclaimed by the channel");
    }

    #[tokio::test]
    async fn unknown_addressing_is_refused() {
        let (server, client, instance) = setup();
        let transport: Arc<dyn Transport> = Loopback::new(server.clone(), Duration::from_millis(0));

        assert!(matches!(
            client.proxy(&transport, 0x7F00_0000, instance),
            Err(Fault::UnknownInterface(_))
        ));

        let proxy = client.proxy(&transport, IFACE_COUNTER, 0xDEAD).unwrap();
        assert_eq!(proxy.invoke(0, Vec::new()).await, Err(Fault::UnknownInstance(0xDEAD)));
    }

    #[test]
    fn announcement_carries_the_registry() {
        Registry::announce(IFACE_COUNTER, "ICounter");
        let administrator = Administrator::new();
        assert!(administrator.announcement().interfaces.contains(&IFACE_COUNTER));
    }
}
