//! The JSON-RPC link: pending-call bookkeeping, synchronous and
//! asynchronous send, event subscription and inbound routing for one local
//! namespace on a shared channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use futures::channel::oneshot;
use serde_json::{json, Value};

use framewire_types::{Error as RpcError, Id, Message};

use crate::channel::{self, Channel, Observer};
use crate::error::CallError;
use crate::watchdog::{Timed, WatchDog};

/// Wait applied when the caller does not supply one.
pub const DEFAULT_WAIT: Duration = Duration::from_secs(10);

/// Completion of an asynchronous call.
pub type Callback = Box<dyn FnOnce(Result<Value, CallError>) + Send>;

type InvokeFunction = Arc<dyn Fn(Value) -> Result<Value, RpcError> + Send + Sync>;

static LOCAL_SEQUENCE: AtomicU32 = AtomicU32::new(0);

enum Pending {
    /// A waiter parked on the response.
    Sync(oneshot::Sender<Result<Message, CallError>>),
    /// A callback plus the wall-clock deadline the watchdog enforces.
    Async {
        deadline: Instant,
        callback: Option<Callback>,
    },
}

/// Configures and produces a [`Link`].
pub struct LinkBuilder {
    callsign: String,
    endpoint: Option<String>,
    local_callsign: Option<String>,
    directed: bool,
}

impl LinkBuilder {
    /// `callsign` may carry a version suffix (`Foo.1`); it becomes the
    /// routing prefix for outbound designators.
    pub fn new(callsign: impl Into<String>) -> Self {
        LinkBuilder {
            callsign: callsign.into(),
            endpoint: None,
            local_callsign: None,
            directed: false,
        }
    }

    /// Remote endpoint as `host:port`; defaults to `THUNDER_ACCESS`.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// The namespace the peer publishes our events to. Defaults to a
    /// process-unique `temporary<N>`.
    pub fn local_callsign(mut self, local: impl Into<String>) -> Self {
        self.local_callsign = Some(local.into());
        self
    }

    /// Connect the socket to the callsign's own endpoint instead of the
    /// controller's.
    pub fn directed(mut self, directed: bool) -> Self {
        self.directed = directed;
        self
    }

    pub fn build(self) -> Result<Link, CallError> {
        let endpoint = self
            .endpoint
            .or_else(channel::default_endpoint)
            .ok_or(CallError::Unavailable)?;

        let (callsign, version_suffix) = split_version(&self.callsign);
        let connecting = if self.directed && !self.callsign.is_empty() {
            callsign.clone()
        } else {
            "Controller".to_string()
        };
        let channel = Channel::instance(&endpoint, &connecting)?;

        let local_space = self.local_callsign.unwrap_or_else(|| {
            format!("temporary{}", LOCAL_SEQUENCE.fetch_add(1, Ordering::Relaxed).wrapping_add(1))
        });

        let core = Arc::new(LinkCore {
            channel,
            callsign,
            version_suffix,
            local_space,
            handlers: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            scheduled: Mutex::new(None),
            subscriptions: Mutex::new(Vec::new()),
        });

        let observer: Weak<dyn Observer> = {
            let weak: Weak<LinkCore> = Arc::downgrade(&core);
            weak
        };
        core.channel.register(observer.clone());

        Ok(Link { core, observer })
    }
}

/// Splits a `Foo.1` style callsign into the bare callsign and the version
/// suffix used when building designators.
fn split_version(callsign: &str) -> (String, String) {
    match callsign.rfind('.') {
        Some(dot) if callsign[dot + 1..].parse::<u8>().is_ok() => {
            (callsign[..dot].to_string(), callsign[dot..].to_string())
        }
        _ => (callsign.to_string(), String::new()),
    }
}

pub struct Link {
    core: Arc<LinkCore>,
    observer: Weak<dyn Observer>,
}

impl Link {
    /// Link to `callsign` via the `THUNDER_ACCESS` endpoint.
    pub fn new(callsign: impl Into<String>) -> Result<Link, CallError> {
        LinkBuilder::new(callsign).build()
    }

    pub fn builder(callsign: impl Into<String>) -> LinkBuilder {
        LinkBuilder::new(callsign)
    }

    /// The local namespace events are addressed to.
    pub fn namespace(&self) -> &str {
        &self.core.local_space
    }

    /// The remote routing prefix, version included.
    pub fn callsign(&self) -> String {
        format!("{}{}", self.core.callsign, self.core.version_suffix)
    }

    /// Opens the underlying channel and waits for the upgrade.
    pub async fn open(&self, wait: Duration) -> Result<(), CallError> {
        self.core.channel.open(wait).await
    }

    /// Closes the underlying channel (all co-tenant links see it).
    pub fn close(&self, wait: Duration) {
        self.core.channel.close(wait);
    }

    /// Synchronous contract: sends and parks on the response for at most
    /// `wait`. Exactly one of response/timeout/abort is delivered.
    pub async fn invoke(&self, wait: Duration, method: &str, parameters: Option<Value>) -> Result<Value, CallError> {
        let core = &self.core;
        core.admission()?;

        let id = core.channel.sequence();
        let message = Message::call(id, core.designator(method), parameters);

        // The entry exists before the message is on the wire, so the
        // response path can never miss the waiter.
        let (reply_tx, reply_rx) = oneshot::channel();
        core.pending
            .lock()
            .expect("pending lock poisoned; qed")
            .insert(id, Pending::Sync(reply_tx));

        if !core.channel.submit(&message) {
            core.pending.lock().expect("pending lock poisoned; qed").remove(&id);
            return Err(CallError::Unavailable);
        }

        match tokio::time::timeout(wait, reply_rx).await {
            Ok(Ok(Ok(response))) => match response.error {
                Some(error) => Err(CallError::Remote(error)),
                None => Ok(response.result.unwrap_or(Value::Null)),
            },
            Ok(Ok(Err(error))) => Err(error),
            Ok(Err(_)) => Err(CallError::Aborted),
            Err(_) => {
                core.pending.lock().expect("pending lock poisoned; qed").remove(&id);
                Err(CallError::Timeout)
            }
        }
    }

    /// Asynchronous contract: sends and returns immediately; `callback`
    /// fires with the response, `Timeout` at the deadline, or `Aborted` on
    /// channel close — exactly once.
    pub async fn dispatch(
        &self,
        wait: Duration,
        method: &str,
        parameters: Option<Value>,
        callback: impl FnOnce(Result<Value, CallError>) + Send + 'static,
    ) -> Result<(), CallError> {
        let core = &self.core;
        core.admission()?;

        let id = core.channel.sequence();
        let message = Message::call(id, core.designator(method), parameters);
        let deadline = Instant::now() + wait;

        core.pending.lock().expect("pending lock poisoned; qed").insert(
            id,
            Pending::Async {
                deadline,
                callback: Some(Box::new(callback)),
            },
        );

        if !core.channel.submit(&message) {
            core.pending.lock().expect("pending lock poisoned; qed").remove(&id);
            return Err(CallError::Unavailable);
        }

        LinkCore::schedule(&self.core, deadline);
        Ok(())
    }

    /// Property read; `index` appends the `@index` designator suffix.
    pub async fn get(&self, wait: Duration, property: &str, index: Option<&str>) -> Result<Value, CallError> {
        self.invoke(wait, &indexed(property, index), None).await
    }

    /// Property write; `index` appends the `@index` designator suffix.
    pub async fn set(
        &self,
        wait: Duration,
        property: &str,
        index: Option<&str>,
        value: Value,
    ) -> Result<(), CallError> {
        self.invoke(wait, &indexed(property, index), Some(value)).await.map(|_| ())
    }

    /// Registers a local event handler without telling the remote.
    pub fn assign(&self, event: &str, handler: impl Fn(Value) + Send + Sync + 'static) {
        let wrapped: InvokeFunction = Arc::new(move |parameters| {
            handler(parameters);
            Ok(Value::Null)
        });
        self.core
            .handlers
            .lock()
            .expect("handler lock poisoned; qed")
            .insert(event.to_string(), wrapped);
    }

    /// Registers a local method the peer may call; the return value (or
    /// error) is sent back as the response.
    pub fn assign_method(
        &self,
        name: &str,
        handler: impl Fn(Value) -> Result<Value, RpcError> + Send + Sync + 'static,
    ) {
        self.core
            .handlers
            .lock()
            .expect("handler lock poisoned; qed")
            .insert(name.to_string(), Arc::new(handler));
    }

    /// Drops a local handler.
    pub fn revoke(&self, event: &str) {
        self.core
            .handlers
            .lock()
            .expect("handler lock poisoned; qed")
            .remove(event);
    }

    /// Registers `handler` locally and asks the remote to publish `event`
    /// to our namespace. A failed registration rolls the handler back.
    pub async fn subscribe(
        &self,
        wait: Duration,
        event: &str,
        handler: impl Fn(Value) + Send + Sync + 'static,
    ) -> Result<(), CallError> {
        self.assign(event, handler);
        match self.register_event(wait, event).await {
            Ok(()) => {
                self.core
                    .subscriptions
                    .lock()
                    .expect("subscription lock poisoned; qed")
                    .push(event.to_string());
                Ok(())
            }
            Err(error) => {
                self.revoke(event);
                Err(error)
            }
        }
    }

    /// Tells the remote to stop publishing `event` and drops the handler.
    pub async fn unsubscribe(&self, wait: Duration, event: &str) {
        let parameters = json!({ "event": event, "id": self.core.local_space });
        let _ = self.invoke(wait, "unregister", Some(parameters)).await;
        self.revoke(event);
        self.core
            .subscriptions
            .lock()
            .expect("subscription lock poisoned; qed")
            .retain(|name| name != event);
    }

    /// Re-issues every event registration, one at a time. Used after the
    /// remote service came (back) up.
    pub async fn resubscribe(&self, wait: Duration) -> Result<(), CallError> {
        let events: Vec<String> = self
            .core
            .subscriptions
            .lock()
            .expect("subscription lock poisoned; qed")
            .clone();
        for event in events {
            self.register_event(wait, &event).await?;
        }
        Ok(())
    }

    /// The events currently subscribed.
    pub fn events(&self) -> Vec<String> {
        self.core
            .subscriptions
            .lock()
            .expect("subscription lock poisoned; qed")
            .clone()
    }

    async fn register_event(&self, wait: Duration, event: &str) -> Result<(), CallError> {
        let parameters = json!({ "event": event, "id": self.core.local_space });
        self.invoke(wait, "register", Some(parameters)).await.map(|_| ())
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.core.channel.unregister(&self.observer);
        self.core.abort_pending();
    }
}

pub(crate) struct LinkCore {
    channel: Arc<Channel>,
    callsign: String,
    version_suffix: String,
    local_space: String,
    handlers: Mutex<HashMap<String, InvokeFunction>>,
    pending: Mutex<HashMap<u32, Pending>>,
    scheduled: Mutex<Option<Instant>>,
    subscriptions: Mutex<Vec<String>>,
}

impl LinkCore {
    fn admission(&self) -> Result<(), CallError> {
        if self.channel.is_suspended() {
            Err(CallError::AsyncFailed)
        } else if !self.channel.is_open() {
            Err(CallError::Unavailable)
        } else {
            Ok(())
        }
    }

    fn designator(&self, method: &str) -> String {
        if self.callsign.is_empty() {
            method.to_string()
        } else {
            format!("{}{}.{}", self.callsign, self.version_suffix, method)
        }
    }

    /// Arms the shared watchdog when `deadline` is earlier than whatever it
    /// is armed for.
    fn schedule(core: &Arc<LinkCore>, deadline: Instant) {
        let mut scheduled = core.scheduled.lock().expect("schedule lock poisoned; qed");
        if scheduled.map_or(true, |armed| deadline < armed) {
            *scheduled = Some(deadline);
            let timed: Weak<dyn Timed> = {
                let weak: Weak<LinkCore> = Arc::downgrade(core);
                weak
            };
            WatchDog::instance().schedule(deadline, timed);
        }
    }

    fn abort_pending(&self) {
        let drained: Vec<Pending> = self
            .pending
            .lock()
            .expect("pending lock poisoned; qed")
            .drain()
            .map(|(_, entry)| entry)
            .collect();
        *self.scheduled.lock().expect("schedule lock poisoned; qed") = None;

        for entry in drained {
            match entry {
                Pending::Sync(waiter) => {
                    let _ = waiter.send(Err(CallError::Aborted));
                }
                Pending::Async { callback, .. } => {
                    if let Some(callback) = callback {
                        callback(Err(CallError::Aborted));
                    }
                }
            }
        }
    }
}

impl Observer for LinkCore {
    fn inbound(&self, message: &Message) -> bool {
        if message.is_response() {
            let id = match message.id.as_ref().and_then(Id::as_number) {
                Some(id) => id,
                None => return false,
            };
            let entry = self.pending.lock().expect("pending lock poisoned; qed").remove(&id);
            match entry {
                None => false,
                Some(Pending::Sync(waiter)) => {
                    let _ = waiter.send(Ok(message.clone()));
                    true
                }
                Some(Pending::Async { callback, .. }) => {
                    if let Some(callback) = callback {
                        let outcome = match &message.error {
                            Some(error) => Err(CallError::Remote(error.clone())),
                            None => Ok(message.result.clone().unwrap_or(Value::Null)),
                        };
                        callback(outcome);
                    }
                    true
                }
            }
        } else {
            // A call: ours only when the designator prefix names us.
            if message.namespace() != self.local_space {
                return false;
            }
            let method = match message.method() {
                Some(method) => method.to_string(),
                None => return true,
            };
            let handler = self
                .handlers
                .lock()
                .expect("handler lock poisoned; qed")
                .get(&method)
                .cloned();
            let parameters = message.parameters.clone().unwrap_or(Value::Null);

            match handler {
                None => log::debug!("[link] No handler for {}; dropping", method),
                Some(handler) => {
                    let result = handler(parameters);
                    if let Some(id) = message.id.clone() {
                        // A request addressed to us expects an answer.
                        let reply = match result {
                            Ok(value) => Message::response(id, value),
                            Err(error) => Message::failure(id, error),
                        };
                        self.channel.submit(&reply);
                    }
                }
            }
            true
        }
    }

    fn opened(&self) {
        // Handlers survive reconnects; registrations are re-armed only when
        // the owner explicitly resubscribes.
        log::debug!("[link] Channel opened for {}", self.local_space);
    }

    fn closed(&self) {
        log::debug!("[link] Channel closed for {}; aborting pending calls", self.local_space);
        self.abort_pending();
    }
}

impl Timed for LinkCore {
    fn timed(&self, now: Instant) -> Option<Instant> {
        let mut expired: Vec<(Instant, Callback)> = Vec::new();
        let mut next: Option<Instant> = None;
        {
            let mut pending = self.pending.lock().expect("pending lock poisoned; qed");
            pending.retain(|_, entry| match entry {
                Pending::Sync(_) => true,
                Pending::Async { deadline, callback } => {
                    if *deadline <= now {
                        if let Some(callback) = callback.take() {
                            expired.push((*deadline, callback));
                        }
                        false
                    } else {
                        next = Some(next.map_or(*deadline, |soonest| soonest.min(*deadline)));
                        true
                    }
                }
            });
            *self.scheduled.lock().expect("schedule lock poisoned; qed") = next;
        }

        // Callbacks run outside the critical section, earliest deadline
        // first.
        expired.sort_by_key(|(deadline, _)| *deadline);
        for (_, callback) in expired {
            callback(Err(CallError::Timeout));
        }
        next
    }
}

fn indexed(property: &str, index: Option<&str>) -> String {
    match index {
        Some(index) => format!("{}@{}", property, index),
        None => property.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callsign_version_split() {
        assert_eq!(split_version("Foo.1"), ("Foo".to_string(), ".1".to_string()));
        assert_eq!(split_version("Foo"), ("Foo".to_string(), String::new()));
        assert_eq!(split_version("Bar.Nested.2"), ("Bar.Nested".to_string(), ".2".to_string()));
        assert_eq!(split_version(""), (String::new(), String::new()));
    }

    #[test]
    fn designator_shapes() {
        let core = LinkCore {
            channel: Channel::instance("127.0.0.1:9998", "Controller").unwrap(),
            callsign: "Foo".to_string(),
            version_suffix: ".1".to_string(),
            local_space: "tmp1".to_string(),
            handlers: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            scheduled: Mutex::new(None),
            subscriptions: Mutex::new(Vec::new()),
        };
        assert_eq!(core.designator("status"), "Foo.1.status");

        let bare = LinkCore {
            channel: Channel::instance("127.0.0.1:9998", "Controller").unwrap(),
            callsign: String::new(),
            version_suffix: String::new(),
            local_space: "tmp2".to_string(),
            handlers: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            scheduled: Mutex::new(None),
            subscriptions: Mutex::new(Vec::new()),
        };
        assert_eq!(bare.designator("status"), "status");

        assert_eq!(indexed("value", Some("3")), "value@3");
        assert_eq!(indexed("value", None), "value");
    }
}
