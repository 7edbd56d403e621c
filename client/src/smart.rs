//! Recoverability wrapper: rides the controller's `statechange` events and
//! re-arms the link's event registrations when the monitored service comes
//! (back) up, before telling the owner it is usable.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;

use crate::error::CallError;
use crate::link::{Link, LinkBuilder, DEFAULT_WAIT};

type StateSink = Arc<Mutex<Option<Box<dyn Fn(bool) + Send>>>>;

pub struct SmartLink {
    link: Arc<Link>,
    controller: Link,
    monitored: String,
    activated: Arc<Mutex<bool>>,
    on_state: StateSink,
}

impl SmartLink {
    /// Wraps a link to `callsign` (which may carry a version) and a second
    /// link to the controller for the `statechange` watch.
    pub fn new(callsign: impl Into<String>, endpoint: Option<String>) -> Result<SmartLink, CallError> {
        let callsign = callsign.into();
        let monitored = match callsign.rfind('.') {
            Some(dot) if callsign[dot + 1..].parse::<u8>().is_ok() => callsign[..dot].to_string(),
            _ => callsign.clone(),
        };

        let mut builder = LinkBuilder::new(callsign);
        let mut controller_builder = LinkBuilder::new("Controller.1");
        if let Some(endpoint) = endpoint {
            builder = builder.endpoint(endpoint.clone());
            controller_builder = controller_builder.endpoint(endpoint);
        }

        Ok(SmartLink {
            link: Arc::new(builder.build()?),
            controller: controller_builder.build()?,
            monitored,
            activated: Arc::new(Mutex::new(false)),
            on_state: Arc::new(Mutex::new(None)),
        })
    }

    /// The wrapped service link.
    pub fn link(&self) -> &Link {
        &self.link
    }

    /// Registers the owner's up/down notification. `true` is only reported
    /// after every event registration has been re-issued.
    pub fn on_state(&self, notify: impl Fn(bool) + Send + 'static) {
        *self.on_state.lock().expect("state sink lock poisoned; qed") = Some(Box::new(notify));
    }

    pub fn is_activated(&self) -> bool {
        *self.activated.lock().expect("state lock poisoned; qed")
    }

    /// Opens the channel and starts the `statechange` watch.
    pub async fn open(&self, wait: Duration) -> Result<(), CallError> {
        self.link.open(wait).await?;

        let link = self.link.clone();
        let monitored = self.monitored.clone();
        let activated = self.activated.clone();
        let on_state = self.on_state.clone();

        self.controller
            .subscribe(wait, "statechange", move |parameters: Value| {
                let callsign = parameters.get("callsign").and_then(Value::as_str);
                if callsign != Some(monitored.as_str()) {
                    return;
                }
                let is_up = parameters.get("state").and_then(Value::as_str) == Some("Activated");
                *activated.lock().expect("state lock poisoned; qed") = is_up;

                if is_up {
                    // Re-register sequentially, then report usable.
                    let link = link.clone();
                    let on_state = on_state.clone();
                    tokio::spawn(async move {
                        match link.resubscribe(DEFAULT_WAIT).await {
                            Ok(()) => {
                                if let Some(notify) = on_state.lock().expect("state sink lock poisoned; qed").as_ref() {
                                    notify(true);
                                }
                            }
                            Err(error) => log::warn!("[smart] Resubscribe failed: {}", error),
                        }
                    });
                } else if let Some(notify) = on_state.lock().expect("state sink lock poisoned; qed").as_ref() {
                    notify(false);
                }
            })
            .await
    }
}
