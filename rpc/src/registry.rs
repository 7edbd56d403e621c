//! The process-wide interface registry. Both ends of a channel announce
//! the same id set at startup; dispatch refuses interfaces the peer never
//! announced.

use std::collections::HashMap;
use std::sync::Mutex;

lazy_static::lazy_static! {
    static ref INTERFACES: Mutex<HashMap<u32, &'static str>> = Mutex::new(HashMap::new());
}

pub struct Registry;

impl Registry {
    /// Registers an interface id under a diagnostic name. Re-registration
    /// with the same name is idempotent.
    pub fn announce(interface: u32, name: &'static str) {
        let mut interfaces = INTERFACES.lock().expect("registry lock poisoned; qed");
        if let Some(existing) = interfaces.insert(interface, name) {
            if existing != name {
                log::warn!(
                    "Interface 0x{:08x} re-announced as {} (was {})",
                    interface,
                    name,
                    existing
                );
            }
        }
    }

    pub fn is_announced(interface: u32) -> bool {
        INTERFACES
            .lock()
            .expect("registry lock poisoned; qed")
            .contains_key(&interface)
    }

    pub fn name(interface: u32) -> Option<&'static str> {
        INTERFACES
            .lock()
            .expect("registry lock poisoned; qed")
            .get(&interface)
            .copied()
    }

    /// Every announced id, for the startup announcement frame.
    pub fn announced() -> Vec<u32> {
        let mut ids: Vec<u32> = INTERFACES
            .lock()
            .expect("registry lock poisoned; qed")
            .keys()
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn announce_and_lookup() {
        Registry::announce(0x1151, "ITestSession");
        assert!(Registry::is_announced(0x1151));
        assert_eq!(Registry::name(0x1151), Some("ITestSession"));
        assert!(!Registry::is_announced(0x7FFF_FFFF));
        assert!(Registry::announced().contains(&0x1151));
    }
}
