//! The process-wide deadline timer.
//!
//! One task owns a monotone queue of `(deadline, link)` tuples and sleeps
//! until the earliest one. On wakeup it re-reads the queue head (insertions
//! race with the sleep), walks every due link's `timed()` and pushes back
//! whatever deadline the link reports next.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::{Mutex, Weak};
use std::time::Instant;

use futures::channel::mpsc;
use futures::StreamExt;

/// A link that can expire pending work. Returns its next deadline, if any.
pub(crate) trait Timed: Send + Sync {
    fn timed(&self, now: Instant) -> Option<Instant>;
}

pub(crate) struct Entry {
    pub deadline: Instant,
    pub link: Weak<dyn Timed>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline
    }
}
impl Eq for Entry {}
impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}
impl Ord for Entry {
    // Reversed so the BinaryHeap pops the earliest deadline first.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other.deadline.cmp(&self.deadline)
    }
}

pub(crate) struct WatchDog {
    to_task: Mutex<mpsc::UnboundedSender<Entry>>,
}

lazy_static::lazy_static! {
    static ref INSTANCE: WatchDog = WatchDog {
        to_task: Mutex::new(spawn_runner()),
    };
}

impl WatchDog {
    pub fn instance() -> &'static WatchDog {
        &INSTANCE
    }

    /// Arms (or re-arms) the timer for `link` at `deadline`.
    pub fn schedule(&self, deadline: Instant, link: Weak<dyn Timed>) {
        let mut sender = self.to_task.lock().expect("watchdog lock poisoned; qed");
        if let Err(rejected) = sender.unbounded_send(Entry { deadline, link }) {
            // The runner died with its runtime; restart it on the current one.
            *sender = spawn_runner();
            let _ = sender.unbounded_send(rejected.into_inner());
        }
    }
}

fn spawn_runner() -> mpsc::UnboundedSender<Entry> {
    let (to_task, from_clients) = mpsc::unbounded();
    tokio::spawn(run(from_clients));
    to_task
}

async fn run(mut from_clients: mpsc::UnboundedReceiver<Entry>) {
    let mut queue: BinaryHeap<Entry> = BinaryHeap::new();

    loop {
        let head = queue.peek().map(|entry| entry.deadline);
        tokio::select! {
            entry = from_clients.next() => match entry {
                Some(entry) => queue.push(entry),
                None => break,
            },
            _ = async {
                match head {
                    Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
                    None => std::future::pending().await,
                }
            }, if head.is_some() => {
                let now = Instant::now();
                while let Some(entry) = queue.peek() {
                    if entry.deadline > now {
                        break;
                    }
                    let entry = queue.pop().expect("peeked entry exists; qed");
                    if let Some(link) = entry.link.upgrade() {
                        if let Some(next) = link.timed(now) {
                            queue.push(Entry { deadline: next, link: entry.link });
                        }
                    }
                }
            }
        }
    }
}
