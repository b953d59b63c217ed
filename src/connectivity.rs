// Online/offline signal supplied by the host application

use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    WentOnline,
    WentOffline,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transition::WentOnline => write!(f, "online"),
            Transition::WentOffline => write!(f, "offline"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct State {
    online: bool,
    // Bumped on every offline -> online edge so a quick off/on flap is not lost
    reconnects: u64,
}

#[derive(Debug, Clone)]
pub struct Connectivity {
    tx: Arc<watch::Sender<State>>,
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(State {
            online,
            reconnects: 0,
        });
        Self { tx: Arc::new(tx) }
    }

    pub fn is_online(&self) -> bool {
        self.tx.borrow().online
    }

    pub fn set_online(&self, online: bool) {
        let changed = self.tx.send_if_modified(|state| {
            if state.online == online {
                return false;
            }
            state.online = online;
            if online {
                state.reconnects += 1;
            }
            true
        });
        if changed {
            info!(online, "connectivity changed");
        }
    }

    pub fn watch(&self) -> ConnectivityWatcher {
        let rx = self.tx.subscribe();
        let last = *rx.borrow();
        ConnectivityWatcher { rx, last }
    }
}

pub struct ConnectivityWatcher {
    rx: watch::Receiver<State>,
    last: State,
}

impl ConnectivityWatcher {
    // Waits for the next edge. Returns None once the signal is dropped.
    // When several edges coalesce, an intervening reconnect is still reported.
    pub async fn next_transition(&mut self) -> Option<Transition> {
        loop {
            self.rx.changed().await.ok()?;
            let current = *self.rx.borrow_and_update();
            let previous = std::mem::replace(&mut self.last, current);

            if current.reconnects != previous.reconnects && current.online {
                return Some(Transition::WentOnline);
            }
            if previous.online && !current.online {
                return Some(Transition::WentOffline);
            }
            if current.reconnects != previous.reconnects {
                // Came back and dropped again before we looked
                return Some(Transition::WentOffline);
            }
        }
    }
}
