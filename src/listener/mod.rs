mod ws;

pub(crate) use ws::WebSocketTransport;

use crate::util::Scheduler;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::{Rc, Weak};

pub(crate) const RECONNECT_INITIAL_MS: u32 = 1_000;
pub(crate) const RECONNECT_MAX_MS: u32 = 30_000;

/// Client -> server frames.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "SCREAMING_SNAKE_CASE")]
pub(crate) enum ListenerCommand {
    Add {
        #[serde(rename = "blockIds")]
        block_ids: Vec<String>,
    },
    Remove {
        #[serde(rename = "blockIds")]
        block_ids: Vec<String>,
    },
}

/// Server -> client frames. Carries the changed block id, never a diff.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "SCREAMING_SNAKE_CASE")]
pub(crate) enum ListenerEvent {
    UpdateBlock {
        #[serde(rename = "blockId")]
        block_id: String,
    },
}

impl ListenerCommand {
    fn to_frame(&self) -> Option<String> {
        match serde_json::to_string(self) {
            Ok(frame) => Some(frame),
            Err(e) => {
                log::error!("listener command not serializable: {e}");
                None
            }
        }
    }
}

pub(crate) enum TransportSignal {
    Connected,
    Message(String),
    Disconnected,
}

pub(crate) type SignalHandler = Rc<dyn Fn(TransportSignal)>;

/// Push channel underneath a [`ChangeSubscription`].
///
/// `connect` may be called again after a `Disconnected` signal; each call replaces the
/// previous connection. After `disconnect` no further signals are delivered.
pub(crate) trait ChangeTransport {
    fn connect(&self, on_signal: SignalHandler);
    fn send(&self, frame: String);
    fn disconnect(&self);
}

pub(crate) type ChangeCallback = Rc<dyn Fn(&str)>;

#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub(crate) enum SubscriptionError {
    #[error("subscription is already open")]
    AlreadyOpen,

    #[error("subscription is not open")]
    NotOpen,

    #[error("subscription was closed")]
    Closed,
}

/// `Released` is terminal; a page owns exactly one subscription for its whole life.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SubscriptionState {
    Closed,
    Open,
    Released,
}

/// Exponential reconnect delay.
#[derive(Clone, Debug)]
pub(crate) struct Backoff {
    initial_ms: u32,
    max_ms: u32,
    next_ms: u32,
}

impl Backoff {
    pub fn new(initial_ms: u32, max_ms: u32) -> Self {
        Self {
            initial_ms,
            max_ms,
            next_ms: initial_ms,
        }
    }

    pub fn next_delay(&mut self) -> u32 {
        let delay = self.next_ms;
        self.next_ms = self.next_ms.saturating_mul(2).min(self.max_ms);
        delay
    }

    pub fn reset(&mut self) {
        self.next_ms = self.initial_ms;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(RECONNECT_INITIAL_MS, RECONNECT_MAX_MS)
    }
}

struct Shared {
    state: SubscriptionState,
    scope: BTreeSet<String>,
    on_change: Option<ChangeCallback>,
    connected: bool,
    ever_connected: bool,
    reconnect_scheduled: bool,
    backoff: Backoff,

    /// Bumped per `connect`; signals from older connections are dropped.
    epoch: u64,
}

struct Inner {
    transport: Rc<dyn ChangeTransport>,
    scheduler: Scheduler,
    shared: RefCell<Shared>,
}

/// Single live subscription to block change notifications.
///
/// Owned by the page controller and passed in explicitly; never a global.
#[derive(Clone)]
pub(crate) struct ChangeSubscription {
    inner: Rc<Inner>,
}

impl ChangeSubscription {
    pub fn new(transport: Rc<dyn ChangeTransport>, scheduler: Scheduler) -> Self {
        Self {
            inner: Rc::new(Inner {
                transport,
                scheduler,
                shared: RefCell::new(Shared {
                    state: SubscriptionState::Closed,
                    scope: BTreeSet::new(),
                    on_change: None,
                    connected: false,
                    ever_connected: false,
                    reconnect_scheduled: false,
                    backoff: Backoff::default(),
                    epoch: 0,
                }),
            }),
        }
    }

    fn from_weak(weak: &Weak<Inner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    pub fn state(&self) -> SubscriptionState {
        self.inner.shared.borrow().state
    }

    pub fn is_open(&self) -> bool {
        self.state() == SubscriptionState::Open
    }

    pub fn scope(&self) -> BTreeSet<String> {
        self.inner.shared.borrow().scope.clone()
    }

    pub fn open(
        &self,
        scope: impl IntoIterator<Item = String>,
        on_change: ChangeCallback,
    ) -> Result<(), SubscriptionError> {
        {
            let mut s = self.inner.shared.borrow_mut();
            match s.state {
                SubscriptionState::Open => return Err(SubscriptionError::AlreadyOpen),
                SubscriptionState::Released => return Err(SubscriptionError::Closed),
                SubscriptionState::Closed => {}
            }
            s.state = SubscriptionState::Open;
            s.scope = scope.into_iter().collect();
            s.on_change = Some(on_change);
            log::debug!("listener open: {:?}", s.scope);
        }

        self.connect();
        Ok(())
    }

    /// Adjusts the live scope without tearing down the transport.
    pub fn rescope(
        &self,
        remove: impl IntoIterator<Item = String>,
        add: impl IntoIterator<Item = String>,
    ) -> Result<(), SubscriptionError> {
        let frames = {
            let mut s = self.inner.shared.borrow_mut();
            if s.state != SubscriptionState::Open {
                return Err(SubscriptionError::NotOpen);
            }

            let add: BTreeSet<String> = add.into_iter().collect();
            let removed: Vec<String> = remove
                .into_iter()
                .filter(|id| !add.contains(id) && s.scope.remove(id))
                .collect();
            let added: Vec<String> = add.into_iter().filter(|id| s.scope.insert(id.clone())).collect();
            log::debug!("listener rescope: -{:?} +{:?}", removed, added);

            let mut frames = Vec::new();
            // Before the first `Connected` the whole scope is sent on connect.
            if s.connected {
                if !removed.is_empty() {
                    frames.push(ListenerCommand::Remove { block_ids: removed });
                }
                if !added.is_empty() {
                    frames.push(ListenerCommand::Add { block_ids: added });
                }
            }
            frames
        };

        for frame in frames.iter().filter_map(ListenerCommand::to_frame) {
            self.inner.transport.send(frame);
        }
        Ok(())
    }

    /// Releases the transport. Only the first call has an effect.
    pub fn close(&self) {
        let was_open = {
            let mut s = self.inner.shared.borrow_mut();
            let was_open = s.state == SubscriptionState::Open;
            s.state = SubscriptionState::Released;
            s.on_change = None;
            s.connected = false;
            was_open
        };

        if was_open {
            log::debug!("listener close");
            self.inner.transport.disconnect();
        }
    }

    fn connect(&self) {
        let epoch = {
            let mut s = self.inner.shared.borrow_mut();
            s.epoch += 1;
            s.epoch
        };

        let weak = Rc::downgrade(&self.inner);
        let handler: SignalHandler = Rc::new(move |signal| {
            if let Some(sub) = Self::from_weak(&weak) {
                sub.on_signal(epoch, signal);
            }
        });
        self.inner.transport.connect(handler);
    }

    fn on_signal(&self, epoch: u64, signal: TransportSignal) {
        match signal {
            TransportSignal::Connected => self.on_connected(epoch),
            TransportSignal::Message(text) => self.on_message(epoch, &text),
            TransportSignal::Disconnected => self.on_disconnected(epoch),
        }
    }

    fn is_current(s: &Shared, epoch: u64) -> bool {
        s.state == SubscriptionState::Open && s.epoch == epoch
    }

    fn on_connected(&self, epoch: u64) {
        let (frame, missed) = {
            let mut s = self.inner.shared.borrow_mut();
            if !Self::is_current(&s, epoch) {
                return;
            }
            s.connected = true;
            s.backoff.reset();

            let reconnected = s.ever_connected;
            s.ever_connected = true;

            let frame = (!s.scope.is_empty()).then(|| ListenerCommand::Add {
                block_ids: s.scope.iter().cloned().collect(),
            });
            // Changes made while disconnected were never delivered.
            let missed = reconnected
                .then(|| s.on_change.clone().map(|cb| (cb, s.scope.clone())))
                .flatten();
            (frame, missed)
        };

        if let Some(frame) = frame.as_ref().and_then(ListenerCommand::to_frame) {
            self.inner.transport.send(frame);
        }
        if let Some((cb, scope)) = missed {
            log::info!("listener reconnected; resyncing {:?}", scope);
            for id in &scope {
                cb(id);
            }
        }
    }

    fn on_message(&self, epoch: u64, text: &str) {
        let cb = {
            let s = self.inner.shared.borrow();
            if !Self::is_current(&s, epoch) {
                return;
            }
            s.on_change.clone()
        };
        let Some(cb) = cb else {
            return;
        };

        match serde_json::from_str::<ListenerEvent>(text) {
            // A block that just left the scope may still be reported; a spare resync is harmless.
            Ok(ListenerEvent::UpdateBlock { block_id }) => cb(&block_id),
            Err(e) => log::debug!("listener: ignoring frame {text}: {e}"),
        }
    }

    fn on_disconnected(&self, epoch: u64) {
        let delay = {
            let mut s = self.inner.shared.borrow_mut();
            if !Self::is_current(&s, epoch) || s.reconnect_scheduled {
                return;
            }
            s.connected = false;
            s.reconnect_scheduled = true;
            s.backoff.next_delay()
        };
        log::warn!("listener disconnected; reconnecting in {delay}ms");

        let weak = Rc::downgrade(&self.inner);
        (self.inner.scheduler)(
            delay,
            Box::new(move || {
                let Some(sub) = Self::from_weak(&weak) else {
                    return;
                };
                let still_open = {
                    let mut s = sub.inner.shared.borrow_mut();
                    s.reconnect_scheduled = false;
                    s.state == SubscriptionState::Open
                };
                if still_open {
                    sub.connect();
                }
            }),
        );
    }
}
