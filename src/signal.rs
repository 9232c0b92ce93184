//! In-process publish-subscribe bus between controller callbacks and entities.

use log::{debug, warn};
use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::controller::Payload;

const BUS_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    ZoneUpdate,
    AreaUpdate,
    SystemUpdate,
    OutputUpdate,
    KeypadUpdate,
}

impl Signal {
    pub fn topic(&self) -> &'static str {
        match self {
            Signal::ZoneUpdate => "aapalarm.zones_updated",
            Signal::AreaUpdate => "aapalarm.areas_updated",
            Signal::SystemUpdate => "aapalarm.system_updated",
            Signal::OutputUpdate => "aapalarm.output_updated",
            Signal::KeypadUpdate => "aapalarm.keypad_updated",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    pub signal: Signal,
    pub payload: Payload,
}

#[derive(Debug, Clone)]
pub struct Dispatcher {
    tx: broadcast::Sender<Message>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Dispatcher { tx }
    }

    /// Broadcasts `payload` unchanged under `signal`. Never blocks.
    pub fn send(&self, signal: Signal, payload: Payload) {
        debug!("Dispatching {} with {:?}", signal.topic(), payload);
        if self.tx.send(Message { signal, payload }).is_err() {
            debug!("No listeners for {}", signal.topic());
        }
    }

    /// Listens to the given signals only.
    pub fn subscribe(&self, signals: &[Signal]) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            signals: signals.to_vec(),
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Subscription {
    rx: broadcast::Receiver<Message>,
    signals: Vec<Signal>,
}

impl Subscription {
    /// Next payload for one of the subscribed signals, `None` once the bus is gone.
    ///
    /// A lagging subscriber gets a wildcard payload so it refreshes everything.
    pub async fn recv(&mut self) -> Option<Payload> {
        loop {
            match self.rx.recv().await {
                Ok(message) if self.signals.contains(&message.signal) => {
                    return Some(message.payload)
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Subscriber lagged behind by {} signals, refreshing", skipped);
                    return Some(None);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

/// Key carried by an update signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateKey {
    /// Refresh every entity of the type.
    All,
    Number(i64),
    Name(String),
}

impl UpdateKey {
    pub fn from_payload(payload: &Payload) -> Self {
        match payload {
            None | Some(Value::Null) => UpdateKey::All,
            Some(Value::Number(n)) => match n.as_i64() {
                Some(n) => UpdateKey::Number(n),
                None => UpdateKey::Name(n.to_string()),
            },
            Some(Value::String(s)) => {
                let s = s.trim();
                if s.is_empty() {
                    UpdateKey::All
                } else if let Ok(n) = s.parse::<i64>() {
                    UpdateKey::Number(n)
                } else {
                    UpdateKey::Name(s.to_string())
                }
            }
            Some(other) => UpdateKey::Name(other.to_string()),
        }
    }

    pub fn matches_number(&self, number: u32) -> bool {
        match self {
            UpdateKey::All => true,
            UpdateKey::Number(n) => *n == i64::from(number),
            UpdateKey::Name(_) => false,
        }
    }
}
