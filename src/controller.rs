//! Contract of the external AAP IP / Serial Module controller.
//!
//! The controller owns the connection to the panel, speaks its protocol and
//! keeps the live area/zone/output/system dictionaries. This crate only
//! constructs it, registers callbacks, sends commands and reads snapshots.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{fmt, sync::Arc, time::Duration};

/// A status dictionary as held by the controller.
pub type Status = Map<String, Value>;

/// Opaque data handed to a callback, usually the key of whatever changed.
pub type Payload = Option<Value>;

pub type Callback = Box<dyn Fn(Payload) + Send + Sync>;

/// Access code handed to the controller at construction.
pub const DEFAULT_ACCESS_CODE: &str = "0000";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    Serial,
    Ip,
}

impl ConnectionKind {
    pub const ALL: [ConnectionKind; 2] = [ConnectionKind::Serial, ConnectionKind::Ip];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionKind::Serial => "serial",
            ConnectionKind::Ip => "ip",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        ConnectionKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value)
    }
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the controller needs to be built.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub connection_kind: ConnectionKind,
    pub host: Option<String>,
    pub port: String,
    pub code: String,
    pub keep_alive: Duration,
    pub handle: tokio::runtime::Handle,
    /// Passed through untouched; the controller applies it.
    pub timeout: Duration,
}

/// Callback slots invoked by the controller, possibly from its own thread.
#[derive(Default)]
pub struct Callbacks {
    pub connected: Option<Callback>,
    pub login_timeout: Option<Callback>,
    pub zone_state_change: Option<Callback>,
    pub area_state_change: Option<Callback>,
    pub system_state_change: Option<Callback>,
    pub output_state_change: Option<Callback>,
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("connected", &self.connected.is_some())
            .field("login_timeout", &self.login_timeout.is_some())
            .field("zone_state_change", &self.zone_state_change.is_some())
            .field("area_state_change", &self.area_state_change.is_some())
            .field("system_state_change", &self.system_state_change.is_some())
            .field("output_state_change", &self.output_state_change.is_some())
            .finish()
    }
}

/// The panel controller. Commands are fire-and-forget.
pub trait Controller: Send + Sync {
    fn set_callbacks(&self, callbacks: Callbacks);
    fn start(&self);
    fn stop(&self);

    fn disarm(&self, code: &str);
    fn arm_stay(&self);
    fn arm_away(&self);
    fn panic_alarm(&self, reason: &str);
    fn send_keypress(&self, keys: &str);
    fn command_output(&self, output: &str);

    fn area_state(&self, area: u32) -> Option<Status>;
    fn zone_state(&self, zone: u32) -> Option<Status>;
    fn output_state(&self, output: u32) -> Option<Status>;
    fn system_state(&self) -> Status;
}

/// Builds the controller once the effective configuration is known.
pub trait ControllerFactory: Send {
    fn build(self: Box<Self>, settings: ControllerSettings) -> Arc<dyn Controller>;
}

impl<F> ControllerFactory for F
where
    F: FnOnce(ControllerSettings) -> Arc<dyn Controller> + Send,
{
    fn build(self: Box<Self>, settings: ControllerSettings) -> Arc<dyn Controller> {
        (*self)(settings)
    }
}

/// Reads `info["status"][field]`.
pub fn status_field<'a>(info: &'a Status, field: &str) -> Option<&'a Value> {
    info.get("status")?.as_object()?.get(field)
}

/// Reads a boolean status flag, treating anything missing or non-boolean as unset.
pub fn status_flag(info: &Status, field: &str) -> bool {
    status_field(info, field)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// The `status` sub-dictionary, used as entity attributes.
pub fn status_of(info: &Status) -> Option<Status> {
    info.get("status")?.as_object().cloned()
}
