//! Presentation of the controller's state as Home Assistant entities.
//!
//! Entities hold the shared controller and re-read its dictionaries on every
//! access; nothing is cached here.

pub mod alarm_panel;
pub mod binary_sensor;
pub mod sensor;
pub mod switch;

use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::{
    controller::{Controller, Payload, Status},
    error::{Error, Result},
    signal::Signal,
};

pub use alarm_panel::{AlarmState, AreaPanel};
pub use binary_sensor::ZoneSensor;
pub use sensor::SystemSensor;
pub use switch::OutputSwitch;

pub const MANUFACTURER: &str = "Arrowhead Alarms";
pub const MODEL: &str = "IP / Serial Module";
pub const DEVICE_NAME: &str = "Elite S Alarm System";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    AlarmControlPanel,
    BinarySensor,
    Sensor,
    Switch,
}

impl Component {
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::AlarmControlPanel => "alarm_control_panel",
            Component::BinarySensor => "binary_sensor",
            Component::Sensor => "sensor",
            Component::Switch => "switch",
        }
    }
}

pub trait Entity: Send + Sync {
    fn component(&self) -> Component;

    fn name(&self) -> &str;

    fn unique_id(&self) -> String;

    /// Topic-safe identifier derived from the unique id.
    fn object_id(&self) -> String {
        slugify(&self.unique_id())
    }

    /// Bus signals this entity listens to.
    fn signals(&self) -> &'static [Signal];

    /// Whether an update carrying `payload` concerns this entity.
    fn wants_update(&self, payload: &Payload) -> bool;

    fn state(&self) -> String;

    fn attributes(&self) -> Option<Status> {
        None
    }

    /// Component specific discovery keys.
    fn discovery_fields(&self) -> Map<String, Value> {
        Map::new()
    }

    /// Whether the entity accepts commands from Home Assistant.
    fn accepts_commands(&self) -> bool {
        false
    }

    fn handle_command(&self, command: &str) -> Result<()> {
        Err(Error::UnsupportedCommand {
            entity: self.unique_id(),
            command: command.to_string(),
        })
    }
}

/// State shared by every entity of the module.
#[derive(Clone)]
pub struct PanelDevice {
    name: String,
    controller: Arc<dyn Controller>,
}

impl PanelDevice {
    pub fn new(name: impl Into<String>, controller: Arc<dyn Controller>) -> Self {
        PanelDevice {
            name: name.into(),
            controller,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn controller(&self) -> &dyn Controller {
        self.controller.as_ref()
    }
}

/// Device registry block shared by all entities of the panel.
pub fn device_info(identifier: &str) -> Value {
    json!({
        "identifiers": ["aapalarm", identifier],
        "name": DEVICE_NAME,
        "manufacturer": MANUFACTURER,
        "model": MODEL,
    })
}

pub fn on_off(on: bool) -> String {
    let state = if on { "ON" } else { "OFF" };
    state.to_string()
}

pub fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    for c in value.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('_') {
            slug.push('_');
        }
    }
    slug.trim_matches('_').to_string()
}

pub(crate) fn title_case(value: &str) -> String {
    value
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}
