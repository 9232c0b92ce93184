use log::debug;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use super::{device_info, Component, Entity, PanelDevice};
use crate::{
    controller::{status_field, status_of, Controller, Payload, Status},
    signal::Signal,
};

const SIGNALS: &[Signal] = &[Signal::SystemUpdate];
const NAME: &str = "Alarm System Status";
const ICON: &str = "mdi:list-status";

/// Panel-wide status, shown as the mains power field.
pub struct SystemSensor {
    device: PanelDevice,
}

impl SystemSensor {
    pub fn new(controller: Arc<dyn Controller>) -> Self {
        debug!("Setting up sensor for system");
        SystemSensor {
            device: PanelDevice::new(NAME, controller),
        }
    }

    pub fn icon(&self) -> &'static str {
        ICON
    }
}

impl Entity for SystemSensor {
    fn component(&self) -> Component {
        Component::Sensor
    }

    fn name(&self) -> &str {
        self.device.name()
    }

    fn unique_id(&self) -> String {
        "aapalarm_system_status".to_string()
    }

    fn signals(&self) -> &'static [Signal] {
        SIGNALS
    }

    fn wants_update(&self, _payload: &Payload) -> bool {
        true
    }

    fn state(&self) -> String {
        let system = self.device.controller().system_state();
        match status_field(&system, "mains") {
            None | Some(Value::Null) => "unknown".to_string(),
            Some(Value::String(mains)) => mains.clone(),
            Some(other) => other.to_string(),
        }
    }

    fn attributes(&self) -> Option<Status> {
        status_of(&self.device.controller().system_state())
    }

    fn discovery_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert("icon".into(), json!(ICON));
        fields.insert("device".into(), device_info(self.device.name()));
        fields
    }
}

pub fn setup_platform(controller: &Arc<dyn Controller>) -> Vec<SystemSensor> {
    vec![SystemSensor::new(Arc::clone(controller))]
}
