use log::debug;
use serde_json::{json, Map, Value};
use std::{collections::BTreeMap, sync::Arc};

use super::{device_info, on_off, title_case, Component, Entity, PanelDevice};
use crate::{
    config::ZoneConfig,
    controller::{status_flag, status_of, Controller, Payload, Status},
    signal::{Signal, UpdateKey},
};

const SIGNALS: &[Signal] = &[Signal::ZoneUpdate];

/// A zone input shown as an open/closed sensor.
pub struct ZoneSensor {
    device: PanelDevice,
    zone: u32,
    zone_type: String,
}

impl ZoneSensor {
    pub fn new(zone: u32, config: &ZoneConfig, controller: Arc<dyn Controller>) -> Self {
        debug!("Setting up zone: {}", config.name);
        let name = format!("Alarm {}: {}", title_case(&config.zone_type), config.name);
        ZoneSensor {
            device: PanelDevice::new(name, controller),
            zone,
            zone_type: config.zone_type.clone(),
        }
    }

    pub fn zone(&self) -> u32 {
        self.zone
    }

    pub fn device_class(&self) -> &str {
        &self.zone_type
    }

    fn info(&self) -> Option<Status> {
        self.device.controller().zone_state(self.zone)
    }

    pub fn is_on(&self) -> bool {
        self.info()
            .map(|info| status_flag(&info, "open"))
            .unwrap_or(false)
    }
}

impl Entity for ZoneSensor {
    fn component(&self) -> Component {
        Component::BinarySensor
    }

    fn name(&self) -> &str {
        self.device.name()
    }

    fn unique_id(&self) -> String {
        format!("aapalarm_zone_{}", self.device.name())
    }

    fn signals(&self) -> &'static [Signal] {
        SIGNALS
    }

    fn wants_update(&self, payload: &Payload) -> bool {
        UpdateKey::from_payload(payload).matches_number(self.zone)
    }

    fn state(&self) -> String {
        on_off(self.is_on())
    }

    fn attributes(&self) -> Option<Status> {
        self.info().as_ref().and_then(status_of)
    }

    fn discovery_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert("device_class".into(), json!(self.zone_type));
        fields.insert("payload_on".into(), json!("ON"));
        fields.insert("payload_off".into(), json!("OFF"));
        fields.insert("device".into(), device_info(self.device.name()));
        fields
    }
}

pub fn setup_platform(
    zones: &BTreeMap<u32, ZoneConfig>,
    controller: &Arc<dyn Controller>,
) -> Vec<ZoneSensor> {
    zones
        .iter()
        .map(|(zone, config)| ZoneSensor::new(*zone, config, Arc::clone(controller)))
        .collect()
}
