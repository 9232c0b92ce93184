use log::debug;
use serde_json::{json, Map, Value};
use std::{collections::BTreeMap, sync::Arc};

use super::{device_info, on_off, Component, Entity, PanelDevice};
use crate::{
    config::OutputConfig,
    controller::{status_flag, status_of, Controller, Payload, Status},
    error::{Error, Result},
    signal::{Signal, UpdateKey},
};

const SIGNALS: &[Signal] = &[Signal::OutputUpdate];

/// A panel output relay.
///
/// The panel only exposes a single "command output" operation, so turning on
/// and turning off send the same command.
pub struct OutputSwitch {
    device: PanelDevice,
    output: u32,
}

impl OutputSwitch {
    pub fn new(output: u32, config: &OutputConfig, controller: Arc<dyn Controller>) -> Self {
        debug!("Setting up output switch for system");
        OutputSwitch {
            device: PanelDevice::new(format!("Alarm Output: {}", config.name), controller),
            output,
        }
    }

    pub fn output(&self) -> u32 {
        self.output
    }

    fn info(&self) -> Option<Status> {
        self.device.controller().output_state(self.output)
    }

    pub fn is_on(&self) -> bool {
        let on = self
            .info()
            .map(|info| status_flag(&info, "open"))
            .unwrap_or(false);
        debug!("Is_on={}", on);
        on
    }

    pub fn turn_on(&self) {
        self.device.controller().command_output(&self.output.to_string());
    }

    pub fn turn_off(&self) {
        self.device.controller().command_output(&self.output.to_string());
    }
}

impl Entity for OutputSwitch {
    fn component(&self) -> Component {
        Component::Switch
    }

    fn name(&self) -> &str {
        self.device.name()
    }

    fn unique_id(&self) -> String {
        format!("aapalarm_output_{}", self.output)
    }

    fn signals(&self) -> &'static [Signal] {
        SIGNALS
    }

    fn wants_update(&self, payload: &Payload) -> bool {
        let wanted = UpdateKey::from_payload(payload).matches_number(self.output);
        if wanted {
            debug!("Update output {:?}", payload);
        }
        wanted
    }

    fn state(&self) -> String {
        on_off(self.is_on())
    }

    fn attributes(&self) -> Option<Status> {
        self.info().as_ref().and_then(status_of)
    }

    fn discovery_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert("payload_on".into(), json!("ON"));
        fields.insert("payload_off".into(), json!("OFF"));
        fields.insert("device".into(), device_info(self.device.name()));
        fields
    }

    fn accepts_commands(&self) -> bool {
        true
    }

    fn handle_command(&self, command: &str) -> Result<()> {
        match command.trim().to_ascii_uppercase().as_str() {
            "ON" => self.turn_on(),
            "OFF" => self.turn_off(),
            _ => {
                return Err(Error::UnsupportedCommand {
                    entity: self.unique_id(),
                    command: command.to_string(),
                })
            }
        }
        Ok(())
    }
}

pub fn setup_platform(
    outputs: &BTreeMap<u32, OutputConfig>,
    controller: &Arc<dyn Controller>,
) -> Vec<OutputSwitch> {
    outputs
        .iter()
        .map(|(output, config)| OutputSwitch::new(*output, config, Arc::clone(controller)))
        .collect()
}
