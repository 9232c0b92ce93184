//! Alarm control panel, one per configured area.

use log::debug;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::{collections::BTreeMap, sync::Arc};

use super::{device_info, Component, Entity, PanelDevice};
use crate::{
    config::AreaConfig,
    controller::{status_flag, status_of, Controller, Payload, Status},
    error::{Error, Result},
    signal::{Signal, UpdateKey},
};

const SIGNALS: &[Signal] = &[Signal::KeypadUpdate, Signal::AreaUpdate];

/// State payload Home Assistant reads as "unknown".
pub const UNKNOWN_PAYLOAD: &str = "None";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmState {
    Disarmed,
    ArmedHome,
    ArmedAway,
    Pending,
    Triggered,
    Unknown,
}

impl AlarmState {
    /// First match wins: triggered, armed away, armed home, exit delay, disarmed.
    pub fn from_info(info: &Status) -> Self {
        if status_flag(info, "alarm") {
            AlarmState::Triggered
        } else if status_flag(info, "armed") {
            AlarmState::ArmedAway
        } else if status_flag(info, "stay_armed") {
            AlarmState::ArmedHome
        } else if status_flag(info, "exit_delay") || status_flag(info, "stay_exit_delay") {
            AlarmState::Pending
        } else if status_flag(info, "disarmed") {
            AlarmState::Disarmed
        } else {
            AlarmState::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmState::Disarmed => "disarmed",
            AlarmState::ArmedHome => "armed_home",
            AlarmState::ArmedAway => "armed_away",
            AlarmState::Pending => "pending",
            AlarmState::Triggered => "triggered",
            AlarmState::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeFormat {
    Number,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmAction {
    ArmHome,
    ArmAway,
    Disarm,
    Trigger,
}

impl AlarmAction {
    fn parse(action: &str) -> Option<Self> {
        match action.trim().to_ascii_uppercase().as_str() {
            "ARM_HOME" => Some(AlarmAction::ArmHome),
            "ARM_AWAY" => Some(AlarmAction::ArmAway),
            "DISARM" => Some(AlarmAction::Disarm),
            "TRIGGER" => Some(AlarmAction::Trigger),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CommandPayload {
    action: String,
    #[serde(default)]
    code: Option<String>,
}

/// Parses `ARM_AWAY` or `{"action": "ARM_AWAY", "code": "1234"}`.
pub fn parse_command(payload: &str) -> Option<(AlarmAction, Option<String>)> {
    match serde_json::from_str::<CommandPayload>(payload) {
        Ok(command) => {
            let code = command.code.filter(|code| !code.is_empty());
            AlarmAction::parse(&command.action).map(|action| (action, code))
        }
        Err(_) => AlarmAction::parse(payload).map(|action| (action, None)),
    }
}

pub struct AreaPanel {
    device: PanelDevice,
    area: u32,
    identity: &'static str,
    code: String,
    code_arm_required: bool,
}

impl AreaPanel {
    pub fn new(area: u32, config: &AreaConfig, controller: Arc<dyn Controller>) -> Self {
        debug!("Setting up alarm: {}", config.name);
        AreaPanel {
            device: PanelDevice::new(config.name.clone(), controller),
            area,
            identity: if area == 1 { "A" } else { "B" },
            code: config.code.clone(),
            code_arm_required: config.code_arm_required,
        }
    }

    pub fn area(&self) -> u32 {
        self.area
    }

    /// Letter the panel uses for this area in its own update signals.
    pub fn identity(&self) -> &str {
        self.identity
    }

    fn info(&self) -> Option<Status> {
        self.device.controller().area_state(self.area)
    }

    pub fn alarm_state(&self) -> AlarmState {
        match self.info() {
            Some(info) => AlarmState::from_info(&info),
            None => AlarmState::Unknown,
        }
    }

    /// No code prompt when a code is configured, a numeric keypad otherwise.
    pub fn code_format(&self) -> Option<CodeFormat> {
        if self.code.is_empty() {
            Some(CodeFormat::Number)
        } else {
            None
        }
    }

    pub fn code_arm_required(&self) -> bool {
        self.code_arm_required
    }

    pub fn alarm_disarm(&self, code: Option<&str>) {
        match code.filter(|code| !code.is_empty()) {
            Some(code) => self.device.controller().disarm(code),
            None => self.device.controller().disarm(&self.code),
        }
    }

    pub fn alarm_arm_home(&self, _code: Option<&str>) {
        self.device.controller().arm_stay();
    }

    /// A supplied code is typed on the keypad, which arms the area away.
    pub fn alarm_arm_away(&self, code: Option<&str>) {
        match code.filter(|code| !code.is_empty()) {
            Some(code) => self.device.controller().send_keypress(code),
            None => self.device.controller().arm_away(),
        }
    }

    /// Raises a panic alarm.
    pub fn alarm_trigger(&self, _code: Option<&str>) {
        self.device.controller().panic_alarm("");
    }

    pub fn alarm_keypress(&self, keypress: Option<&str>) {
        if let Some(keypress) = keypress.filter(|keys| !keys.is_empty()) {
            self.device.controller().send_keypress(keypress);
        }
    }
}

impl Entity for AreaPanel {
    fn component(&self) -> Component {
        Component::AlarmControlPanel
    }

    fn name(&self) -> &str {
        self.device.name()
    }

    fn unique_id(&self) -> String {
        format!("aapalarm_alarmpanel_{}", self.device.name())
    }

    fn signals(&self) -> &'static [Signal] {
        SIGNALS
    }

    fn wants_update(&self, payload: &Payload) -> bool {
        match UpdateKey::from_payload(payload) {
            UpdateKey::All => true,
            UpdateKey::Name(name) => name == self.identity,
            UpdateKey::Number(n) => n == i64::from(self.area),
        }
    }

    fn state(&self) -> String {
        match self.alarm_state() {
            AlarmState::Unknown => UNKNOWN_PAYLOAD.to_string(),
            state => state.as_str().to_string(),
        }
    }

    fn attributes(&self) -> Option<Status> {
        self.info().as_ref().and_then(status_of)
    }

    fn discovery_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        let remote_code = self.code_format().is_some();
        if remote_code {
            fields.insert("code".into(), json!("REMOTE_CODE"));
        }
        fields.insert("code_arm_required".into(), json!(self.code_arm_required));
        fields.insert("code_disarm_required".into(), json!(remote_code));
        fields.insert("code_trigger_required".into(), json!(false));
        fields.insert(
            "command_template".into(),
            json!("{\"action\": \"{{ action }}\", \"code\": \"{{ code }}\"}"),
        );
        fields.insert(
            "supported_features".into(),
            json!(["arm_home", "arm_away", "trigger"]),
        );
        fields.insert("device".into(), device_info(self.device.name()));
        fields
    }

    fn accepts_commands(&self) -> bool {
        true
    }

    fn handle_command(&self, command: &str) -> Result<()> {
        let (action, code) = parse_command(command).ok_or_else(|| Error::UnsupportedCommand {
            entity: self.unique_id(),
            command: command.to_string(),
        })?;
        debug!("{} received {:?}", self.device.name(), action);
        let code = code.as_deref();
        match action {
            AlarmAction::ArmHome => self.alarm_arm_home(code),
            AlarmAction::ArmAway => self.alarm_arm_away(code),
            AlarmAction::Disarm => self.alarm_disarm(code),
            AlarmAction::Trigger => self.alarm_trigger(code),
        }
        Ok(())
    }
}

pub fn setup_platform(
    areas: &BTreeMap<u32, AreaConfig>,
    controller: &Arc<dyn Controller>,
) -> Vec<AreaPanel> {
    areas
        .iter()
        .map(|(area, config)| AreaPanel::new(*area, config, Arc::clone(controller)))
        .collect()
}
