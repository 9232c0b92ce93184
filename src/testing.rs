//! In-memory controller used by the unit tests.

use serde_json::{json, Value};
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use crate::controller::{Callbacks, Controller, Payload, Status};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Disarm(String),
    ArmStay,
    ArmAway,
    PanicAlarm(String),
    Keypress(String),
    Output(String),
}

#[derive(Default)]
pub struct FakeController {
    callbacks: Mutex<Callbacks>,
    commands: Mutex<Vec<Command>>,
    areas: Mutex<BTreeMap<u32, Status>>,
    zones: Mutex<BTreeMap<u32, Status>>,
    outputs: Mutex<BTreeMap<u32, Status>>,
    system: Mutex<Status>,
}

pub fn status(fields: Value) -> Status {
    json!({ "status": fields })
        .as_object()
        .cloned()
        .unwrap_or_default()
}

impl FakeController {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_area(&self, area: u32, fields: Value) {
        self.areas.lock().unwrap().insert(area, status(fields));
    }

    pub fn set_zone(&self, zone: u32, fields: Value) {
        self.zones.lock().unwrap().insert(zone, status(fields));
    }

    pub fn set_output(&self, output: u32, fields: Value) {
        self.outputs.lock().unwrap().insert(output, status(fields));
    }

    pub fn set_system(&self, fields: Value) {
        *self.system.lock().unwrap() = status(fields);
    }

    pub fn commands(&self) -> Vec<Command> {
        self.commands.lock().unwrap().clone()
    }

    fn record(&self, command: Command) {
        self.commands.lock().unwrap().push(command);
    }

    pub fn fire_connected(&self, payload: Payload) {
        if let Some(cb) = &self.callbacks.lock().unwrap().connected {
            cb(payload);
        }
    }

    pub fn fire_login_timeout(&self, payload: Payload) {
        if let Some(cb) = &self.callbacks.lock().unwrap().login_timeout {
            cb(payload);
        }
    }

    pub fn fire_zone(&self, payload: Payload) {
        if let Some(cb) = &self.callbacks.lock().unwrap().zone_state_change {
            cb(payload);
        }
    }

    pub fn fire_area(&self, payload: Payload) {
        if let Some(cb) = &self.callbacks.lock().unwrap().area_state_change {
            cb(payload);
        }
    }

    pub fn fire_system(&self, payload: Payload) {
        if let Some(cb) = &self.callbacks.lock().unwrap().system_state_change {
            cb(payload);
        }
    }

    pub fn fire_output(&self, payload: Payload) {
        if let Some(cb) = &self.callbacks.lock().unwrap().output_state_change {
            cb(payload);
        }
    }

    /// Drops every registered callback, as a controller torn down mid-connect would.
    pub fn forget_callbacks(&self) {
        *self.callbacks.lock().unwrap() = Callbacks::default();
    }
}

impl Controller for FakeController {
    fn set_callbacks(&self, callbacks: Callbacks) {
        *self.callbacks.lock().unwrap() = callbacks;
    }

    fn start(&self) {
        self.record(Command::Start);
    }

    fn stop(&self) {
        self.record(Command::Stop);
    }

    fn disarm(&self, code: &str) {
        self.record(Command::Disarm(code.to_string()));
    }

    fn arm_stay(&self) {
        self.record(Command::ArmStay);
    }

    fn arm_away(&self) {
        self.record(Command::ArmAway);
    }

    fn panic_alarm(&self, reason: &str) {
        self.record(Command::PanicAlarm(reason.to_string()));
    }

    fn send_keypress(&self, keys: &str) {
        self.record(Command::Keypress(keys.to_string()));
    }

    fn command_output(&self, output: &str) {
        self.record(Command::Output(output.to_string()));
    }

    fn area_state(&self, area: u32) -> Option<Status> {
        self.areas.lock().unwrap().get(&area).cloned()
    }

    fn zone_state(&self, zone: u32) -> Option<Status> {
        self.zones.lock().unwrap().get(&zone).cloned()
    }

    fn output_state(&self, output: u32) -> Option<Status> {
        self.outputs.lock().unwrap().get(&output).cloned()
    }

    fn system_state(&self) -> Status {
        self.system.lock().unwrap().clone()
    }
}
