//! Guided setup: a step machine fed with JSON form input that ends in a
//! [`ConfigEntry`].
//!
//! Each step either re-shows its form (with an error tag under `base`) or
//! advances. Fields that carry a default may be omitted from the input.

use log::{debug, error, info};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::{collections::BTreeMap, fmt};

use crate::{
    config::{
        AapConfig, AreaConfig, ConfigEntry, ConnectionParams, OutputConfig, ZoneConfig,
        DEFAULT_KEEPALIVE, MIN_KEEPALIVE,
    },
    controller::ConnectionKind,
};

pub const AREA_COUNT: &str = "Number of Areas in use";
pub const ZONE_COUNT: &str = "Number of Zones in use";
pub const OUTPUT_COUNT: &str = "Number of Outputs in use";
pub const ZONE_TYPES: [&str; 4] = ["Motion", "Door", "Window", "Smoke"];
pub const MAX_AREAS: i64 = 2;

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_SERIAL_PORT: &str = "/dev/ttyUSB0";
const DEFAULT_FLOW_TIMEOUT: u64 = 20;
const DEFAULT_AREA_COUNT: i64 = 1;
const DEFAULT_ZONE_COUNT: i64 = 8;
const DEFAULT_OUTPUT_COUNT: i64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepId {
    User,
    AreaCount,
    Area,
    ZoneCount,
    Zone,
    OutputCount,
    Output,
    Init,
}

impl StepId {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepId::User => "user",
            StepId::AreaCount => "area_count",
            StepId::Area => "area",
            StepId::ZoneCount => "zone_count",
            StepId::Zone => "zone",
            StepId::OutputCount => "output_count",
            StepId::Output => "output",
            StepId::Init => "init",
        }
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Integer,
    Boolean,
    Select,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl FormField {
    fn new(name: &str, field_type: FieldType, default: Option<Value>) -> Self {
        FormField {
            name: name.to_string(),
            field_type,
            default,
            options: Vec::new(),
        }
    }

    fn select(name: &str, options: &[&str], default: &str) -> Self {
        FormField {
            name: name.to_string(),
            field_type: FieldType::Select,
            default: Some(json!(default)),
            options: options.iter().map(|option| option.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Form {
    pub step_id: StepId,
    pub fields: Vec<FormField>,
    pub errors: BTreeMap<String, String>,
    pub placeholders: BTreeMap<String, String>,
}

impl Form {
    pub fn error(&self) -> Option<&str> {
        self.errors.get("base").map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FlowResult {
    Form(Form),
    CreateEntry(ConfigEntry),
}

type StepError = &'static str;

const UNKNOWN: StepError = "unknown";

/// The multi-step setup flow.
#[derive(Debug)]
pub struct ConfigFlow {
    flow_id: String,
    step: StepId,
    connection: Option<ConnectionParams>,
    area_count: i64,
    zone_count: i64,
    output_count: i64,
    index: i64,
    areas: BTreeMap<u32, AreaConfig>,
    zones: BTreeMap<u32, ZoneConfig>,
    outputs: BTreeMap<u32, OutputConfig>,
}

impl Default for ConfigFlow {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigFlow {
    pub fn new() -> Self {
        ConfigFlow {
            flow_id: uuid::Uuid::new_v4().to_string(),
            step: StepId::User,
            connection: None,
            area_count: 0,
            zone_count: 0,
            output_count: 0,
            index: 1,
            areas: BTreeMap::new(),
            zones: BTreeMap::new(),
            outputs: BTreeMap::new(),
        }
    }

    pub fn flow_id(&self) -> &str {
        &self.flow_id
    }

    pub fn step(&self) -> StepId {
        self.step
    }

    /// The form of the current step.
    pub fn form(&self) -> Form {
        self.show(None)
    }

    /// Feeds the input of the current step.
    pub fn submit(&mut self, input: &Value) -> FlowResult {
        debug!("Flow {} step {} input {}", self.flow_id, self.step, input);
        let outcome = match input.as_object() {
            Some(input) => self.advance(input),
            None => Err(UNKNOWN),
        };
        match outcome {
            Ok(Some(entry)) => {
                info!("Flow {} created entry {}", self.flow_id, entry.entry_id);
                FlowResult::CreateEntry(entry)
            }
            Ok(None) => FlowResult::Form(self.show(None)),
            Err(tag) => {
                error!("Error in step {}: {}", self.step, tag);
                FlowResult::Form(self.show(Some(tag)))
            }
        }
    }

    fn advance(&mut self, input: &Map<String, Value>) -> Result<Option<ConfigEntry>, StepError> {
        match self.step {
            StepId::User | StepId::Init => {
                self.connection = Some(parse_connection(input, &user_defaults())?);
                self.step = StepId::AreaCount;
            }
            StepId::AreaCount => {
                let count = integer(input, AREA_COUNT, Some(DEFAULT_AREA_COUNT))?;
                if !(1..=MAX_AREAS).contains(&count) {
                    return Err("invalid_area_count");
                }
                self.area_count = count;
                self.index = 1;
                self.step = StepId::Area;
            }
            StepId::Area => {
                let id = ordinal(input)?;
                let area = AreaConfig {
                    name: text(input, "Name", None)?,
                    code: text(input, "Code", Some(""))?,
                    code_arm_required: boolean(input, "Code Required to Arm", Some(false))?,
                };
                self.areas.insert(id, area);
                self.index += 1;
                if self.index > self.area_count {
                    self.step = StepId::ZoneCount;
                }
            }
            StepId::ZoneCount => {
                let count = integer(input, ZONE_COUNT, Some(DEFAULT_ZONE_COUNT))?;
                if count < 1 {
                    return Err("invalid_zone_count");
                }
                self.zone_count = count;
                self.index = 1;
                self.step = StepId::Zone;
            }
            StepId::Zone => {
                let id = ordinal(input)?;
                let name = text(input, "Name", None)?;
                let zone_type = text(input, "Type", Some(ZONE_TYPES[0]))?;
                if !ZONE_TYPES
                    .iter()
                    .any(|known| known.eq_ignore_ascii_case(&zone_type))
                {
                    return Err(UNKNOWN);
                }
                self.zones.insert(
                    id,
                    ZoneConfig {
                        name,
                        zone_type: zone_type.to_lowercase(),
                    },
                );
                self.index += 1;
                if self.index > self.zone_count {
                    self.step = StepId::OutputCount;
                }
            }
            StepId::OutputCount => {
                let count = integer(input, OUTPUT_COUNT, Some(DEFAULT_OUTPUT_COUNT))?;
                if count < 0 {
                    return Err("invalid_output_count");
                }
                self.output_count = count;
                if count == 0 {
                    return self.create_entry().map(Some);
                }
                self.index = 1;
                self.step = StepId::Output;
            }
            StepId::Output => {
                let id = ordinal(input)?;
                let name = text(input, "Name", None)?;
                self.outputs.insert(id, OutputConfig { name });
                self.index += 1;
                if self.index > self.output_count {
                    return self.create_entry().map(Some);
                }
            }
        }
        Ok(None)
    }

    fn create_entry(&self) -> Result<ConfigEntry, StepError> {
        let connection = self.connection.clone().ok_or(UNKNOWN)?;
        Ok(ConfigEntry::new(AapConfig {
            connection,
            areas: self.areas.clone(),
            zones: self.zones.clone(),
            outputs: self.outputs.clone(),
        }))
    }

    fn show(&self, error: Option<StepError>) -> Form {
        let (fields, title) = match self.step {
            StepId::User | StepId::Init => {
                (connection_fields(&user_defaults()), "Connection Details".to_string())
            }
            StepId::AreaCount => (
                vec![FormField::new(
                    AREA_COUNT,
                    FieldType::Integer,
                    Some(json!(DEFAULT_AREA_COUNT)),
                )],
                "Areas".to_string(),
            ),
            StepId::Area => (
                vec![
                    FormField::new("ID", FieldType::Integer, None),
                    FormField::new("Name", FieldType::Text, None),
                    FormField::new("Code", FieldType::Text, Some(json!(""))),
                    FormField::new("Code Required to Arm", FieldType::Boolean, Some(json!(false))),
                ],
                format!("Area {}", self.index),
            ),
            StepId::ZoneCount => (
                vec![FormField::new(
                    ZONE_COUNT,
                    FieldType::Integer,
                    Some(json!(DEFAULT_ZONE_COUNT)),
                )],
                "Zones".to_string(),
            ),
            StepId::Zone => (
                vec![
                    FormField::new("ID", FieldType::Integer, None),
                    FormField::new("Name", FieldType::Text, None),
                    FormField::select("Type", &ZONE_TYPES, ZONE_TYPES[0]),
                ],
                format!("Zone {}", self.index),
            ),
            StepId::OutputCount => (
                vec![FormField::new(
                    OUTPUT_COUNT,
                    FieldType::Integer,
                    Some(json!(DEFAULT_OUTPUT_COUNT)),
                )],
                "Outputs".to_string(),
            ),
            StepId::Output => (
                vec![
                    FormField::new("ID", FieldType::Integer, None),
                    FormField::new("Name", FieldType::Text, None),
                ],
                format!("Output {}", self.index),
            ),
        };
        form(self.step, fields, title, error)
    }
}

/// Re-collects the connection parameters of an existing entry.
#[derive(Debug)]
pub struct OptionsFlow {
    flow_id: String,
    entry: ConfigEntry,
}

impl OptionsFlow {
    pub fn new(entry: ConfigEntry) -> Self {
        OptionsFlow {
            flow_id: uuid::Uuid::new_v4().to_string(),
            entry,
        }
    }

    pub fn flow_id(&self) -> &str {
        &self.flow_id
    }

    fn current(&self) -> ConnectionParams {
        self.entry
            .options
            .clone()
            .unwrap_or_else(|| self.entry.data.connection.clone())
    }

    pub fn form(&self) -> Form {
        form(StepId::Init, connection_fields(&self.current()), String::new(), None)
    }

    /// Returns the entry with its options replaced on success.
    pub fn submit(&mut self, input: &Value) -> FlowResult {
        let parsed = match input.as_object() {
            Some(input) => parse_connection(input, &self.current()),
            None => Err(UNKNOWN),
        };
        match parsed {
            Ok(options) => {
                info!("Options updated for entry {}", self.entry.entry_id);
                let mut entry = self.entry.clone();
                entry.options = Some(options);
                FlowResult::CreateEntry(entry)
            }
            Err(tag) => {
                error!("Error in step init: {}", tag);
                FlowResult::Form(form(
                    StepId::Init,
                    connection_fields(&self.current()),
                    String::new(),
                    Some(tag),
                ))
            }
        }
    }
}

fn form(step_id: StepId, fields: Vec<FormField>, title: String, error: Option<StepError>) -> Form {
    let mut errors = BTreeMap::new();
    if let Some(tag) = error {
        errors.insert("base".to_string(), tag.to_string());
    }
    let mut placeholders = BTreeMap::new();
    if !title.is_empty() {
        placeholders.insert("title".to_string(), title);
    }
    Form {
        step_id,
        fields,
        errors,
        placeholders,
    }
}

fn user_defaults() -> ConnectionParams {
    ConnectionParams {
        connection_kind: ConnectionKind::Serial,
        host: Some(DEFAULT_HOST.to_string()),
        port: DEFAULT_SERIAL_PORT.to_string(),
        keep_alive: DEFAULT_KEEPALIVE,
        timeout: DEFAULT_FLOW_TIMEOUT,
    }
}

fn connection_fields(defaults: &ConnectionParams) -> Vec<FormField> {
    let kinds: Vec<&str> = ConnectionKind::ALL.iter().map(|kind| kind.as_str()).collect();
    vec![
        FormField::select("connectiontype", &kinds, defaults.connection_kind.as_str()),
        FormField::new(
            "host",
            FieldType::Text,
            Some(json!(defaults.host.clone().unwrap_or_default())),
        ),
        FormField::new("port", FieldType::Text, Some(json!(defaults.port))),
        FormField::new(
            "keepalive_interval",
            FieldType::Integer,
            Some(json!(defaults.keep_alive)),
        ),
        FormField::new("timeout", FieldType::Integer, Some(json!(defaults.timeout))),
    ]
}

fn parse_connection(
    input: &Map<String, Value>,
    defaults: &ConnectionParams,
) -> Result<ConnectionParams, StepError> {
    let kind = text(input, "connectiontype", Some(defaults.connection_kind.as_str()))?;
    let connection_kind = ConnectionKind::parse(&kind).ok_or("invalid_connection_type")?;
    let host = text(input, "host", defaults.host.as_deref().or(Some("")))?;
    let port = match input.get("port") {
        Some(Value::Number(port)) => port.to_string(),
        _ => text(input, "port", Some(&defaults.port))?,
    };
    let keep_alive = integer(input, "keepalive_interval", Some(defaults.keep_alive as i64))?;
    if keep_alive < MIN_KEEPALIVE as i64 {
        return Err("invalid_keepalive");
    }
    let timeout = integer(input, "timeout", Some(defaults.timeout as i64))?;
    if timeout < 0 {
        return Err(UNKNOWN);
    }
    Ok(ConnectionParams {
        connection_kind,
        host: if host.is_empty() { None } else { Some(host) },
        port,
        keep_alive: keep_alive as u64,
        timeout: timeout as u64,
    })
}

fn text(input: &Map<String, Value>, name: &str, default: Option<&str>) -> Result<String, StepError> {
    match input.get(name) {
        Some(Value::String(value)) => Ok(value.trim().to_string()),
        None | Some(Value::Null) => default.map(str::to_string).ok_or(UNKNOWN),
        Some(_) => Err(UNKNOWN),
    }
}

/// Accepts a JSON integer or a string holding one.
fn integer(input: &Map<String, Value>, name: &str, default: Option<i64>) -> Result<i64, StepError> {
    match input.get(name) {
        Some(Value::Number(value)) => value.as_i64().ok_or(UNKNOWN),
        Some(Value::String(value)) => value.trim().parse().map_err(|_| UNKNOWN),
        None | Some(Value::Null) => default.ok_or(UNKNOWN),
        Some(_) => Err(UNKNOWN),
    }
}

fn boolean(input: &Map<String, Value>, name: &str, default: Option<bool>) -> Result<bool, StepError> {
    match input.get(name) {
        Some(Value::Bool(value)) => Ok(*value),
        Some(Value::String(value)) => match value.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "y" | "on" | "1" => Ok(true),
            "false" | "no" | "n" | "off" | "0" => Ok(false),
            _ => Err(UNKNOWN),
        },
        None | Some(Value::Null) => default.ok_or(UNKNOWN),
        Some(_) => Err(UNKNOWN),
    }
}

fn ordinal(input: &Map<String, Value>) -> Result<u32, StepError> {
    let id = integer(input, "ID", None)?;
    u32::try_from(id)
        .ok()
        .filter(|id| *id >= 1)
        .ok_or(UNKNOWN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn expect_form(result: FlowResult) -> Form {
        match result {
            FlowResult::Form(form) => form,
            FlowResult::CreateEntry(entry) => panic!("unexpected entry {:?}", entry),
        }
    }

    fn expect_entry(result: FlowResult) -> ConfigEntry {
        match result {
            FlowResult::CreateEntry(entry) => entry,
            FlowResult::Form(form) => panic!("unexpected form {:?}", form),
        }
    }

    fn through_areas(flow: &mut ConfigFlow) {
        expect_form(flow.submit(&json!({"connectiontype": "ip", "host": "10.0.0.5", "port": 5002})));
        expect_form(flow.submit(&json!({ AREA_COUNT: 1 })));
        expect_form(flow.submit(&json!({"ID": 1, "Name": "House", "Code": "1234"})));
    }

    #[test]
    fn starts_with_user_form_and_defaults() {
        let flow = ConfigFlow::new();
        let form = flow.form();
        assert_eq!(form.step_id, StepId::User);
        assert_eq!(form.placeholders["title"], "Connection Details");
        let defaults: Vec<(String, Option<Value>)> = form
            .fields
            .iter()
            .map(|field| (field.name.clone(), field.default.clone()))
            .collect();
        assert_eq!(
            defaults,
            vec![
                ("connectiontype".to_string(), Some(json!("serial"))),
                ("host".to_string(), Some(json!("localhost"))),
                ("port".to_string(), Some(json!("/dev/ttyUSB0"))),
                ("keepalive_interval".to_string(), Some(json!(60))),
                ("timeout".to_string(), Some(json!(20))),
            ]
        );
        assert!(!flow.flow_id().is_empty());
        assert_ne!(flow.flow_id(), ConfigFlow::new().flow_id());
    }

    #[test]
    fn full_flow_creates_entry() {
        let mut flow = ConfigFlow::new();
        through_areas(&mut flow);
        let form = expect_form(flow.submit(&json!({ ZONE_COUNT: "2" })));
        assert_eq!(form.step_id, StepId::Zone);
        assert_eq!(form.placeholders["title"], "Zone 1");
        expect_form(flow.submit(&json!({"ID": 1, "Name": "Front", "Type": "Door"})));
        let form = expect_form(flow.submit(&json!({"ID": 2, "Name": "Hall", "Type": "Motion"})));
        assert_eq!(form.step_id, StepId::OutputCount);
        expect_form(flow.submit(&json!({ OUTPUT_COUNT: 1 })));
        let entry = expect_entry(flow.submit(&json!({"ID": 3, "Name": "Siren"})));

        assert_eq!(entry.title, "AAP Alarm");
        assert_eq!(entry.version, "2024.11.30");
        let data = entry.data;
        assert_eq!(data.connection.connection_kind, ConnectionKind::Ip);
        assert_eq!(data.connection.host.as_deref(), Some("10.0.0.5"));
        assert_eq!(data.connection.port, "5002");
        assert_eq!(data.connection.keep_alive, 60);
        assert_eq!(data.connection.timeout, 20);
        assert_eq!(data.areas[&1].code, "1234");
        assert!(!data.areas[&1].code_arm_required);
        assert_eq!(data.zones[&1].zone_type, "door");
        assert_eq!(data.zones[&2].zone_type, "motion");
        assert_eq!(data.outputs[&3].name, "Siren");
    }

    #[test]
    fn zero_outputs_finishes_immediately() {
        let mut flow = ConfigFlow::new();
        through_areas(&mut flow);
        expect_form(flow.submit(&json!({ ZONE_COUNT: 1 })));
        expect_form(flow.submit(&json!({"ID": 1, "Name": "Front"})));
        let entry = expect_entry(flow.submit(&json!({ OUTPUT_COUNT: 0 })));
        assert!(entry.data.outputs.is_empty());
        assert_eq!(entry.data.zones[&1].zone_type, "motion");
    }

    #[test]
    fn area_count_outside_range_is_rejected() {
        let mut flow = ConfigFlow::new();
        expect_form(flow.submit(&json!({})));
        for count in [0, -1, 3] {
            let form = expect_form(flow.submit(&json!({ AREA_COUNT: count })));
            assert_eq!(form.step_id, StepId::AreaCount);
            assert_eq!(form.error(), Some("invalid_area_count"));
        }
        let form = expect_form(flow.submit(&json!({ AREA_COUNT: 2 })));
        assert_eq!(form.step_id, StepId::Area);
        assert_eq!(form.error(), None);
    }

    #[test]
    fn zone_and_output_counts_are_validated() {
        let mut flow = ConfigFlow::new();
        through_areas(&mut flow);
        let form = expect_form(flow.submit(&json!({ ZONE_COUNT: 0 })));
        assert_eq!(form.error(), Some("invalid_zone_count"));
        expect_form(flow.submit(&json!({ ZONE_COUNT: 1 })));
        expect_form(flow.submit(&json!({"ID": 1, "Name": "Front", "Type": "window"})));
        let form = expect_form(flow.submit(&json!({ OUTPUT_COUNT: -1 })));
        assert_eq!(form.step_id, StepId::OutputCount);
        assert_eq!(form.error(), Some("invalid_output_count"));
    }

    #[test]
    fn malformed_input_reshows_step_as_unknown() {
        let mut flow = ConfigFlow::new();
        through_areas(&mut flow);
        let form = expect_form(flow.submit(&json!({ ZONE_COUNT: "many" })));
        assert_eq!(form.error(), Some("unknown"));
        expect_form(flow.submit(&json!({ ZONE_COUNT: 1 })));
        let form = expect_form(flow.submit(&json!({"Name": "No id"})));
        assert_eq!(form.step_id, StepId::Zone);
        assert_eq!(form.error(), Some("unknown"));
        let form = expect_form(flow.submit(&json!({"ID": 1, "Name": "x", "Type": "Garage"})));
        assert_eq!(form.error(), Some("unknown"));
        let form = expect_form(flow.submit(&json!("not a form")));
        assert_eq!(form.error(), Some("unknown"));
    }

    #[test]
    fn connection_step_is_validated() {
        let mut flow = ConfigFlow::new();
        let form = expect_form(flow.submit(&json!({"connectiontype": "usb"})));
        assert_eq!(form.error(), Some("invalid_connection_type"));
        let form = expect_form(flow.submit(&json!({"keepalive_interval": 5})));
        assert_eq!(form.error(), Some("invalid_keepalive"));
        let form = expect_form(flow.submit(&json!({})));
        assert_eq!(form.step_id, StepId::AreaCount);
    }

    #[test]
    fn options_flow_replaces_connection() {
        let mut flow = ConfigFlow::new();
        through_areas(&mut flow);
        expect_form(flow.submit(&json!({ ZONE_COUNT: 1 })));
        expect_form(flow.submit(&json!({"ID": 1, "Name": "Front"})));
        let entry = expect_entry(flow.submit(&json!({ OUTPUT_COUNT: 0 })));

        let mut options = OptionsFlow::new(entry.clone());
        let form = options.form();
        assert_eq!(form.step_id, StepId::Init);
        assert_eq!(form.fields[1].default, Some(json!("10.0.0.5")));

        let updated = expect_entry(options.submit(&json!({"host": "10.0.0.9", "timeout": 30})));
        assert_eq!(updated.entry_id, entry.entry_id);
        let effective = updated.effective();
        assert_eq!(effective.connection.host.as_deref(), Some("10.0.0.9"));
        assert_eq!(effective.connection.connection_kind, ConnectionKind::Ip);
        assert_eq!(effective.connection.timeout, 30);
        assert_eq!(effective.areas, entry.data.areas);

        let form = expect_form(options.submit(&json!({"keepalive_interval": 1})));
        assert_eq!(form.error(), Some("invalid_keepalive"));
    }
}
