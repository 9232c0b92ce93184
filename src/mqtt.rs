use chrono::Utc;
use log::{debug, error, info};
use rand::prelude::*;
use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, QoS};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::{collections::HashMap, env::var, fs, path::Path, sync::Arc, time::Duration};

use crate::{
    entity::{alarm_panel::AreaPanel, Entity},
    error::Result,
};

const MQTT_CONFIG_FILE: &str = "data/mqtt.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MqttConfiguration {
    #[serde(default = "default_broker")]
    pub broker: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_discovery_topic", alias = "discovery_topic")]
    pub discovery_topic: String,
    #[serde(default = "default_topic_prefix", alias = "topic_prefix")]
    pub topic_prefix: String,
}

fn default_broker() -> String {
    "localhost".to_string()
}
fn default_mqtt_port() -> u16 {
    1883
}
fn default_discovery_topic() -> String {
    "homeassistant".to_string()
}
fn default_topic_prefix() -> String {
    "aap2mqtt".to_string()
}

impl Default for MqttConfiguration {
    fn default() -> Self {
        MqttConfiguration {
            broker: default_broker(),
            port: default_mqtt_port(),
            user: String::new(),
            password: String::new(),
            discovery_topic: default_discovery_topic(),
            topic_prefix: default_topic_prefix(),
        }
    }
}

impl MqttConfiguration {
    /// Environment first, then the YAML `mqtt` section, then `data/mqtt.json`.
    pub fn load(section: Option<MqttConfiguration>) -> Self {
        Self::resolve(section, Path::new(MQTT_CONFIG_FILE), |name| var(name).ok())
    }

    fn resolve(
        section: Option<MqttConfiguration>,
        file: &Path,
        env: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let mut config = match section {
            Some(section) => section,
            None => match fs::read_to_string(file) {
                Ok(content) => match serde_json::from_str::<MqttConfiguration>(&content) {
                    Ok(config) => config,
                    Err(e) => {
                        error!("Failed to parse MQTT configuration file: {}", e);
                        MqttConfiguration::default()
                    }
                },
                Err(e) => {
                    debug!("No MQTT configuration file: {}", e);
                    MqttConfiguration::default()
                }
            },
        };
        if let Some(broker) = env("MQTT_BROKER") {
            config.broker = broker;
        }
        if let Some(port) = env("MQTT_PORT") {
            config.port = port.parse().unwrap_or(1883);
        }
        if let Some(user) = env("MQTT_USER") {
            config.user = user;
        }
        if let Some(password) = env("MQTT_PASSWORD") {
            config.password = password;
        }
        if let Some(discovery_topic) = env("MQTT_DISCOVERY_TOPIC") {
            config.discovery_topic = discovery_topic;
        }
        if let Some(topic_prefix) = env("MQTT_TOPIC_PREFIX") {
            config.topic_prefix = topic_prefix;
        }
        config
    }
}

pub const QOS: QoS = QoS::AtLeastOnce;

/// Topic layout shared by discovery, state and commands.
#[derive(Debug, Clone)]
pub struct Topics {
    prefix: String,
    discovery: String,
}

impl Topics {
    pub fn new(config: &MqttConfiguration) -> Self {
        Topics {
            prefix: config.topic_prefix.clone(),
            discovery: config.discovery_topic.clone(),
        }
    }

    pub fn availability(&self) -> String {
        format!("{}/availability", self.prefix)
    }

    pub fn keypress(&self) -> String {
        format!("{}/keypress", self.prefix)
    }

    fn entity_base(&self, entity: &dyn Entity) -> String {
        format!(
            "{}/{}/{}",
            self.prefix,
            entity.component().as_str(),
            entity.object_id()
        )
    }

    pub fn state(&self, entity: &dyn Entity) -> String {
        format!("{}/state", self.entity_base(entity))
    }

    pub fn attributes(&self, entity: &dyn Entity) -> String {
        format!("{}/attributes", self.entity_base(entity))
    }

    pub fn command(&self, entity: &dyn Entity) -> String {
        format!("{}/set", self.entity_base(entity))
    }

    pub fn config(&self, entity: &dyn Entity) -> String {
        format!(
            "{}/{}/{}/config",
            self.discovery,
            entity.component().as_str(),
            entity.object_id()
        )
    }
}

pub fn setup(config: &MqttConfiguration, topics: &Topics) -> (AsyncClient, EventLoop) {
    info!("Setting up MQTT client");
    // randomize the client id 6 alphanumeric characters
    let id: String = rand::rng()
        .sample_iter(rand::distr::Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();
    let id = format!("aap2mqtt-{}", id);
    let mut mqttoptions = MqttOptions::new(id, &config.broker, config.port);
    mqttoptions.set_keep_alive(Duration::from_secs(10));
    if !config.user.is_empty() {
        mqttoptions.set_credentials(&config.user, &config.password);
    }
    mqttoptions.set_last_will(LastWill::new(topics.availability(), "offline", QOS, true));

    let (client, eventloop) = AsyncClient::new(mqttoptions, 10);
    info!("MQTT client created for {}:{}", config.broker, config.port);
    (client, eventloop)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Incoming {
    pub topic: String,
    pub payload: String,
}

pub fn parse_payload(event: Event) -> Option<Incoming> {
    match event {
        Event::Incoming(rumqttc::Packet::Publish(publish)) => {
            debug!("Received message on topic: {}", publish.topic);
            debug!("Payload: {:?}", publish.payload);
            Some(Incoming {
                topic: publish.topic,
                payload: String::from_utf8_lossy(&publish.payload).to_string(),
            })
        }
        _ => None,
    }
}

/// Discovery config for one entity.
pub fn discovery_payload(topics: &Topics, entity: &dyn Entity) -> Value {
    let mut payload = json!({
        "name": entity.name(),
        "unique_id": entity.unique_id(),
        "object_id": entity.object_id(),
        "availability_topic": topics.availability(),
        "state_topic": topics.state(entity),
        "json_attributes_topic": topics.attributes(entity),
    });
    if let Value::Object(map) = &mut payload {
        if entity.accepts_commands() {
            map.insert("command_topic".into(), json!(topics.command(entity)));
        }
        for (key, value) in entity.discovery_fields() {
            map.insert(key, value);
        }
    }
    payload
}

pub async fn publish_discovery(
    client: &AsyncClient,
    topics: &Topics,
    entities: &[Arc<dyn Entity>],
) -> Result<()> {
    info!("Publishing discovery");
    let mut payload_map: HashMap<String, String> = HashMap::new();
    for entity in entities {
        payload_map.insert(
            topics.config(entity.as_ref()),
            discovery_payload(topics, entity.as_ref()).to_string(),
        );
    }
    for (topic, payload) in payload_map {
        debug!("Publishing: {} => {}", topic, payload);
        client.publish(topic, QOS, true, payload).await?;
    }
    info!("Discovery published");
    Ok(())
}

pub async fn publish_state(client: &AsyncClient, topics: &Topics, entity: &dyn Entity) -> Result<()> {
    let state = entity.state();
    let mut attributes = entity.attributes().unwrap_or_default();
    attributes.insert("last_updated".into(), json!(Utc::now()));
    debug!("{} => {}", entity.name(), state);
    client.publish(topics.state(entity), QOS, true, state).await?;
    client
        .publish(
            topics.attributes(entity),
            QOS,
            true,
            serde_json::to_string(&attributes)?,
        )
        .await?;
    Ok(())
}

pub async fn publish_availability(client: &AsyncClient, topics: &Topics, online: bool) -> Result<()> {
    let payload = if online { "online" } else { "offline" };
    info!("Panel availability: {}", payload);
    client.publish(topics.availability(), QOS, true, payload).await?;
    Ok(())
}

pub async fn subscribe_commands(
    client: &AsyncClient,
    topics: &Topics,
    entities: &[Arc<dyn Entity>],
) -> Result<()> {
    for entity in entities.iter().filter(|entity| entity.accepts_commands()) {
        client.subscribe(topics.command(entity.as_ref()), QOS).await?;
    }
    client.subscribe(topics.keypress(), QOS).await?;
    info!("Subscribed to command topics");
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EntityIds {
    One(String),
    Many(Vec<String>),
}

/// Body of the raw keypress service.
#[derive(Debug, Deserialize)]
struct KeypressRequest {
    entity_id: EntityIds,
    keypress: String,
}

/// Routes incoming command messages to entities.
pub struct Router {
    topics: Topics,
    panels: Vec<Arc<AreaPanel>>,
    commands: HashMap<String, Arc<dyn Entity>>,
}

impl Router {
    pub fn new(topics: Topics, panels: Vec<Arc<AreaPanel>>, entities: &[Arc<dyn Entity>]) -> Self {
        let commands = entities
            .iter()
            .filter(|entity| entity.accepts_commands())
            .map(|entity| (topics.command(entity.as_ref()), Arc::clone(entity)))
            .collect();
        Router {
            topics,
            panels,
            commands,
        }
    }

    /// Handles one message, returning the entity whose state may have changed.
    pub fn route(&self, message: &Incoming) -> Option<Arc<dyn Entity>> {
        if message.topic == self.topics.keypress() {
            self.keypress(&message.payload);
            return None;
        }
        let entity = self.commands.get(&message.topic)?;
        match entity.handle_command(&message.payload) {
            Ok(()) => Some(Arc::clone(entity)),
            Err(e) => {
                error!("Failed to handle command: {}", e);
                None
            }
        }
    }

    fn keypress(&self, payload: &str) {
        let request = match serde_json::from_str::<KeypressRequest>(payload) {
            Ok(request) => request,
            Err(e) => {
                error!("Invalid keypress request: {}", e);
                return;
            }
        };
        let ids = match request.entity_id {
            EntityIds::One(id) => vec![id],
            EntityIds::Many(ids) => ids,
        };
        for panel in &self.panels {
            let object_id = panel.object_id();
            let entity_id = format!("{}.{}", panel.component().as_str(), object_id);
            if ids.iter().any(|id| *id == entity_id || *id == object_id) {
                panel.alarm_keypress(Some(&request.keypress));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{AreaConfig, OutputConfig, ZoneConfig},
        controller::Controller,
        entity::{binary_sensor::ZoneSensor, switch::OutputSwitch},
        testing::{Command, FakeController},
    };
    use pretty_assertions::assert_eq;

    fn topics() -> Topics {
        Topics::new(&MqttConfiguration::default())
    }

    fn fixture() -> (Arc<FakeController>, Vec<Arc<AreaPanel>>, Vec<Arc<dyn Entity>>) {
        let fake = FakeController::new();
        let controller: Arc<dyn Controller> = fake.clone();
        let panel = Arc::new(AreaPanel::new(
            1,
            &AreaConfig {
                name: "House".into(),
                code: "1234".into(),
                code_arm_required: false,
            },
            controller.clone(),
        ));
        let zone: Arc<dyn Entity> = Arc::new(ZoneSensor::new(
            4,
            &ZoneConfig {
                name: "Hall".into(),
                zone_type: "motion".into(),
            },
            controller.clone(),
        ));
        let output: Arc<dyn Entity> = Arc::new(OutputSwitch::new(
            2,
            &OutputConfig {
                name: "Gate".into(),
            },
            controller,
        ));
        let entities: Vec<Arc<dyn Entity>> = vec![panel.clone(), zone, output];
        (fake, vec![panel], entities)
    }

    #[test]
    fn environment_overrides_file_section() {
        let dir = tempfile::tempdir().unwrap();
        let section = MqttConfiguration {
            broker: "broker.lan".into(),
            ..MqttConfiguration::default()
        };
        let config = MqttConfiguration::resolve(Some(section), &dir.path().join("none"), |name| {
            match name {
                "MQTT_PORT" => Some("8883".to_string()),
                "MQTT_TOPIC_PREFIX" => Some("alarm".to_string()),
                _ => None,
            }
        });
        assert_eq!(config.broker, "broker.lan");
        assert_eq!(config.port, 8883);
        assert_eq!(config.topic_prefix, "alarm");
        assert_eq!(config.discovery_topic, "homeassistant");
    }

    #[test]
    fn falls_back_to_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("mqtt.json");
        fs::write(&file, r#"{"broker": "10.0.0.2", "user": "hass", "topicPrefix": "panel"}"#).unwrap();
        let config = MqttConfiguration::resolve(None, &file, |_| None);
        assert_eq!(config.broker, "10.0.0.2");
        assert_eq!(config.topic_prefix, "panel");
        assert_eq!(config.user, "hass");
        assert_eq!(config.port, 1883);
    }

    #[test]
    fn alarm_panel_discovery_payload() {
        let (_, panels, _) = fixture();
        let payload = discovery_payload(&topics(), panels[0].as_ref());
        assert_eq!(payload["unique_id"], json!("aapalarm_alarmpanel_House"));
        assert_eq!(
            payload["state_topic"],
            json!("aap2mqtt/alarm_control_panel/aapalarm_alarmpanel_house/state")
        );
        assert_eq!(
            payload["command_topic"],
            json!("aap2mqtt/alarm_control_panel/aapalarm_alarmpanel_house/set")
        );
        assert_eq!(payload["availability_topic"], json!("aap2mqtt/availability"));
        assert_eq!(payload["code_arm_required"], json!(false));
        assert_eq!(payload["device"]["manufacturer"], json!("Arrowhead Alarms"));
        assert_eq!(
            topics().config(panels[0].as_ref()),
            "homeassistant/alarm_control_panel/aapalarm_alarmpanel_house/config"
        );
    }

    #[test]
    fn sensors_have_no_command_topic() {
        let (_, _, entities) = fixture();
        let payload = discovery_payload(&topics(), entities[1].as_ref());
        assert!(payload.get("command_topic").is_none());
        assert_eq!(payload["device_class"], json!("motion"));
    }

    #[test]
    fn routes_commands_to_entities() {
        let (fake, panels, entities) = fixture();
        let router = Router::new(topics(), panels, &entities);
        let changed = router.route(&Incoming {
            topic: "aap2mqtt/switch/aapalarm_output_2/set".into(),
            payload: "ON".into(),
        });
        assert_eq!(changed.map(|e| e.unique_id()), Some("aapalarm_output_2".to_string()));

        let changed = router.route(&Incoming {
            topic: "aap2mqtt/alarm_control_panel/aapalarm_alarmpanel_house/set".into(),
            payload: "DISARM".into(),
        });
        assert!(changed.is_some());
        assert!(router
            .route(&Incoming {
                topic: "aap2mqtt/unknown/set".into(),
                payload: "ON".into(),
            })
            .is_none());
        assert_eq!(
            fake.commands(),
            vec![Command::Output("2".into()), Command::Disarm("1234".into())]
        );
    }

    #[test]
    fn keypress_service_targets_listed_panels() {
        let (fake, panels, entities) = fixture();
        let router = Router::new(topics(), panels, &entities);
        let keypress = |payload: &str| {
            router.route(&Incoming {
                topic: "aap2mqtt/keypress".into(),
                payload: payload.into(),
            })
        };
        keypress(r#"{"entity_id": "alarm_control_panel.aapalarm_alarmpanel_house", "keypress": "*2"}"#);
        keypress(r#"{"entity_id": ["alarm_control_panel.other"], "keypress": "*3"}"#);
        keypress(r#"{"entity_id": ["aapalarm_alarmpanel_house"], "keypress": "*4"}"#);
        keypress(r#"{"keypress": "*5"}"#);
        assert_eq!(
            fake.commands(),
            vec![Command::Keypress("*2".into()), Command::Keypress("*4".into())]
        );
    }
}
