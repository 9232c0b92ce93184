//! Static YAML configuration and the config entries written by the setup wizard.

use log::{debug, info};
use serde::{de, Deserialize, Deserializer, Serialize};
use std::{collections::BTreeMap, fmt, fs, path::Path, time::Duration};

use crate::{
    controller::{ConnectionKind, ControllerSettings, DEFAULT_ACCESS_CODE},
    error::ConfigError,
    mqtt::MqttConfiguration,
};

pub const DOMAIN: &str = "aapalarm";
pub const ENTRY_TITLE: &str = "AAP Alarm";
pub const ENTRY_VERSION: &str = "2024.11.30";

pub const DEFAULT_PORT: &str = "5002";
pub const DEFAULT_KEEPALIVE: u64 = 60;
pub const MIN_KEEPALIVE: u64 = 15;
pub const DEFAULT_ZONETYPE: &str = "opening";
pub const DEFAULT_TIMEOUT: u64 = 10;

fn default_port() -> String {
    DEFAULT_PORT.to_string()
}
fn default_keepalive() -> u64 {
    DEFAULT_KEEPALIVE
}
fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT
}
fn default_zone_type() -> String {
    DEFAULT_ZONETYPE.to_string()
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AreaConfig {
    pub name: String,
    #[serde(default)]
    pub code: String,
    #[serde(default = "default_true")]
    pub code_arm_required: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ZoneConfig {
    pub name: String,
    /// Display category only (motion, door, window, smoke, ...).
    #[serde(rename = "type", default = "default_zone_type")]
    pub zone_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    pub name: String,
}

/// How to reach the panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionParams {
    #[serde(rename = "connectiontype")]
    pub connection_kind: ConnectionKind,
    #[serde(default)]
    pub host: Option<String>,
    /// TCP port or serial device path.
    #[serde(default = "default_port", deserialize_with = "string_or_number")]
    pub port: String,
    #[serde(
        rename = "keepalive_interval",
        default = "default_keepalive",
        deserialize_with = "number_or_string"
    )]
    pub keep_alive: u64,
    #[serde(default = "default_timeout", deserialize_with = "number_or_string")]
    pub timeout: u64,
}

/// Effective configuration of the integration, whatever its source.
///
/// Serialized flat; read back through `RawAapConfig` so unknown keys are
/// rejected, which `flatten` cannot do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawAapConfig")]
pub struct AapConfig {
    #[serde(flatten)]
    pub connection: ConnectionParams,
    pub areas: BTreeMap<u32, AreaConfig>,
    pub zones: BTreeMap<u32, ZoneConfig>,
    pub outputs: BTreeMap<u32, OutputConfig>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawAapConfig {
    #[serde(rename = "connectiontype")]
    connection_kind: ConnectionKind,
    #[serde(default)]
    host: Option<String>,
    #[serde(default = "default_port", deserialize_with = "string_or_number")]
    port: String,
    #[serde(default = "default_keepalive", deserialize_with = "number_or_string")]
    keepalive_interval: u64,
    #[serde(default = "default_timeout", deserialize_with = "number_or_string")]
    timeout: u64,
    #[serde(default, deserialize_with = "ordinal_map")]
    areas: BTreeMap<u32, AreaConfig>,
    #[serde(default, deserialize_with = "ordinal_map")]
    zones: BTreeMap<u32, ZoneConfig>,
    #[serde(default, deserialize_with = "ordinal_map")]
    outputs: BTreeMap<u32, OutputConfig>,
}

impl From<RawAapConfig> for AapConfig {
    fn from(raw: RawAapConfig) -> Self {
        AapConfig {
            connection: ConnectionParams {
                connection_kind: raw.connection_kind,
                host: raw.host,
                port: raw.port,
                keep_alive: raw.keepalive_interval,
                timeout: raw.timeout,
            },
            areas: raw.areas,
            zones: raw.zones,
            outputs: raw.outputs,
        }
    }
}

impl ConnectionParams {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.keep_alive < MIN_KEEPALIVE {
            return Err(ConfigError::invalid(
                "keepalive_interval",
                format!("must be at least {}", MIN_KEEPALIVE),
            ));
        }
        Ok(())
    }
}

impl AapConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.connection.validate()
    }

    /// Parses the `aapalarm` section of a YAML document. Other sections are ignored.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        ConfigFile::from_yaml_str(yaml)?
            .aapalarm
            .ok_or(ConfigError::MissingSection(DOMAIN))
    }

    pub fn controller_settings(&self, handle: tokio::runtime::Handle) -> ControllerSettings {
        ControllerSettings {
            connection_kind: self.connection.connection_kind,
            host: self.connection.host.clone(),
            port: self.connection.port.clone(),
            code: DEFAULT_ACCESS_CODE.to_string(),
            keep_alive: Duration::from_secs(self.connection.keep_alive),
            handle,
            timeout: Duration::from_secs(self.connection.timeout),
        }
    }
}

/// Top level of the YAML file. Unknown sections are allowed.
#[derive(Debug, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub aapalarm: Option<AapConfig>,
    #[serde(default)]
    pub mqtt: Option<MqttConfiguration>,
}

impl ConfigFile {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = serde_yaml::from_str(yaml)?;
        if let Some(aapalarm) = &file.aapalarm {
            aapalarm.validate()?;
        }
        Ok(file)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        info!("Loading configuration from {}", path.display());
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }
}

/// A configuration produced by the setup wizard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub entry_id: String,
    pub title: String,
    pub version: String,
    pub data: AapConfig,
    /// Connection overrides from the options flow.
    #[serde(default)]
    pub options: Option<ConnectionParams>,
}

impl ConfigEntry {
    pub fn new(data: AapConfig) -> Self {
        ConfigEntry {
            entry_id: uuid::Uuid::new_v4().to_string(),
            title: ENTRY_TITLE.to_string(),
            version: ENTRY_VERSION.to_string(),
            data,
            options: None,
        }
    }

    pub fn effective(&self) -> AapConfig {
        let mut config = self.data.clone();
        if let Some(options) = &self.options {
            config.connection = options.clone();
        }
        config
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        debug!("Reading config entry {}", path.display());
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let entry: ConfigEntry = serde_json::from_str(&content)?;
        entry.effective().validate()?;
        Ok(entry)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        let write = |path: &Path| -> std::io::Result<()> {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, content.as_bytes())
        };
        write(path).map_err(|source| ConfigError::Write {
            path: path.display().to_string(),
            source,
        })?;
        info!("Config entry written to {}", path.display());
        Ok(())
    }
}

/// Loads the effective configuration: the YAML `aapalarm` section wins, the
/// wizard's config entry is used otherwise.
pub fn load_effective(
    yaml_path: &Path,
    entry_path: &Path,
) -> Result<(AapConfig, Option<MqttConfiguration>), ConfigError> {
    let file = if yaml_path.exists() {
        ConfigFile::load(yaml_path)?
    } else {
        debug!("No YAML configuration at {}", yaml_path.display());
        ConfigFile::default()
    };
    let aapalarm = match file.aapalarm {
        Some(aapalarm) => aapalarm,
        None if entry_path.exists() => ConfigEntry::load(entry_path)?.effective(),
        None => return Err(ConfigError::MissingSection(DOMAIN)),
    };
    Ok((aapalarm, file.mqtt))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct OrdinalKey(u32);

impl<'de> Deserialize<'de> for OrdinalKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct KeyVisitor;

        impl<'de> de::Visitor<'de> for KeyVisitor {
            type Value = OrdinalKey;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an integer key")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<OrdinalKey, E> {
                u32::try_from(v)
                    .map(OrdinalKey)
                    .map_err(|_| E::custom(format!("key {} out of range", v)))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<OrdinalKey, E> {
                u32::try_from(v)
                    .map(OrdinalKey)
                    .map_err(|_| E::custom(format!("key {} out of range", v)))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<OrdinalKey, E> {
                v.trim()
                    .parse::<u32>()
                    .map(OrdinalKey)
                    .map_err(|_| E::custom(format!("invalid key: {}", v)))
            }
        }

        deserializer.deserialize_any(KeyVisitor)
    }
}

fn ordinal_map<'de, D, T>(deserializer: D) -> Result<BTreeMap<u32, T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    let raw: Option<BTreeMap<OrdinalKey, T>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|(key, value)| (key.0, value))
        .collect())
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }
    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(text) => text,
        Raw::Number(number) => number.to_string(),
    })
}

/// Integer that may also be written as a numeric string.
fn number_or_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Number(number) => Ok(number),
        Raw::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("expected an integer, got {:?}", text))),
    }
}
