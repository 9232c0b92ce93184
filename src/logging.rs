const TRIGGER_FILE_SIZE: u64 = 10 * 1024 * 1024;
const LOG_FILE_COUNT: u32 = 10;
const FILE_PATH: &str = "data/logs/aap2mqtt.log";
const ARCHIVE_PATTERN: &str = "data/logs/aap2mqtt.{}.log";
const PATTERN: &str = "{d} {l} {t} - {m}{n}";

use log::{error, info, LevelFilter};
use log4rs::{
    append::{
        console::{ConsoleAppender, Target},
        rolling_file::{
            policy::compound::{
                roll::fixed_window::FixedWindowRoller, trigger::size::SizeTrigger, CompoundPolicy,
            },
            RollingFileAppender,
        },
    },
    config::{Appender, Config, Root},
    encode::pattern::PatternEncoder,
    filter::threshold::ThresholdFilter,
};
use std::env::var;

use crate::error::{Error, Result};

/// Root level from `LOG_LEVEL`, debug when unset or unparsable.
fn level_from_env(value: Option<String>) -> LevelFilter {
    value
        .and_then(|level| level.parse().ok())
        .unwrap_or(LevelFilter::Debug)
}

fn build_config(level: LevelFilter, file_path: &str, archive_pattern: &str) -> Result<Config> {
    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new(PATTERN)))
        .build();
    let trigger = SizeTrigger::new(TRIGGER_FILE_SIZE);
    let roller = FixedWindowRoller::builder()
        .build(archive_pattern, LOG_FILE_COUNT)
        .map_err(|e| Error::Logger(e.to_string()))?;
    let policy = CompoundPolicy::new(Box::new(trigger), Box::new(roller));
    let file = RollingFileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(PATTERN)))
        .append(true)
        .build(file_path, Box::new(policy))?;
    Config::builder()
        .appender(Appender::builder().build("file", Box::new(file)))
        .appender(
            Appender::builder()
                .filter(Box::new(ThresholdFilter::new(LevelFilter::Info)))
                .build("stderr", Box::new(stderr)),
        )
        .build(
            Root::builder()
                .appender("file")
                .appender("stderr")
                .build(level),
        )
        .map_err(|e| Error::Logger(e.to_string()))
}

/// Used by both the bridge and the setup wizard.
pub fn init_logger() -> Result<()> {
    let level = level_from_env(var("LOG_LEVEL").ok());
    let config = build_config(level, FILE_PATH, ARCHIVE_PATTERN)?;

    match log4rs::init_config(config) {
        Ok(_) => {
            info!("Logger initialized at {}", level);
            Ok(())
        }
        Err(e) => {
            error!("Failed to initialize logger: {}", e);
            Err(Error::Logger(e.to_string()))
        }
    }
}
