pub mod config;
pub mod config_flow;
pub mod controller;
pub mod entity;
pub mod error;
mod logging;
pub mod mqtt;
pub mod setup;
pub mod signal;
pub mod wizard;

#[cfg(test)]
mod testing;

use log::{debug, error, info};
use mqtt::{
    parse_payload, publish_availability, publish_discovery, publish_state,
    setup as mqtt_setup, subscribe_commands, Incoming, MqttConfiguration, Router, Topics,
};
use rumqttc::AsyncClient;
use std::{
    env::var,
    path::PathBuf,
    sync::{Arc, LazyLock},
};
use tokio::sync::{mpsc, Mutex};

use controller::{Controller, ControllerFactory};
use entity::Entity;
use error::{Error, Result};
use signal::{Dispatcher, Subscription};

const DEFAULT_CONFIG_FILE: &str = "data/aapalarm.yaml";

static CONFIG_PATH: LazyLock<PathBuf> = LazyLock::new(|| {
    PathBuf::from(var("AAP_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string()))
});
static ENTRY_PATH: LazyLock<PathBuf> = LazyLock::new(|| {
    PathBuf::from(var("AAP_CONFIG_ENTRY").unwrap_or_else(|_| wizard::CONFIG_ENTRY_FILE.to_string()))
});
/// The running panel controller, emptied on shutdown.
static CONTROLLER: LazyLock<Mutex<Option<Arc<dyn Controller>>>> =
    LazyLock::new(|| Mutex::new(None));

/// Runs the bridge until Ctrl-C. `factory` builds the panel controller.
pub fn run<F>(factory: F) -> Result<()>
where
    F: ControllerFactory + 'static,
{
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(serve(factory))
}

/// Runs the console setup wizard and stores the resulting config entry.
pub fn run_wizard() -> Result<()> {
    logging::init_logger()?;
    wizard::run_wizard(&ENTRY_PATH)?;
    Ok(())
}

async fn serve<F>(factory: F) -> Result<()>
where
    F: ControllerFactory + 'static,
{
    logging::init_logger()?;
    let (config, mqtt_section) = config::load_effective(&CONFIG_PATH, &ENTRY_PATH)?;
    let mqtt_config = MqttConfiguration::load(mqtt_section);
    let topics = Topics::new(&mqtt_config);
    let (client, mut eventloop) = mqtt_setup(&mqtt_config, &topics);

    let (incoming_tx, incoming_rx) = mpsc::unbounded_channel::<Incoming>();
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(event) => {
                    if let Some(message) = parse_payload(event) {
                        if incoming_tx.send(message).is_err() {
                            debug!("Command handler gone, dropping message");
                        }
                    }
                }
                Err(e) => {
                    error!("Error: {:?}", e);
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }
    });

    let dispatcher = Dispatcher::new();
    let integration = match setup::setup(&config, factory, &dispatcher).await {
        Some(integration) => integration,
        None => {
            publish_availability(&client, &topics, false).await?;
            return Err(Error::Unavailable);
        }
    };
    *CONTROLLER.lock().await = Some(Arc::clone(&integration.controller));

    let (panels, entities) = integration.platforms.into_entities();
    let listeners = subscribe_all(&entities, &dispatcher);
    match publish_discovery(&client, &topics, &entities).await {
        Ok(_) => info!("Discovery published"),
        Err(e) => error!("Failed to publish discovery: {}", e),
    }
    subscribe_commands(&client, &topics, &entities).await?;
    publish_availability(&client, &topics, true).await?;

    for (entity, subscription) in listeners {
        if let Err(e) = publish_state(&client, &topics, entity.as_ref()).await {
            error!("Failed to publish state: {}", e);
        }
        spawn_listener(entity, subscription, client.clone(), topics.clone());
    }
    let router = Router::new(topics.clone(), panels, &entities);
    tokio::spawn(handle_commands(router, incoming_rx, client.clone(), topics.clone()));

    tokio::signal::ctrl_c().await?;
    info!("Interrupted");
    if let Some(controller) = CONTROLLER.lock().await.take() {
        setup::shutdown(controller.as_ref());
    }
    publish_availability(&client, &topics, false).await?;
    client.disconnect().await?;
    Ok(())
}

/// Subscribes every entity before its first state read so no update is missed.
fn subscribe_all(
    entities: &[Arc<dyn Entity>],
    dispatcher: &Dispatcher,
) -> Vec<(Arc<dyn Entity>, Subscription)> {
    entities
        .iter()
        .map(|entity| (Arc::clone(entity), dispatcher.subscribe(entity.signals())))
        .collect()
}

/// Republishes `entity` whenever one of its signals concerns it.
fn spawn_listener(
    entity: Arc<dyn Entity>,
    mut subscription: Subscription,
    client: AsyncClient,
    topics: Topics,
) {
    tokio::spawn(async move {
        while let Some(payload) = subscription.recv().await {
            if !entity.wants_update(&payload) {
                continue;
            }
            if let Err(e) = publish_state(&client, &topics, entity.as_ref()).await {
                error!("Failed to publish state: {}", e);
            }
        }
        debug!("Signal bus closed for {}", entity.name());
    });
}

async fn handle_commands(
    router: Router,
    mut incoming: mpsc::UnboundedReceiver<Incoming>,
    client: AsyncClient,
    topics: Topics,
) {
    while let Some(message) = incoming.recv().await {
        if let Some(entity) = router.route(&message) {
            if let Err(e) = publish_state(&client, &topics, entity.as_ref()).await {
                error!("Failed to publish state: {}", e);
            }
        }
    }
}
