//! Builds the controller, relays its callbacks onto the signal bus and loads
//! the entity platforms once the first connection attempt settles.

use log::{debug, error, info};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

use crate::{
    config::AapConfig,
    controller::{Callback, Callbacks, Controller, ControllerFactory, Payload},
    entity::{alarm_panel, binary_sensor, sensor, switch, Entity},
    signal::{Dispatcher, Signal},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Connected,
    Failed,
}

/// Entities loaded for each platform, holding only their own config subset.
#[derive(Default)]
pub struct Platforms {
    pub alarm_panels: Vec<alarm_panel::AreaPanel>,
    pub sensors: Vec<sensor::SystemSensor>,
    pub binary_sensors: Vec<binary_sensor::ZoneSensor>,
    pub switches: Vec<switch::OutputSwitch>,
}

impl Platforms {
    pub fn load(config: &AapConfig, controller: &Arc<dyn Controller>) -> Self {
        let mut platforms = Platforms::default();
        if !config.areas.is_empty() {
            platforms.alarm_panels = alarm_panel::setup_platform(&config.areas, controller);
            platforms.sensors = sensor::setup_platform(controller);
        }
        if !config.zones.is_empty() {
            platforms.binary_sensors = binary_sensor::setup_platform(&config.zones, controller);
        }
        if !config.outputs.is_empty() {
            platforms.switches = switch::setup_platform(&config.outputs, controller);
        }
        platforms
    }

    pub fn is_empty(&self) -> bool {
        self.alarm_panels.is_empty()
            && self.sensors.is_empty()
            && self.binary_sensors.is_empty()
            && self.switches.is_empty()
    }

    /// Every entity behind a shared handle, alarm panels kept apart for the keypress service.
    pub fn into_entities(self) -> (Vec<Arc<alarm_panel::AreaPanel>>, Vec<Arc<dyn Entity>>) {
        let panels: Vec<Arc<alarm_panel::AreaPanel>> =
            self.alarm_panels.into_iter().map(Arc::new).collect();
        let mut entities: Vec<Arc<dyn Entity>> = Vec::new();
        for panel in &panels {
            entities.push(panel.clone());
        }
        for sensor in self.sensors {
            entities.push(Arc::new(sensor));
        }
        for zone in self.binary_sensors {
            entities.push(Arc::new(zone));
        }
        for output in self.switches {
            entities.push(Arc::new(output));
        }
        (panels, entities)
    }
}

/// A running integration: the controller and what was loaded on top of it.
pub struct Integration {
    pub controller: Arc<dyn Controller>,
    pub platforms: Platforms,
}

type Completion = Arc<Mutex<Option<oneshot::Sender<ConnectOutcome>>>>;

/// Resolves the completion signal unless something already did.
fn complete(completion: &Completion, outcome: ConnectOutcome) {
    let sender = match completion.lock() {
        Ok(mut slot) => slot.take(),
        Err(poisoned) => poisoned.into_inner().take(),
    };
    match sender {
        Some(sender) => {
            let _ = sender.send(outcome);
        }
        None => debug!("Connection already settled, ignoring {:?}", outcome),
    }
}

fn relay(dispatcher: &Dispatcher, signal: Signal, what: &'static str) -> Callback {
    let dispatcher = dispatcher.clone();
    Box::new(move |payload: Payload| {
        debug!("AAP IP / Serial Module sent {} update event", what);
        dispatcher.send(signal, payload);
    })
}

/// Registers the connection and relay callbacks on `controller`.
pub fn register_callbacks(
    controller: &dyn Controller,
    dispatcher: &Dispatcher,
) -> oneshot::Receiver<ConnectOutcome> {
    let (tx, rx) = oneshot::channel();
    let completion: Completion = Arc::new(Mutex::new(Some(tx)));

    let connected = {
        let completion = completion.clone();
        Box::new(move |_payload: Payload| {
            info!("Established a connection with the AAP IP / Serial Module");
            complete(&completion, ConnectOutcome::Connected);
        }) as Callback
    };
    let login_timeout = Box::new(move |_payload: Payload| {
        error!("Could not establish a connection with the AAP IP / Serial Module");
        complete(&completion, ConnectOutcome::Failed);
    }) as Callback;

    controller.set_callbacks(Callbacks {
        connected: Some(connected),
        login_timeout: Some(login_timeout),
        zone_state_change: Some(relay(dispatcher, Signal::ZoneUpdate, "zone")),
        area_state_change: Some(relay(dispatcher, Signal::AreaUpdate, "area")),
        system_state_change: Some(relay(dispatcher, Signal::SystemUpdate, "system")),
        output_state_change: Some(relay(dispatcher, Signal::OutputUpdate, "output")),
    });
    rx
}

/// Starts the integration. Returns `None` when the panel could not be reached.
pub async fn setup<F>(config: &AapConfig, factory: F, dispatcher: &Dispatcher) -> Option<Integration>
where
    F: ControllerFactory + 'static,
{
    let settings = config.controller_settings(tokio::runtime::Handle::current());
    let controller = Box::new(factory).build(settings);
    let connection = register_callbacks(controller.as_ref(), dispatcher);

    info!("Start AAP Alarm");
    controller.start();

    let outcome = connection.await.unwrap_or_else(|_| {
        error!("Controller dropped its callbacks before connecting");
        ConnectOutcome::Failed
    });
    if outcome == ConnectOutcome::Failed {
        shutdown(controller.as_ref());
        return None;
    }

    let platforms = Platforms::load(config, &controller);
    Some(Integration {
        controller,
        platforms,
    })
}

/// Stops the controller on platform shutdown.
pub fn shutdown(controller: &dyn Controller) {
    info!("Shutting down AAP Alarm");
    controller.stop();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{AreaConfig, ConnectionParams, OutputConfig, ZoneConfig},
        controller::{ConnectionKind, ControllerSettings},
        testing::{Command, FakeController},
    };
    use serde_json::json;
    use std::{collections::BTreeMap, time::Duration};

    fn config(outputs: bool) -> AapConfig {
        let mut areas = BTreeMap::new();
        areas.insert(
            1,
            AreaConfig {
                name: "House".into(),
                code: "1234".into(),
                code_arm_required: true,
            },
        );
        let mut zones = BTreeMap::new();
        zones.insert(
            1,
            ZoneConfig {
                name: "Front".into(),
                zone_type: "door".into(),
            },
        );
        let mut output_map = BTreeMap::new();
        if outputs {
            output_map.insert(1, OutputConfig { name: "Siren".into() });
        }
        AapConfig {
            connection: ConnectionParams {
                connection_kind: ConnectionKind::Ip,
                host: Some("panel".into()),
                port: "5002".into(),
                keep_alive: 60,
                timeout: 10,
            },
            areas,
            zones,
            outputs: output_map,
        }
    }

    fn factory(
        fake: Arc<FakeController>,
        seen: Arc<Mutex<Option<ControllerSettings>>>,
    ) -> impl FnOnce(ControllerSettings) -> Arc<dyn Controller> + Send {
        move |settings| {
            *seen.lock().unwrap() = Some(settings);
            let controller: Arc<dyn Controller> = fake;
            controller
        }
    }

    #[tokio::test]
    async fn connected_first_loads_platforms() {
        let fake = FakeController::new();
        let seen = Arc::new(Mutex::new(None));
        let dispatcher = Dispatcher::new();
        let cfg = config(false);

        let task = {
            let fake = fake.clone();
            let seen = seen.clone();
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { setup(&cfg, factory(fake, seen), &dispatcher).await })
        };
        while !fake.commands().contains(&Command::Start) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        fake.fire_connected(None);
        fake.fire_login_timeout(None);

        let integration = task.await.unwrap().expect("setup should succeed");
        assert_eq!(integration.platforms.alarm_panels.len(), 1);
        assert_eq!(integration.platforms.sensors.len(), 1);
        assert_eq!(integration.platforms.binary_sensors.len(), 1);
        assert!(integration.platforms.switches.is_empty());

        let settings = seen.lock().unwrap().clone().unwrap();
        assert_eq!(settings.code, "0000");
        assert_eq!(settings.host.as_deref(), Some("panel"));
    }

    #[tokio::test]
    async fn failure_first_reports_unavailable() {
        let fake = FakeController::new();
        let dispatcher = Dispatcher::new();
        let cfg = config(true);

        let task = {
            let fake = fake.clone();
            let dispatcher = dispatcher.clone();
            let seen = Arc::new(Mutex::new(None));
            tokio::spawn(async move { setup(&cfg, factory(fake, seen), &dispatcher).await })
        };
        while !fake.commands().contains(&Command::Start) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        fake.fire_login_timeout(None);
        fake.fire_connected(None);

        assert!(task.await.unwrap().is_none());
        assert_eq!(fake.commands(), vec![Command::Start, Command::Stop]);
    }

    #[tokio::test]
    async fn dropped_callbacks_count_as_failure() {
        let fake = FakeController::new();
        let dispatcher = Dispatcher::new();
        let cfg = config(true);

        let task = {
            let fake = fake.clone();
            let dispatcher = dispatcher.clone();
            let seen = Arc::new(Mutex::new(None));
            tokio::spawn(async move { setup(&cfg, factory(fake, seen), &dispatcher).await })
        };
        while !fake.commands().contains(&Command::Start) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        fake.forget_callbacks();

        assert!(task.await.unwrap().is_none());
        assert_eq!(fake.commands(), vec![Command::Start, Command::Stop]);
    }

    #[tokio::test]
    async fn only_the_first_outcome_counts() {
        let fake = FakeController::new();
        let dispatcher = Dispatcher::new();
        let rx = register_callbacks(&*fake, &dispatcher);
        fake.fire_connected(None);
        fake.fire_login_timeout(None);
        fake.fire_connected(None);
        assert_eq!(rx.await.unwrap(), ConnectOutcome::Connected);
    }

    #[tokio::test]
    async fn relays_payloads_unchanged() {
        let fake = FakeController::new();
        let dispatcher = Dispatcher::new();
        let _rx = register_callbacks(&*fake, &dispatcher);
        let mut zones = dispatcher.subscribe(&[Signal::ZoneUpdate]);
        let mut areas = dispatcher.subscribe(&[Signal::AreaUpdate]);
        let mut system = dispatcher.subscribe(&[Signal::SystemUpdate]);
        let mut outputs = dispatcher.subscribe(&[Signal::OutputUpdate]);

        fake.fire_zone(Some(json!(5)));
        fake.fire_area(Some(json!("A")));
        fake.fire_system(Some(json!({"mains": false})));
        fake.fire_output(None);

        assert_eq!(zones.recv().await, Some(Some(json!(5))));
        assert_eq!(areas.recv().await, Some(Some(json!("A"))));
        assert_eq!(system.recv().await, Some(Some(json!({"mains": false}))));
        assert_eq!(outputs.recv().await, Some(None));
    }

    #[test]
    fn platforms_follow_config_sections() {
        let fake = FakeController::new();
        let controller: Arc<dyn Controller> = fake;
        let mut cfg = config(true);
        cfg.areas.clear();
        let platforms = Platforms::load(&cfg, &controller);
        assert!(platforms.alarm_panels.is_empty());
        assert!(platforms.sensors.is_empty());
        assert_eq!(platforms.switches.len(), 1);

        let (panels, entities) = platforms.into_entities();
        assert!(panels.is_empty());
        assert_eq!(entities.len(), 2);
    }

    #[test]
    fn shutdown_stops_controller() {
        let fake = FakeController::new();
        shutdown(&*fake);
        assert_eq!(fake.commands(), vec![Command::Stop]);
    }
}
