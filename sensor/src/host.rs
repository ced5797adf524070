use std::{
    io::{ErrorKind, Write},
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use anyhow::Context;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tokio::{runtime::Handle, task::JoinHandle};
use tracing::{info, warn};

use climate_common::{
    ClimateError, ClimateSensor, CloudSink, Collaborators, ConnectWait, DutyCycleController,
    MonotonicClock, MqttCloudSink, MqttSmartHomeSink, NetworkLink, Orchestrator, PowerPlatform,
    RuntimeConfig, SensorDetails, SensorType, SmartHomeSink, Suspended, TopicPublisher, WakeCause,
};

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = ConfigStore::new();
    let mut runtime = store.load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        RuntimeConfig::default()
    });
    apply_env_overrides(&mut runtime);
    runtime.sanitize();
    for warning in runtime.validate() {
        warn!("config: {warning}");
    }

    let handle = Handle::current();
    thread::Builder::new()
        .name("climate-session".to_string())
        .spawn(move || run_sessions(runtime, handle))
        .context("failed to spawn session thread")?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutting down");
    Ok(())
}

/// Boots sessions back to back; every session after the first wakes from
/// the simulated timer.
fn run_sessions(runtime: RuntimeConfig, handle: Handle) {
    let mut wake_cause = WakeCause::Reset;
    loop {
        let clock = MonotonicClock::new();
        let power = HostPower { wake_cause };
        let duty = DutyCycleController::from_platform(&power, &clock);
        let parts = build_collaborators(&runtime, &handle, clock, power);
        let mut orchestrator = Orchestrator::with_controller(runtime.clone(), duty, parts);
        let Suspended { duration } = orchestrator.run();
        info!("simulated wake after {}s", duration.as_secs());
        wake_cause = WakeCause::Timer;
    }
}

fn build_collaborators(
    runtime: &RuntimeConfig,
    handle: &Handle,
    clock: MonotonicClock,
    power: HostPower,
) -> Collaborators {
    let wait = ConnectWait {
        timeout_ms: runtime.network.connect_timeout_ms,
        poll_ms: runtime.network.connect_poll_ms,
    };

    let smart_home = runtime.smart_home.enabled.then(|| -> Box<dyn SmartHomeSink> {
        let publisher =
            HostPublisher::new("smart-home", smart_home_options(runtime), handle.clone());
        Box::new(MqttSmartHomeSink::new(
            publisher,
            Box::new(clock),
            wait,
            runtime.smart_home.clone(),
        ))
    });

    let cloud = if runtime.cloud.enabled && !runtime.cloud.auth_token.is_empty() {
        let publisher = HostPublisher::new("cloud", cloud_options(runtime), handle.clone());
        let sink: Box<dyn CloudSink> = Box::new(MqttCloudSink::new(
            publisher,
            Box::new(clock),
            wait,
            &runtime.cloud,
        ));
        Some(sink)
    } else {
        None
    };

    Collaborators {
        sensor: Box::new(SimulatedSensor::new(runtime.sensor.sensor_type)),
        network: Box::new(HostNetwork::new(&runtime.network.wifi_ssid)),
        smart_home,
        cloud,
        power: Box::new(power),
        clock: Box::new(clock),
    }
}

fn smart_home_options(runtime: &RuntimeConfig) -> MqttOptions {
    let bridge = &runtime.smart_home;
    let mut options = MqttOptions::new(
        "climate-sensor-bridge",
        bridge.broker_host.clone(),
        bridge.broker_port,
    );
    options.set_keep_alive(Duration::from_secs(30));
    if !bridge.broker_user.is_empty() {
        options.set_credentials(bridge.broker_user.clone(), bridge.broker_pass.clone());
    }
    options
}

fn cloud_options(runtime: &RuntimeConfig) -> MqttOptions {
    let cloud = &runtime.cloud;
    if cloud.use_tls {
        warn!("host build has no TLS transport, cloud connection is plain text");
    }
    let mut options = MqttOptions::new("climate-sensor-cloud", cloud.host.clone(), cloud.port);
    options.set_keep_alive(Duration::from_secs(45));
    options.set_credentials("device", cloud.auth_token.clone());
    options
}

fn apply_env_overrides(runtime: &mut RuntimeConfig) {
    if let Ok(host) = std::env::var("MQTT_HOST") {
        runtime.smart_home.broker_host = host;
    }
    if let Some(port) = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
    {
        runtime.smart_home.broker_port = port;
    }
    if let Ok(user) = std::env::var("MQTT_USER") {
        runtime.smart_home.broker_user = user;
    }
    if let Ok(pass) = std::env::var("MQTT_PASS") {
        runtime.smart_home.broker_pass = pass;
    }
    if let Ok(token) = std::env::var("BLYNK_AUTH_TOKEN") {
        runtime.cloud.enabled = !token.is_empty();
        runtime.cloud.auth_token = token;
    }
    if let Ok(value) = std::env::var("CLIMATE_SENSOR_TYPE") {
        match SensorType::parse(&value) {
            Some(sensor_type) => runtime.sensor.sensor_type = sensor_type,
            None => warn!("unknown CLIMATE_SENSOR_TYPE `{value}`, keeping configured sensor"),
        }
    }
    if let Ok(value) = std::env::var("CLIMATE_DUTY_CYCLE") {
        runtime.duty_cycle.enabled = matches!(value.trim(), "1" | "true" | "on");
    }
}

#[derive(Clone)]
struct ConfigStore {
    runtime_path: Arc<PathBuf>,
}

impl ConfigStore {
    fn new() -> Self {
        let data_dir = std::env::var("CLIMATE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.climate"));

        Self {
            runtime_path: Arc::new(data_dir.join("runtime.json")),
        }
    }

    async fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        match tokio::fs::read(self.runtime_path.as_ref()).await {
            Ok(raw) => Ok(serde_json::from_slice::<RuntimeConfig>(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
            Err(err) => Err(err.into()),
        }
    }
}

/// MQTT client whose event loop runs as a task on the tokio runtime.
struct HostPublisher {
    label: &'static str,
    options: MqttOptions,
    handle: Handle,
    client: Option<AsyncClient>,
    task: Option<JoinHandle<()>>,
    connected: Arc<AtomicBool>,
}

impl HostPublisher {
    fn new(label: &'static str, options: MqttOptions, handle: Handle) -> Self {
        Self {
            label,
            options,
            handle,
            client: None,
            task: None,
            connected: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl TopicPublisher for HostPublisher {
    fn open(&mut self) -> Result<(), ClimateError> {
        if self.client.is_some() {
            return Ok(());
        }

        let (client, mut eventloop) = AsyncClient::new(self.options.clone(), 32);
        let connected = self.connected.clone();
        let label = self.label;

        self.task = Some(self.handle.spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        connected.store(true, Ordering::SeqCst);
                        info!("{label} mqtt connected");
                    }
                    Ok(_) => {}
                    Err(err) => {
                        connected.store(false, Ordering::SeqCst);
                        warn!("{label} mqtt poll error: {err}");
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        }));
        self.client = Some(client);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), ClimateError> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| ClimateError::sink(self.label, "client not started"))?;
        client
            .try_publish(topic, QoS::AtLeastOnce, retain, payload.to_vec())
            .map_err(|err| ClimateError::sink(self.label, err.to_string()))
    }

    fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.client = None;
        self.connected.store(false, Ordering::SeqCst);
    }
}

impl Drop for HostPublisher {
    fn drop(&mut self) {
        self.close();
    }
}

/// Station link that is always reachable unless `CLIMATE_HOST_OFFLINE` is set.
struct HostNetwork {
    ssid: String,
    offline: bool,
    connected: bool,
}

impl HostNetwork {
    fn new(ssid: &str) -> Self {
        Self {
            ssid: ssid.to_string(),
            offline: std::env::var("CLIMATE_HOST_OFFLINE").is_ok(),
            connected: false,
        }
    }
}

impl NetworkLink for HostNetwork {
    fn connect(&mut self) {
        if self.offline {
            warn!("simulated wifi `{}` unreachable", self.ssid);
            return;
        }
        self.connected = true;
        info!("simulated wifi joined `{}`", self.ssid);
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn check_status(&mut self) {
        if !self.connected {
            self.connect();
        }
    }

    fn disconnect(&mut self) {
        self.connected = false;
        info!("simulated wifi off");
    }
}

struct SimulatedSensor {
    sensor_type: SensorType,
    tick: u32,
}

impl SimulatedSensor {
    fn new(sensor_type: SensorType) -> Self {
        Self {
            sensor_type,
            tick: 0,
        }
    }
}

impl ClimateSensor for SimulatedSensor {
    fn initialize(&mut self) -> Result<(), ClimateError> {
        info!("simulated {} ready", self.sensor_type.as_str());
        Ok(())
    }

    fn read_temperature(&mut self) -> Result<f32, ClimateError> {
        self.tick = self.tick.wrapping_add(1);
        Ok(22.0 + (self.tick % 8) as f32 * 1.5)
    }

    fn read_humidity(&mut self) -> Result<f32, ClimateError> {
        Ok(42.0 + (self.tick % 6) as f32 * 4.5)
    }

    fn describe(&self) -> SensorDetails {
        self.sensor_type.details("simulated")
    }

    fn name(&self) -> &'static str {
        self.sensor_type.as_str()
    }
}

struct HostPower {
    wake_cause: WakeCause,
}

impl PowerPlatform for HostPower {
    fn wake_cause(&self) -> WakeCause {
        self.wake_cause
    }

    fn flush(&mut self) {
        let _ = std::io::stdout().flush();
    }

    fn deep_sleep(&mut self, duration: Duration) {
        info!("simulated deep sleep for {}s", duration.as_secs());
        thread::sleep(duration);
    }
}
