use log::{debug, info, warn};

use crate::{
    channels::{self, AccessoryRegistration, Characteristic, VirtualPin},
    config::{CloudConfig, SmartHomeConfig},
    error::ClimateError,
    ports::{wait_until, Clock, CloudSink, SmartHomeSink},
    types::SinkStatus,
};

const SMART_HOME: &str = "smart-home";
const CLOUD: &str = "cloud";

/// The client's own event loop runs elsewhere and only exposes its
/// connection state here.
pub trait TopicPublisher {
    fn open(&mut self) -> Result<(), ClimateError>;
    fn is_connected(&self) -> bool;
    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), ClimateError>;
    fn close(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectWait {
    pub timeout_ms: u64,
    pub poll_ms: u64,
}

impl Default for ConnectWait {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            poll_ms: 100,
        }
    }
}

fn open_and_wait<P: TopicPublisher>(
    sink: &'static str,
    publisher: &mut P,
    clock: &dyn Clock,
    wait: ConnectWait,
) -> bool {
    if let Err(err) = publisher.open() {
        warn!("{sink} client failed to start: {err}");
        return false;
    }

    let connected = wait_until(clock, wait.timeout_ms, wait.poll_ms, || {
        publisher.is_connected()
    });
    if !connected {
        warn!("{sink} broker not reachable within {} ms", wait.timeout_ms);
        publisher.close();
    }
    connected
}

pub struct MqttSmartHomeSink<P> {
    publisher: P,
    clock: Box<dyn Clock>,
    wait: ConnectWait,
    config: SmartHomeConfig,
    accessory_id: Option<String>,
    online: bool,
}

impl<P: TopicPublisher> MqttSmartHomeSink<P> {
    pub fn new(
        publisher: P,
        clock: Box<dyn Clock>,
        wait: ConnectWait,
        config: SmartHomeConfig,
    ) -> Self {
        Self {
            publisher,
            clock,
            wait,
            config,
            accessory_id: None,
            online: false,
        }
    }

    pub fn accessory_id(&self) -> Option<&str> {
        self.accessory_id.as_deref()
    }

    fn publish_characteristic(
        &mut self,
        accessory_id: &str,
        characteristic: Characteristic,
        value: f32,
    ) -> Result<(), ClimateError> {
        let topic =
            channels::characteristic_topic(&self.config.topic_prefix, accessory_id, characteristic);
        let payload = format!("{:.1}", characteristic.clamp(value));
        self.publisher.publish(&topic, payload.as_bytes(), true)
    }
}

impl<P: TopicPublisher> SmartHomeSink for MqttSmartHomeSink<P> {
    fn begin(&mut self, device_name: &str) -> bool {
        if !open_and_wait(SMART_HOME, &mut self.publisher, self.clock.as_ref(), self.wait) {
            return false;
        }

        let registration = AccessoryRegistration::new(device_name, &self.config.setup_code);
        let payload = match serde_json::to_vec(&registration) {
            Ok(payload) => payload,
            Err(err) => {
                warn!("failed to encode accessory registration: {err}");
                return false;
            }
        };
        let topic = channels::registration_topic(&self.config.topic_prefix, &registration.accessory_id);
        if let Err(err) = self.publisher.publish(&topic, &payload, true) {
            warn!("accessory registration failed: {err}");
            return false;
        }

        info!(
            "smart-home accessory `{}` registered as {} (setup code {})",
            registration.name, registration.accessory_id, self.config.setup_code
        );
        self.accessory_id = Some(registration.accessory_id);
        self.online = true;
        true
    }

    fn poll(&mut self) {
        let connected = self.publisher.is_connected();
        if connected != self.online {
            if connected {
                info!("smart-home bridge reconnected");
            } else {
                warn!("smart-home bridge disconnected");
            }
            self.online = connected;
        }
    }

    fn update_reading(
        &mut self,
        temperature_c: f32,
        humidity_pct: f32,
    ) -> Result<(), ClimateError> {
        let Some(accessory_id) = self.accessory_id.clone() else {
            return Err(ClimateError::sink(SMART_HOME, "accessory not registered"));
        };
        if !self.publisher.is_connected() {
            return Err(ClimateError::sink(SMART_HOME, "bridge offline"));
        }

        self.publish_characteristic(
            &accessory_id,
            Characteristic::CurrentTemperature,
            temperature_c,
        )?;
        self.publish_characteristic(
            &accessory_id,
            Characteristic::CurrentRelativeHumidity,
            humidity_pct,
        )?;
        debug!("smart-home characteristics updated");
        Ok(())
    }
}

pub struct MqttCloudSink<P> {
    publisher: P,
    clock: Box<dyn Clock>,
    wait: ConnectWait,
    check_interval_ms: u64,
    last_check_ms: u64,
    started: bool,
    online: bool,
}

impl<P: TopicPublisher> MqttCloudSink<P> {
    pub fn new(publisher: P, clock: Box<dyn Clock>, wait: ConnectWait, config: &CloudConfig) -> Self {
        Self {
            publisher,
            clock,
            wait,
            check_interval_ms: config.connection_check_interval_ms,
            last_check_ms: 0,
            started: false,
            online: false,
        }
    }

    fn write(&mut self, pin: VirtualPin, value: &str) -> Result<(), ClimateError> {
        if !self.is_connected() {
            return Err(ClimateError::sink(CLOUD, "not connected"));
        }
        self.publisher.publish(&pin.topic(), value.as_bytes(), false)
    }
}

impl<P: TopicPublisher> CloudSink for MqttCloudSink<P> {
    fn begin(&mut self) -> bool {
        self.started = open_and_wait(CLOUD, &mut self.publisher, self.clock.as_ref(), self.wait);
        self.online = self.started;
        self.last_check_ms = self.clock.now_ms();
        if self.started {
            info!("cloud telemetry connected");
        }
        self.started
    }

    fn run(&mut self) {
        if !self.started {
            return;
        }

        let now_ms = self.clock.now_ms();
        if now_ms.saturating_sub(self.last_check_ms) < self.check_interval_ms {
            return;
        }
        self.last_check_ms = now_ms;

        let connected = self.publisher.is_connected();
        if connected != self.online {
            if connected {
                info!("cloud connection restored");
            } else {
                warn!("cloud connection lost, client is reconnecting");
            }
            self.online = connected;
        }
    }

    fn send_reading(
        &mut self,
        temperature_c: f32,
        humidity_pct: f32,
        heat_index_c: f32,
    ) -> Result<(), ClimateError> {
        self.write(VirtualPin::Temperature, &format!("{temperature_c:.1}"))?;
        self.write(VirtualPin::Humidity, &format!("{humidity_pct:.1}"))?;
        self.write(VirtualPin::HeatIndex, &format!("{heat_index_c:.1}"))?;
        debug!("cloud datastreams updated");
        Ok(())
    }

    fn send_status(&mut self, sensor_name: &str, online: bool) -> Result<(), ClimateError> {
        let status = SinkStatus::from_online(online);
        self.write(VirtualPin::Status, status.as_str())?;
        debug!("cloud status for {sensor_name}: {}", status.as_str());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.started && self.publisher.is_connected()
    }
}
