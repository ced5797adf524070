use core::convert::TryInto;
use std::{
    io::Write as _,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use dht_sensor::{dht11, dht22};
use embedded_svc::{
    mqtt::client::QoS,
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::{
    delay::{Ets, FreeRtos, BLOCK},
    gpio::{AnyIOPin, IOPin, InputOutput, PinDriver, Pull},
    i2c::{I2cConfig, I2cDriver, I2C0},
    units::Hertz,
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{modem::Modem, prelude::Peripherals},
    log::EspLogger,
    mqtt::client::{EspMqttClient, EventPayload, MqttClientConfiguration},
    nvs::{EspDefaultNvsPartition, EspNvs},
    wifi::EspWifi,
};
use log::{info, warn};

use climate_common::{
    config::NetworkConfig, sht4x, ClimateError, ClimateSensor, CloudSink, Collaborators,
    ConnectWait, DutyCycleController, MonotonicClock, MqttCloudSink, MqttSmartHomeSink,
    NetworkLink, Orchestrator, PowerPlatform, RuntimeConfig, SensorDetails, SensorType,
    SmartHomeSink, Suspended, TopicPublisher, WakeCause,
};

const NVS_NAMESPACE: &str = "climate";
const NVS_RUNTIME_KEY: &str = "runtime_json";

const DHT_PIN: i32 = 4;
const I2C_SDA_PIN: i32 = 21;
const I2C_SCL_PIN: i32 = 22;
const I2C_BAUDRATE_HZ: u32 = 100_000;

const DHT_SETTLE_MS: u32 = 2_000;

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let clock = MonotonicClock::new();
    let duty = DutyCycleController::from_platform(&EspPower, &clock);

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let nvs_store = NvsStore {
        partition: nvs_partition.clone(),
    };

    let mut runtime = nvs_store.load_runtime_config().unwrap_or_else(|err| {
        warn!("failed to load runtime config from NVS: {err:#}");
        RuntimeConfig::default()
    });
    ensure_compiled_defaults(&mut runtime);
    runtime.sanitize();
    for warning in runtime.validate() {
        warn!("config: {warning}");
    }

    let Peripherals {
        modem, pins, i2c0, ..
    } = Peripherals::take()?;

    let sensor = create_climate_sensor(
        runtime.sensor.sensor_type,
        SensorPins {
            dht: pins.gpio4.downgrade(),
            i2c: i2c0,
            sda: pins.gpio21.downgrade(),
            scl: pins.gpio22.downgrade(),
        },
    );
    let network = EspNetwork::new(modem, sys_loop, nvs_partition, &runtime.network)
        .context("wifi setup failed")?;

    let wait = ConnectWait {
        timeout_ms: runtime.network.connect_timeout_ms,
        poll_ms: runtime.network.connect_poll_ms,
    };

    let smart_home = runtime.smart_home.enabled.then(|| -> Box<dyn SmartHomeSink> {
        let bridge = &runtime.smart_home;
        let publisher = EspMqttPublisher::new(
            "smart-home",
            format!("mqtt://{}:{}", bridge.broker_host, bridge.broker_port),
            "climate-sensor-bridge",
            (!bridge.broker_user.is_empty())
                .then(|| (bridge.broker_user.clone(), bridge.broker_pass.clone())),
            false,
        );
        Box::new(MqttSmartHomeSink::new(
            publisher,
            Box::new(clock),
            wait,
            runtime.smart_home.clone(),
        ))
    });

    let cloud = if runtime.cloud.enabled && !runtime.cloud.auth_token.is_empty() {
        let cloud = &runtime.cloud;
        let scheme = if cloud.use_tls { "mqtts" } else { "mqtt" };
        let publisher = EspMqttPublisher::new(
            "cloud",
            format!("{scheme}://{}:{}", cloud.host, cloud.port),
            "climate-sensor-cloud",
            Some(("device".to_string(), cloud.auth_token.clone())),
            cloud.use_tls,
        );
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

    let parts = Collaborators {
        sensor,
        network: Box::new(network),
        smart_home,
        cloud,
        power: Box::new(EspPower),
        clock: Box::new(clock),
    };

    let mut orchestrator = Orchestrator::with_controller(runtime, duty, parts);
    let Suspended { duration } = orchestrator.run();

    warn!(
        "deep sleep of {}s returned control; restarting",
        duration.as_secs()
    );
    thread::sleep(Duration::from_millis(100));
    loop {
        unsafe { esp_idf_svc::sys::esp_restart() };
    }
}

fn ensure_compiled_defaults(runtime: &mut RuntimeConfig) {
    if runtime.network.wifi_ssid.is_empty() {
        runtime.network.wifi_ssid = option_env!("WIFI_SSID").unwrap_or("CHANGE_ME").to_string();
    }

    if runtime.network.wifi_pass.is_empty() {
        runtime.network.wifi_pass = option_env!("WIFI_PASS").unwrap_or("CHANGE_ME").to_string();
    }

    if runtime.cloud.auth_token.is_empty() {
        if let Some(token) = option_env!("BLYNK_AUTH_TOKEN").filter(|token| !token.is_empty()) {
            runtime.cloud.auth_token = token.to_string();
            runtime.cloud.enabled = true;
        }
    }
}

struct NvsStore {
    partition: EspDefaultNvsPartition,
}

impl NvsStore {
    fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        let nvs = EspNvs::new(self.partition.clone(), NVS_NAMESPACE, true)?;
        let mut buffer = vec![0_u8; 4096];

        match nvs.get_str(NVS_RUNTIME_KEY, &mut buffer)? {
            Some(value) => Ok(serde_json::from_str::<RuntimeConfig>(value)?),
            None => Ok(RuntimeConfig::default()),
        }
    }
}

struct SensorPins {
    dht: AnyIOPin,
    i2c: I2C0,
    sda: AnyIOPin,
    scl: AnyIOPin,
}

fn create_climate_sensor(sensor_type: SensorType, pins: SensorPins) -> Box<dyn ClimateSensor> {
    match sensor_type {
        SensorType::Dht11 | SensorType::Dht22 => {
            Box::new(DhtClimateSensor::new(sensor_type, pins.dht))
        }
        SensorType::Sht41 => Box::new(Sht41ClimateSensor::new(pins.i2c, pins.sda, pins.scl)),
    }
}

/// DHT11/DHT22 on a single open-drain data line.
struct DhtClimateSensor {
    kind: SensorType,
    pin: Option<AnyIOPin>,
    driver: Option<PinDriver<'static, AnyIOPin, InputOutput>>,
    delay: Ets,
    last: Option<(Instant, (f32, f32))>,
}

impl DhtClimateSensor {
    fn new(kind: SensorType, pin: AnyIOPin) -> Self {
        Self {
            kind,
            pin: Some(pin),
            driver: None,
            delay: Ets,
            last: None,
        }
    }

    /// Minimum spacing between bus transactions.
    fn min_period(&self) -> Duration {
        match self.kind {
            SensorType::Dht11 => Duration::from_secs(1),
            _ => Duration::from_secs(2),
        }
    }

    fn transact(&mut self) -> Result<(f32, f32), ClimateError> {
        let driver = self
            .driver
            .as_mut()
            .ok_or_else(|| ClimateError::SensorRead(format!("{} not initialized", self.kind.as_str())))?;
        driver
            .set_high()
            .map_err(|err| ClimateError::SensorRead(format!("failed to release data line: {err:?}")))?;

        let sample = match self.kind {
            SensorType::Dht11 => dht11::blocking::read(&mut self.delay, driver).map(|reading| {
                (
                    f32::from(reading.temperature),
                    f32::from(reading.relative_humidity),
                )
            }),
            _ => dht22::blocking::read(&mut self.delay, driver)
                .map(|reading| (reading.temperature, reading.relative_humidity)),
        };

        sample.map_err(|err| {
            ClimateError::SensorRead(format!(
                "{} on GPIO{DHT_PIN}: {err:?}",
                self.kind.as_str()
            ))
        })
    }

    fn sample(&mut self) -> Result<(f32, f32), ClimateError> {
        if let Some((at, sample)) = self.last {
            if at.elapsed() < self.min_period() {
                return Ok(sample);
            }
        }

        let sample = self.transact()?;
        self.last = Some((Instant::now(), sample));
        Ok(sample)
    }
}

impl ClimateSensor for DhtClimateSensor {
    fn initialize(&mut self) -> Result<(), ClimateError> {
        if self.driver.is_none() {
            let init_err = |err: esp_idf_svc::sys::EspError| {
                ClimateError::SensorInit(format!("GPIO{DHT_PIN} setup failed: {err:?}"))
            };
            let pin = self
                .pin
                .take()
                .ok_or_else(|| ClimateError::SensorInit("data pin unavailable".to_string()))?;
            let mut driver = PinDriver::input_output_od(pin).map_err(init_err)?;
            driver.set_pull(Pull::Up).map_err(init_err)?;
            driver.set_high().map_err(init_err)?;
            self.driver = Some(driver);
        }

        FreeRtos::delay_ms(DHT_SETTLE_MS);
        let (temperature, humidity) = self
            .sample()
            .map_err(|err| ClimateError::SensorInit(err.to_string()))?;
        info!(
            "{} responding on GPIO{DHT_PIN} ({temperature:.1}°C, {humidity:.1}%)",
            self.kind.as_str()
        );
        Ok(())
    }

    fn read_temperature(&mut self) -> Result<f32, ClimateError> {
        self.sample().map(|(temperature, _)| temperature)
    }

    fn read_humidity(&mut self) -> Result<f32, ClimateError> {
        self.sample().map(|(_, humidity)| humidity)
    }

    fn describe(&self) -> SensorDetails {
        self.kind.details(format!("GPIO{DHT_PIN}"))
    }

    fn name(&self) -> &'static str {
        self.kind.as_str()
    }
}

/// SHT41 on I2C0.
struct Sht41ClimateSensor {
    bus: Option<(I2C0, AnyIOPin, AnyIOPin)>,
    i2c: Option<I2cDriver<'static>>,
    pending_humidity: Option<f32>,
}

impl Sht41ClimateSensor {
    fn new(i2c: I2C0, sda: AnyIOPin, scl: AnyIOPin) -> Self {
        Self {
            bus: Some((i2c, sda, scl)),
            i2c: None,
            pending_humidity: None,
        }
    }

    fn command(&mut self, command: u8, wait_ms: u32) -> Result<[u8; sht4x::FRAME_LEN], String> {
        let i2c = self.i2c.as_mut().ok_or("bus not initialized")?;
        i2c.write(sht4x::DEFAULT_ADDRESS, &[command], BLOCK)
            .map_err(|err| format!("command {command:#04x} failed: {err:?}"))?;
        FreeRtos::delay_ms(wait_ms);

        let mut frame = [0_u8; sht4x::FRAME_LEN];
        i2c.read(sht4x::DEFAULT_ADDRESS, &mut frame, BLOCK)
            .map_err(|err| format!("response to {command:#04x} failed: {err:?}"))?;
        Ok(frame)
    }

    fn measure(&mut self) -> Result<(f32, f32), ClimateError> {
        let frame = self
            .command(
                sht4x::CMD_MEASURE_HIGH_PRECISION,
                sht4x::HIGH_PRECISION_DELAY_MS,
            )
            .map_err(ClimateError::SensorRead)?;
        sht4x::decode_measurement(&frame)
    }
}

impl ClimateSensor for Sht41ClimateSensor {
    fn initialize(&mut self) -> Result<(), ClimateError> {
        if let Some((i2c, sda, scl)) = self.bus.take() {
            let config = I2cConfig::new().baudrate(Hertz(I2C_BAUDRATE_HZ));
            let driver = I2cDriver::new(i2c, sda, scl, &config).map_err(|err| {
                ClimateError::SensorInit(format!("I2C0 setup failed: {err:?}"))
            })?;
            self.i2c = Some(driver);
        }

        let i2c = self
            .i2c
            .as_mut()
            .ok_or_else(|| ClimateError::SensorInit("I2C0 unavailable".to_string()))?;
        i2c.write(sht4x::DEFAULT_ADDRESS, &[sht4x::CMD_SOFT_RESET], BLOCK)
            .map_err(|err| ClimateError::SensorInit(format!("SHT41 not responding: {err:?}")))?;
        FreeRtos::delay_ms(sht4x::SOFT_RESET_DELAY_MS);

        let frame = self
            .command(sht4x::CMD_READ_SERIAL, sht4x::SERIAL_DELAY_MS)
            .map_err(ClimateError::SensorInit)?;
        let serial = sht4x::decode_serial(&frame)
            .map_err(|err| ClimateError::SensorInit(err.to_string()))?;
        info!("SHT41 serial {serial:#010x} on SDA GPIO{I2C_SDA_PIN} / SCL GPIO{I2C_SCL_PIN}");
        Ok(())
    }

    fn read_temperature(&mut self) -> Result<f32, ClimateError> {
        let (temperature, humidity) = self.measure()?;
        self.pending_humidity = Some(humidity);
        Ok(temperature)
    }

    fn read_humidity(&mut self) -> Result<f32, ClimateError> {
        match self.pending_humidity.take() {
            Some(humidity) => Ok(humidity),
            None => self.measure().map(|(_, humidity)| humidity),
        }
    }

    fn describe(&self) -> SensorDetails {
        SensorType::Sht41.details(format!(
            "I2C0 (SDA GPIO{I2C_SDA_PIN}, SCL GPIO{I2C_SCL_PIN}, {:#04x})",
            sht4x::DEFAULT_ADDRESS
        ))
    }

    fn name(&self) -> &'static str {
        SensorType::Sht41.as_str()
    }
}

struct EspNetwork {
    wifi: EspWifi<'static>,
    ssid: String,
    has_credentials: bool,
}

impl EspNetwork {
    fn new(
        modem: Modem,
        sys_loop: EspSystemEventLoop,
        nvs_partition: EspDefaultNvsPartition,
        network: &NetworkConfig,
    ) -> anyhow::Result<Self> {
        let mut wifi = EspWifi::new(modem, sys_loop, Some(nvs_partition))?;

        let auth_method = if network.wifi_pass.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPAWPA2Personal
        };

        wifi.set_configuration(&Configuration::Client(ClientConfiguration {
            ssid: network
                .wifi_ssid
                .as_str()
                .try_into()
                .map_err(|_| anyhow!("wifi ssid too long"))?,
            password: network
                .wifi_pass
                .as_str()
                .try_into()
                .map_err(|_| anyhow!("wifi password too long"))?,
            auth_method,
            ..Default::default()
        }))?;

        Ok(Self {
            wifi,
            ssid: network.wifi_ssid.clone(),
            has_credentials: network.has_station_credentials(),
        })
    }
}

impl NetworkLink for EspNetwork {
    fn connect(&mut self) {
        if !self.has_credentials {
            warn!("wifi credentials missing; staying offline");
            return;
        }

        if !self.wifi.is_started().unwrap_or(false) {
            if let Err(err) = self.wifi.start() {
                warn!("wifi start failed: {err:?}");
                return;
            }
        }

        info!("connecting to `{}`", self.ssid);
        if let Err(err) = self.wifi.connect() {
            warn!("wifi connect request failed: {err:?}");
        }
    }

    fn is_connected(&self) -> bool {
        self.wifi.is_up().unwrap_or(false)
    }

    fn check_status(&mut self) {
        if !self.is_connected() {
            warn!("wifi connection lost, reconnecting");
            let _ = self.wifi.disconnect();
            self.connect();
        }
    }

    fn disconnect(&mut self) {
        let _ = self.wifi.disconnect();
        if let Err(err) = self.wifi.stop() {
            warn!("wifi stop failed: {err:?}");
        }
        info!("wifi off");
    }
}

/// ESP-IDF MQTT client; its event loop runs on a dedicated thread.
struct EspMqttPublisher {
    label: &'static str,
    url: String,
    client_id: &'static str,
    credentials: Option<(String, String)>,
    tls: bool,
    client: Option<EspMqttClient<'static>>,
    connected: Arc<AtomicBool>,
}

impl EspMqttPublisher {
    fn new(
        label: &'static str,
        url: String,
        client_id: &'static str,
        credentials: Option<(String, String)>,
        tls: bool,
    ) -> Self {
        Self {
            label,
            url,
            client_id,
            credentials,
            tls,
            client: None,
            connected: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl TopicPublisher for EspMqttPublisher {
    fn open(&mut self) -> Result<(), ClimateError> {
        if self.client.is_some() {
            return Ok(());
        }

        let conf = MqttClientConfiguration {
            client_id: Some(self.client_id),
            username: self.credentials.as_ref().map(|(user, _)| user.as_str()),
            password: self.credentials.as_ref().map(|(_, pass)| pass.as_str()),
            crt_bundle_attach: if self.tls {
                Some(esp_idf_svc::sys::esp_crt_bundle_attach)
            } else {
                None
            },
            ..Default::default()
        };

        let (client, mut conn) = EspMqttClient::new(&self.url, &conf)
            .map_err(|err| ClimateError::sink(self.label, format!("{err:?}")))?;

        let connected = self.connected.clone();
        let label = self.label;
        thread::Builder::new()
            .name(format!("mqtt-{label}"))
            .stack_size(8192)
            .spawn(move || {
                while let Ok(event) = conn.next() {
                    match event.payload() {
                        EventPayload::Connected(_) => {
                            connected.store(true, Ordering::SeqCst);
                            info!("{label} mqtt connected");
                        }
                        EventPayload::Disconnected => {
                            connected.store(false, Ordering::SeqCst);
                            warn!("{label} mqtt disconnected");
                        }
                        EventPayload::Error(err) => warn!("{label} mqtt error: {err:?}"),
                        _ => {}
                    }
                }
                connected.store(false, Ordering::SeqCst);
                info!("{label} mqtt connection closed");
            })
            .map_err(|err| ClimateError::sink(self.label, err.to_string()))?;

        self.client = Some(client);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), ClimateError> {
        let client = self
            .client
            .as_mut()
            .ok_or_else(|| ClimateError::sink(self.label, "client not started"))?;
        client
            .publish(topic, QoS::AtLeastOnce, retain, payload)
            .map(|_| ())
            .map_err(|err| ClimateError::sink(self.label, format!("{err:?}")))
    }

    fn close(&mut self) {
        self.client = None;
        self.connected.store(false, Ordering::SeqCst);
    }
}

struct EspPower;

impl PowerPlatform for EspPower {
    #[allow(non_upper_case_globals)]
    fn wake_cause(&self) -> WakeCause {
        use esp_idf_svc::sys::*;

        let cause = unsafe { esp_sleep_get_wakeup_cause() };
        match cause {
            esp_sleep_source_t_ESP_SLEEP_WAKEUP_EXT0 => WakeCause::ExternalRtcIo,
            esp_sleep_source_t_ESP_SLEEP_WAKEUP_EXT1 => WakeCause::ExternalRtcCntl,
            esp_sleep_source_t_ESP_SLEEP_WAKEUP_TIMER => WakeCause::Timer,
            esp_sleep_source_t_ESP_SLEEP_WAKEUP_TOUCHPAD => WakeCause::Touchpad,
            esp_sleep_source_t_ESP_SLEEP_WAKEUP_ULP
            | esp_sleep_source_t_ESP_SLEEP_WAKEUP_COCPU => WakeCause::Coprocessor,
            esp_sleep_source_t_ESP_SLEEP_WAKEUP_UNDEFINED => WakeCause::Reset,
            other => WakeCause::Other(other),
        }
    }

    fn flush(&mut self) {
        let _ = std::io::stdout().flush();
        FreeRtos::delay_ms(50);
    }

    fn free_heap_bytes(&self) -> Option<u32> {
        Some(unsafe { esp_idf_svc::sys::esp_get_free_heap_size() })
    }

    fn deep_sleep(&mut self, duration: Duration) {
        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        unsafe {
            esp_idf_svc::sys::esp_sleep_enable_timer_wakeup(micros);
            esp_idf_svc::sys::esp_deep_sleep_start();
        }
    }
}
