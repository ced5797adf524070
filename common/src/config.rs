use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::SensorType;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SensorConfig {
    pub sensor_type: SensorType,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            sensor_type: SensorType::Dht22,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CadenceConfig {
    pub read_interval_ms: u64,
    pub connectivity_check_interval_ms: u64,
    pub loop_delay_ms: u64,
    pub stabilization_delay_ms: u64,
}

impl Default for CadenceConfig {
    fn default() -> Self {
        Self {
            read_interval_ms: 60_000,
            connectivity_check_interval_ms: 60_000,
            loop_delay_ms: 1_000,
            stabilization_delay_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DutyCycleConfig {
    pub enabled: bool,
    pub duration_s: u64,
    pub operation_timeout_s: u64,
}

impl Default for DutyCycleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            duration_s: 300,
            operation_timeout_s: 120,
        }
    }
}

impl DutyCycleConfig {
    pub fn operation_timeout_ms(&self) -> u64 {
        self.operation_timeout_s.saturating_mul(1_000)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NetworkConfig {
    pub wifi_ssid: String,
    pub wifi_pass: String,
    pub connect_timeout_ms: u64,
    pub connect_poll_ms: u64,
    pub quick_connect_timeout_ms: u64,
    pub quick_connect_poll_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            wifi_ssid: String::new(),
            wifi_pass: String::new(),
            connect_timeout_ms: 10_000,
            connect_poll_ms: 500,
            quick_connect_timeout_ms: 10_000,
            quick_connect_poll_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SmartHomeConfig {
    pub enabled: bool,
    pub device_name: String,
    pub setup_code: String,
    pub broker_host: String,
    pub broker_port: u16,
    pub broker_user: String,
    pub broker_pass: String,
    pub topic_prefix: String,
}

impl Default for SmartHomeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            device_name: "Climate Sensor".to_string(),
            setup_code: "466-37-726".to_string(),
            broker_host: "192.168.1.100".to_string(),
            broker_port: 1883,
            broker_user: String::new(),
            broker_pass: String::new(),
            topic_prefix: "homebridge".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CloudConfig {
    pub enabled: bool,
    pub auth_token: String,
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    pub connection_check_interval_ms: u64,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            auth_token: String::new(),
            host: "blynk.cloud".to_string(),
            port: 8883,
            use_tls: true,
            connection_check_interval_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RuntimeConfig {
    pub sensor: SensorConfig,
    pub cadence: CadenceConfig,
    pub duty_cycle: DutyCycleConfig,
    pub network: NetworkConfig,
    pub smart_home: SmartHomeConfig,
    pub cloud: CloudConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigWarning {
    #[error("operation timeout ({timeout_ms} ms) is shorter than the read interval ({read_interval_ms} ms); sessions may suspend before the first reading")]
    TimeoutBeforeFirstRead {
        timeout_ms: u64,
        read_interval_ms: u64,
    },
    #[error("wifi credentials are missing")]
    MissingWifiCredentials,
    #[error("cloud telemetry is enabled without an auth token")]
    MissingCloudToken,
    #[error("smart-home bridge is enabled without a broker host")]
    MissingBrokerHost,
}

impl CadenceConfig {
    pub fn sanitize(&mut self) {
        // DHT parts cannot be sampled faster than every two seconds.
        self.read_interval_ms = self.read_interval_ms.max(2_000);
        self.connectivity_check_interval_ms = self.connectivity_check_interval_ms.max(1_000);
        self.loop_delay_ms = self.loop_delay_ms.clamp(10, 10_000);
        self.stabilization_delay_ms = self.stabilization_delay_ms.min(10_000);
    }
}

impl NetworkConfig {
    pub fn sanitize(&mut self) {
        self.connect_poll_ms = self.connect_poll_ms.clamp(10, 5_000);
        self.quick_connect_poll_ms = self.quick_connect_poll_ms.clamp(10, 5_000);
        self.connect_timeout_ms = self.connect_timeout_ms.max(self.connect_poll_ms);
        self.quick_connect_timeout_ms = self.quick_connect_timeout_ms.max(self.quick_connect_poll_ms);
    }

    pub fn has_station_credentials(&self) -> bool {
        let ssid = self.wifi_ssid.trim();
        !ssid.is_empty() && ssid != "CHANGE_ME"
    }
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.cadence.sanitize();
        self.network.sanitize();
        self.duty_cycle.duration_s = self.duty_cycle.duration_s.max(1);
        self.cloud.connection_check_interval_ms =
            self.cloud.connection_check_interval_ms.max(1_000);

        if self.smart_home.device_name.trim().is_empty() {
            self.smart_home.device_name = SmartHomeConfig::default().device_name;
        }
        if self.smart_home.topic_prefix.trim().is_empty() {
            self.smart_home.topic_prefix = SmartHomeConfig::default().topic_prefix;
        }
    }

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.duty_cycle.enabled
            && self.duty_cycle.operation_timeout_ms() < self.cadence.read_interval_ms
        {
            warnings.push(ConfigWarning::TimeoutBeforeFirstRead {
                timeout_ms: self.duty_cycle.operation_timeout_ms(),
                read_interval_ms: self.cadence.read_interval_ms,
            });
        }
        if !self.network.has_station_credentials() {
            warnings.push(ConfigWarning::MissingWifiCredentials);
        }
        if self.cloud.enabled && self.cloud.auth_token.trim().is_empty() {
            warnings.push(ConfigWarning::MissingCloudToken);
        }
        if self.smart_home.enabled && self.smart_home.broker_host.trim().is_empty() {
            warnings.push(ConfigWarning::MissingBrokerHost);
        }

        warnings
    }
}
