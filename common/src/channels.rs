use serde::Serialize;
use sha2::{Digest, Sha256};

pub const CLOUD_TOPIC_ROOT: &str = "ds";
pub const REGISTRATION_TOPIC_LEAF: &str = "config";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VirtualPin {
    Temperature,
    Humidity,
    HeatIndex,
    Status,
}

impl VirtualPin {
    pub fn index(self) -> u8 {
        match self {
            Self::Temperature => 0,
            Self::Humidity => 1,
            Self::HeatIndex => 2,
            Self::Status => 3,
        }
    }

    pub fn topic(self) -> String {
        format!("{CLOUD_TOPIC_ROOT}/V{}", self.index())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Characteristic {
    CurrentTemperature,
    CurrentRelativeHumidity,
}

impl Characteristic {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CurrentTemperature => "CurrentTemperature",
            Self::CurrentRelativeHumidity => "CurrentRelativeHumidity",
        }
    }

    pub fn service(self) -> &'static str {
        match self {
            Self::CurrentTemperature => "TemperatureSensor",
            Self::CurrentRelativeHumidity => "HumiditySensor",
        }
    }

    pub fn range(self) -> (f32, f32) {
        match self {
            Self::CurrentTemperature => (-40.0, 100.0),
            Self::CurrentRelativeHumidity => (0.0, 100.0),
        }
    }

    pub fn clamp(self, value: f32) -> f32 {
        let (min, max) = self.range();
        value.clamp(min, max)
    }
}

/// Stable bridge identifier: the first six bytes of SHA-256(device name).
pub fn accessory_id(device_name: &str) -> String {
    let digest = Sha256::digest(device_name.as_bytes());
    digest
        .iter()
        .take(6)
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

pub fn registration_topic(prefix: &str, accessory_id: &str) -> String {
    format!("{prefix}/{accessory_id}/{REGISTRATION_TOPIC_LEAF}")
}

pub fn characteristic_topic(
    prefix: &str,
    accessory_id: &str,
    characteristic: Characteristic,
) -> String {
    format!("{prefix}/{accessory_id}/{}", characteristic.as_str())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceDescriptor {
    #[serde(rename = "type")]
    pub service: &'static str,
    pub characteristic: &'static str,
    #[serde(rename = "minValue")]
    pub min_value: f32,
    #[serde(rename = "maxValue")]
    pub max_value: f32,
}

impl From<Characteristic> for ServiceDescriptor {
    fn from(characteristic: Characteristic) -> Self {
        let (min_value, max_value) = characteristic.range();
        Self {
            service: characteristic.service(),
            characteristic: characteristic.as_str(),
            min_value,
            max_value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessoryRegistration {
    pub name: String,
    #[serde(rename = "accessoryId")]
    pub accessory_id: String,
    #[serde(rename = "setupCode")]
    pub setup_code: String,
    pub manufacturer: &'static str,
    pub services: Vec<ServiceDescriptor>,
}

impl AccessoryRegistration {
    pub fn new(name: &str, setup_code: &str) -> Self {
        Self {
            name: name.to_string(),
            accessory_id: accessory_id(name),
            setup_code: setup_code.to_string(),
            manufacturer: "Espressif",
            services: vec![
                Characteristic::CurrentTemperature.into(),
                Characteristic::CurrentRelativeHumidity.into(),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn virtual_pins_map_to_datastream_topics() {
        assert_eq!(VirtualPin::Temperature.topic(), "ds/V0");
        assert_eq!(VirtualPin::Humidity.topic(), "ds/V1");
        assert_eq!(VirtualPin::HeatIndex.topic(), "ds/V2");
        assert_eq!(VirtualPin::Status.topic(), "ds/V3");
    }

    #[test]
    fn accessory_id_is_stable_per_name() {
        let first = accessory_id("Climate Sensor (DHT22)");

        assert_eq!(first.len(), 12);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(first, accessory_id("Climate Sensor (DHT22)"));
        assert_ne!(first, accessory_id("Climate Sensor (SHT41)"));
    }

    #[test]
    fn characteristics_clamp_to_their_bounds() {
        let temperature = Characteristic::CurrentTemperature;
        let humidity = Characteristic::CurrentRelativeHumidity;

        assert_eq!(temperature.clamp(-55.0), -40.0);
        assert_eq!(temperature.clamp(124.9), 100.0);
        assert_eq!(temperature.clamp(21.5), 21.5);
        assert_eq!(humidity.clamp(-3.2), 0.0);
        assert_eq!(humidity.clamp(101.0), 100.0);
    }

    #[test]
    fn registration_lists_both_services() {
        let registration = AccessoryRegistration::new("Office", "466-37-726");
        let json = serde_json::to_value(&registration).unwrap();

        assert_eq!(json["name"], "Office");
        assert_eq!(json["accessoryId"], accessory_id("Office"));
        assert_eq!(json["setupCode"], "466-37-726");
        assert_eq!(json["services"][0]["type"], "TemperatureSensor");
        assert_eq!(json["services"][0]["minValue"], -40.0);
        assert_eq!(json["services"][1]["characteristic"], "CurrentRelativeHumidity");
        assert_eq!(
            characteristic_topic("homebridge", "abc", Characteristic::CurrentTemperature),
            "homebridge/abc/CurrentTemperature"
        );
        assert_eq!(registration_topic("homebridge", "abc"), "homebridge/abc/config");
    }
}
