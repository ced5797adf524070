use crate::{
    error::ClimateError,
    types::{Reading, SensorType},
};

pub const HEAT_INDEX_THRESHOLD_C: f32 = 27.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelDetails {
    pub min_value: f32,
    pub max_value: f32,
    pub resolution: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SensorDetails {
    pub name: &'static str,
    pub bus: String,
    pub temperature: ChannelDetails,
    pub humidity: ChannelDetails,
}

/// Reads report `ClimateError::SensorRead` when the bus transaction did not
/// complete or produced NaN; values are never clamped.
pub trait ClimateSensor {
    fn initialize(&mut self) -> Result<(), ClimateError>;
    fn read_temperature(&mut self) -> Result<f32, ClimateError>;
    fn read_humidity(&mut self) -> Result<f32, ClimateError>;
    fn describe(&self) -> SensorDetails;
    fn name(&self) -> &'static str;
}

impl SensorType {
    pub fn channel_details(self) -> (ChannelDetails, ChannelDetails) {
        match self {
            Self::Dht11 => (
                ChannelDetails {
                    min_value: 0.0,
                    max_value: 50.0,
                    resolution: 2.0,
                },
                ChannelDetails {
                    min_value: 20.0,
                    max_value: 80.0,
                    resolution: 5.0,
                },
            ),
            Self::Dht22 => (
                ChannelDetails {
                    min_value: -40.0,
                    max_value: 80.0,
                    resolution: 0.1,
                },
                ChannelDetails {
                    min_value: 0.0,
                    max_value: 100.0,
                    resolution: 0.1,
                },
            ),
            Self::Sht41 => (
                ChannelDetails {
                    min_value: -40.0,
                    max_value: 125.0,
                    resolution: 0.01,
                },
                ChannelDetails {
                    min_value: 0.0,
                    max_value: 100.0,
                    resolution: 0.01,
                },
            ),
        }
    }

    pub fn details(self, bus: impl Into<String>) -> SensorDetails {
        let (temperature, humidity) = self.channel_details();
        SensorDetails {
            name: self.as_str(),
            bus: bus.into(),
            temperature,
            humidity,
        }
    }
}

/// Rothfusz regression in Celsius, identity below 27 °C.
pub fn heat_index(temperature_c: f32, humidity_pct: f32) -> f32 {
    if temperature_c < HEAT_INDEX_THRESHOLD_C {
        return temperature_c;
    }

    let t = temperature_c;
    let h = humidity_pct;

    -8.784_694_755_56 + 1.611_394_11 * t + 2.338_548_838_89 * h
        - 0.146_116_05 * t * h
        - 0.012_308_094 * t * t
        - 0.016_424_827_777_8 * h * h
        + 0.002_211_732 * t * t * h
        + 0.000_725_46 * t * h * h
        - 0.000_003_582 * t * t * h * h
}

pub fn sample(sensor: &mut dyn ClimateSensor, now_ms: u64) -> Result<Reading, ClimateError> {
    let temperature = sensor.read_temperature()?;
    let humidity = sensor.read_humidity()?;

    if temperature.is_nan() || humidity.is_nan() {
        return Err(ClimateError::SensorRead(format!(
            "{} returned NaN",
            sensor.name()
        )));
    }

    Ok(Reading::new(temperature, humidity, now_ms))
}

pub fn log_sensor_details(details: &SensorDetails) {
    log::info!("sensor {} on {}", details.name, details.bus);
    log::debug!(
        "temperature range {:.1}..{:.1}°C (resolution {}°C)",
        details.temperature.min_value,
        details.temperature.max_value,
        details.temperature.resolution
    );
    log::debug!(
        "humidity range {:.1}..{:.1}% (resolution {}%)",
        details.humidity.min_value,
        details.humidity.max_value,
        details.humidity.resolution
    );
}
