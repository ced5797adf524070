use serde::{Deserialize, Serialize};

use crate::climate::heat_index;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SensorType {
    Dht11,
    Dht22,
    Sht41,
}

impl SensorType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dht11 => "DHT11",
            Self::Dht22 => "DHT22",
            Self::Sht41 => "SHT41",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "DHT11" => Some(Self::Dht11),
            "DHT22" => Some(Self::Dht22),
            "SHT41" => Some(Self::Sht41),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootKind {
    ColdStart,
    ResumeFromSuspend,
}

impl BootKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ColdStart => "cold start",
            Self::ResumeFromSuspend => "resume from deep sleep",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeCause {
    Reset,
    Timer,
    ExternalRtcIo,
    ExternalRtcCntl,
    Touchpad,
    Coprocessor,
    Other(u32),
}

impl WakeCause {
    pub fn is_scheduled_wake(self) -> bool {
        matches!(
            self,
            Self::Timer
                | Self::ExternalRtcIo
                | Self::ExternalRtcCntl
                | Self::Touchpad
                | Self::Coprocessor
        )
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::ExternalRtcIo => "external signal using RTC_IO",
            Self::ExternalRtcCntl => "external signal using RTC_CNTL",
            Self::Timer => "timer",
            Self::Touchpad => "touchpad",
            Self::Coprocessor => "ULP coprocessor",
            Self::Reset | Self::Other(_) => "first boot or reset",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkStatus {
    Online,
    Offline,
}

impl SinkStatus {
    pub fn from_online(online: bool) -> Self {
        if online {
            Self::Online
        } else {
            Self::Offline
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Online => "Online",
            Self::Offline => "Offline",
        }
    }
}

/// The heat index is only present when both channels produced finite values;
/// a reading without it is invalid and must not be published.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub temperature_c: f32,
    pub humidity_pct: f32,
    pub heat_index_c: Option<f32>,
    pub timestamp_ms: u64,
}

impl Reading {
    pub fn new(temperature_c: f32, humidity_pct: f32, timestamp_ms: u64) -> Self {
        let heat_index_c = (temperature_c.is_finite() && humidity_pct.is_finite())
            .then(|| heat_index(temperature_c, humidity_pct));

        Self {
            temperature_c,
            humidity_pct,
            heat_index_c,
            timestamp_ms,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.heat_index_c.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduled_wakes_are_recognized() {
        for cause in [
            WakeCause::Timer,
            WakeCause::ExternalRtcIo,
            WakeCause::ExternalRtcCntl,
            WakeCause::Touchpad,
            WakeCause::Coprocessor,
        ] {
            assert!(cause.is_scheduled_wake(), "{cause:?}");
        }

        assert!(!WakeCause::Reset.is_scheduled_wake());
        assert!(!WakeCause::Other(9).is_scheduled_wake());
        assert_eq!(WakeCause::Other(9).description(), "first boot or reset");
    }

    #[test]
    fn nan_channel_makes_reading_invalid() {
        assert!(Reading::new(22.0, 40.0, 10).is_valid());
        assert!(!Reading::new(f32::NAN, 40.0, 10).is_valid());
        assert!(!Reading::new(22.0, f32::NAN, 10).is_valid());
        assert!(!Reading::new(f32::INFINITY, 40.0, 10).is_valid());
    }

    #[test]
    fn sensor_type_parses_case_insensitively() {
        assert_eq!(SensorType::parse("dht22"), Some(SensorType::Dht22));
        assert_eq!(SensorType::parse(" SHT41 "), Some(SensorType::Sht41));
        assert_eq!(SensorType::parse("bme280"), None);
        assert_eq!(
            serde_json::to_string(&SensorType::Dht11).unwrap(),
            "\"DHT11\""
        );
    }
}
