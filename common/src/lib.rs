pub mod channels;
pub mod climate;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod ports;
pub mod power;
pub mod sht4x;
pub mod sinks;
pub mod types;

#[cfg(test)]
mod fakes;

pub use climate::{heat_index, ClimateSensor, SensorDetails};
pub use config::{ConfigWarning, RuntimeConfig};
pub use error::ClimateError;
pub use orchestrator::{Collaborators, Orchestrator, Suspended};
pub use ports::{Clock, CloudSink, MonotonicClock, NetworkLink, PowerPlatform, SmartHomeSink};
pub use power::DutyCycleController;
pub use sinks::{ConnectWait, MqttCloudSink, MqttSmartHomeSink, TopicPublisher};
pub use types::{BootKind, Reading, SensorType, WakeCause};
