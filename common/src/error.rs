use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClimateError {
    #[error("sensor initialization failed: {0}")]
    SensorInit(String),
    #[error("sensor read failed: {0}")]
    SensorRead(String),
    #[error("network unavailable")]
    NetworkUnavailable,
    #[error("{sink} unreachable: {reason}")]
    SinkUnreachable { sink: &'static str, reason: String },
}

impl ClimateError {
    pub fn sink(sink: &'static str, reason: impl Into<String>) -> Self {
        Self::SinkUnreachable {
            sink,
            reason: reason.into(),
        }
    }
}
