use std::{
    thread,
    time::{Duration, Instant},
};

use crate::{error::ClimateError, types::WakeCause};

pub trait Clock {
    fn now_ms(&self) -> u64;
    fn delay_ms(&self, ms: u64);
}

pub trait NetworkLink {
    /// Starts a connection attempt without waiting for it.
    fn connect(&mut self);
    fn is_connected(&self) -> bool;
    fn check_status(&mut self);
    fn disconnect(&mut self);
}

pub trait SmartHomeSink {
    fn begin(&mut self, device_name: &str) -> bool;
    /// Must run every loop tick while the sink is active.
    fn poll(&mut self);
    fn update_reading(&mut self, temperature_c: f32, humidity_pct: f32)
        -> Result<(), ClimateError>;
}

pub trait CloudSink {
    fn begin(&mut self) -> bool;
    /// Must run every loop tick while the sink is active.
    fn run(&mut self);
    fn send_reading(
        &mut self,
        temperature_c: f32,
        humidity_pct: f32,
        heat_index_c: f32,
    ) -> Result<(), ClimateError>;
    fn send_status(&mut self, sensor_name: &str, online: bool) -> Result<(), ClimateError>;
    fn is_connected(&self) -> bool;
}

pub trait PowerPlatform {
    fn wake_cause(&self) -> WakeCause;

    fn flush(&mut self) {}

    fn free_heap_bytes(&self) -> Option<u32> {
        None
    }

    /// Arms the wake timer and suspends. On hardware this does not return.
    fn deep_sleep(&mut self, duration: Duration);
}

#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    started: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn delay_ms(&self, ms: u64) {
        thread::sleep(Duration::from_millis(ms));
    }
}

/// Polls `ready` every `poll_ms` until it holds or `timeout_ms` elapses.
pub fn wait_until(
    clock: &dyn Clock,
    timeout_ms: u64,
    poll_ms: u64,
    mut ready: impl FnMut() -> bool,
) -> bool {
    let started = clock.now_ms();
    loop {
        if ready() {
            return true;
        }
        if clock.now_ms().saturating_sub(started) >= timeout_ms {
            return false;
        }
        clock.delay_ms(poll_ms.max(1));
    }
}
