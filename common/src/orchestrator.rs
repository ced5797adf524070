use std::time::Duration;

use log::{debug, info, warn};

use crate::{
    climate::{self, log_sensor_details, ClimateSensor},
    config::RuntimeConfig,
    error::ClimateError,
    ports::{wait_until, Clock, CloudSink, NetworkLink, PowerPlatform, SmartHomeSink},
    power::DutyCycleController,
    types::{BootKind, Reading},
};

// Absent sinks are disabled.
pub struct Collaborators {
    pub sensor: Box<dyn ClimateSensor>,
    pub network: Box<dyn NetworkLink>,
    pub smart_home: Option<Box<dyn SmartHomeSink>>,
    pub cloud: Option<Box<dyn CloudSink>>,
    pub power: Box<dyn PowerPlatform>,
    pub clock: Box<dyn Clock>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Suspended {
    pub duration: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub smart_home: bool,
    pub cloud: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CycleOutcome {
    Published { reading: Reading, delivery: Delivery },
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    Idle,
    Cycle(CycleOutcome),
    Suspended(Suspended),
}

pub struct Orchestrator {
    config: RuntimeConfig,
    parts: Collaborators,
    duty: DutyCycleController,
    sensor_ready: bool,
    smart_home_active: bool,
    cloud_active: bool,
    last_read_ms: u64,
    last_check_ms: u64,
}

impl Orchestrator {
    pub fn new(config: RuntimeConfig, parts: Collaborators) -> Self {
        let duty = DutyCycleController::from_platform(parts.power.as_ref(), parts.clock.as_ref());
        Self::with_controller(config, duty, parts)
    }

    /// Takes a controller that classified the boot before `parts` were
    /// built and applies the session's duty-cycle settings to it.
    pub fn with_controller(
        config: RuntimeConfig,
        mut duty: DutyCycleController,
        parts: Collaborators,
    ) -> Self {
        duty.apply_config(config.duty_cycle.clone());
        let now_ms = parts.clock.now_ms();
        Self {
            config,
            parts,
            duty,
            sensor_ready: false,
            smart_home_active: false,
            cloud_active: false,
            last_read_ms: now_ms,
            last_check_ms: now_ms,
        }
    }

    pub fn controller(&self) -> &DutyCycleController {
        &self.duty
    }

    fn takes_quick_path(&self) -> bool {
        self.duty.boot_kind() == BootKind::ResumeFromSuspend && self.duty.is_enabled()
    }

    /// With duty cycling disabled this only returns if the platform's deep
    /// sleep does.
    pub fn run(&mut self) -> Suspended {
        if self.takes_quick_path() {
            return self.run_quick_cycle();
        }
        if self.duty.boot_kind() == BootKind::ResumeFromSuspend {
            info!("woke from deep sleep with duty cycling disabled, starting a full session");
        }

        self.start_session();
        loop {
            if let TickOutcome::Suspended(end) = self.tick() {
                return end;
            }
            self.parts.clock.delay_ms(self.config.cadence.loop_delay_ms);
        }
    }

    pub fn start_session(&mut self) {
        let now_ms = self.parts.clock.now_ms();
        self.duty.reset_operation_timer(now_ms);
        self.last_read_ms = now_ms;
        self.last_check_ms = now_ms;

        self.init_sensor();

        if self.connect(
            self.config.network.connect_timeout_ms,
            self.config.network.connect_poll_ms,
        ) {
            self.start_sinks();
        } else {
            warn!("{}, continuing offline", ClimateError::NetworkUnavailable);
        }

        self.report_status(self.sensor_ready);
        info!("setup complete");
    }

    pub fn tick(&mut self) -> TickOutcome {
        let now_ms = self.parts.clock.now_ms();

        if self.duty.should_suspend_now(now_ms) {
            if !self.duty.is_suspend_requested() {
                info!("operation timeout reached");
            }
            return TickOutcome::Suspended(self.suspend());
        }

        self.service_sinks();

        let interval = self.config.cadence.connectivity_check_interval_ms;
        if now_ms.saturating_sub(self.last_check_ms) >= interval {
            self.last_check_ms = now_ms;
            self.check_connectivity();
        }

        if now_ms.saturating_sub(self.last_read_ms) >= self.config.cadence.read_interval_ms {
            self.last_read_ms = now_ms;
            return TickOutcome::Cycle(self.run_full_cycle());
        }

        TickOutcome::Idle
    }

    pub fn run_full_cycle(&mut self) -> CycleOutcome {
        let reading = match self.read() {
            Ok(reading) => reading,
            Err(err) => {
                warn!("{err}");
                self.report_status(false);
                return CycleOutcome::Invalid;
            }
        };

        let delivery = self.publish(&reading);
        log_reading(&reading);
        self.duty.schedule_suspend();

        CycleOutcome::Published { reading, delivery }
    }

    /// Always ends in exactly one deep sleep.
    pub fn run_quick_cycle(&mut self) -> Suspended {
        let now_ms = self.parts.clock.now_ms();
        self.duty.reset_operation_timer(now_ms);
        info!("quick cycle");

        self.init_sensor();
        if !self.sensor_ready {
            warn!("sensor unavailable, going back to sleep");
            return self.suspend();
        }

        self.parts
            .clock
            .delay_ms(self.config.cadence.stabilization_delay_ms);

        if !self.connect(
            self.config.network.quick_connect_timeout_ms,
            self.config.network.quick_connect_poll_ms,
        ) {
            warn!("{}, going back to sleep", ClimateError::NetworkUnavailable);
            return self.suspend();
        }

        match self.read() {
            Ok(reading) => {
                self.start_sinks();
                self.publish(&reading);
                log_reading(&reading);
            }
            Err(err) => {
                warn!("{err}");
                self.start_sinks();
                self.report_status(false);
            }
        }

        self.suspend()
    }

    fn init_sensor(&mut self) {
        match self.parts.sensor.initialize() {
            Ok(()) => {
                self.sensor_ready = true;
                log_sensor_details(&self.parts.sensor.describe());
            }
            Err(err) => {
                self.sensor_ready = false;
                warn!("{err}");
            }
        }
    }

    fn connect(&mut self, timeout_ms: u64, poll_ms: u64) -> bool {
        self.parts.network.connect();
        let network = &self.parts.network;
        let connected = wait_until(self.parts.clock.as_ref(), timeout_ms, poll_ms, || {
            network.is_connected()
        });
        if connected {
            info!("network connected");
        }
        connected
    }

    fn start_sinks(&mut self) {
        if !self.smart_home_active {
            let device_name = format!(
                "{} ({})",
                self.config.smart_home.device_name,
                self.parts.sensor.name()
            );
            if let Some(sink) = self.parts.smart_home.as_mut() {
                self.smart_home_active = sink.begin(&device_name);
                if !self.smart_home_active {
                    warn!("smart-home bridge failed to start");
                }
            }
        }

        if !self.cloud_active {
            if let Some(sink) = self.parts.cloud.as_mut() {
                self.cloud_active = sink.begin();
                if !self.cloud_active {
                    warn!("cloud telemetry failed to start");
                }
            }
        }
    }

    fn service_sinks(&mut self) {
        if self.smart_home_active {
            if let Some(sink) = self.parts.smart_home.as_mut() {
                sink.poll();
            }
        }
        if self.cloud_active {
            if let Some(sink) = self.parts.cloud.as_mut() {
                sink.run();
            }
        }
    }

    fn check_connectivity(&mut self) {
        self.parts.network.check_status();
        if self.parts.network.is_connected() {
            self.start_sinks();
        } else {
            warn!("network disconnected, reconnecting");
        }
    }

    fn read(&mut self) -> Result<Reading, ClimateError> {
        if !self.sensor_ready {
            return Err(ClimateError::SensorRead(format!(
                "{} sensor not initialized",
                self.parts.sensor.name()
            )));
        }

        let now_ms = self.parts.clock.now_ms();
        let reading = climate::sample(self.parts.sensor.as_mut(), now_ms)?;
        if !reading.is_valid() {
            return Err(ClimateError::SensorRead(format!(
                "{} returned a non-finite value",
                self.parts.sensor.name()
            )));
        }
        Ok(reading)
    }

    fn publish(&mut self, reading: &Reading) -> Delivery {
        let mut delivery = Delivery::default();
        let Some(heat_index_c) = reading.heat_index_c else {
            return delivery;
        };
        let sensor_name = self.parts.sensor.name();

        if self.smart_home_active && self.parts.network.is_connected() {
            if let Some(sink) = self.parts.smart_home.as_mut() {
                match sink.update_reading(reading.temperature_c, reading.humidity_pct) {
                    Ok(()) => delivery.smart_home = true,
                    Err(err) => warn!("{err}"),
                }
            }
        }

        if self.cloud_active && self.parts.network.is_connected() {
            if let Some(sink) = self.parts.cloud.as_mut() {
                if sink.is_connected() {
                    let sent = sink
                        .send_reading(reading.temperature_c, reading.humidity_pct, heat_index_c)
                        .and_then(|()| sink.send_status(sensor_name, true));
                    match sent {
                        Ok(()) => delivery.cloud = true,
                        Err(err) => warn!("{err}"),
                    }
                }
            }
        }

        debug!("delivery: {delivery:?}");
        delivery
    }

    fn report_status(&mut self, online: bool) {
        if !self.cloud_active || !self.parts.network.is_connected() {
            return;
        }
        let sensor_name = self.parts.sensor.name();
        if let Some(sink) = self.parts.cloud.as_mut() {
            if sink.is_connected() {
                if let Err(err) = sink.send_status(sensor_name, online) {
                    warn!("{err}");
                }
            }
        }
    }

    // Only reached with duty cycling enabled.
    fn suspend(&mut self) -> Suspended {
        let now_ms = self.parts.clock.now_ms();
        self.duty.enter_suspend(
            now_ms,
            self.parts.network.as_mut(),
            self.parts.power.as_mut(),
        );
        Suspended {
            duration: self.duty.suspend_duration(),
        }
    }
}

fn log_reading(reading: &Reading) {
    if let Some(heat_index_c) = reading.heat_index_c {
        info!(
            "Temp: {:.1}°C | Humidity: {:.1}% | Heat Index: {:.1}°C",
            reading.temperature_c, reading.humidity_pct, heat_index_c
        );
    }
}
