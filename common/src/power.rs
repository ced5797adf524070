use std::time::Duration;

use log::{debug, info};

use crate::{
    config::DutyCycleConfig,
    ports::{Clock, NetworkLink, PowerPlatform},
    types::{BootKind, WakeCause},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerStats {
    pub wake_time_ms: u64,
    pub operation_time_ms: u64,
    pub free_heap_bytes: Option<u32>,
}

/// Nothing here survives deep sleep; each boot is classified from the
/// wake cause alone.
#[derive(Debug, Clone)]
pub struct DutyCycleController {
    config: DutyCycleConfig,
    wake_cause: WakeCause,
    boot_kind: BootKind,
    wakeup_ms: u64,
    operation_start_ms: u64,
    suspend_requested: bool,
}

impl DutyCycleController {
    pub fn new(config: DutyCycleConfig, wake_cause: WakeCause, now_ms: u64) -> Self {
        let mut controller = Self::classified(wake_cause, now_ms);
        controller.apply_config(config);
        controller
    }

    /// Classifies the boot from the platform's wake cause. Must run before
    /// any other collaborator is set up, config loading included; the
    /// controller stays inert until [`apply_config`](Self::apply_config).
    pub fn from_platform(power: &dyn PowerPlatform, clock: &dyn Clock) -> Self {
        Self::classified(power.wake_cause(), clock.now_ms())
    }

    fn classified(wake_cause: WakeCause, now_ms: u64) -> Self {
        let boot_kind = Self::classify_boot(wake_cause);
        info!("boot: {} ({})", boot_kind.as_str(), wake_cause.description());

        Self {
            config: DutyCycleConfig::default(),
            wake_cause,
            boot_kind,
            wakeup_ms: now_ms,
            operation_start_ms: now_ms,
            suspend_requested: false,
        }
    }

    pub fn apply_config(&mut self, config: DutyCycleConfig) {
        if config.enabled {
            info!(
                "power manager ready: wake-up reason `{}`, deep sleep {}s, operation timeout {}s",
                self.wake_cause.description(),
                config.duration_s,
                config.operation_timeout_s
            );
        } else {
            info!("power manager ready: deep sleep disabled");
        }
        self.config = config;
    }

    pub fn classify_boot(cause: WakeCause) -> BootKind {
        if cause.is_scheduled_wake() {
            BootKind::ResumeFromSuspend
        } else {
            BootKind::ColdStart
        }
    }

    pub fn boot_kind(&self) -> BootKind {
        self.boot_kind
    }

    pub fn wake_cause(&self) -> WakeCause {
        self.wake_cause
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn suspend_duration(&self) -> Duration {
        Duration::from_secs(self.config.duration_s)
    }

    pub fn reset_operation_timer(&mut self, now_ms: u64) {
        self.operation_start_ms = now_ms;
        self.suspend_requested = false;
    }

    pub fn operation_time_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.operation_start_ms)
    }

    pub fn is_operation_timeout_reached(&self, now_ms: u64) -> bool {
        self.config.enabled
            && self.operation_time_ms(now_ms) >= self.config.operation_timeout_ms()
    }

    pub fn schedule_suspend(&mut self) {
        if !self.config.enabled || self.suspend_requested {
            return;
        }
        self.suspend_requested = true;
        info!("deep sleep scheduled after current operations");
    }

    pub fn cancel_suspend(&mut self) {
        if self.suspend_requested {
            info!("deep sleep cancelled");
        }
        self.suspend_requested = false;
    }

    pub fn is_suspend_requested(&self) -> bool {
        self.suspend_requested
    }

    pub fn should_suspend_now(&self, now_ms: u64) -> bool {
        self.config.enabled
            && (self.suspend_requested || self.is_operation_timeout_reached(now_ms))
    }

    pub fn power_stats(&self, now_ms: u64, power: &dyn PowerPlatform) -> PowerStats {
        PowerStats {
            wake_time_ms: now_ms.saturating_sub(self.wakeup_ms),
            operation_time_ms: self.operation_time_ms(now_ms),
            free_heap_bytes: power.free_heap_bytes(),
        }
    }

    /// Ends the session: releases the network, flushes output and sleeps.
    ///
    /// Returns `false` without touching anything when duty cycling is
    /// disabled.
    pub fn enter_suspend(
        &mut self,
        now_ms: u64,
        network: &mut dyn NetworkLink,
        power: &mut dyn PowerPlatform,
    ) -> bool {
        if !self.config.enabled {
            info!("deep sleep disabled in config");
            return false;
        }

        let stats = self.power_stats(now_ms, power);
        info!(
            "entering deep sleep for {}s (awake {} ms, operating {} ms)",
            self.config.duration_s, stats.wake_time_ms, stats.operation_time_ms
        );
        if let Some(free_heap) = stats.free_heap_bytes {
            debug!("free heap: {free_heap} bytes");
        }

        network.disconnect();
        power.flush();
        power.deep_sleep(self.suspend_duration());
        true
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::fakes::{Event, FakeClock, FakeNetwork, FakePower, Journal};

    fn enabled() -> DutyCycleConfig {
        DutyCycleConfig {
            enabled: true,
            duration_s: 300,
            operation_timeout_s: 30,
        }
    }

    #[test]
    fn classifies_timer_wake_as_resume() {
        assert_eq!(
            DutyCycleController::classify_boot(WakeCause::Timer),
            BootKind::ResumeFromSuspend
        );
        assert_eq!(
            DutyCycleController::classify_boot(WakeCause::Reset),
            BootKind::ColdStart
        );

        let controller = DutyCycleController::new(enabled(), WakeCause::Touchpad, 0);
        assert_eq!(controller.boot_kind(), BootKind::ResumeFromSuspend);
    }

    #[test]
    fn from_platform_reads_wake_cause_once() {
        let journal = Journal::default();
        let power = FakePower::new(&journal, WakeCause::Timer);
        let clock = FakeClock::new();
        clock.advance(750);

        let mut controller = DutyCycleController::from_platform(&power, &clock);

        assert_eq!(controller.boot_kind(), BootKind::ResumeFromSuspend);
        assert_eq!(controller.wake_cause(), WakeCause::Timer);
        assert_eq!(journal.events(), vec![Event::WakeCauseRead]);
        controller.schedule_suspend();
        assert!(!controller.should_suspend_now(u64::MAX));

        controller.apply_config(enabled());
        assert_eq!(controller.boot_kind(), BootKind::ResumeFromSuspend);
        assert!(controller.is_operation_timeout_reached(30_750));
        assert_eq!(journal.events(), vec![Event::WakeCauseRead]);
        assert_eq!(controller.power_stats(1_750, &power).wake_time_ms, 1_000);
    }

    #[test]
    fn timeout_is_monotonic_until_reset() {
        let mut controller = DutyCycleController::new(enabled(), WakeCause::Reset, 0);
        controller.reset_operation_timer(5_000);

        assert!(!controller.is_operation_timeout_reached(5_000));
        assert!(!controller.is_operation_timeout_reached(34_999));
        assert!(controller.is_operation_timeout_reached(35_000));
        assert!(controller.is_operation_timeout_reached(90_000));

        controller.reset_operation_timer(90_000);
        assert!(!controller.is_operation_timeout_reached(90_000));
    }

    #[test]
    fn schedule_suspend_is_idempotent() {
        let mut controller = DutyCycleController::new(enabled(), WakeCause::Reset, 0);

        controller.schedule_suspend();
        let once = controller.clone();
        controller.schedule_suspend();

        assert!(controller.is_suspend_requested());
        assert_eq!(
            controller.should_suspend_now(1),
            once.should_suspend_now(1)
        );
        assert!(controller.should_suspend_now(1));
    }

    #[test]
    fn cancel_and_reset_clear_the_request() {
        let mut controller = DutyCycleController::new(enabled(), WakeCause::Reset, 0);

        controller.schedule_suspend();
        controller.cancel_suspend();
        assert!(!controller.should_suspend_now(1_000));

        controller.schedule_suspend();
        controller.reset_operation_timer(2_000);
        assert!(!controller.should_suspend_now(2_000));
    }

    #[test]
    fn disabled_controller_never_suspends() {
        let config = DutyCycleConfig {
            enabled: false,
            ..enabled()
        };
        let mut controller = DutyCycleController::new(config, WakeCause::Timer, 0);

        controller.schedule_suspend();

        assert!(!controller.is_suspend_requested());
        assert!(!controller.is_operation_timeout_reached(u64::MAX));
        assert!(!controller.should_suspend_now(u64::MAX));
    }

    #[test]
    fn enter_suspend_releases_network_before_sleeping() {
        let journal = Journal::default();
        let mut network = FakeNetwork::new(&journal, true);
        let mut power = FakePower::new(&journal, WakeCause::Reset);
        let mut controller = DutyCycleController::new(enabled(), WakeCause::Reset, 0);

        assert!(controller.enter_suspend(10_000, &mut network, &mut power));

        assert_eq!(
            journal.events(),
            vec![
                Event::NetworkDisconnect,
                Event::Flush,
                Event::DeepSleep(Duration::from_secs(300)),
            ]
        );
    }

    #[test]
    fn enter_suspend_is_inert_when_disabled() {
        let journal = Journal::default();
        let mut network = FakeNetwork::new(&journal, true);
        let mut power = FakePower::new(&journal, WakeCause::Reset);
        let config = DutyCycleConfig {
            enabled: false,
            ..enabled()
        };
        let mut controller = DutyCycleController::new(config, WakeCause::Reset, 0);

        assert!(!controller.enter_suspend(10_000, &mut network, &mut power));
        assert!(journal.events().is_empty());
    }

    #[test]
    fn power_stats_measure_from_wakeup_and_reset() {
        let journal = Journal::default();
        let power = FakePower::new(&journal, WakeCause::Reset);
        let mut controller = DutyCycleController::new(enabled(), WakeCause::Reset, 1_000);
        controller.reset_operation_timer(4_000);

        let stats = controller.power_stats(9_000, &power);

        assert_eq!(stats.wake_time_ms, 8_000);
        assert_eq!(stats.operation_time_ms, 5_000);
        assert_eq!(stats.free_heap_bytes, Some(123_456));
    }
}
