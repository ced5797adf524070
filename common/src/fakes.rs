//! In-memory collaborators that record every call into a shared journal.

use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    rc::Rc,
    time::Duration,
};

use crate::{
    climate::{ClimateSensor, SensorDetails},
    error::ClimateError,
    ports::{Clock, CloudSink, NetworkLink, PowerPlatform, SmartHomeSink},
    sinks::TopicPublisher,
    types::{SensorType, WakeCause},
};

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    SensorInit,
    SensorRead,
    NetworkConnect,
    NetworkCheck,
    NetworkDisconnect,
    SmartHomeBegin(String),
    SmartHomePoll,
    SmartHomeUpdate(f32, f32),
    CloudBegin,
    CloudRun,
    CloudReading(f32, f32, f32),
    CloudStatus(bool),
    WakeCauseRead,
    Flush,
    DeepSleep(Duration),
}

#[derive(Debug, Clone, Default)]
pub struct Journal(Rc<RefCell<Vec<Event>>>);

impl Journal {
    pub fn record(&self, event: Event) {
        self.0.borrow_mut().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.borrow().clone()
    }

    pub fn count(&self, matches: impl Fn(&Event) -> bool) -> usize {
        self.0.borrow().iter().filter(|event| matches(event)).count()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeClock {
    now_ms: Rc<Cell<u64>>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, ms: u64) {
        self.now_ms.set(self.now_ms.get() + ms);
    }
}

impl Clock for FakeClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.get()
    }

    fn delay_ms(&self, ms: u64) {
        self.advance(ms);
    }
}

pub struct FakeSensor {
    journal: Journal,
    init_ok: bool,
    samples: VecDeque<(f32, f32)>,
    current: (f32, f32),
}

impl FakeSensor {
    pub fn new(journal: &Journal) -> Self {
        Self {
            journal: journal.clone(),
            init_ok: true,
            samples: VecDeque::new(),
            current: (21.5, 45.0),
        }
    }

    pub fn failing_init(mut self) -> Self {
        self.init_ok = false;
        self
    }

    pub fn with_samples(mut self, samples: &[(f32, f32)]) -> Self {
        self.samples.extend(samples.iter().copied());
        self
    }
}

impl ClimateSensor for FakeSensor {
    fn initialize(&mut self) -> Result<(), ClimateError> {
        self.journal.record(Event::SensorInit);
        if self.init_ok {
            Ok(())
        } else {
            Err(ClimateError::SensorInit("no response".to_string()))
        }
    }

    fn read_temperature(&mut self) -> Result<f32, ClimateError> {
        self.journal.record(Event::SensorRead);
        if let Some(next) = self.samples.pop_front() {
            self.current = next;
        }
        Ok(self.current.0)
    }

    fn read_humidity(&mut self) -> Result<f32, ClimateError> {
        Ok(self.current.1)
    }

    fn describe(&self) -> SensorDetails {
        SensorType::Dht22.details("fake")
    }

    fn name(&self) -> &'static str {
        "DHT22"
    }
}

#[derive(Clone)]
pub struct FakeNetwork {
    journal: Journal,
    reachable: Rc<Cell<bool>>,
    connected: Rc<Cell<bool>>,
}

impl FakeNetwork {
    pub fn new(journal: &Journal, reachable: bool) -> Self {
        Self {
            journal: journal.clone(),
            reachable: Rc::new(Cell::new(reachable)),
            connected: Rc::new(Cell::new(false)),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.reachable.set(connected);
        self.connected.set(connected);
    }
}

impl NetworkLink for FakeNetwork {
    fn connect(&mut self) {
        self.journal.record(Event::NetworkConnect);
        self.connected.set(self.reachable.get());
    }

    fn is_connected(&self) -> bool {
        self.connected.get()
    }

    fn check_status(&mut self) {
        self.journal.record(Event::NetworkCheck);
        if !self.connected.get() {
            self.connected.set(self.reachable.get());
        }
    }

    fn disconnect(&mut self) {
        self.journal.record(Event::NetworkDisconnect);
        self.connected.set(false);
    }
}

pub struct FakeSmartHome {
    journal: Journal,
    begin_ok: bool,
}

impl FakeSmartHome {
    pub fn new(journal: &Journal, begin_ok: bool) -> Self {
        Self {
            journal: journal.clone(),
            begin_ok,
        }
    }
}

impl SmartHomeSink for FakeSmartHome {
    fn begin(&mut self, device_name: &str) -> bool {
        self.journal
            .record(Event::SmartHomeBegin(device_name.to_string()));
        self.begin_ok
    }

    fn poll(&mut self) {
        self.journal.record(Event::SmartHomePoll);
    }

    fn update_reading(
        &mut self,
        temperature_c: f32,
        humidity_pct: f32,
    ) -> Result<(), ClimateError> {
        self.journal
            .record(Event::SmartHomeUpdate(temperature_c, humidity_pct));
        Ok(())
    }
}

pub struct FakeCloud {
    journal: Journal,
    begin_ok: bool,
    connected: bool,
}

impl FakeCloud {
    pub fn new(journal: &Journal, begin_ok: bool) -> Self {
        Self {
            journal: journal.clone(),
            begin_ok,
            connected: false,
        }
    }
}

impl CloudSink for FakeCloud {
    fn begin(&mut self) -> bool {
        self.journal.record(Event::CloudBegin);
        self.connected = self.begin_ok;
        self.begin_ok
    }

    fn run(&mut self) {
        self.journal.record(Event::CloudRun);
    }

    fn send_reading(
        &mut self,
        temperature_c: f32,
        humidity_pct: f32,
        heat_index_c: f32,
    ) -> Result<(), ClimateError> {
        self.journal.record(Event::CloudReading(
            temperature_c,
            humidity_pct,
            heat_index_c,
        ));
        Ok(())
    }

    fn send_status(&mut self, _sensor_name: &str, online: bool) -> Result<(), ClimateError> {
        self.journal.record(Event::CloudStatus(online));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

pub struct FakePower {
    journal: Journal,
    wake_cause: WakeCause,
}

impl FakePower {
    pub fn new(journal: &Journal, wake_cause: WakeCause) -> Self {
        Self {
            journal: journal.clone(),
            wake_cause,
        }
    }
}

impl PowerPlatform for FakePower {
    fn wake_cause(&self) -> WakeCause {
        self.journal.record(Event::WakeCauseRead);
        self.wake_cause
    }

    fn flush(&mut self) {
        self.journal.record(Event::Flush);
    }

    fn free_heap_bytes(&self) -> Option<u32> {
        Some(123_456)
    }

    fn deep_sleep(&mut self, duration: Duration) {
        self.journal.record(Event::DeepSleep(duration));
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

#[derive(Clone, Default)]
pub struct FakePublisher {
    open_ok: bool,
    connected: Rc<Cell<bool>>,
    opened: Rc<Cell<u32>>,
    published: Rc<RefCell<Vec<Published>>>,
}

impl FakePublisher {
    pub fn new(open_ok: bool) -> Self {
        Self {
            open_ok,
            ..Self::default()
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.set(connected);
    }

    pub fn open_count(&self) -> u32 {
        self.opened.get()
    }

    pub fn published(&self) -> Vec<Published> {
        self.published.borrow().clone()
    }
}

impl TopicPublisher for FakePublisher {
    fn open(&mut self) -> Result<(), ClimateError> {
        self.opened.set(self.opened.get() + 1);
        self.connected.set(self.open_ok);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.get()
    }

    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), ClimateError> {
        if !self.connected.get() {
            return Err(ClimateError::sink("fake", "not connected"));
        }
        self.published.borrow_mut().push(Published {
            topic: topic.to_string(),
            payload: String::from_utf8_lossy(payload).into_owned(),
            retain,
        });
        Ok(())
    }

    fn close(&mut self) {
        self.connected.set(false);
    }
}
