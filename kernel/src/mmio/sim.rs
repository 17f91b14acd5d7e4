//! Register bus of the simulated SoC.
//!
//! Registers hold the last value written (or poked) and read back as zero
//! until then. A register can additionally be given a script of values that
//! successive reads consume before falling back to the latched value, which
//! is how status registers such as the controller's pending flag are driven.
//!
//! Every access is appended to an ordered event log, barriers included, so
//! callers can check both the values written and their ordering. The log
//! keeps the most recent [`EVENT_LOG_CAPACITY`] events and can be switched
//! off with [`SimBus::set_recording`] for long-running simulations.

use alloc::{
    collections::{BTreeMap, VecDeque},
    vec::Vec,
};

use spin::Mutex;

use super::RegisterBus;
use crate::arch::barriers::data_sync_barrier;

/// One access observed on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusEvent {
    Read { addr: usize, value: u32 },
    Write { addr: usize, value: u32 },
    Barrier,
}

/// Events retained by the access log; older ones are discarded.
pub const EVENT_LOG_CAPACITY: usize = 4096;

struct SimState {
    latched: BTreeMap<usize, u32>,
    scripted: BTreeMap<usize, VecDeque<u32>>,
    events: VecDeque<BusEvent>,
    recording: bool,
}

impl SimState {
    fn record(&mut self, event: BusEvent) {
        if !self.recording {
            return;
        }
        if self.events.len() == EVENT_LOG_CAPACITY {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }
}

/// Memory-backed register file with scripted reads and an access log.
pub struct SimBus {
    state: Mutex<SimState>,
}

impl SimBus {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                latched: BTreeMap::new(),
                scripted: BTreeMap::new(),
                events: VecDeque::new(),
                recording: true,
            }),
        }
    }

    /// Turn the access log on or off. Register contents are unaffected.
    pub fn set_recording(&self, on: bool) {
        self.state.lock().recording = on;
    }

    /// Set the latched value of a register without logging an access.
    pub fn poke(&self, addr: usize, value: u32) {
        self.state.lock().latched.insert(addr, value);
    }

    /// Queue values returned by the next reads of `addr`.
    pub fn script_reads(&self, addr: usize, values: &[u32]) {
        self.state
            .lock()
            .scripted
            .entry(addr)
            .or_default()
            .extend(values.iter().copied());
    }

    /// Every logged access, oldest first.
    pub fn events(&self) -> Vec<BusEvent> {
        self.state.lock().events.iter().copied().collect()
    }

    pub fn clear_events(&self) {
        self.state.lock().events.clear();
    }

    /// All writes so far as `(addr, value)` pairs, oldest first.
    pub fn writes(&self) -> Vec<(usize, u32)> {
        self.state
            .lock()
            .events
            .iter()
            .filter_map(|event| match *event {
                BusEvent::Write { addr, value } => Some((addr, value)),
                _ => None,
            })
            .collect()
    }

    /// Values written to one register, oldest first.
    pub fn writes_to(&self, addr: usize) -> Vec<u32> {
        self.writes()
            .into_iter()
            .filter(|&(a, _)| a == addr)
            .map(|(_, value)| value)
            .collect()
    }

    /// Number of reads of one register.
    pub fn reads_of(&self, addr: usize) -> usize {
        self.state
            .lock()
            .events
            .iter()
            .filter(|event| matches!(event, BusEvent::Read { addr: a, .. } if *a == addr))
            .count()
    }
}

impl Default for SimBus {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterBus for SimBus {
    fn read32(&self, addr: usize) -> u32 {
        let mut state = self.state.lock();
        let scripted = state.scripted.get_mut(&addr).and_then(VecDeque::pop_front);
        let value = scripted.unwrap_or_else(|| state.latched.get(&addr).copied().unwrap_or(0));
        state.record(BusEvent::Read { addr, value });
        value
    }

    fn write32(&self, addr: usize, value: u32) {
        let mut state = self.state.lock();
        state.latched.insert(addr, value);
        state.record(BusEvent::Write { addr, value });
    }

    fn barrier(&self) {
        self.state.lock().record(BusEvent::Barrier);
        data_sync_barrier();
    }
}
