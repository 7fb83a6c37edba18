//! In-process stand-in for a 2602 on the bus.
//!
//! [`SimulatedSmu`] speaks enough of both command dialects for the drivers in
//! this crate: it stores one voltage level and one output state per slot and
//! echoes levels back on readback. After every state-changing write it can
//! report itself busy for a configurable number of `*OPC?` polls. All clones
//! share one device, so a test can keep a handle for inspection after the
//! driver has taken ownership of the session.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::instrument::Slot;
use crate::transport::{Connector, GpibAddress, Transport};

pub const DEFAULT_IDN: &str = "Keithley Instruments Inc., Model 2602A, 1234567, 2.2.6\n";

#[derive(Debug)]
struct Device {
    idn: String,
    levels: [f64; 2],
    dc_volts: [bool; 2],
    outputs: [bool; 2],
    busy_after_write: u32,
    pending_busy: u32,
    overrides: HashMap<String, String>,
    fail_next: bool,
    fail_on: HashSet<String>,
    log: Vec<String>,
}

impl Default for Device {
    fn default() -> Self {
        Self {
            idn: DEFAULT_IDN.to_string(),
            levels: [0.0; 2],
            dc_volts: [false; 2],
            outputs: [false; 2],
            busy_after_write: 0,
            pending_busy: 0,
            overrides: HashMap::new(),
            fail_next: false,
            fail_on: HashSet::new(),
            log: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SimulatedSmu {
    device: Arc<Mutex<Device>>,
}

impl SimulatedSmu {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_idn(self, idn: impl Into<String>) -> Self {
        self.lock().idn = idn.into();
        self
    }

    /// Number of busy `*OPC?` replies following each state-changing write.
    pub fn with_busy_polls(self, polls: u32) -> Self {
        self.lock().busy_after_write = polls;
        self
    }

    /// Report busy for the next `polls` status queries, starting now.
    pub fn force_busy(&self, polls: u32) {
        self.lock().pending_busy = polls;
    }

    /// Answer `command` with `reply` verbatim from now on.
    pub fn set_reply(&self, command: &str, reply: &str) {
        self.lock()
            .overrides
            .insert(command.to_string(), reply.to_string());
    }

    /// Make the next write or query fail at the transport layer.
    pub fn fail_next(&self) {
        self.lock().fail_next = true;
    }

    /// Fail the next time exactly `command` is sent.
    pub fn fail_on(&self, command: &str) {
        self.lock().fail_on.insert(command.to_string());
    }

    /// Every command received so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.lock().log.clone()
    }

    pub fn count_of(&self, command: &str) -> usize {
        self.lock().log.iter().filter(|c| c.as_str() == command).count()
    }

    pub fn clear_log(&self) {
        self.lock().log.clear();
    }

    pub fn level(&self, slot: Slot) -> f64 {
        self.lock().levels[slot.index()]
    }

    pub fn output_on(&self, slot: Slot) -> bool {
        self.lock().outputs[slot.index()]
    }

    pub fn sourcing_dc_volts(&self, slot: Slot) -> bool {
        self.lock().dc_volts[slot.index()]
    }

    fn lock(&self) -> MutexGuard<'_, Device> {
        self.device.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Device {
    fn receive(&mut self, command: &str) -> Result<()> {
        self.log.push(command.to_string());
        if std::mem::take(&mut self.fail_next) || self.fail_on.remove(command) {
            return Err(Error::communication(command, "simulated bus failure"));
        }
        Ok(())
    }

    fn apply(&mut self, command: &str) {
        let handled = if let Some((slot, level)) = parse_scpi_level(command) {
            self.levels[slot.index()] = level;
            true
        } else if command == "OUTP ON" || command == "OUTP OFF" {
            self.outputs = [command == "OUTP ON"; 2];
            true
        } else if let Some((slot, attr, value)) = parse_tsp_assignment(command) {
            self.apply_tsp(slot, attr, value)
        } else {
            false
        };

        if handled {
            self.pending_busy = self.busy_after_write;
        } else {
            warn!("simulated SMU ignoring unknown command {command:?}");
        }
    }

    fn apply_tsp(&mut self, slot: Slot, attr: &str, value: &str) -> bool {
        let constant = |name: &str| format!("smu{}.{}", slot.label(), name);
        match attr {
            "source.func" if value == constant("OUTPUT_DCVOLTS") => {
                self.dc_volts[slot.index()] = true;
                true
            }
            "source.levelv" => match value.parse::<f64>() {
                Ok(level) => {
                    self.levels[slot.index()] = level;
                    true
                }
                Err(_) => false,
            },
            "source.output" if value == constant("OUTPUT_ON") => {
                self.outputs[slot.index()] = true;
                true
            }
            "source.output" if value == constant("OUTPUT_OFF") => {
                self.outputs[slot.index()] = false;
                true
            }
            _ => false,
        }
    }

    fn answer(&mut self, command: &str) -> Result<String> {
        if let Some(reply) = self.overrides.get(command) {
            return Ok(reply.clone());
        }
        if command == "*IDN?" {
            return Ok(self.idn.clone());
        }
        if command == "*OPC?" {
            let busy = self.pending_busy > 0;
            self.pending_busy = self.pending_busy.saturating_sub(1);
            return Ok(if busy { "0" } else { "1" }.to_string());
        }
        let slot = command
            .strip_prefix("SOUR")
            .and_then(|rest| rest.strip_suffix(":VOLT?"))
            .and_then(|n| n.parse::<u8>().ok())
            .and_then(|n| Slot::from_selector(n).ok())
            .or_else(|| {
                command
                    .strip_suffix(".measure.v")
                    .and_then(|smu| smu.strip_prefix("smu"))
                    .and_then(Slot::from_label)
            });
        match slot {
            Some(slot) => Ok(format!("{:e}", self.levels[slot.index()])),
            None => Err(Error::communication(command, "no reply from simulated SMU")),
        }
    }
}

/// `SOUR{n}:VOLT {v}`
fn parse_scpi_level(command: &str) -> Option<(Slot, f64)> {
    let (head, value) = command.split_once(' ')?;
    let n = head.strip_prefix("SOUR")?.strip_suffix(":VOLT")?;
    let slot = Slot::from_selector(n.parse().ok()?).ok()?;
    Some((slot, value.parse().ok()?))
}

/// `smu{x}.{attr} = {value}`
fn parse_tsp_assignment(command: &str) -> Option<(Slot, &str, &str)> {
    let (lhs, rhs) = command.split_once(" = ")?;
    let (smu, attr) = lhs.strip_prefix("smu")?.split_once('.')?;
    Some((Slot::from_label(smu)?, attr, rhs))
}

#[async_trait]
impl Transport for SimulatedSmu {
    async fn write(&mut self, command: &str) -> Result<()> {
        let mut device = self.lock();
        device.receive(command)?;
        device.apply(command);
        Ok(())
    }

    async fn query(&mut self, command: &str) -> Result<String> {
        let mut device = self.lock();
        device.receive(command)?;
        device.answer(command)
    }
}

/// A GPIB bus populated with simulated instruments.
#[derive(Debug, Clone, Default)]
pub struct SimulatedBus {
    devices: Arc<Mutex<HashMap<GpibAddress, SimulatedSmu>>>,
    opened: Arc<Mutex<HashSet<GpibAddress>>>,
}

impl SimulatedBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(self, address: GpibAddress, smu: SimulatedSmu) -> Self {
        self.devices
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(address, smu);
        self
    }

    /// Whether a session was ever opened at `address`.
    pub fn was_opened(&self, address: GpibAddress) -> bool {
        self.opened
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(&address)
    }
}

#[async_trait]
impl Connector for SimulatedBus {
    type Session = SimulatedSmu;

    async fn open(&self, address: GpibAddress) -> Result<SimulatedSmu> {
        debug!("simulated connect -> {address}");
        let smu = self
            .devices
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&address)
            .cloned();
        let smu = smu.ok_or_else(|| Error::Connection {
            resource: address.visa_resource(),
            source: "no instrument listening at this address".into(),
        })?;
        self.opened
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(address);
        Ok(smu)
    }
}
