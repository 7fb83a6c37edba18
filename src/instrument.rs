use async_trait::async_trait;
use clap::ValueEnum;

use crate::error::{Error, Result};
use crate::transport::Transport;

pub mod scpi;
pub mod tsp;

pub use scpi::{Keithley260xScpi, ScpiChannel};
pub use tsp::Keithley260xTsp;

/// Output channel of a two-channel 260X.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq, Hash)]
pub enum Slot {
    #[value(name = "a")]
    A,
    #[value(name = "b")]
    B,
}

impl Slot {
    /// Resolve the front-panel channel number (1 or 2).
    pub fn from_selector(selector: u8) -> Result<Self> {
        match selector {
            1 => Ok(Slot::A),
            2 => Ok(Slot::B),
            other => Err(Error::Configuration(format!(
                "channel selector must be 1 or 2, got {other}"
            ))),
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "a" => Some(Slot::A),
            "b" => Some(Slot::B),
            _ => None,
        }
    }

    /// Suffix of the TSP `smuX` object for this channel.
    pub fn label(self) -> &'static str {
        match self {
            Slot::A => "a",
            Slot::B => "b",
        }
    }

    /// Channel number used in SCPI headers such as `SOUR1`.
    pub fn number(self) -> u8 {
        match self {
            Slot::A => 1,
            Slot::B => 2,
        }
    }

    pub(crate) fn index(self) -> usize {
        usize::from(self.number() - 1)
    }
}

impl TryFrom<u8> for Slot {
    type Error = Error;

    fn try_from(selector: u8) -> Result<Self> {
        Slot::from_selector(selector)
    }
}

/// Command dialect spoken to the instrument.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum Dialect {
    Scpi,
    Tsp,
}

/// Whether a state-changing call waits for `*OPC?` to report idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Completion {
    #[default]
    Wait,
    NoWait,
}

impl Completion {
    pub fn from_wait(wait: bool) -> Self {
        if wait { Completion::Wait } else { Completion::NoWait }
    }
}

/// What every Keithley 260X driver in this crate can do, whatever the
/// command dialect.
#[async_trait]
pub trait SourceMeter: Send {
    async fn identify(&mut self) -> Result<String>;
    async fn enable_sources(&mut self) -> Result<()>;
    async fn disable_sources(&mut self) -> Result<()>;
    async fn set_voltage(&mut self, volts: f64) -> Result<()>;
    async fn get_voltage(&mut self) -> Result<f64>;
}

/// `*IDN?` with surrounding whitespace removed.
pub(crate) async fn query_idn<T>(session: &mut T) -> Result<String>
where
    T: Transport + ?Sized,
{
    let idn = session.query("*IDN?").await?;
    Ok(idn.trim().to_string())
}

/// Send `command` and parse the reply as a float.
pub(crate) async fn query_f64<T>(session: &mut T, command: &str) -> Result<f64>
where
    T: Transport + ?Sized,
{
    let reply = session.query(command).await?;
    reply
        .trim()
        .parse::<f64>()
        .map_err(|e| Error::parse(command, &reply, e))
}
