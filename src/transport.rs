use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use tokio_vxi11::DeviceClient;
use tracing::debug;

use crate::error::{Error, Result};

const MAX_READ: u32 = 4096;

/// Highest primary address allowed on a GPIB bus.
pub const GPIB_MAX_ADDRESS: u8 = 30;

/// Primary address of an instrument on GPIB board 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GpibAddress(u8);

impl GpibAddress {
    pub fn new(primary: u8) -> Result<Self> {
        if primary <= GPIB_MAX_ADDRESS {
            Ok(Self(primary))
        } else {
            Err(Error::Configuration(format!(
                "GPIB address must be 0..={GPIB_MAX_ADDRESS}, got {primary}"
            )))
        }
    }

    pub fn primary(self) -> u8 {
        self.0
    }

    /// VISA resource string with the board made explicit, e.g.
    /// `GPIB0::26::INSTR` (equivalent to `GPIB::26::INSTR`).
    pub fn visa_resource(self) -> String {
        format!("GPIB0::{}::INSTR", self.0)
    }

    /// Device name a VXI-11 LAN/GPIB gateway exposes for this address.
    pub fn vxi11_device(self) -> String {
        format!("gpib0,{}", self.0)
    }
}

impl fmt::Display for GpibAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.visa_resource())
    }
}

impl FromStr for GpibAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let primary = s
            .trim()
            .parse::<u8>()
            .map_err(|e| Error::Configuration(format!("invalid GPIB address {s:?}: {e}")))?;
        Self::new(primary)
    }
}

/// An open session to one instrument.
#[async_trait]
pub trait Transport: Send {
    /// Send a command, no reply expected.
    async fn write(&mut self, command: &str) -> Result<()>;

    /// Send a command and return the raw textual reply.
    async fn query(&mut self, command: &str) -> Result<String>;

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Opens transport sessions by bus address.
#[async_trait]
pub trait Connector: Send + Sync {
    type Session: Transport;

    async fn open(&self, address: GpibAddress) -> Result<Self::Session>;
}

/// GPIB instruments reached through a VXI-11 LAN/GPIB gateway.
#[derive(Debug, Clone)]
pub struct Vxi11Gateway {
    pub host: String,
    pub connect_timeout: Option<Duration>,
}

impl Vxi11Gateway {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            connect_timeout: Some(Duration::from_secs(5)),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[async_trait]
impl Connector for Vxi11Gateway {
    type Session = Vxi11Session;

    async fn open(&self, address: GpibAddress) -> Result<Vxi11Session> {
        let device = address.vxi11_device();
        debug!("VXI-11 connect -> {}:{}", self.host, device);
        let connected = match self.connect_timeout {
            Some(timeout) => DeviceClient::connect_with_timeout(&self.host, &device, timeout).await,
            None => DeviceClient::connect(&self.host, &device).await,
        };
        let inner = connected.map_err(|e| Error::Connection {
            resource: format!("{}:{}", self.host, device),
            source: e.into(),
        })?;
        Ok(Vxi11Session { inner })
    }
}

/// Strip NUL padding and whitespace from a raw reply. Empty replies are
/// errors.
fn decode_reply(command: &str, resp: Vec<u8>) -> Result<String> {
    let raw = String::from_utf8(resp).map_err(|e| Error::communication(command, e))?;
    let trimmed = raw.trim_matches(char::from(0)).trim().to_string();

    debug!("VXI-11 result <- {trimmed}");

    if trimmed.is_empty() {
        return Err(Error::communication(command, "empty response from device"));
    }

    Ok(trimmed)
}

pub struct Vxi11Session {
    inner: DeviceClient,
}

#[async_trait]
impl Transport for Vxi11Session {
    async fn write(&mut self, command: &str) -> Result<()> {
        let line = format!("{command}\n");
        self.inner
            .write(line.as_bytes())
            .await
            .map_err(|e| Error::communication(command, e))?;
        Ok(())
    }

    async fn query(&mut self, command: &str) -> Result<String> {
        self.write(command).await?;
        let resp = self
            .inner
            .read(MAX_READ)
            .await
            .map_err(|e| Error::communication(command, e))?;
        decode_reply(command, resp)
    }

    async fn close(&mut self) -> Result<()> {
        self.inner
            .close()
            .await
            .map_err(|e| Error::communication("close", e))?;
        Ok(())
    }
}
