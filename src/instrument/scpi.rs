//! SCPI-dialect driver: the channel is chosen per call and output switching
//! is fire-and-forget.

use async_trait::async_trait;
use tracing::{debug, info};

use super::{SourceMeter, Slot, query_f64, query_idn};
use crate::error::Result;
use crate::transport::{Connector, GpibAddress, Transport};

pub struct Keithley260xScpi<T: Transport> {
    address: GpibAddress,
    session: T,
}

impl<T: Transport> Keithley260xScpi<T> {
    /// Open a session at `address` and read the identification string.
    pub async fn connect<C>(connector: &C, address: GpibAddress) -> Result<Self>
    where
        C: Connector<Session = T>,
    {
        let mut session = connector.open(address).await?;
        let idn = query_idn(&mut session).await?;
        info!(%address, %idn, "connected (SCPI)");
        Ok(Self { address, session })
    }

    /// Wrap an already open session without talking to the device.
    pub fn from_session(address: GpibAddress, session: T) -> Self {
        Self { address, session }
    }

    pub fn address(&self) -> GpibAddress {
        self.address
    }

    pub async fn close(mut self) -> Result<()> {
        debug!(address = %self.address, "closing session");
        self.session.close().await
    }

    pub async fn identify(&mut self) -> Result<String> {
        debug!("SCPI query  -> *IDN?");
        query_idn(&mut self.session).await
    }

    /// Program `SOUR{n}:VOLT`. The channel is a [`Slot`], so only `SOUR1`
    /// and `SOUR2` can be addressed.
    pub async fn set_voltage(&mut self, slot: Slot, volts: f64) -> Result<()> {
        self.write(&format!("SOUR{}:VOLT {}", slot.number(), volts))
            .await
    }

    /// Read back `SOUR{n}:VOLT?` for `SOUR1` or `SOUR2`.
    pub async fn get_voltage(&mut self, slot: Slot) -> Result<f64> {
        let command = format!("SOUR{}:VOLT?", slot.number());
        debug!("SCPI query  -> {command}");
        let volts = query_f64(&mut self.session, &command).await?;
        debug!("SCPI result <- {volts}");
        Ok(volts)
    }

    /// Switch the outputs on. The device is not polled for completion.
    pub async fn enable_sources(&mut self) -> Result<()> {
        self.write("OUTP ON").await
    }

    pub async fn disable_sources(&mut self) -> Result<()> {
        self.write("OUTP OFF").await
    }

    /// View of one channel that implements [`SourceMeter`].
    pub fn channel(&mut self, slot: Slot) -> ScpiChannel<'_, T> {
        ScpiChannel { driver: self, slot }
    }

    async fn write(&mut self, command: &str) -> Result<()> {
        debug!("SCPI write  -> {command}");
        self.session.write(command).await
    }
}

/// One channel of a [`Keithley260xScpi`], borrowed for the shared
/// [`SourceMeter`] interface.
pub struct ScpiChannel<'a, T: Transport> {
    driver: &'a mut Keithley260xScpi<T>,
    slot: Slot,
}

impl<T: Transport> ScpiChannel<'_, T> {
    pub fn slot(&self) -> Slot {
        self.slot
    }
}

#[async_trait]
impl<'a, T: Transport> SourceMeter for ScpiChannel<'a, T> {
    async fn identify(&mut self) -> Result<String> {
        self.driver.identify().await
    }

    async fn enable_sources(&mut self) -> Result<()> {
        self.driver.enable_sources().await
    }

    async fn disable_sources(&mut self) -> Result<()> {
        self.driver.disable_sources().await
    }

    async fn set_voltage(&mut self, volts: f64) -> Result<()> {
        self.driver.set_voltage(self.slot, volts).await
    }

    async fn get_voltage(&mut self) -> Result<f64> {
        self.driver.get_voltage(self.slot).await
    }
}
