//! TSP-dialect driver bound to one `smuX` channel.
//!
//! Each state-changing command can be followed by an operation-complete
//! poll; see [`CompletionPoll`] for the bounds on that wait.

use async_trait::async_trait;
use tracing::{debug, info};

use super::{Completion, SourceMeter, Slot, query_f64, query_idn};
use crate::error::Result;
use crate::poll::{CompletionPoll, query_busy};
use crate::transport::{Connector, GpibAddress, Transport};

pub struct Keithley260xTsp<T: Transport> {
    address: GpibAddress,
    slot: Slot,
    poll: CompletionPoll,
    session: T,
}

impl<T: Transport> Keithley260xTsp<T> {
    /// Open a session at `address`, log the identification string and bind
    /// the driver to `slot`, polling with the default settings.
    pub async fn connect<C>(connector: &C, address: GpibAddress, slot: Slot) -> Result<Self>
    where
        C: Connector<Session = T>,
    {
        Self::connect_with_poll(connector, address, slot, CompletionPoll::default()).await
    }

    pub async fn connect_with_poll<C>(
        connector: &C,
        address: GpibAddress,
        slot: Slot,
        poll: CompletionPoll,
    ) -> Result<Self>
    where
        C: Connector<Session = T>,
    {
        poll.validate()?;
        let mut session = connector.open(address).await?;
        let idn = query_idn(&mut session).await?;
        info!(%address, %idn, slot = slot.label(), "connected (TSP)");
        Ok(Self {
            address,
            slot,
            poll,
            session,
        })
    }

    /// Like [`connect`](Self::connect) but takes the front-panel channel
    /// number. The selector is checked before the bus is touched.
    pub async fn connect_selector<C>(connector: &C, address: GpibAddress, selector: u8) -> Result<Self>
    where
        C: Connector<Session = T>,
    {
        let slot = Slot::from_selector(selector)?;
        Self::connect(connector, address, slot).await
    }

    /// Wrap an already open session without talking to the device.
    pub fn from_session(address: GpibAddress, slot: Slot, poll: CompletionPoll, session: T) -> Result<Self> {
        poll.validate()?;
        Ok(Self {
            address,
            slot,
            poll,
            session,
        })
    }

    pub fn address(&self) -> GpibAddress {
        self.address
    }

    pub fn slot(&self) -> Slot {
        self.slot
    }

    pub fn poll(&self) -> &CompletionPoll {
        &self.poll
    }

    pub async fn close(mut self) -> Result<()> {
        debug!(address = %self.address, "closing session");
        self.session.close().await
    }

    pub async fn identify(&mut self) -> Result<String> {
        debug!("TSP query   -> *IDN?");
        query_idn(&mut self.session).await
    }

    /// Select the DC-volts source function, then program the level.
    pub async fn set_voltage_with(&mut self, volts: f64, completion: Completion) -> Result<()> {
        let smu = self.smu();
        self.write(&format!("{smu}.source.func = {smu}.OUTPUT_DCVOLTS"), completion)
            .await?;
        self.write(&format!("{smu}.source.levelv = {volts}"), completion)
            .await
    }

    /// Live voltage measurement on the bound channel.
    pub async fn get_voltage(&mut self) -> Result<f64> {
        let command = format!("{}.measure.v", self.smu());
        debug!("TSP query   -> {command}");
        let volts = query_f64(&mut self.session, &command).await?;
        debug!("TSP result  <- {volts}");
        Ok(volts)
    }

    pub async fn enable_sources_with(&mut self, completion: Completion) -> Result<()> {
        let smu = self.smu();
        self.write(&format!("{smu}.source.output = {smu}.OUTPUT_ON"), completion)
            .await
    }

    pub async fn disable_sources_with(&mut self, completion: Completion) -> Result<()> {
        let smu = self.smu();
        self.write(&format!("{smu}.source.output = {smu}.OUTPUT_OFF"), completion)
            .await
    }

    /// `true` while the device reports an operation pending.
    pub async fn is_busy(&mut self) -> Result<bool> {
        let busy = query_busy(&mut self.session).await?;
        debug!(busy, "TSP busy");
        Ok(busy)
    }

    /// Poll until the device is idle. Returns the number of status queries.
    pub async fn wait_until_idle(&mut self) -> Result<u32> {
        self.poll.wait_until_idle(&mut self.session).await
    }

    fn smu(&self) -> String {
        format!("smu{}", self.slot.label())
    }

    async fn write(&mut self, command: &str, completion: Completion) -> Result<()> {
        debug!("TSP write   -> {command}");
        self.session.write(command).await?;
        if completion == Completion::Wait {
            let polls = self.wait_until_idle().await?;
            debug!(polls, "TSP complete");
        }
        Ok(())
    }
}

#[async_trait]
impl<T: Transport> SourceMeter for Keithley260xTsp<T> {
    async fn identify(&mut self) -> Result<String> {
        Keithley260xTsp::identify(self).await
    }

    async fn enable_sources(&mut self) -> Result<()> {
        self.enable_sources_with(Completion::Wait).await
    }

    async fn disable_sources(&mut self) -> Result<()> {
        self.disable_sources_with(Completion::Wait).await
    }

    async fn set_voltage(&mut self, volts: f64) -> Result<()> {
        self.set_voltage_with(volts, Completion::Wait).await
    }

    async fn get_voltage(&mut self) -> Result<f64> {
        Keithley260xTsp::get_voltage(self).await
    }
}
