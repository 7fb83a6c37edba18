use std::time::Duration;

use anyhow::{Context, Result};
use keithley260x_control::sim::{SimulatedBus, SimulatedSmu};
use keithley260x_control::{Connector, GpibAddress, Keithley260xScpi, Slot, Vxi11Gateway};
use tokio::time::timeout;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    // usage: scpi_idn_and_readback [gateway-host] [gpib-address]
    let args: Vec<String> = std::env::args().collect();
    let address: GpibAddress = args.get(2).map(String::as_str).unwrap_or("26").parse()?;

    match args.get(1) {
        Some(host) => show(&Vxi11Gateway::new(host.as_str()), address).await,
        None => {
            let bus = SimulatedBus::new().attach(address, SimulatedSmu::new());
            show(&bus, address).await
        }
    }
}

async fn show<C: Connector>(connector: &C, address: GpibAddress) -> Result<()> {
    let mut smu = timeout(Duration::from_secs(5), Keithley260xScpi::connect(connector, address))
        .await
        .with_context(|| format!("timed out connecting to {address}"))??;

    println!("IDN: {}", smu.identify().await?);

    for slot in [Slot::A, Slot::B] {
        smu.set_voltage(slot, 1.25).await?;
        println!("SOUR{}: {:.3} V", slot.number(), smu.get_voltage(slot).await?);
    }

    // Leave both channels at 0 V with outputs off.
    for slot in [Slot::A, Slot::B] {
        smu.set_voltage(slot, 0.0).await?;
    }
    smu.disable_sources().await?;
    smu.close().await?;
    Ok(())
}
