use std::time::Duration;

use anyhow::Result;
use keithley260x_control::sim::{SimulatedBus, SimulatedSmu};
use keithley260x_control::{
    Completion, Connector, GpibAddress, Keithley260xTsp, Slot, SourceMeter, Vxi11Gateway,
};
use tokio::time::{sleep, timeout};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    // usage: tsp_voltage_steps [gateway-host] [gpib-address]
    // Without a host the demo runs against the simulator.
    let args: Vec<String> = std::env::args().collect();
    let address: GpibAddress = args.get(2).map(String::as_str).unwrap_or("26").parse()?;

    match args.get(1) {
        Some(host) => steps(&Vxi11Gateway::new(host.as_str()), address).await,
        None => {
            let bus = SimulatedBus::new().attach(address, SimulatedSmu::new().with_busy_polls(3));
            steps(&bus, address).await
        }
    }
}

async fn steps<C: Connector>(connector: &C, address: GpibAddress) -> Result<()> {
    let mut smu = match timeout(
        Duration::from_secs(5),
        Keithley260xTsp::connect(connector, address, Slot::A),
    )
    .await
    {
        Ok(Ok(smu)) => smu,
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => {
            eprintln!("Timed out connecting to {address} (5 s); check the gateway and GPIB cabling.");
            return Ok(());
        }
    };

    println!("IDN: {}", smu.identify().await?);

    smu.set_voltage(0.0).await?;
    smu.enable_sources().await?;

    for volts in [0.5, 1.0, 1.5, 2.0] {
        smu.set_voltage(volts).await?;
        let measured = smu.get_voltage().await?;
        println!("{}: set {:.3} V, measured {:.3} V", smu.slot().label(), volts, measured);
        sleep(Duration::from_millis(500)).await;
    }

    // Fire-and-forget ramp down, then a single explicit wait.
    smu.set_voltage_with(0.0, Completion::NoWait).await?;
    let polls = smu.wait_until_idle().await?;
    println!("ramped down after {polls} status polls");

    smu.disable_sources().await?;
    smu.close().await?;
    Ok(())
}
