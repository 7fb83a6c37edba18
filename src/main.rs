use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Parser, Subcommand};
#[cfg(feature = "sim")]
use keithley260x_control::sim::{SimulatedBus, SimulatedSmu};
use keithley260x_control::{
    Completion, CompletionPoll, Connector, Dialect, GpibAddress, Keithley260xScpi, Keithley260xTsp,
    Slot, Vxi11Gateway,
};
use tracing::Level;

#[derive(Debug, Parser)]
#[command(name = "k260x", version, about = "Control a Keithley 260X SMU over GPIB")]
struct Cli {
    /// Host name or IP of the VXI-11 LAN/GPIB gateway.
    #[arg(long, default_value = "192.168.0.232")]
    host: String,

    /// GPIB primary address of the SMU.
    #[arg(short, long, default_value = "26")]
    address: GpibAddress,

    #[arg(long, value_enum, default_value_t = Dialect::Tsp)]
    dialect: Dialect,

    #[arg(long, value_enum, default_value_t = Slot::A)]
    slot: Slot,

    /// Operation-complete polls per second.
    #[arg(long, default_value_t = 10.0)]
    poll_hz: f64,

    /// Give up waiting after this many seconds (0 waits forever).
    #[arg(long, default_value_t = 60.0)]
    poll_timeout: f64,

    #[arg(long)]
    max_polls: Option<u32>,

    /// Return right after writing instead of polling for completion.
    #[arg(long)]
    no_wait: bool,

    /// Talk to a simulated SMU instead of the gateway.
    #[arg(long)]
    sim: bool,

    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the identification string.
    Idn,
    /// Program the source voltage.
    Set {
        #[arg(allow_negative_numbers = true)]
        volts: f64,
    },
    /// Read the voltage back.
    Get,
    /// Switch the output on.
    On,
    /// Switch the output off.
    Off,
    /// Report whether an operation is still pending (TSP only).
    Busy,
}

impl Cli {
    fn completion_poll(&self) -> Result<CompletionPoll> {
        if !self.poll_timeout.is_finite() || self.poll_timeout < 0.0 {
            bail!("--poll-timeout must be a non-negative number of seconds");
        }
        let timeout = if self.poll_timeout > 0.0 {
            match Duration::try_from_secs_f64(self.poll_timeout) {
                Ok(timeout) => Some(timeout),
                Err(e) => bail!("--poll-timeout {} is out of range: {e}", self.poll_timeout),
            }
        } else {
            None
        };
        let poll = CompletionPoll::default()
            .with_interval_hz(self.poll_hz)
            .with_max_polls(self.max_polls)
            .with_timeout(timeout);
        poll.validate()?;
        Ok(poll)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    if cli.sim {
        return run_sim(&cli).await;
    }
    let gateway = Vxi11Gateway::new(cli.host.as_str());
    run(&cli, &gateway).await
}

#[cfg(feature = "sim")]
async fn run_sim(cli: &Cli) -> Result<()> {
    let bus = SimulatedBus::new().attach(cli.address, SimulatedSmu::new().with_busy_polls(2));
    run(cli, &bus).await
}

#[cfg(not(feature = "sim"))]
async fn run_sim(_cli: &Cli) -> Result<()> {
    bail!("--sim needs a build with the `sim` feature")
}

async fn run<C: Connector>(cli: &Cli, connector: &C) -> Result<()> {
    match cli.dialect {
        Dialect::Scpi => run_scpi(cli, connector).await,
        Dialect::Tsp => run_tsp(cli, connector).await,
    }
}

async fn run_scpi<C: Connector>(cli: &Cli, connector: &C) -> Result<()> {
    let mut inst = Keithley260xScpi::connect(connector, cli.address)
        .await
        .with_context(|| format!("failed to connect to {}", cli.address))?;

    match cli.command {
        Command::Idn => println!("{}", inst.identify().await?),
        Command::Set { volts } => inst.set_voltage(cli.slot, volts).await?,
        Command::Get => println!("{}", inst.get_voltage(cli.slot).await?),
        Command::On => inst.enable_sources().await?,
        Command::Off => inst.disable_sources().await?,
        Command::Busy => bail!("`busy` needs the TSP dialect"),
    }

    inst.close().await?;
    Ok(())
}

async fn run_tsp<C: Connector>(cli: &Cli, connector: &C) -> Result<()> {
    let poll = cli.completion_poll()?;
    let completion = Completion::from_wait(!cli.no_wait);
    let mut inst = Keithley260xTsp::connect_with_poll(connector, cli.address, cli.slot, poll)
        .await
        .with_context(|| format!("failed to connect to {}", cli.address))?;

    match cli.command {
        Command::Idn => println!("{}", inst.identify().await?),
        Command::Set { volts } => inst.set_voltage_with(volts, completion).await?,
        Command::Get => println!("{}", inst.get_voltage().await?),
        Command::On => inst.enable_sources_with(completion).await?,
        Command::Off => inst.disable_sources_with(completion).await?,
        Command::Busy => println!("{}", inst.is_busy().await?),
    }

    inst.close().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_negative_voltage_and_selectors() {
        let cli = Cli::try_parse_from(["k260x", "--slot", "b", "-a", "5", "--sim", "set", "-5"]).unwrap();
        assert_eq!(cli.slot, Slot::B);
        assert_eq!(cli.address.primary(), 5);
        assert!(matches!(cli.command, Command::Set { volts } if volts == -5.0));
    }

    #[test]
    fn zero_timeout_means_unbounded() {
        let cli = Cli::try_parse_from(["k260x", "--poll-timeout", "0", "busy"]).unwrap();
        assert_eq!(cli.completion_poll().unwrap().timeout, None);
    }

    #[test]
    fn rejects_poll_settings_that_do_not_fit_a_duration() {
        let cli = Cli::try_parse_from(["k260x", "--poll-timeout", "1e30", "on"]).unwrap();
        assert!(cli.completion_poll().is_err());

        let cli = Cli::try_parse_from(["k260x", "--poll-hz", "1e-20", "on"]).unwrap();
        assert!(cli.completion_poll().is_err());

        let cli = Cli::try_parse_from(["k260x", "--poll-timeout", "2.5", "on"]).unwrap();
        assert_eq!(
            cli.completion_poll().unwrap().timeout,
            Some(Duration::from_millis(2500))
        );
    }

    #[cfg(not(feature = "sim"))]
    #[tokio::test]
    async fn sim_flag_needs_the_sim_feature() {
        let cli = Cli::try_parse_from(["k260x", "--sim", "idn"]).unwrap();
        assert!(run_sim(&cli).await.is_err());
    }

    #[test]
    fn rejects_out_of_range_address() {
        assert!(Cli::try_parse_from(["k260x", "-a", "31", "idn"]).is_err());
    }
}
