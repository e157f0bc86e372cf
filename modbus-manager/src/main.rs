use std::fmt::Write as _;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Context as _};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use modbus_manager::client::ModbusBus;
use modbus_manager::config::Config;
use modbus_manager::definition::parse_hex_address;
use modbus_manager::simulator::SimulatedBus;
use modbus_manager::{AccessClass, BusClient, Engine, Row};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding modbus.json and the register definitions
    #[arg(
        short,
        long,
        value_name = "DIR",
        env = "MODBUS_CONFIG_DIR",
        default_value = "config"
    )]
    config: PathBuf,

    /// Poll an in-memory bus instead of the configured connection
    #[arg(long)]
    simulate: bool,

    /// Override the configured poll interval
    #[arg(long, value_name = "MS")]
    interval_ms: Option<u64>,

    /// Poll once, print the registers and exit
    #[arg(long)]
    once: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, PartialEq)]
enum Command {
    Set {
        device: String,
        access_class: AccessClass,
        address: u16,
        value: String,
    },
    Show,
    Quit,
}

impl Command {
    fn parse(line: &str) -> anyhow::Result<Option<Self>> {
        let fields = line.split_whitespace().collect::<Vec<_>>();
        let command = match fields.as_slice() {
            [] => return Ok(None),
            ["set", device, class, address, value] => Command::Set {
                device: device.to_string(),
                access_class: AccessClass::from_tag(class)
                    .ok_or_else(|| anyhow!("unknown access class '{class}'"))?,
                address: parse_hex_address(address)
                    .ok_or_else(|| anyhow!("invalid hex address '{address}'"))?,
                value: value.to_string(),
            },
            ["set", ..] => {
                bail!("usage: set <device> <discrete|input|holding> <hex address> <value>")
            }
            ["show"] => Command::Show,
            ["quit"] | ["exit"] => Command::Quit,
            _ => bail!("unknown command '{line}', expected set, show or quit"),
        };
        Ok(Some(command))
    }
}

fn render(rows: &[Row]) -> String {
    let mut out = format!(
        "{:<16} {:>9} {:>8} {:<6} {:<10} {:<8} {}\n",
        "Device", "Slave Adr", "Address", "Action", "Datatype", "Type", "Value"
    );
    for row in rows {
        let _ = writeln!(
            out,
            "{:<16} {:>9} {:>8} {:<6} {:<10} {:<8} {}",
            row.device,
            format!("0x{:X}", row.slave_address),
            format!("0x{:X}", row.address),
            row.action,
            row.datatype,
            row.access_class,
            row.value
        );
    }
    out
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_dir(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    let registry = config.build_registry(&cli.config)?;
    let interval = cli
        .interval_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| config.poll_interval());

    if cli.simulate {
        tracing::info!("Using simulated bus");
        let bus = SimulatedBus::from_registry(&registry);
        run(Engine::new(registry, bus), &cli, interval).await
    } else {
        let bus = ModbusBus::open(config.bus()?).await?;
        run(Engine::new(registry, bus), &cli, interval).await
    }
}

async fn run<B>(engine: Engine<B>, cli: &Cli, interval: Duration) -> anyhow::Result<()>
where
    B: BusClient + 'static,
{
    if cli.once {
        let report = engine.poll_once().await;
        print!("{}", render(&engine.rows().await));
        engine.shutdown().await?;
        if let Some((device, err)) = report.failures().next() {
            bail!("polling {device} failed: {err}");
        }
        return Ok(());
    }

    let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
    let poller = {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine
                .run(interval, async {
                    let _ = stopped.await;
                })
                .await
        })
    };

    let printer = {
        let engine = engine.clone();
        let mut reports = engine.subscribe();
        tokio::spawn(async move {
            while reports.changed().await.is_ok() {
                let failed = reports.borrow_and_update().failures().count();
                if failed > 0 {
                    tracing::warn!(failed, "Devices not updated this cycle");
                }
                print!("{}", render(&engine.rows().await));
            }
        })
    };

    tracing::info!(?interval, "Polling started, commands: set, show, quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => match line? {
                Some(line) => line,
                None => break,
            },
        };

        match Command::parse(&line) {
            Ok(None) => {}
            Ok(Some(Command::Quit)) => break,
            Ok(Some(Command::Show)) => print!("{}", render(&engine.rows().await)),
            Ok(Some(Command::Set {
                device,
                access_class,
                address,
                value,
            })) => match engine.write(&device, access_class, address, &value).await {
                Ok(written) => println!("{device} {access_class} 0x{address:X} = {written}"),
                Err(err) => eprintln!("write rejected: {err}"),
            },
            Err(err) => eprintln!("{err}"),
        }
    }

    let _ = stop.send(());
    poller.await?;
    printer.abort();
    engine.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use modbus_manager::{Action, DataType, Value};

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("  ").unwrap(), None);
        assert_eq!(Command::parse("show").unwrap(), Some(Command::Show));
        assert_eq!(Command::parse("quit").unwrap(), Some(Command::Quit));
        assert_eq!(
            Command::parse("set D1 holding 0x0A 3.5").unwrap(),
            Some(Command::Set {
                device: "D1".to_string(),
                access_class: AccessClass::Holding,
                address: 0x0A,
                value: "3.5".to_string(),
            })
        );
        assert!(Command::parse("set D1 coil 0x0A 1").is_err());
        assert!(Command::parse("set D1 holding 0xZZ 1").is_err());
        assert!(Command::parse("set D1 holding").is_err());
        assert!(Command::parse("reboot").is_err());
    }

    #[test]
    fn test_render_hex_columns() {
        let table = render(&[Row {
            device: "D1".to_string(),
            slave_address: 0x11,
            address: 0x0A,
            action: Action::Write,
            datatype: DataType::F32Wide,
            access_class: AccessClass::Holding,
            value: Value::F32(3.5),
        }]);
        let lines = table.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("Device"));
        let fields = lines[1].split_whitespace().collect::<Vec<_>>();
        assert_eq!(fields, ["D1", "0x11", "0xA", "write", "F32-WIDE", "holding", "3.5"]);
    }
}
