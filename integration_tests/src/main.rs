//! Hardware tests for a single flashed node over its CDC data port.

mod device;
mod protocol;

use std::time::Duration;

use clap::Parser;
use colored::Colorize;

use device::{resolve_port, DeviceClient};
use tests::{print_results, run_all_tests};

#[derive(Parser)]
#[command(name = "integration-tests")]
#[command(about = "Command protocol tests for a LoRa telemetry node")]
struct Args {
    /// Serial port for the node (use "auto" to auto-detect)
    #[arg(short, long, default_value = "auto")]
    port: String,

    /// Baud rate
    #[arg(short, long, default_value = "115200")]
    baud: u32,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let port = resolve_port(&args.port)?;

    println!("{}", "LoRa Telemetry Node Tests".bold());
    println!("Port: {}", port);
    println!("Baud: {}", args.baud);
    println!();

    println!("Connecting to node...");
    let mut device = DeviceClient::new(&port, args.baud)?;

    // Boot-time events would otherwise be mistaken for replies
    std::thread::sleep(Duration::from_secs(1));
    device.drain()?;
    println!("{}", "Connected!".green());

    println!("\nRunning tests...\n");

    let results = run_all_tests(&mut device);
    print_results(&results);

    if results.iter().any(|r| !r.passed) {
        std::process::exit(1);
    }

    Ok(())
}
