use clap::Parser;
use fill_mock_server::{MockServer, StationOptions};
use fill_protocol::ValveName;
use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mock_server", about = "Reference fill station for bench work and tests")]
struct Args {
    #[arg(long, default_value = "127.0.0.1:9000")]
    addr: String,

    /// Write the bound address here (useful with port 0).
    #[arg(long, value_name = "PATH")]
    addr_file: Option<PathBuf>,

    /// Exit after this many milliseconds instead of running forever.
    #[arg(long)]
    run_for_ms: Option<u64>,

    /// Reply to valve queries without the valve identifier, like older firmware.
    #[arg(long, default_value_t = false)]
    legacy_valve_state: bool,

    /// Valves that flip on a repeated command (e.g. --repeat-toggle SV5).
    #[arg(long = "repeat-toggle", value_name = "VALVE")]
    repeat_toggles: Vec<ValveName>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let server = MockServer::spawn(
        &args.addr,
        StationOptions {
            echo_valve_identifier: !args.legacy_valve_state,
            repeat_toggles: args.repeat_toggles,
        },
    )?;

    if let Some(path) = &args.addr_file {
        fs::write(path, server.listen_addr().to_string())?;
    }
    info!("mock station listening on {}", server.url());

    let run_for = args.run_for_ms.map(Duration::from_millis);
    let start = Instant::now();
    loop {
        // Keep the received log from filling up; commands are already traced.
        server.drain_received();
        thread::sleep(Duration::from_millis(100));
        if let Some(max) = run_for {
            if start.elapsed() >= max {
                break;
            }
        }
    }

    server.shutdown();
    Ok(())
}
