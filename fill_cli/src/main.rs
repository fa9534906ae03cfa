use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use fill_station_client::{
    CacheSnapshot, ClientConfig, ConnectionState, FillStationClient, ValveName, DEFAULT_URL,
};
use std::fmt::Write as _;
use std::io::{BufRead, Write};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REPLY_GRACE: Duration = Duration::from_millis(500);

#[derive(Parser, Debug)]
#[command(name = "fill_cli", about = "Operator console for the fill station")]
struct Args {
    #[arg(long, env = "FILL_STATION_URL", default_value = DEFAULT_URL)]
    url: String,

    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Print the cached station state once per second until Ctrl-C.
    Monitor,
    /// Toggle one solenoid valve.
    Toggle { valve: ValveName },
    /// Toggle a valve, hold it for SECONDS, toggle it back.
    Pulse { valve: ValveName, seconds: f64 },
    /// Drive the MAV.
    Mav {
        #[command(subcommand)]
        action: MavAction,
    },
    /// Vent, ignite and launch. Irreversible once started.
    Launch,
}

#[derive(Subcommand, Debug)]
enum MavAction {
    Open,
    Close,
    Angle { degrees: f32 },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    if matches!(args.action, Action::Launch) && !confirm_launch()? {
        bail!("launch not confirmed");
    }

    let client = FillStationClient::new(ClientConfig {
        url: args.url.clone(),
        ..ClientConfig::from_env()
    });
    client.connect(&args.url)?;
    wait_connected(&client).await?;

    match args.action {
        Action::Monitor => monitor(&client).await,
        Action::Toggle { valve } => {
            let now = client.toggle_valve(valve);
            info!("{valve} toggled, cached state now {}", on_off(now));
            settle_and_print(&client).await;
        }
        Action::Pulse { valve, seconds } => {
            if !seconds.is_finite() || seconds <= 0.0 {
                bail!("pulse duration must be positive, got {seconds}");
            }
            client
                .run_timed_pulse(valve, Duration::from_secs_f64(seconds))
                .await
                .context("pulse task failed")?;
            settle_and_print(&client).await;
        }
        Action::Mav { action } => {
            match action {
                MavAction::Open => client.open_mav()?,
                MavAction::Close => client.close_mav()?,
                MavAction::Angle { degrees } => client.set_mav_angle(degrees)?,
            }
            settle_and_print(&client).await;
        }
        Action::Launch => {
            let handle = client.run_vent_ignite_launch();
            let mut last = None;
            while !handle.is_finished() {
                let status = client.snapshot().sequence_status;
                if status != last {
                    if let Some(s) = &status {
                        println!(">> {s}");
                    }
                    last = status;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            handle.await.context("launch task failed")?;
            settle_and_print(&client).await;
        }
    }

    client.disconnect();
    Ok(())
}

fn confirm_launch() -> anyhow::Result<bool> {
    print!("Type LAUNCH to start the vent/ignite/launch sequence: ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim() == "LAUNCH")
}

async fn wait_connected(client: &FillStationClient) -> anyhow::Result<()> {
    let mut rx = client.subscribe_connection();
    tokio::time::timeout(
        CONNECT_TIMEOUT,
        rx.wait_for(|s| *s == ConnectionState::Connected),
    )
    .await
    .map_err(|_| anyhow!("no connection to {} within {CONNECT_TIMEOUT:?}", client.config().url))??;
    Ok(())
}

async fn settle_and_print(client: &FillStationClient) {
    tokio::time::sleep(REPLY_GRACE).await;
    println!("{}", render(&client.snapshot(), client.connection_state()));
}

async fn monitor(client: &FillStationClient) {
    let mut tick = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = tick.tick() => {
                let mut text = render(&client.snapshot(), client.connection_state());
                if client.is_stale() {
                    text.push_str("  (stale)\n");
                }
                println!("{text}");
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
}

fn on_off(v: bool) -> &'static str {
    if v {
        "OPEN"
    } else {
        "CLOSED"
    }
}

fn render(snap: &CacheSnapshot, state: ConnectionState) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "link: {state:?}");
    if let Some(status) = &snap.sequence_status {
        let _ = writeln!(out, "LAUNCH SEQUENCE: {status}");
    }
    for v in &snap.valves {
        let _ = writeln!(
            out,
            "  {:<4} {:<6} continuity={}",
            v.valve,
            on_off(v.actuated),
            v.continuity
        );
    }
    let _ = writeln!(
        out,
        "  MAV  {:.1} deg ({} us)",
        snap.mav.angle, snap.mav.pulse_width_us
    );
    for ig in &snap.igniters {
        let _ = writeln!(
            out,
            "  igniter {}: {}",
            ig.id,
            if ig.continuity { "continuity" } else { "OPEN" }
        );
    }
    match &snap.sensors {
        Some(frame) => {
            for (label, reading) in frame.labeled_channels() {
                let scaled = reading
                    .scaled
                    .map_or_else(|| "-".to_string(), |s| format!("{s:.2}"));
                let _ = writeln!(out, "  {label:<9} raw={:<6} scaled={scaled}", reading.raw);
            }
        }
        None => {
            let _ = writeln!(out, "  waiting for sensor data");
        }
    }
    out
}
