//! The tickstep reference client.
//!
//! Connects, then on a fixed cadence increments its tick counter and sends
//! a demo input; periods where the demo player is idle send a keepalive
//! ping instead so the server's idle timeout stays quiet. Between sends it
//! drains incoming snapshots and reports the server's acknowledgement
//! state once a second. Set `TICKSTEP_CLIENT_SECS` to run for a bounded
//! time (useful for smoke tests); otherwise it runs until killed.

use rand::Rng;
use std::process::ExitCode;
use std::time::{Duration, Instant};
use tickstep::{ClientConfig, ClientConnection, ClientInput, Snapshot};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const DISCONNECT_DRAIN: Duration = Duration::from_secs(1);
const REPORT_PERIOD: Duration = Duration::from_secs(1);

/// Wandering demo input: the stick heading drifts a little every send,
/// and every so often the player lets go of the stick for a stretch of
/// send periods.
struct DemoInput {
    heading: f32,
    idle_periods: u32,
}

impl DemoInput {
    /// `None` means the player produced no input this period.
    fn next(&mut self, rng: &mut impl Rng, peer_id: u32, tick: u32, seq: u32) -> Option<ClientInput> {
        if self.idle_periods > 0 {
            self.idle_periods -= 1;
            return None;
        }
        if rng.gen_bool(0.02) {
            self.idle_periods = rng.gen_range(5..30);
            return None;
        }
        self.heading += rng.gen_range(-0.3..0.3);
        Some(ClientInput {
            client_id: peer_id,
            client_tick: tick,
            client_seq: seq,
            buttons: u32::from(rng.gen_bool(0.1)),
            axis_x: self.heading.cos(),
            axis_y: self.heading.sin(),
        })
    }
}

fn run(conn: &ClientConnection, config: &ClientConfig) -> Result<(), tickstep::NetError> {
    let send_period = Duration::from_millis(config.send_period_ms);
    let deadline = std::env::var("TICKSTEP_CLIENT_SECS")
        .ok()
        .and_then(|raw| raw.parse::<u64>().ok())
        .map(|secs| Instant::now() + Duration::from_secs(secs));

    let mut rng = rand::thread_rng();
    let mut demo = DemoInput { heading: 0.0, idle_periods: 0 };
    let mut client_tick: u32 = 0;
    let mut client_seq: u32 = 0;
    let mut next_send = Instant::now();
    let mut last_report = Instant::now();
    let mut last_snapshot: Option<Snapshot> = None;

    loop {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Ok(());
        }

        if Instant::now() >= next_send {
            client_tick = client_tick.wrapping_add(1);
            match demo.next(&mut rng, conn.peer_id(), client_tick, client_seq.wrapping_add(1)) {
                Some(input) => {
                    client_seq = input.client_seq;
                    conn.send_input(&input)?;
                }
                // Idle period: keepalive instead of an input, and the
                // sequence counter holds still.
                None => conn.send_ping()?,
            }
            next_send += send_period;
        }

        // Each poll blocks at most a millisecond, which doubles as the
        // loop's sleep between send boundaries.
        while let Some(snapshot) = conn.poll_snapshot()? {
            last_snapshot = Some(snapshot);
        }

        if last_report.elapsed() >= REPORT_PERIOD {
            last_report = Instant::now();
            match &last_snapshot {
                Some(snap) => debug!(
                    server_tick = snap.server_tick,
                    ack_applied = snap.ack_applied,
                    ack_recv = snap.ack_recv,
                    sent = client_seq,
                    "server state"
                ),
                None => warn!("no snapshot received yet"),
            }
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_file(true)
        .with_line_number(true)
        .init();

    let config = match ClientConfig::load() {
        Ok(config) => config,
        Err(e) => {
            error!("configuration error: {e}");
            return ExitCode::from(2);
        }
    };

    info!(
        server = %format!("{}:{}", config.server_host, config.server_port),
        "connecting"
    );
    let conn = match ClientConnection::connect(
        &config.server_host,
        config.server_port,
        HANDSHAKE_TIMEOUT,
    ) {
        Ok(conn) => conn,
        Err(e) => {
            error!("connection failed: {e}");
            return ExitCode::from(1);
        }
    };
    info!(peer_id = conn.peer_id(), "connected");

    let result = run(&conn, &config);
    conn.disconnect(DISCONNECT_DRAIN);
    match result {
        Ok(()) => {
            info!("disconnected");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("session error: {e}");
            ExitCode::from(1)
        }
    }
}
