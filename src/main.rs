//! The tickstep server binary.
//!
//! Wires the engine to the UDP host and a small demo world: each peer owns
//! a 2-D position integrated from its clamped input axes. Everything
//! game-specific lives in `GameServer`; the engine only sees the four
//! callback hooks.

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use tickstep::codec::{self, Snapshot};
use tickstep::net::INPUT_CHANNEL;
use tickstep::{
    ClientInput, Engine, EngineContext, EngineError, GameCallbacks, PeerId, ReceiverWorker,
    ServerConfig, UdpHost,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const MOVE_SPEED: f32 = 5.0;
const BOOST_SPEED: f32 = 12.0;
const BUTTON_BOOST: u32 = 1 << 0;

/// Demo world state: one position per peer slot.
struct World {
    positions: Vec<[f32; 2]>,
}

impl World {
    fn new(max_peers: usize) -> Self {
        World {
            positions: vec![[0.0, 0.0]; max_peers],
        }
    }

    fn apply(&mut self, input: &ClientInput, dt: f32) {
        let speed = if input.buttons & BUTTON_BOOST != 0 {
            BOOST_SPEED
        } else {
            MOVE_SPEED
        };
        if let Some(pos) = self.positions.get_mut(input.client_id as usize) {
            pos[0] += input.axis_x * speed * dt;
            pos[1] += input.axis_y * speed * dt;
        }
    }
}

struct GameServer {
    config: ServerConfig,
    ctx: Option<Arc<EngineContext>>,
    host: Option<Arc<UdpHost>>,
    worker: Option<ReceiverWorker>,
    world: World,
    peer_buf: Vec<(PeerId, SocketAddr)>,
}

impl GameServer {
    fn new(config: ServerConfig) -> Self {
        let world = World::new(config.max_peers);
        GameServer {
            config,
            ctx: None,
            host: None,
            worker: None,
            world,
            peer_buf: Vec::new(),
        }
    }
}

impl GameCallbacks for GameServer {
    fn load(&mut self, ctx: &Arc<EngineContext>) -> Result<(), EngineError> {
        let host = Arc::new(UdpHost::bind(
            &self.config.bind_addr,
            self.config.port,
            self.config.max_peers,
        )?);
        info!(
            addr = %host.local_addr(),
            max_peers = self.config.max_peers,
            "server listening"
        );
        let worker = ReceiverWorker::spawn(host.clone(), ctx.clone())?;
        self.ctx = Some(ctx.clone());
        self.host = Some(host);
        self.worker = Some(worker);
        Ok(())
    }

    fn unload(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            ctx.stop_worker();
        }
        if let Some(worker) = self.worker.take() {
            worker.join();
        }
        // Host drops only after the worker has been joined.
        self.host = None;
        info!("server shut down");
    }

    fn simulation_update(&mut self, dt_fixed: f64, inputs: &[ClientInput]) {
        for input in inputs {
            self.world.apply(input, dt_fixed as f32);
        }
    }

    fn network_update(&mut self, ctx: &EngineContext) {
        let Some(host) = self.host.as_ref() else {
            return;
        };
        host.connected_peers(&mut self.peer_buf);
        for &(peer, _) in &self.peer_buf {
            let snapshot = Snapshot {
                server_tick: ctx.sim_tick(),
                ack_applied: ctx.acks.applied(peer),
                ack_recv: ctx.acks.received(peer),
            };
            let payload = codec::encode_snapshot(&snapshot);
            if let Err(e) = host.send_unsequenced(peer, INPUT_CHANNEL, &payload) {
                warn!(client_id = peer, "snapshot send failed: {e}");
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

    let config = match ServerConfig::load() {
        Ok(config) => config,
        Err(e) => {
            error!("configuration error: {e}");
            return ExitCode::from(2);
        }
    };

    let ctx = Arc::new(EngineContext::new(&config));
    let mut engine = match Engine::new(&config, ctx) {
        Ok(engine) => engine,
        Err(e) => {
            error!("engine startup failed: {e}");
            return ExitCode::from(1);
        }
    };

    let mut game = GameServer::new(config);
    match engine.run(&mut game) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("fatal: {e}");
            ExitCode::from(1)
        }
    }
}
