//! The authoritative tick loop.
//!
//! Two independent clocks, one accumulator loop: a simulation clock that
//! advances the deterministic world at `sim_hz`, and a network clock that
//! emits snapshots at `net_hz`. Both are fed from a single monotonic time
//! source with per-frame clamping and bounded catch-up so that a stall
//! (debugger, suspend, scheduler hiccup) costs a bounded burst of ticks
//! instead of a spiral.
//!
//! Each simulation tick the engine drains the receiver handoff queue,
//! files every queued input into the ring slot of its target tick, takes
//! the current tick's slot, publishes the per-client applied sequences,
//! and hands the inputs to the game callback.

pub mod acks;
pub mod callbacks;
pub mod queue;
pub mod ring;

pub use acks::AckTable;
pub use callbacks::GameCallbacks;
pub use queue::{HandoffQueue, QueuedInput};
pub use ring::InputRing;

use crate::clock::MonotonicClock;
use crate::config::ServerConfig;
use crate::net::NetError;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// A frame longer than this is treated as a pause, not as time to repay.
const FRAME_CLAMP_NS: u64 = 250_000_000;

/// Upper bound on ticks executed per loop iteration for either clock.
const MAX_CATCHUP: u32 = 5;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid engine configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Net(#[from] NetError),
    #[error("failed to spawn receiver worker: {0}")]
    WorkerSpawn(#[source] std::io::Error),
}

/// State shared between the engine loop, the receiver worker, and the
/// game callbacks. The engine is the only writer of the tick ids; the
/// receiver is the only writer of `acks.last_recv`; the handoff queue is
/// the only mutex in the system.
#[derive(Debug)]
pub struct EngineContext {
    pub queue: HandoffQueue,
    pub acks: AckTable,
    input_delay_ticks: u64,
    sim_tick_id: AtomicU64,
    net_tick_id: AtomicU64,
    running: AtomicBool,
    worker_run: AtomicBool,
}

impl EngineContext {
    pub fn new(config: &ServerConfig) -> Self {
        EngineContext {
            queue: HandoffQueue::new(),
            acks: AckTable::new(config.max_peers),
            input_delay_ticks: config.input_delay_ticks,
            sim_tick_id: AtomicU64::new(0),
            net_tick_id: AtomicU64::new(0),
            running: AtomicBool::new(true),
            worker_run: AtomicBool::new(true),
        }
    }

    /// Current simulation tick id. A reader racing the engine may observe
    /// a value one tick stale; callers only need a recent lower bound.
    #[inline]
    pub fn sim_tick(&self) -> u64 {
        self.sim_tick_id.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn net_tick(&self) -> u64 {
        self.net_tick_id.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn input_delay_ticks(&self) -> u64 {
        self.input_delay_ticks
    }

    /// The simulation tick an input received right now must be applied at.
    #[inline]
    pub fn target_sim_tick(&self) -> u64 {
        self.sim_tick() + self.input_delay_ticks
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Ask the engine loop to exit after the current iteration.
    pub fn request_stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    #[inline]
    pub fn worker_should_run(&self) -> bool {
        self.worker_run.load(Ordering::Relaxed)
    }

    /// Ask the receiver worker to exit. The caller must still join the
    /// worker before tearing down the transport it services.
    pub fn stop_worker(&self) {
        self.worker_run.store(false, Ordering::Relaxed);
    }

    fn publish_sim_tick(&self, tick: u64) {
        self.sim_tick_id.store(tick, Ordering::Relaxed);
    }

    fn publish_net_tick(&self, tick: u64) {
        self.net_tick_id.store(tick, Ordering::Relaxed);
    }
}

/// The engine loop. Owns the ring and both accumulators; everything shared
/// lives in the [`EngineContext`].
pub struct Engine {
    clock: MonotonicClock,
    ctx: Arc<EngineContext>,
    ring: InputRing,

    sim_hz: u32,
    net_hz: u32,
    sim_period_ns: u64,
    net_period_ns: u64,
    sim_dt_fixed: f64,

    sim_tick: u64,
    net_tick: u64,
    acc_sim_ns: u64,
    acc_net_ns: u64,
    last_ns: u64,

    drain_buf: Vec<QueuedInput>,
    apply_buf: Vec<crate::codec::ClientInput>,
}

impl Engine {
    pub fn new(config: &ServerConfig, ctx: Arc<EngineContext>) -> Result<Self, EngineError> {
        if ctx.acks.len() != config.max_peers {
            return Err(EngineError::Config(format!(
                "ack table holds {} peers but max_peers is {}",
                ctx.acks.len(),
                config.max_peers
            )));
        }
        if config.ring_capacity as u64 <= config.input_delay_ticks {
            return Err(EngineError::Config(format!(
                "ring capacity {} cannot cover an input delay of {} ticks",
                config.ring_capacity, config.input_delay_ticks
            )));
        }

        let clock = MonotonicClock::new();
        let last_ns = clock.now_ns();
        Ok(Engine {
            clock,
            ctx,
            ring: InputRing::new(config.ring_capacity),
            sim_hz: config.sim_hz,
            net_hz: config.net_hz,
            sim_period_ns: config.sim_period_ns(),
            net_period_ns: config.net_period_ns(),
            sim_dt_fixed: config.sim_dt_fixed(),
            sim_tick: 0,
            net_tick: 0,
            acc_sim_ns: 0,
            acc_net_ns: 0,
            last_ns,
            drain_buf: Vec::new(),
            apply_buf: Vec::new(),
        })
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    /// Run the loop until [`EngineContext::request_stop`] is observed.
    /// `load` fires once before the first iteration, `unload` once after
    /// the last.
    pub fn run<C: GameCallbacks>(&mut self, callbacks: &mut C) -> Result<(), EngineError> {
        callbacks.load(&self.ctx)?;
        info!(
            sim_hz = self.sim_hz,
            net_hz = self.net_hz,
            input_delay = self.ctx.input_delay_ticks,
            ring = self.ring.capacity(),
            peers = self.ctx.acks.len(),
            "engine loop started"
        );

        self.last_ns = self.clock.now_ns();
        while self.ctx.is_running() {
            self.step(callbacks);
        }

        info!(
            sim_ticks = self.sim_tick,
            net_ticks = self.net_tick,
            "engine loop stopped"
        );
        callbacks.unload();
        Ok(())
    }

    /// One loop iteration: accumulate elapsed time, repay both clocks,
    /// sleep to the nearer boundary.
    fn step<C: GameCallbacks>(&mut self, callbacks: &mut C) {
        let now = self.clock.now_ns();
        let frame = (now - self.last_ns).min(FRAME_CLAMP_NS);
        self.last_ns = now;
        self.acc_sim_ns += frame;
        self.acc_net_ns += frame;

        self.run_sim_ticks(callbacks);
        self.run_net_ticks(callbacks);
        self.sleep_to_next_boundary();
    }

    fn run_sim_ticks<C: GameCallbacks>(&mut self, callbacks: &mut C) {
        let mut catchup = 0;
        while self.acc_sim_ns >= self.sim_period_ns && catchup < MAX_CATCHUP {
            self.sim_tick += 1;
            // Published before the drain so the receiver stamps targets
            // against a tick id that is at most one tick stale.
            self.ctx.publish_sim_tick(self.sim_tick);

            self.ctx.queue.drain_into(&mut self.drain_buf);
            for queued in self.drain_buf.drain(..) {
                self.ring.schedule(queued.target_sim_tick, queued.input);
            }

            self.apply_buf.clear();
            self.ring.take(self.sim_tick, &mut self.apply_buf);
            for input in &self.apply_buf {
                self.ctx.acks.record_applied(input.client_id, input.client_seq);
            }
            callbacks.simulation_update(self.sim_dt_fixed, &self.apply_buf);

            self.acc_sim_ns -= self.sim_period_ns;
            catchup += 1;
        }

        if self.acc_sim_ns >= self.sim_period_ns {
            warn!(
                backlog_ticks = self.acc_sim_ns / self.sim_period_ns,
                "simulation backlog exceeded catch-up budget, dropping surplus time"
            );
            self.acc_sim_ns = self.sim_period_ns;
        }
    }

    fn run_net_ticks<C: GameCallbacks>(&mut self, callbacks: &mut C) {
        let mut catchup = 0;
        while self.acc_net_ns >= self.net_period_ns && catchup < MAX_CATCHUP {
            self.net_tick += 1;
            self.ctx.publish_net_tick(self.net_tick);
            callbacks.network_update(&self.ctx);

            self.acc_net_ns -= self.net_period_ns;
            catchup += 1;
        }

        if self.acc_net_ns >= self.net_period_ns {
            warn!(
                backlog_ticks = self.acc_net_ns / self.net_period_ns,
                "network backlog exceeded catch-up budget, dropping surplus time"
            );
            self.acc_net_ns = self.net_period_ns;
        }
    }

    fn sleep_to_next_boundary(&self) {
        let until_sim = self.sim_period_ns.saturating_sub(self.acc_sim_ns);
        let until_net = self.net_period_ns.saturating_sub(self.acc_net_ns);
        let wait = until_sim.min(until_net);
        if wait > 0 {
            self.clock.sleep_until(self.last_ns + wait);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ClientInput;

    fn test_config(sim_hz: u32, net_hz: u32) -> ServerConfig {
        ServerConfig {
            sim_hz,
            net_hz,
            max_peers: 4,
            ring_capacity: 16,
            ..Default::default()
        }
    }

    fn input(client_id: u32, seq: u32) -> ClientInput {
        ClientInput {
            client_id,
            client_tick: seq,
            client_seq: seq,
            buttons: 0,
            axis_x: 0.0,
            axis_y: 0.0,
        }
    }

    /// Records every callback invocation; stops the engine after a set
    /// number of simulation ticks.
    struct Recorder {
        ctx: Option<Arc<EngineContext>>,
        stop_after_sim_ticks: u64,
        loads: u32,
        unloads: u32,
        net_calls: u64,
        sim_ticks_seen: Vec<u64>,
        inputs_per_tick: Vec<Vec<ClientInput>>,
    }

    impl Recorder {
        fn new(stop_after_sim_ticks: u64) -> Self {
            Recorder {
                ctx: None,
                stop_after_sim_ticks,
                loads: 0,
                unloads: 0,
                net_calls: 0,
                sim_ticks_seen: Vec::new(),
                inputs_per_tick: Vec::new(),
            }
        }
    }

    impl GameCallbacks for Recorder {
        fn load(&mut self, ctx: &Arc<EngineContext>) -> Result<(), EngineError> {
            self.loads += 1;
            self.ctx = Some(ctx.clone());
            Ok(())
        }

        fn unload(&mut self) {
            self.unloads += 1;
        }

        fn simulation_update(&mut self, _dt_fixed: f64, inputs: &[ClientInput]) {
            let ctx = self.ctx.as_ref().unwrap();
            self.sim_ticks_seen.push(ctx.sim_tick());
            self.inputs_per_tick.push(inputs.to_vec());
            if self.inputs_per_tick.len() as u64 >= self.stop_after_sim_ticks {
                ctx.request_stop();
            }
        }

        fn network_update(&mut self, _ctx: &EngineContext) {
            self.net_calls += 1;
        }
    }

    #[test]
    fn test_run_fires_load_and_unload_once() {
        let config = test_config(500, 100);
        let ctx = Arc::new(EngineContext::new(&config));
        let mut engine = Engine::new(&config, ctx).unwrap();
        let mut game = Recorder::new(3);
        engine.run(&mut game).unwrap();
        assert_eq!(game.loads, 1);
        assert_eq!(game.unloads, 1);
        // A scheduler hiccup can add a catch-up tick past the stop mark.
        assert!(game.inputs_per_tick.len() >= 3);
    }

    #[test]
    fn test_sim_ticks_strictly_monotone() {
        let config = test_config(1000, 200);
        let ctx = Arc::new(EngineContext::new(&config));
        let mut engine = Engine::new(&config, ctx).unwrap();
        let mut game = Recorder::new(20);
        engine.run(&mut game).unwrap();
        for pair in game.sim_ticks_seen.windows(2) {
            assert!(pair[1] > pair[0], "tick ids must strictly increase");
        }
    }

    #[test]
    fn test_empty_ticks_still_fire() {
        let config = test_config(1000, 200);
        let ctx = Arc::new(EngineContext::new(&config));
        let mut engine = Engine::new(&config, ctx).unwrap();
        let mut game = Recorder::new(5);
        engine.run(&mut game).unwrap();
        assert!(game.inputs_per_tick.len() >= 5);
        assert!(game.inputs_per_tick.iter().all(|inputs| inputs.is_empty()));
    }

    #[test]
    fn test_input_applied_at_target_tick_and_acked() {
        let config = test_config(1000, 200);
        let ctx = Arc::new(EngineContext::new(&config));
        // Received "now" (tick 0) with delay 1: must be applied at tick 1.
        ctx.queue.push(QueuedInput {
            target_sim_tick: ctx.target_sim_tick(),
            input: input(2, 7),
        });
        let mut engine = Engine::new(&config, ctx.clone()).unwrap();
        let mut game = Recorder::new(4);
        engine.run(&mut game).unwrap();

        assert_eq!(game.inputs_per_tick[0].len(), 1);
        assert_eq!(game.inputs_per_tick[0][0].client_seq, 7);
        assert!(game.inputs_per_tick[1..].iter().all(|i| i.is_empty()));
        assert_eq!(ctx.acks.applied(2), 7);
    }

    #[test]
    fn test_late_input_never_applied() {
        let config = test_config(1000, 200);
        let ctx = Arc::new(EngineContext::new(&config));
        let mut engine = Engine::new(&config, ctx.clone()).unwrap();

        // Run a few ticks so the loop is past tick 1, then inject an input
        // whose target is already history.
        let mut game = Recorder::new(5);
        engine.run(&mut game).unwrap();
        assert!(ctx.sim_tick() >= 5);

        ctx.queue.push(QueuedInput {
            target_sim_tick: 1,
            input: input(0, 9),
        });
        ctx.running.store(true, Ordering::Relaxed);
        let mut game = Recorder::new(5);
        engine.run(&mut game).unwrap();

        assert!(game.inputs_per_tick.iter().all(|i| i.is_empty()));
        assert_eq!(ctx.acks.applied(0), 0);
    }

    #[test]
    fn test_sim_catch_up_is_bounded() {
        let config = test_config(100, 20);
        let ctx = Arc::new(EngineContext::new(&config));
        let mut engine = Engine::new(&config, ctx).unwrap();
        let mut game = Recorder::new(u64::MAX);
        game.ctx = Some(engine.context().clone());

        // Pretend the loop stalled for two seconds.
        engine.acc_sim_ns = 2_000_000_000;
        engine.run_sim_ticks(&mut game);

        assert_eq!(game.inputs_per_tick.len() as u32, MAX_CATCHUP);
        assert_eq!(engine.acc_sim_ns, engine.sim_period_ns);
    }

    #[test]
    fn test_net_catch_up_is_bounded() {
        let config = test_config(100, 20);
        let ctx = Arc::new(EngineContext::new(&config));
        let mut engine = Engine::new(&config, ctx).unwrap();
        let mut game = Recorder::new(u64::MAX);
        game.ctx = Some(engine.context().clone());

        engine.acc_net_ns = 2_000_000_000;
        engine.run_net_ticks(&mut game);

        assert_eq!(game.net_calls as u32, MAX_CATCHUP);
        assert_eq!(engine.acc_net_ns, engine.net_period_ns);
    }

    #[test]
    fn test_mismatched_ack_table_rejected() {
        let config = test_config(60, 20);
        let other = ServerConfig {
            max_peers: 8,
            ..test_config(60, 20)
        };
        let ctx = Arc::new(EngineContext::new(&other));
        assert!(matches!(
            Engine::new(&config, ctx),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn test_pacing_close_to_configured_rate() {
        let config = test_config(100, 50);
        let ctx = Arc::new(EngineContext::new(&config));
        let mut engine = Engine::new(&config, ctx).unwrap();
        let mut game = Recorder::new(20);

        let start = std::time::Instant::now();
        engine.run(&mut game).unwrap();
        let elapsed = start.elapsed();

        // 20 ticks at 100 Hz is 200ms on the nose; allow generous
        // scheduler slack on both sides.
        assert!(elapsed.as_millis() >= 150, "ran hot: {elapsed:?}");
        assert!(elapsed.as_millis() <= 800, "ran slow: {elapsed:?}");
        // The net clock ran independently at half the sim rate.
        assert!(game.net_calls >= 5 && game.net_calls <= 20, "{}", game.net_calls);
    }
}
