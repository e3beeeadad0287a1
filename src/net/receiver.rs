//! Receiver worker: the server's second thread.
//!
//! Services the transport with a short poll timeout, parses input
//! payloads, stamps each with the simulation tick it must be applied at
//! (`current tick + input delay`), and hands it to the engine through the
//! handoff queue. The received-sequence ack is recorded here, before the
//! input can be dropped for lateness, so `ackRecv` always reflects what
//! the server saw.

use super::{HostEvent, UdpHost, INPUT_CHANNEL};
use crate::codec;
use crate::engine::{EngineContext, EngineError, QueuedInput};
use bytes::BytesMut;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

pub struct ReceiverWorker {
    handle: JoinHandle<()>,
}

impl ReceiverWorker {
    /// Spawn the worker thread. It runs until
    /// [`EngineContext::stop_worker`] is called, after which the spawner
    /// must [`join`](Self::join) it before dropping the host.
    pub fn spawn(host: Arc<UdpHost>, ctx: Arc<EngineContext>) -> Result<Self, EngineError> {
        let handle = std::thread::Builder::new()
            .name("tickstep-recv".to_string())
            .spawn(move || run(&host, &ctx))
            .map_err(EngineError::WorkerSpawn)?;
        Ok(ReceiverWorker { handle })
    }

    pub fn join(self) {
        if self.handle.join().is_err() {
            warn!("receiver worker panicked");
        }
    }
}

fn run(host: &UdpHost, ctx: &EngineContext) {
    info!("receiver worker started");
    let mut buf = BytesMut::with_capacity(super::MAX_DATAGRAM);

    while ctx.worker_should_run() {
        let event = match host.service(&mut buf) {
            Ok(Some(event)) => event,
            Ok(None) => continue,
            Err(e) => {
                warn!("transport service error: {e}");
                continue;
            }
        };

        match event {
            HostEvent::Connected { peer } => {
                info!(client_id = peer, "client connected");
            }
            HostEvent::Packet {
                peer,
                channel,
                payload,
            } => {
                if channel != INPUT_CHANNEL {
                    debug!(client_id = peer, channel, "ignoring payload on non-input channel");
                    continue;
                }
                match codec::parse_input(&payload, peer) {
                    Ok(input) => {
                        ctx.acks.record_received(peer, input.client_seq);
                        ctx.queue.push(QueuedInput {
                            target_sim_tick: ctx.target_sim_tick(),
                            input,
                        });
                    }
                    Err(e) => {
                        warn!(client_id = peer, len = payload.len(), "dropping input: {e}");
                    }
                }
            }
            HostEvent::Disconnected { peer } => {
                info!(client_id = peer, "client disconnected");
            }
            HostEvent::TimedOut { peer } => {
                info!(client_id = peer, "client timed out");
            }
        }
    }
    info!("receiver worker stopped");
}
