//! Tick driver running a network manager on a fixed interval
//!
//! The runtime owns the manager. Other tasks reach it through a
//! [`RuntimeHandle`], which queues closures that run between ticks, and
//! receive everything the manager reports over an event channel.

use std::time::{Duration, Instant};

use log::{debug, info};
use netsync_shared::{NetError, NetworkEvent, NetworkHooks, NetworkManager};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};

type ManagerFn<H> = Box<dyn FnOnce(&mut NetworkManager<H>) + Send>;

/// Messages sent from other tasks to the tick loop
pub enum RuntimeCommand<H: NetworkHooks> {
    Apply(ManagerFn<H>),
    Shutdown,
}

/// Cloneable access to a running [`NetworkRuntime`]
pub struct RuntimeHandle<H: NetworkHooks> {
    commands: mpsc::UnboundedSender<RuntimeCommand<H>>,
}

impl<H: NetworkHooks> Clone for RuntimeHandle<H> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
        }
    }
}

impl<H: NetworkHooks> RuntimeHandle<H> {
    /// Runs `f` against the manager before the next tick
    pub fn apply(&self, f: impl FnOnce(&mut NetworkManager<H>) + Send + 'static) -> Result<(), NetError> {
        self.commands
            .send(RuntimeCommand::Apply(Box::new(f)))
            .map_err(|_| NetError::NotRunning)
    }

    /// Like [`apply`](Self::apply) but waits for the result
    pub async fn query<R: Send + 'static>(
        &self,
        f: impl FnOnce(&mut NetworkManager<H>) -> R + Send + 'static,
    ) -> Result<R, NetError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.apply(move |manager| {
            let _ = tx.send(f(manager));
        })?;
        rx.await.map_err(|_| NetError::NotRunning)
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(RuntimeCommand::Shutdown);
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

pub struct NetworkRuntime<H: NetworkHooks> {
    manager: NetworkManager<H>,
    tick_duration: Duration,
    max_ticks: Option<u64>,
    ticks: u64,

    // Communication channels
    commands: mpsc::UnboundedReceiver<RuntimeCommand<H>>,
    events: mpsc::UnboundedSender<NetworkEvent>,
}

impl<H: NetworkHooks> NetworkRuntime<H> {
    /// Wraps a manager; the tick rate comes from its config
    pub fn new(
        manager: NetworkManager<H>,
    ) -> (Self, RuntimeHandle<H>, mpsc::UnboundedReceiver<NetworkEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let runtime = Self {
            tick_duration: manager.config().tick_duration(),
            manager,
            max_ticks: None,
            ticks: 0,
            commands: command_rx,
            events: event_tx,
        };
        (runtime, RuntimeHandle { commands: command_tx }, event_rx)
    }

    /// Stops on its own after `ticks` ticks
    pub fn with_tick_limit(mut self, ticks: u64) -> Self {
        self.max_ticks = Some(ticks);
        self
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Runs until shut down, every handle is dropped, or the tick limit is
    /// reached. Returns the manager so callers can inspect the final state.
    pub async fn run(mut self) -> NetworkManager<H> {
        let mut tick_interval = interval(self.tick_duration);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let report_every = u64::from(self.manager.config().tick_rate.max(1)) * 2;
        let mut last_tick = Instant::now();

        info!("Runtime started at {:?} per tick", self.tick_duration);

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    match command {
                        Some(RuntimeCommand::Apply(f)) => f(&mut self.manager),
                        Some(RuntimeCommand::Shutdown) | None => {
                            info!("Runtime shutting down");
                            break;
                        }
                    }
                },

                _ = tick_interval.tick() => {
                    let now = Instant::now();
                    let dt = now.duration_since(last_tick).as_secs_f32();
                    last_tick = now;

                    self.manager.tick();
                    self.ticks += 1;
                    self.forward_events();

                    if self.ticks % report_every == 0 {
                        debug!(
                            "Tick {}: {} clients, {} objects, {:.1}Hz",
                            self.ticks,
                            self.manager.connected_clients().len(),
                            self.manager.identities().len(),
                            if dt > 0.0 { 1.0 / dt } else { 0.0 }
                        );
                    }

                    if self.max_ticks.is_some_and(|limit| self.ticks >= limit) {
                        info!("Tick limit of {} reached", self.ticks);
                        break;
                    }
                },
            }
        }

        // Anything raised by commands after the last tick
        self.forward_events();
        self.manager
    }

    fn forward_events(&mut self) {
        for event in self.manager.drain_events() {
            if self.events.send(event).is_err() {
                // Nobody listening; drop the rest of this batch too
                break;
            }
        }
    }
}
