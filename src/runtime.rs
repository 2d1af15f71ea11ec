//! Single-threaded cooperative shell around the reconciler.
//!
//! One tokio task owns all tracker state. Transport commands and timer
//! expirations interleave only at `select!` granularity, so tracker maps need
//! no locks and per-tile ordering follows arrival order: a `load` fully
//! completes (cancel-all, install-all, one broadcast) before any later
//! command or fire is processed.

use std::collections::HashMap;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::clock::{Clock, SharedClock};
use crate::config::GrowthConfig;
use crate::coord::TileCoord;
use crate::events::{self, EngineEvent, EventReceiver};
use crate::reconcile::TileReconciler;

/// Messages from the transport collaborator.
#[derive(Debug)]
pub enum Command {
    /// Full authoritative state, keyed by `"x,y"`.
    InitialSnapshot { tiles: HashMap<String, Value> },
    /// Partial per-tile update.
    TileUpdated { x: i32, y: i32, fields: Value },
    /// Cancel all timers, emit final empty snapshots, stop the loop.
    Shutdown,
}

const EVENT_CAPACITY: usize = 256;
const COMMAND_CAPACITY: usize = 64;

/// Handle to a running engine loop: submit commands, subscribe to events.
pub struct EngineHandle {
    commands: mpsc::Sender<Command>,
    events: events::EventSender,
    task: JoinHandle<()>,
}

impl EngineHandle {
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// A cloneable command submitter for the transport collaborator.
    pub fn commands(&self) -> mpsc::Sender<Command> {
        self.commands.clone()
    }

    /// Submit one command; returns false if the loop has already stopped.
    pub async fn apply(&self, command: Command) -> bool {
        self.commands.send(command).await.is_ok()
    }

    /// Graceful stop: request shutdown and wait for the loop to finish.
    pub async fn shutdown(self) {
        let _ = self.commands.send(Command::Shutdown).await;
        let _ = self.task.await;
    }
}

/// Spawn the engine loop on the current runtime.
pub fn spawn(clock: SharedClock, growth_config: GrowthConfig) -> EngineHandle {
    let (events, _) = broadcast::channel(EVENT_CAPACITY);
    let (commands, command_rx) = mpsc::channel(COMMAND_CAPACITY);
    let engine = TileReconciler::new(clock.clone(), growth_config, events.clone());
    let task = tokio::spawn(run_loop(engine, clock, command_rx));
    EngineHandle {
        commands,
        events,
        task,
    }
}

async fn run_loop(
    mut engine: TileReconciler,
    clock: SharedClock,
    mut commands: mpsc::Receiver<Command>,
) {
    info!("tile engine loop started");
    loop {
        let deadline = engine.next_deadline();
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::InitialSnapshot { tiles }) => {
                    engine.apply_initial_snapshot(&tiles);
                }
                Some(Command::TileUpdated { x, y, fields }) => {
                    engine.apply_update(TileCoord::new(x, y), fields);
                }
                Some(Command::Shutdown) | None => break,
            },
            // Guarded so the sleep future is only polled when a deadline
            // exists; a deadline already in the past still yields to the
            // scheduler once, keeping fires asynchronous to their schedulers.
            () = sleep_until(&*clock, deadline), if deadline.is_some() => {
                engine.fire_due(clock.now());
            }
        }
    }
    engine.shutdown();
    debug!("tile engine loop stopped");
}

async fn sleep_until(clock: &dyn Clock, deadline: Option<DateTime<Utc>>) {
    let Some(at) = deadline else {
        // Never polled: the select! branch is disabled without a deadline.
        return;
    };
    let delay = (at - clock.now()).to_std().unwrap_or(StdDuration::ZERO);
    tokio::time::sleep(delay).await;
}

/// Receive events until one matches the predicate. Lagged gaps are logged
/// and skipped; `None` means every sender is gone.
pub async fn next_matching<F>(rx: &mut EventReceiver, mut predicate: F) -> Option<EngineEvent>
where
    F: FnMut(&EngineEvent) -> bool,
{
    loop {
        match rx.recv().await {
            Ok(event) if predicate(&event) => return Some(event),
            Ok(_) => continue,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "observer lagged behind engine events");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}
