//! NDJSON command service for the deckhand engine.
//!
//! [`Service::tick`] is called once per simulation frame. It reads at most
//! one frame from the transport, decodes and validates it, runs the handler,
//! and then re-checks every pending completion. Commands that mutate the
//! simulation are answered from a later tick, once their completion holds;
//! everything else is answered in the tick it arrived.
//!
//! The engine is single-threaded: the simulation, the scheduler and the
//! transport are only ever touched from inside `tick`.

pub mod args;
pub mod client;
pub mod envelope;
pub mod handlers;
pub mod registry;
pub mod settle;
pub mod transport;

use std::path::Path;
use std::time::{Duration, Instant};

use chrono::Local;

use crate::runtime::error::{ApiError, ErrorCode, RuntimeError};
use crate::runtime::journal::{LogStart, RunLog};
use crate::runtime::scheduler::{self, Scheduler};
use crate::runtime::snapshot::Snapshotter;
use crate::runtime::storage::{CheckpointStore, Storage};
use crate::runtime::RuntimeConfig;
use crate::sim::Simulation;

use args::Arguments;
use handlers::{Context, Outcome};
use registry::{CommandKind, Registry};
use transport::{ConnectionId, Inbound, Transport};

/// Continuation stored with a pending completion.
#[derive(Debug)]
struct Pending {
    connection: ConnectionId,
    kind: CommandKind,
    log: Option<LogStart>,
}

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Frames read from the transport.
    pub frames: usize,
    /// Responses handed to the transport.
    pub responses: usize,
    /// Completions still pending after the tick.
    pub pending: usize,
}

/// Command service bound to one simulation type.
#[derive(Debug)]
pub struct Service<S> {
    registry: Registry<S>,
    scheduler: Scheduler<Pending>,
    snapshotter: Snapshotter,
    checkpoints: CheckpointStore,
    run_log: Option<RunLog>,
    hold: Duration,
    connection: Option<ConnectionId>,
}

fn timestamp_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn send<T: Transport + ?Sized>(
    transport: &mut T,
    connection: ConnectionId,
    line: &str,
    summary: &mut TickSummary,
) {
    match transport.send(connection, line) {
        Ok(()) => summary.responses += 1,
        Err(err) => tracing::warn!(%connection, error = %err, "response dropped"),
    }
}

impl<S: Simulation> Service<S> {
    /// Build a service from configuration. Opens a fresh run log under
    /// `<root>/runs/` when run logging is enabled.
    pub fn new(config: &RuntimeConfig) -> Result<Self, RuntimeError> {
        let storage = Storage::new(config.root.clone());
        let run_log = if config.log_runs {
            Some(RunLog::create_in(&storage.runs_dir(), Local::now())?)
        } else {
            None
        };

        Ok(Self {
            registry: Registry::new(),
            scheduler: Scheduler::new(config.completion_timeout()),
            snapshotter: Snapshotter::new(config.snapshot_policy()),
            checkpoints: CheckpointStore::for_storage(&storage),
            run_log,
            hold: config.settle_delay(),
            connection: None,
        })
    }

    /// Run one engine tick against `sim` and `transport`.
    pub fn tick<T: Transport + ?Sized>(
        &mut self,
        sim: &mut S,
        transport: &mut T,
        now: Instant,
    ) -> TickSummary {
        let mut summary = TickSummary::default();

        match transport.poll_frame() {
            Inbound::Idle => {}
            Inbound::Connected(id) => {
                tracing::debug!(connection = %id, "controller attached");
                self.connection = Some(id);
            }
            Inbound::Closed(id) => {
                if self.connection == Some(id) {
                    self.connection = None;
                }
                if self.scheduler.pending_count() > 0 {
                    tracing::info!(
                        connection = %id,
                        pending = self.scheduler.pending_count(),
                        "controller left with commands in flight"
                    );
                }
            }
            Inbound::Frame { connection, line } => {
                summary.frames += 1;
                self.dispatch(sim, transport, connection, &line, now, &mut summary);
            }
            Inbound::Malformed { connection, reason } => {
                summary.frames += 1;
                tracing::debug!(%reason, "rejected frame");
                let err = ApiError::new(
                    ErrorCode::InvalidEnvelope,
                    format!("Invalid UTF-8 in frame: {reason}"),
                );
                send(transport, connection, &envelope::encode_error(err, sim.phase()), &mut summary);
            }
        }

        self.resolve(sim, transport, now, &mut summary);
        summary.pending = self.scheduler.pending_count();
        summary
    }

    fn dispatch<T: Transport + ?Sized>(
        &mut self,
        sim: &mut S,
        transport: &mut T,
        connection: ConnectionId,
        line: &str,
        now: Instant,
        summary: &mut TickSummary,
    ) {
        let envelope = match envelope::decode(line) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::debug!(error = %err, "rejected frame");
                send(transport, connection, &envelope::encode_error(err, sim.phase()), summary);
                return;
            }
        };

        let args = Arguments::new(&envelope.arguments);
        let command = match self.registry.validate(&envelope.name, sim.phase(), &args) {
            Ok(command) => command,
            Err(err) => {
                tracing::debug!(command = %envelope.name, error = %err, "rejected command");
                send(transport, connection, &envelope::encode_error(err, sim.phase()), summary);
                return;
            }
        };
        let kind = command.spec.kind;

        if kind.is_reset() {
            for (key, pending) in self.scheduler.abort_all() {
                tracing::info!(command = %key, "completion aborted by {}", kind.name());
                let err = ApiError::new(
                    ErrorCode::CompletionAborted,
                    format!("Command aborted by {}", kind.name()),
                )
                .with("command", pending.kind.name());
                send(transport, pending.connection, &envelope::encode_error(err, sim.phase()), summary);
                self.abandon_log(pending.log);
            }
        } else if self.scheduler.is_pending(kind.name()) {
            let err = ApiError::new(
                ErrorCode::CommandPending,
                "Command already awaiting completion",
            )
            .with("command", kind.name());
            send(transport, connection, &envelope::encode_error(err, sim.phase()), summary);
            return;
        }

        let log = match (self.run_log.as_mut(), command.spec.mutates) {
            (Some(run_log), true) => Some(run_log.begin(
                envelope.to_call(),
                self.snapshotter.snapshot(&*sim),
                timestamp_ms(),
            )),
            _ => None,
        };

        tracing::debug!(command = %kind.name(), "dispatching");
        let mut ctx = Context {
            snapshotter: &self.snapshotter,
            checkpoints: &self.checkpoints,
            hold: self.hold,
        };
        match (command.handler)(sim, &args, &mut ctx) {
            Ok(Outcome::Immediate(value)) => {
                if let Some(start) = log {
                    self.finish_log(start, value.clone());
                }
                send(transport, connection, &envelope::encode(&value), summary);
            }
            Ok(Outcome::Deferred(completion)) => {
                let pending = Pending {
                    connection,
                    kind,
                    log,
                };
                if let Err((err, pending)) = self.scheduler.register(kind.name(), completion, pending, now) {
                    let err = ApiError::new(ErrorCode::CommandPending, err.to_string())
                        .with("command", kind.name());
                    send(transport, connection, &envelope::encode_error(err, sim.phase()), summary);
                    self.abandon_log(pending.log);
                }
            }
            Err(err) => {
                if let (Some(run_log), Some(start)) = (self.run_log.as_mut(), log) {
                    // Rejected before mutating: nothing to record.
                    run_log.discard(start);
                }
                tracing::debug!(command = %kind.name(), error = %err, "command failed");
                send(transport, connection, &envelope::encode_error(err, sim.phase()), summary);
            }
        }
    }

    fn resolve<T: Transport + ?Sized>(
        &mut self,
        sim: &S,
        transport: &mut T,
        now: Instant,
        summary: &mut TickSummary,
    ) {
        for resolution in self.scheduler.poll(sim, now) {
            let Pending {
                connection,
                kind,
                log,
            } = resolution.continuation;

            let line = match resolution.outcome {
                scheduler::Outcome::Settled => {
                    let state = self.snapshotter.snapshot(sim);
                    tracing::debug!(
                        command = %kind.name(),
                        waited_ms = resolution.waited.as_millis() as u64,
                        "completion settled"
                    );
                    if let Some(start) = log {
                        self.finish_log(start, state.clone());
                    }
                    envelope::encode(&state)
                }
                scheduler::Outcome::TimedOut => {
                    let waited_ms = resolution.waited.as_millis() as u64;
                    tracing::warn!(command = %kind.name(), waited_ms, "completion timed out");
                    let err = ApiError::new(
                        ErrorCode::CompletionTimeout,
                        "Command did not complete in time",
                    )
                    .with("command", kind.name())
                    .with("waited_ms", waited_ms);
                    self.abandon_log(log);
                    envelope::encode_error(err, sim.phase())
                }
            };
            send(transport, connection, &line, summary);
        }
    }

    fn finish_log(&mut self, start: LogStart, state_after: serde_json::Value) {
        let Some(run_log) = self.run_log.as_mut() else {
            return;
        };
        let command = start.function().name.clone();
        if let Err(err) = run_log.finish(start, state_after, timestamp_ms()) {
            tracing::warn!(command = %command, error = %err, "run log write failed");
        }
    }

    fn abandon_log(&mut self, start: Option<LogStart>) {
        if let (Some(run_log), Some(start)) = (self.run_log.as_mut(), start) {
            run_log.abandon(start);
        }
    }

    /// Completions awaiting their condition.
    pub fn pending_count(&self) -> usize {
        self.scheduler.pending_count()
    }

    /// Currently attached controller.
    pub fn connection(&self) -> Option<ConnectionId> {
        self.connection
    }

    /// File the run log is written to, if logging is enabled.
    pub fn run_log_path(&self) -> Option<&Path> {
        self.run_log.as_ref().map(RunLog::path)
    }

    /// Command table.
    pub fn registry(&self) -> &Registry<S> {
        &self.registry
    }
}
