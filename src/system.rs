//! System wiring and pump lifecycle.
//!
//! A [`System`] declares the components of a deployment: applications
//! registered for typed lookup, and one pipe per application→follower
//! pipeline. [`Runner::start`] turns each pipe into a pump task that pulls
//! batches through the follower whenever the upstream store commits, with a
//! bounded idle sleep as fallback. [`Runner::stop`] is cooperative: pumps
//! observe the stop signal between batches, so an in-flight batch always
//! finishes committing and no partial projection is ever observable.
//!
//! There is no ambient global; the runner is constructed once at startup
//! and handed by reference to whoever needs command/query access.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    time::Duration,
};

use thiserror::Error;
use tokio::{sync::watch, task::JoinHandle};

use crate::follower::{Follower, Policy};

/// Tuning for pump loops.
#[derive(Clone, Copy, Debug)]
pub struct PumpConfig {
    /// Idle sleep between polls when no commit notification arrives.
    pub poll_interval: Duration,
    /// Maximum notifications pulled per batch.
    pub batch_size: usize,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            batch_size: 64,
        }
    }
}

/// Error surfaced by the runner lifecycle.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// A pump halted on a replay failure. The follower's tracking position
    /// is parked just before the failing notification; operator
    /// intervention is required before restarting.
    #[error("pump `{pipe}` halted: {source}")]
    Pump {
        pipe: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// A pump task panicked.
    #[error("pump `{pipe}` panicked")]
    Panicked { pipe: &'static str },
    /// A pump exited before reaching the requested position.
    #[error("pump `{pipe}` halted before catching up")]
    Halted { pipe: &'static str },
}

type PumpResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;
type SpawnFn =
    Box<dyn FnOnce(PumpConfig, watch::Receiver<bool>, watch::Sender<u64>) -> JoinHandle<PumpResult> + Send>;

struct Pipe {
    name: &'static str,
    upstream: watch::Receiver<u64>,
    initial_processed: u64,
    spawn: SpawnFn,
}

/// Declarative wiring of applications and follower pipelines.
#[derive(Default)]
pub struct System {
    registry: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
    pipes: Vec<Pipe>,
}

impl System {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component for typed lookup via [`Runner::get`].
    #[must_use]
    pub fn register<T>(mut self, component: T) -> Self
    where
        T: Clone + Send + Sync + 'static,
    {
        self.registry
            .insert(TypeId::of::<T>(), Box::new(component));
        self
    }

    /// Add an application→follower pipeline.
    ///
    /// The follower's upstream log determines which store's commits wake
    /// the pump.
    #[must_use]
    pub fn pipe<P>(mut self, follower: Follower<P>) -> Self
    where
        P: Policy + Send + Sync + 'static,
    {
        let name = follower.name();
        let upstream = follower.upstream().watch();
        let initial_processed = follower.position().map_or(0, |position| position + 1);
        let spawn: SpawnFn = Box::new(move |config, stop, processed| {
            tokio::spawn(run_pump(follower, config, stop, processed))
        });
        self.pipes.push(Pipe {
            name,
            upstream,
            initial_processed,
            spawn,
        });
        self
    }
}

impl std::fmt::Debug for System {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("System")
            .field("components", &self.registry.len())
            .field("pipes", &self.pipes.len())
            .finish()
    }
}

struct Pump {
    name: &'static str,
    task: JoinHandle<PumpResult>,
    processed: watch::Receiver<u64>,
    upstream: watch::Receiver<u64>,
}

/// Owns the pump tasks of a running [`System`].
///
/// Dropping the runner does not stop the pumps; call
/// [`stop`](Runner::stop) for a graceful shutdown that joins every task.
pub struct Runner {
    registry: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
    pumps: Vec<Pump>,
    stop: watch::Sender<bool>,
}

impl Runner {
    /// Start one pump task per pipe.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn start(system: System, config: PumpConfig) -> Self {
        let (stop, _) = watch::channel(false);
        let pumps = system
            .pipes
            .into_iter()
            .map(|pipe| {
                let (processed_tx, processed) = watch::channel(pipe.initial_processed);
                let task = (pipe.spawn)(config, stop.subscribe(), processed_tx);
                tracing::info!(pipe = pipe.name, "pump started");
                Pump {
                    name: pipe.name,
                    task,
                    processed,
                    upstream: pipe.upstream,
                }
            })
            .collect();
        Self {
            registry: system.registry,
            pumps,
            stop,
        }
    }

    /// Look up a registered component by type.
    #[must_use]
    pub fn get<T>(&self) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.registry
            .get(&TypeId::of::<T>())
            .and_then(|component| component.downcast_ref::<T>())
            .cloned()
    }

    /// Whether any pump task is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.pumps.iter().any(|pump| !pump.task.is_finished())
    }

    /// Wait until every follower has processed at least everything that was
    /// committed upstream when this call was made.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::Halted`] when a pump exited (for example on a
    /// replay failure) before reaching the target position.
    pub async fn wait_until_caught_up(&self) -> Result<(), RunnerError> {
        for pump in &self.pumps {
            let target = *pump.upstream.borrow();
            let mut processed = pump.processed.clone();
            processed
                .wait_for(|&count| count >= target)
                .await
                .map_err(|_| RunnerError::Halted { pipe: pump.name })?;
        }
        Ok(())
    }

    /// Signal every pump to exit after its current batch, then join them.
    ///
    /// # Errors
    ///
    /// Returns the first pump fault or panic encountered while joining.
    pub async fn stop(self) -> Result<(), RunnerError> {
        self.stop.send_replace(true);
        for pump in self.pumps {
            match pump.task.await {
                Ok(Ok(())) => tracing::info!(pipe = pump.name, "pump stopped"),
                Ok(Err(source)) => {
                    return Err(RunnerError::Pump {
                        pipe: pump.name,
                        source,
                    });
                }
                Err(_) => return Err(RunnerError::Panicked { pipe: pump.name }),
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("pumps", &self.pumps.len())
            .finish()
    }
}

async fn run_pump<P>(
    follower: Follower<P>,
    config: PumpConfig,
    mut stop: watch::Receiver<bool>,
    processed: watch::Sender<u64>,
) -> PumpResult
where
    P: Policy + Send + Sync + 'static,
{
    let mut feed = follower.upstream().watch();
    loop {
        if *stop.borrow() {
            return Ok(());
        }

        match follower.pull(config.batch_size) {
            Ok(Some(batch)) => {
                processed.send_replace(batch.last_position + 1);
                // Keep draining; the stop signal is re-checked between
                // batches so an in-flight batch always completes.
                continue;
            }
            Ok(None) => {}
            Err(error) => {
                tracing::error!(
                    follower = follower.name(),
                    error = %error,
                    "pump halted by replay failure"
                );
                return Err(error.into());
            }
        }

        tokio::select! {
            biased;
            result = stop.changed() => {
                // A closed stop channel means the runner is gone and the
                // pump can never be signalled again; exit instead of
                // spinning.
                if result.is_err() {
                    return Ok(());
                }
            }
            _ = feed.changed() => {}
            () = tokio::time::sleep(config.poll_interval) => {}
        }
    }
}
