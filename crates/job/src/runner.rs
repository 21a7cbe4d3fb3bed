//! Job control loop with checkpointing and resume

use checkpoint::{MultiNodeSnapshotManager, SnapshotController, SnapshotManager};
use runtime_core::{Epoch, Error, Executor, Result, RuntimeConfig, RuntimeManager, TaskGroup};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::job::Job;

/// Phase of a [`JobRunner`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    /// Not started yet
    Starting,

    /// Running the init group on a fresh run
    Initializing,

    /// Restoring state from a checkpoint
    Resuming,

    /// Running the epoch group
    RunningEpoch(Epoch),

    /// Persisting the state reached after an epoch (0 after init)
    Snapshotting(Epoch),

    /// A stop signal fired at the end of this epoch
    Stopped(Epoch),

    /// Running the exit group
    Exiting(Epoch),

    /// Finished after this epoch
    Done(Epoch),
}

/// Drives a [`Job`] through init, the epoch loop and exit.
///
/// With a snapshot controller the state reached after init is saved as
/// epoch 0 and the state after every epoch `e` as epoch `e`. Resuming from
/// `e` skips init, loads checkpoint `e` and continues with epoch `e + 1`.
pub struct JobRunner {
    job: Job,
    snapshot: Option<Box<dyn SnapshotController>>,
    resume_from_epoch: Option<Epoch>,
    state: RunnerState,
}

impl JobRunner {
    pub fn new(job: Job) -> Self {
        Self {
            job,
            snapshot: None,
            resume_from_epoch: None,
            state: RunnerState::Starting,
        }
    }

    /// Checkpoint the job through `snapshot`
    pub fn with_snapshot<S>(mut self, snapshot: S) -> Self
    where
        S: SnapshotController + 'static,
    {
        self.snapshot = Some(Box::new(snapshot));
        self
    }

    /// Resume after the checkpoint of `epoch`
    pub fn resume_from(mut self, epoch: Epoch) -> Self {
        self.resume_from_epoch = Some(epoch);
        self
    }

    /// Runner wired from the `job` and `snapshot` sections of `config`
    pub fn from_config(job: Job, config: &RuntimeConfig) -> Result<Self> {
        config.validate()?;

        let mut runner = Self::new(job);
        let snapshot = &config.snapshot;
        if snapshot.enabled {
            runner.snapshot = Some(if snapshot.multi_node {
                Box::new(MultiNodeSnapshotManager::new(
                    snapshot.db_prefix.clone(),
                    snapshot.db_type,
                ))
            } else {
                Box::new(SnapshotManager::new(
                    snapshot.db_prefix.clone(),
                    snapshot.db_type,
                ))
            });
        }
        runner.resume_from_epoch = config.job.resume_from_epoch;
        Ok(runner)
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    fn transition(&mut self, state: RunnerState) {
        debug!(from = ?self.state, to = ?state, "Job runner state change");
        self.state = state;
    }

    /// Run the job to completion, returning the last epoch executed
    pub async fn run(&mut self, executor: &dyn Executor) -> Result<Epoch> {
        let start = Instant::now();
        let from_scratch = self.resume_from_epoch.is_none();

        if from_scratch {
            self.transition(RunnerState::Initializing);
            info!(tasks = self.job.init_group().len(), "Running init group");
            execute(executor, self.job.init_group(), "init").await?;
        } else {
            self.transition(RunnerState::Resuming);
            if self.snapshot.is_none() {
                warn!(
                    resume_from_epoch = ?self.resume_from_epoch,
                    "Resuming without a snapshot manager, nothing will be restored"
                );
            }
        }

        if let Some(snapshot) = self.snapshot.as_mut() {
            let nodes = self.job.init_group().used_nodes();
            info!(nodes = ?nodes, "Preparing snapshot");
            if let Some(group) = snapshot.init(&nodes, self.resume_from_epoch)? {
                execute(executor, &group, "snapshot_init").await?;
            }
        }

        match self.resume_from_epoch {
            None => {
                if self.snapshot.is_some() {
                    self.transition(RunnerState::Snapshotting(0));
                    info!("Saving first snapshot");
                    self.save(executor, 0).await?;
                }
            }
            Some(epoch) => {
                if let Some(snapshot) = self.snapshot.as_ref() {
                    info!(epoch, "Loading snapshot");
                    let group = snapshot.load(epoch)?;
                    execute(executor, &group, "snapshot_load").await?;
                }
            }
        }

        let mut epoch = self.resume_from_epoch.map_or(1, |e| e + 1);
        loop {
            self.transition(RunnerState::RunningEpoch(epoch));
            info!(epoch, "Running epoch");
            execute(executor, self.job.epoch_group(), "epoch").await?;

            let stop = self.stop_requested()?;

            if self.snapshot.is_some() {
                self.transition(RunnerState::Snapshotting(epoch));
                self.save(executor, epoch).await?;
            }

            if stop {
                self.transition(RunnerState::Stopped(epoch));
                info!(epoch, "Stopping");
                break;
            }
            epoch += 1;
        }

        self.transition(RunnerState::Exiting(epoch));
        info!(epoch, "Running exit group");
        execute(executor, self.job.exit_group(), "exit").await?;

        self.transition(RunnerState::Done(epoch));
        info!(
            epoch,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Job finished"
        );
        Ok(epoch)
    }

    /// Run on `runtime`, blocking the calling thread
    pub fn run_blocking(&mut self, runtime: &RuntimeManager, executor: &dyn Executor) -> Result<Epoch> {
        runtime.block_on(self.run(executor))
    }

    /// Every stop signal is read; the loop stops if any is true
    fn stop_requested(&self) -> Result<bool> {
        let mut stop = false;
        for signal in self.job.stop_signals() {
            if signal.fetch()?.as_bool(signal.blob())? {
                debug!(blob = signal.blob(), "Stop signal fired");
                stop = true;
            }
        }
        Ok(stop)
    }

    async fn save(&self, executor: &dyn Executor, epoch: Epoch) -> Result<()> {
        let snapshot = self.snapshot.as_ref().ok_or(Error::SnapshotNotInitialized)?;
        let group = snapshot.save(epoch)?;
        execute(executor, &group, "snapshot_save").await
    }
}

async fn execute(executor: &dyn Executor, group: &TaskGroup, phase: &str) -> Result<()> {
    debug!(phase, tasks = group.len(), nodes = ?group.used_nodes(), "Executing task group");
    executor.run(group).await
}
