//! Job definition: init, epoch and exit task groups plus stop signals
//!
//! Jobs are context driven. While a job is entered, builder code can reach
//! it through [`Job::current`] and tasks attached with
//! [`Task::attach`](runtime_core::Task::attach) land in its epoch group.
//!
//! ```
//! use job::Job;
//! use runtime_core::{Step, Task, Value};
//!
//! # fn main() -> runtime_core::Result<()> {
//! let job = Job::new();
//! {
//!     let _job = job.enter();
//!     {
//!         let _init = Job::current()?.init_group().enter();
//!         Task::new("init_weights", Step::new().run("zeros", |ws| {
//!             ws.set("weights", Value::Float(0.0));
//!             Ok(())
//!         }))
//!         .attach()?;
//!     }
//!     job::epoch_limiter(10)?;
//! }
//! assert_eq!(job.stop_signals().len(), 1);
//! # Ok(())
//! # }
//! ```

use parking_lot::Mutex;
use runtime_core::scope::{self, ScopeGuard, ScopeStack};
use runtime_core::{BlobName, Error, Result, Step, Task, TaskGroup, TaskOutput};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

thread_local! {
    static JOBS: ScopeStack<Job> = const { RefCell::new(Vec::new()) };
}

/// Something a job can stop on
#[derive(Debug, Clone)]
pub enum StopSignal {
    /// Blob read at the end of every epoch
    Blob(BlobName),

    /// Output of a task already registered somewhere in the job
    Output(TaskOutput),
}

impl From<TaskOutput> for StopSignal {
    fn from(output: TaskOutput) -> Self {
        StopSignal::Output(output)
    }
}

impl From<&TaskOutput> for StopSignal {
    fn from(output: &TaskOutput) -> Self {
        StopSignal::Output(output.clone())
    }
}

impl From<&str> for StopSignal {
    fn from(blob: &str) -> Self {
        StopSignal::Blob(blob.to_string())
    }
}

impl From<String> for StopSignal {
    fn from(blob: String) -> Self {
        StopSignal::Blob(blob)
    }
}

#[derive(Debug)]
struct JobInner {
    /// Runs once at startup, on the global workspace
    init_group: TaskGroup,

    /// Runs once per epoch
    epoch_group: TaskGroup,

    /// Runs once after the last epoch
    exit_group: TaskGroup,

    stop_signals: Mutex<Vec<TaskOutput>>,

    /// Uses of each base name handed out by `unique_name`
    names: Mutex<HashMap<String, usize>>,
}

/// Three task groups run by a [`JobRunner`](crate::JobRunner)
///
/// Cloning is cheap; clones refer to the same job.
#[derive(Debug, Clone)]
pub struct Job {
    inner: Arc<JobInner>,
}

impl Default for Job {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps a job current until dropped
#[must_use = "the job is exited as soon as the guard is dropped"]
pub struct JobGuard {
    _job: ScopeGuard<Job>,
    _epoch: ScopeGuard<TaskGroup>,
}

impl Job {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(JobInner {
                init_group: TaskGroup::global(),
                epoch_group: TaskGroup::private(),
                exit_group: TaskGroup::private(),
                stop_signals: Mutex::new(Vec::new()),
                names: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn init_group(&self) -> &TaskGroup {
        &self.inner.init_group
    }

    pub fn epoch_group(&self) -> &TaskGroup {
        &self.inner.epoch_group
    }

    pub fn exit_group(&self) -> &TaskGroup {
        &self.inner.exit_group
    }

    /// Make this the current job and its epoch group the default target
    /// for new tasks
    pub fn enter(&self) -> JobGuard {
        JobGuard {
            _job: scope::enter(&JOBS, self.clone()),
            _epoch: self.inner.epoch_group.enter(),
        }
    }

    /// Innermost entered job
    pub fn current() -> Result<Job> {
        scope::current(&JOBS).ok_or(Error::NoActiveJob)
    }

    /// Stop the epoch loop once `signal` reads true at the end of an epoch.
    ///
    /// A blob name is wrapped into a single-output task in the epoch group.
    pub fn add_stop_signal(&self, signal: impl Into<StopSignal>) -> Result<TaskOutput> {
        let output = match signal.into() {
            StopSignal::Output(output) => output,
            StopSignal::Blob(blob) => {
                if blob.is_empty() {
                    return Err(Error::InvalidStopSignal {
                        message: "blob name is empty".to_string(),
                    });
                }
                let task = Task::new(format!("stop_signal:{}", blob), Step::new())
                    .with_outputs([blob.clone()]);
                self.inner
                    .epoch_group
                    .add(task)
                    .pop()
                    .ok_or_else(|| Error::Internal {
                        message: format!("stop signal task for {} has no output", blob),
                    })?
            }
        };

        debug!(blob = output.blob(), "Registered stop signal");
        self.inner.stop_signals.lock().push(output.clone());
        Ok(output)
    }

    /// Stop signals in registration order
    pub fn stop_signals(&self) -> Vec<TaskOutput> {
        self.inner.stop_signals.lock().clone()
    }

    /// Blob name derived from `base`, unique within this job.
    ///
    /// Names depend only on the order of calls, so rebuilding the same job
    /// for a resumed run yields the same names the checkpoint holds.
    pub fn unique_name(&self, base: &str) -> String {
        let mut names = self.inner.names.lock();
        let uses = names.entry(base.to_string()).or_insert(0);
        let name = match *uses {
            0 => base.to_string(),
            n => format!("{}_{}", base, n),
        };
        *uses += 1;
        name
    }

    /// True if both handles refer to the same job
    pub fn ptr_eq(&self, other: &Job) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runtime_core::{Value, WorkspaceType};

    #[test]
    fn test_current_requires_entered_job() {
        assert!(matches!(Job::current(), Err(Error::NoActiveJob)));

        let job = Job::new();
        {
            let _guard = job.enter();
            assert!(Job::current().unwrap().ptr_eq(&job));
        }
        assert!(Job::current().is_err());
    }

    #[test]
    fn test_nested_jobs() {
        let outer = Job::new();
        let inner = Job::new();

        let _o = outer.enter();
        {
            let _i = inner.enter();
            assert!(Job::current().unwrap().ptr_eq(&inner));
            Task::new("inner_work", Step::new()).attach().unwrap();
        }
        assert!(Job::current().unwrap().ptr_eq(&outer));
        Task::new("outer_work", Step::new()).attach().unwrap();

        assert_eq!(inner.epoch_group().len(), 1);
        assert_eq!(outer.epoch_group().len(), 1);
    }

    #[test]
    fn test_group_workspace_types() {
        let job = Job::new();
        assert_eq!(job.init_group().workspace_type(), WorkspaceType::Global);
        assert_eq!(job.epoch_group().workspace_type(), WorkspaceType::Private);
        assert_eq!(job.exit_group().workspace_type(), WorkspaceType::Private);
    }

    #[test]
    fn test_stop_signal_from_blob_registers_task() {
        let job = Job::new();
        let output = job.add_stop_signal("data_finished").unwrap();

        assert_eq!(output.blob(), "data_finished");
        assert_eq!(job.epoch_group().len(), 1);
        let task = &job.epoch_group().tasks()[0];
        assert!(task.step().is_empty());
        assert!(task.outputs()[0].ptr_eq(&output));
    }

    #[test]
    fn test_stop_signal_from_output() {
        let job = Job::new();
        let outputs = job
            .epoch_group()
            .add(Task::new("reader", Step::new()).with_outputs(["done"]));

        let output = job.add_stop_signal(&outputs[0]).unwrap();
        assert!(output.ptr_eq(&outputs[0]));
        assert_eq!(job.epoch_group().len(), 1);
        assert_eq!(job.stop_signals().len(), 1);

        outputs[0].resolve(Value::Bool(true));
        assert_eq!(job.stop_signals()[0].fetch().unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_empty_blob_stop_signal_rejected() {
        let job = Job::new();
        let err = job.add_stop_signal("").unwrap_err();
        assert!(matches!(err, Error::InvalidStopSignal { .. }));
        assert!(job.stop_signals().is_empty());
    }

    #[test]
    fn test_unique_name_is_deterministic() {
        let a = Job::new();
        let b = Job::new();
        for job in [&a, &b] {
            assert_eq!(job.unique_name("epoch_counter"), "epoch_counter");
            assert_eq!(job.unique_name("epoch_counter"), "epoch_counter_1");
            assert_eq!(job.unique_name("other"), "other");
        }
    }
}
