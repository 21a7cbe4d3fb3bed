//! Stop a job after a fixed number of epochs

use runtime_core::{Error, Result, Step, Task, TaskOutput};
use tracing::debug;

use crate::job::Job;

/// Stop the current job after `num_epochs` epochs.
///
/// Creates a counter in the init group and counts it down once per epoch;
/// the countdown's `finished` flag becomes a stop signal. Must be called
/// while a job is entered.
pub fn epoch_limiter(num_epochs: u64) -> Result<TaskOutput> {
    if num_epochs == 0 {
        return Err(Error::InvalidConfig {
            message: "epoch limit must be at least 1".to_string(),
        });
    }
    let job = Job::current()?;
    let init_count = i64::try_from(num_epochs - 1).map_err(|_| Error::InvalidConfig {
        message: format!("epoch limit {} is too large", num_epochs),
    })?;

    let counter = job.unique_name("epoch_counter");
    job.init_group().add(Task::new(
        "epoch_limiter_init",
        Step::new().create_counter(counter.clone(), init_count),
    ));

    let finished = format!("{}/finished", counter);
    let outputs = job.epoch_group().add(
        Task::new(
            "epoch_countdown",
            Step::new().count_down(counter.clone(), finished.clone()),
        )
        .with_outputs([finished]),
    );
    let output = outputs.into_iter().next().ok_or_else(|| Error::Internal {
        message: "epoch countdown task has no output".to_string(),
    })?;

    debug!(counter = %counter, num_epochs, "Added epoch limiter");
    job.add_stop_signal(output)
}
