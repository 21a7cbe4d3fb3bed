use anyhow::Result;
use checkpoint::{latest_epoch, list_epochs, prune, read_checkpoint, SnapshotManager, BLOB_NAMES};
use job::{epoch_limiter, Job, JobRunner, LocalExecutor};
use runtime_core::{
    CheckpointLocation, DbType, Error, Step, Task, Tensor, Value,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use storage::{LocalStorage, MemoryStorage, StorageBackend, StorageHandle};

/// Counts how often the init and train steps ran
#[derive(Default)]
struct Calls {
    init: AtomicUsize,
    train: AtomicUsize,
}

// Toy training job: four weights nudged by 0.5 each epoch plus a step counter.
// With `crash_at` set, the epoch in which `step` reaches that value fails.
fn training_job(num_epochs: u64, crash_at: Option<i64>, calls: Arc<Calls>) -> Result<Job> {
    let job = Job::new();
    {
        let _job = job.enter();
        {
            let _init = job.init_group().enter();
            let calls = calls.clone();
            Task::new(
                "init_model",
                Step::new().run("init", move |ws| {
                    calls.init.fetch_add(1, Ordering::SeqCst);
                    ws.set("weights", Value::Tensor(Tensor::zeros(vec![4])));
                    ws.set("step", Value::Int(0));
                    Ok(())
                }),
            )
            .attach()?;
        }

        Task::new(
            "train",
            Step::new().run("sgd", move |ws| {
                calls.train.fetch_add(1, Ordering::SeqCst);
                ws.update("weights", |v| {
                    for w in v.as_tensor_mut("weights")?.data.iter_mut() {
                        *w += 0.5;
                    }
                    Ok(())
                })?;
                ws.update("step", |v| {
                    *v = Value::Int(v.as_int("step")? + 1);
                    Ok(())
                })?;
                Ok(())
            }),
        )
        .attach()?;

        if let Some(crash_at) = crash_at {
            Task::new(
                "crash",
                Step::new().run("crash", move |ws| {
                    if ws.fetch("step")?.as_int("step")? == crash_at {
                        return Err(Error::Internal {
                            message: "simulated node loss".to_string(),
                        });
                    }
                    Ok(())
                }),
            )
            .attach()?;
        }

        epoch_limiter(num_epochs)?;
    }
    Ok(job)
}

fn snapshot() -> SnapshotManager {
    SnapshotManager::new("run", DbType::Binary)
}

async fn checkpoint_state(storage: &dyn StorageBackend, epoch: u64) -> Result<checkpoint::BlobMap> {
    let location = CheckpointLocation::new("run", epoch, DbType::Binary);
    let names = read_checkpoint(storage, &location, &[BLOB_NAMES.to_string()]).await?;
    let names = names[BLOB_NAMES].as_strings(BLOB_NAMES)?.to_vec();
    Ok(read_checkpoint(storage, &location, &names).await?)
}

#[tokio::test]
async fn test_fresh_run_persists_every_epoch() -> Result<()> {
    runtime_core::logging::init_tracing();
    let storage: StorageHandle = Arc::new(MemoryStorage::new());
    let executor = LocalExecutor::new(storage.clone());
    let calls = Arc::new(Calls::default());

    let job = training_job(3, None, calls.clone())?;
    let last = JobRunner::new(job).with_snapshot(snapshot()).run(&executor).await?;

    assert_eq!(last, 3);
    assert_eq!(calls.init.load(Ordering::SeqCst), 1);
    assert_eq!(calls.train.load(Ordering::SeqCst), 3);
    assert_eq!(list_epochs(storage.as_ref(), "run").await?, vec![0, 1, 2, 3]);

    let initial = checkpoint_state(storage.as_ref(), 0).await?;
    assert_eq!(initial["step"], Value::Int(0));
    let last_state = checkpoint_state(storage.as_ref(), 3).await?;
    assert_eq!(last_state["step"], Value::Int(3));
    assert_eq!(
        last_state["weights"],
        Value::Tensor(Tensor::new(vec![4], vec![1.5; 4])?)
    );
    // Blob names discovered at init, the names blob included
    assert_eq!(
        last_state[BLOB_NAMES],
        Value::Strings(vec![
            "epoch_counter".to_string(),
            BLOB_NAMES.to_string(),
            "step".to_string(),
            "weights".to_string(),
        ])
    );
    Ok(())
}

#[tokio::test]
async fn test_resume_matches_uninterrupted_run() -> Result<()> {
    // Reference run
    let reference: StorageHandle = Arc::new(MemoryStorage::new());
    let job = training_job(3, None, Arc::new(Calls::default()))?;
    JobRunner::new(job)
        .with_snapshot(snapshot())
        .run(&LocalExecutor::new(reference.clone()))
        .await?;

    // Interrupted during epoch 2, leaving checkpoints 0 and 1
    let storage: StorageHandle = Arc::new(MemoryStorage::new());
    let job = training_job(3, Some(2), Arc::new(Calls::default()))?;
    let err = JobRunner::new(job)
        .with_snapshot(snapshot())
        .run(&LocalExecutor::new(storage.clone()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::TaskFailed { ref task, .. } if task == "crash"));
    assert_eq!(latest_epoch(storage.as_ref(), "run").await?, Some(1));

    // Restart with fresh workspaces from the latest checkpoint
    let calls = Arc::new(Calls::default());
    let job = training_job(3, None, calls.clone())?;
    let resume_from = latest_epoch(storage.as_ref(), "run").await?.unwrap();
    let last = JobRunner::new(job)
        .with_snapshot(snapshot())
        .resume_from(resume_from)
        .run(&LocalExecutor::new(storage.clone()))
        .await?;

    assert_eq!(last, 3);
    assert_eq!(calls.init.load(Ordering::SeqCst), 0);
    assert_eq!(calls.train.load(Ordering::SeqCst), 2);
    assert_eq!(list_epochs(storage.as_ref(), "run").await?, vec![0, 1, 2, 3]);
    assert_eq!(
        checkpoint_state(storage.as_ref(), 3).await?,
        checkpoint_state(reference.as_ref(), 3).await?
    );
    Ok(())
}

#[tokio::test]
async fn test_resume_from_initial_checkpoint() -> Result<()> {
    let storage: StorageHandle = Arc::new(MemoryStorage::new());
    let job = training_job(3, None, Arc::new(Calls::default()))?;
    JobRunner::new(job)
        .with_snapshot(snapshot())
        .run(&LocalExecutor::new(storage.clone()))
        .await?;
    let uninterrupted = checkpoint_state(storage.as_ref(), 3).await?;

    // Checkpoint 0 holds the post-init state, so every epoch runs again
    let calls = Arc::new(Calls::default());
    let job = training_job(3, None, calls.clone())?;
    let last = JobRunner::new(job)
        .with_snapshot(snapshot())
        .resume_from(0)
        .run(&LocalExecutor::new(storage.clone()))
        .await?;

    assert_eq!(last, 3);
    assert_eq!(calls.init.load(Ordering::SeqCst), 0);
    assert_eq!(calls.train.load(Ordering::SeqCst), 3);
    let resumed = checkpoint_state(storage.as_ref(), 3).await?;
    assert_eq!(resumed["step"], Value::Int(3));
    assert_eq!(resumed, uninterrupted);
    Ok(())
}

#[tokio::test]
async fn test_resume_from_missing_checkpoint_fails() -> Result<()> {
    let storage: StorageHandle = Arc::new(MemoryStorage::new());
    let job = training_job(3, None, Arc::new(Calls::default()))?;

    let err = JobRunner::new(job)
        .with_snapshot(snapshot())
        .resume_from(7)
        .run(&LocalExecutor::new(storage))
        .await
        .unwrap_err();
    assert!(matches!(err.root_cause(), Error::CheckpointNotFound { .. }));
    Ok(())
}

#[tokio::test]
async fn test_snapshots_on_disk_with_pruning() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let storage: StorageHandle = Arc::new(LocalStorage::new(dir.path()));
    let job = training_job(4, None, Arc::new(Calls::default()))?;

    let last = JobRunner::new(job)
        .with_snapshot(SnapshotManager::new("run", DbType::Json))
        .run(&LocalExecutor::new(storage.clone()))
        .await?;
    assert_eq!(last, 4);
    assert!(dir.path().join("run.000004").exists());

    let deleted = prune(storage.as_ref(), "run", 2).await?;
    assert_eq!(deleted, vec![0, 1, 2]);
    assert_eq!(list_epochs(storage.as_ref(), "run").await?, vec![3, 4]);
    Ok(())
}

#[test]
fn test_checkpoint_key_format() {
    let manager = SnapshotManager::new("run", DbType::Binary);
    assert_eq!(manager.checkpoint_id(3), "run.000003");
}

#[test]
fn test_blob_list_requires_executed_init() {
    let mut manager = SnapshotManager::new("run", DbType::Binary);
    let err = manager.blob_list().unwrap_err();
    assert!(matches!(err, Error::SnapshotNotInitialized));
    assert!(err.is_precondition());

    manager.init(&["local".to_string()], None).unwrap();
    let err = manager.blob_list().unwrap_err();
    assert!(matches!(err, Error::OutputUnresolved { .. }));
    assert!(err.is_precondition());
}
