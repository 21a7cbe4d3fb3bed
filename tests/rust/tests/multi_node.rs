use anyhow::Result;
use checkpoint::{latest_epoch, read_checkpoint, MultiNodeSnapshotManager, BLOB_NAMES};
use job::{epoch_limiter, Job, JobRunner, LocalExecutor, RunnerState};
use runtime_core::{
    node_scope, CheckpointLocation, DbType, Error, RuntimeConfig, RuntimeManager, Step, Task, Value,
};
use std::sync::Arc;
use storage::{LocalStorage, StorageHandle};

const NODES: [&str; 2] = ["trainer-0", "trainer-1"];

// Each node owns a shard counter; the limiter lives on the first node.
fn sharded_job(num_epochs: u64) -> Result<Job> {
    let job = Job::new();
    let _job = job.enter();
    for node in NODES {
        let _node = node_scope(node);
        {
            let _init = job.init_group().enter();
            Task::new(
                "init_shard",
                Step::new().run("init", |ws| {
                    ws.set("samples_seen", Value::Int(0));
                    Ok(())
                }),
            )
            .attach()?;
        }
        Task::new(
            "read_shard",
            Step::new().run("read", |ws| {
                let batch = ws.fetch("batch_size")?.as_int("batch_size")?;
                ws.update("samples_seen", |v| {
                    *v = Value::Int(v.as_int("samples_seen")? + batch);
                    Ok(())
                })
            }),
        )
        .attach()?;
    }

    let _node = node_scope(NODES[0]);
    epoch_limiter(num_epochs)?;
    Ok(job)
}

fn executor(storage: StorageHandle) -> LocalExecutor {
    let executor = LocalExecutor::new(storage);
    // Shared input every node reads but none owns
    executor
        .shared_workspace()
        .set("batch_size", Value::Int(32));
    executor
}

#[tokio::test]
async fn test_each_node_checkpoints_under_its_prefix() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let storage: StorageHandle = Arc::new(LocalStorage::new(dir.path()));
    let exec = executor(storage.clone());

    let mut runner = JobRunner::new(sharded_job(2)?)
        .with_snapshot(MultiNodeSnapshotManager::new("ckpt", DbType::Json));
    assert_eq!(runner.run(&exec).await?, 2);
    assert_eq!(runner.state(), RunnerState::Done(2));

    for node in NODES {
        let prefix = format!("ckpt/{}", node);
        assert_eq!(latest_epoch(storage.as_ref(), &prefix).await?, Some(2));
        assert!(dir.path().join(format!("{}.000000", prefix)).exists());

        let location = CheckpointLocation::new(prefix, 2, DbType::Json);
        let state = read_checkpoint(
            storage.as_ref(),
            &location,
            &[BLOB_NAMES.to_string(), "samples_seen".to_string()],
        )
        .await?;
        assert_eq!(state["samples_seen"], Value::Int(64));

        // The shared batch size is never snapshotted
        let names = state[BLOB_NAMES].as_strings(BLOB_NAMES)?;
        assert!(!names.iter().any(|n| n == "batch_size"));
    }

    assert_eq!(exec.workspace(NODES[1]).fetch("samples_seen")?, Value::Int(64));
    Ok(())
}

#[tokio::test]
async fn test_multi_node_resume() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let storage: StorageHandle = Arc::new(LocalStorage::new(dir.path()));

    let first = JobRunner::new(sharded_job(1)?)
        .with_snapshot(MultiNodeSnapshotManager::new("ckpt", DbType::Binary))
        .run(&executor(storage.clone()))
        .await?;
    assert_eq!(first, 1);

    // Counter is already exhausted at epoch 1, so the resumed run stops
    // after one more epoch
    let exec = executor(storage.clone());
    let last = JobRunner::new(sharded_job(1)?)
        .with_snapshot(MultiNodeSnapshotManager::new("ckpt", DbType::Binary))
        .resume_from(1)
        .run(&exec)
        .await?;
    assert_eq!(last, 2);
    for node in NODES {
        assert_eq!(exec.workspace(node).fetch("samples_seen")?, Value::Int(64));
    }
    Ok(())
}

#[test]
fn test_topology_change_rejected() {
    let nodes = |names: &[&str]| names.iter().map(|n| n.to_string()).collect::<Vec<_>>();
    let mut manager = MultiNodeSnapshotManager::new("ckpt", DbType::Binary);

    assert!(manager.init(&nodes(&["a", "b"]), None).unwrap().is_some());
    assert!(manager.init(&nodes(&["a", "b"]), None).unwrap().is_none());
    let err = manager.init(&nodes(&["a", "c"]), None).unwrap_err();
    assert!(matches!(err, Error::TopologyChanged { .. }));
}

#[test]
fn test_run_from_config_blocking() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let config = RuntimeConfig::from_json_str(&format!(
        r#"{{
            "snapshot": {{"enabled": true, "db_prefix": "jobs/demo", "multi_node": true}},
            "storage": {{"backend": "Local", "base_path": {:?}}},
            "executor": {{"io_threads": 2}}
        }}"#,
        dir.path().to_string_lossy()
    ))?;

    let runtime = RuntimeManager::new(config.executor.clone())?;
    let exec = executor(storage::from_config(&config.storage));
    let mut runner = JobRunner::from_config(sharded_job(3)?, &config)?;

    assert_eq!(runner.run_blocking(&runtime, &exec)?, 3);
    assert!(dir.path().join("jobs/demo/trainer-0.000003").exists());
    assert!(dir.path().join("jobs/demo/trainer-1.000003").exists());
    Ok(())
}
