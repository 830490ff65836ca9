use std::sync::Arc;

use tokio::sync::{Mutex, mpsc, watch};

use crate::workflow::WorkflowEngine;

/// Name under which the ID generation request task is invoked.
pub const TASK_NAME: &str = "id_generation_request_worker";

#[derive(Debug, PartialEq)]
pub enum EnqueueError {
    Full,
    Closed,
}

impl std::fmt::Display for EnqueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnqueueError::Full => write!(f, "task queue is full"),
            EnqueueError::Closed => write!(f, "task queue is closed"),
        }
    }
}

/// Producer side of the in-process task queue.
#[derive(Clone)]
pub struct TaskSender {
    tx: mpsc::Sender<String>,
}

impl TaskSender {
    pub fn try_enqueue(&self, registrant_id: String) -> Result<(), EnqueueError> {
        self.tx.try_send(registrant_id).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EnqueueError::Full,
            mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }
}

/// Consumer side, shared by all workers of a pool.
#[derive(Clone)]
pub struct TaskReceiver {
    rx: Arc<Mutex<mpsc::Receiver<String>>>,
}

impl TaskReceiver {
    async fn recv(&self) -> Option<String> {
        self.rx.lock().await.recv().await
    }
}

pub fn task_queue(capacity: usize) -> (TaskSender, TaskReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        TaskSender { tx },
        TaskReceiver {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}

/// Start a worker pool on a dedicated Tokio runtime with its own thread pool.
/// This runs on a separate OS thread and blocks until shutdown is signaled or
/// every [`TaskSender`] is dropped.
pub fn run_pool(
    engine: Arc<WorkflowEngine>,
    tasks: TaskReceiver,
    shutdown: watch::Receiver<bool>,
    worker_count: usize,
) -> std::io::Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new()
        .name("worker-pool".into())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_multi_thread()
                .worker_threads(worker_count)
                .thread_name("idgen-worker")
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    tracing::error!("Failed to build worker runtime: {e}");
                    return;
                }
            };

            runtime.block_on(async {
                let mut handles = Vec::with_capacity(worker_count);

                for id in 0..worker_count {
                    handles.push(tokio::spawn(run(
                        id,
                        engine.clone(),
                        tasks.clone(),
                        shutdown.clone(),
                    )));
                }

                tracing::info!("ID generation worker pool started ({worker_count} workers)");

                for handle in handles {
                    let _ = handle.await;
                }

                tracing::info!("ID generation worker pool stopped");
            });
        })
}

/// A single worker loop that takes registrant ids off the queue and runs the
/// workflow for each.
async fn run(
    id: usize,
    engine: Arc<WorkflowEngine>,
    tasks: TaskReceiver,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::debug!("Worker {id} started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        let next = tokio::select! {
            next = tasks.recv() => next,
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
        };

        let Some(registrant_id) = next else {
            break;
        };

        tracing::debug!("Worker {id} running {TASK_NAME} for registrant_id {registrant_id}");

        // Storage faults are logged inside the engine and dropped here.
        match engine
            .process_with_cancel(&registrant_id, Some(shutdown.clone()))
            .await
        {
            Ok(outcome) => tracing::debug!("Worker {id} finished {registrant_id}: {outcome:?}"),
            Err(e) => tracing::error!("Worker {id} error: {e}"),
        }
    }

    tracing::debug!("Worker {id} stopped");
}
