use std::{collections::VecDeque, sync::Arc};

use tokio::sync::{mpsc, oneshot};

/// Task for the inference worker.
pub(crate) struct InferenceTask<I, O> {
    /// The request to process.
    pub req: I,
    /// The response sender.
    pub resp_tx: oneshot::Sender<O>,
}

/// State shared by the handlers, used to submit tasks to the workers.
pub(crate) struct InferenceState<I, O> {
    pub tx: mpsc::Sender<InferenceTask<I, O>>,
}

impl<I, O> Clone for InferenceState<I, O> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

/// Function signature for processing inference tasks.
pub(crate) type ProcessFn<P, I, O> = dyn Fn(&P, I) -> O + Send + Sync;

/// Distributes inference tasks to worker tasks that process them using the provided function.
/// Tasks are queued while every worker is busy.
///
/// # Arguments
///
/// * `rx` - Receiver for incoming inference tasks.
/// * `pipeline` - The inference pipeline that is going to be used to process the tasks.
/// * `num_workers` - The number of worker tasks to spawn.
/// * `process_fn` - The function that processes the inference task.
pub(crate) async fn task_distributor<P, I, O>(
    mut rx: mpsc::Receiver<InferenceTask<I, O>>,
    pipeline: Arc<P>,
    num_workers: usize,
    process_fn: Arc<ProcessFn<P, I, O>>,
) where
    P: Send + Sync + 'static,
    I: Send + 'static,
    O: Send + 'static,
{
    let num_workers = num_workers.max(1);
    tracing::info!("Starting task distributor with {} workers", num_workers);
    let (worker_tx, mut worker_rx) = mpsc::channel(num_workers);

    for id in 0..num_workers {
        tokio::spawn(worker_loop(
            id,
            Arc::clone(&pipeline),
            worker_tx.clone(),
            Arc::clone(&process_fn),
        ));
    }
    drop(worker_tx);

    let mut tasks = VecDeque::new();
    let mut available_workers: Vec<WorkerSlot<I, O>> = Vec::new();
    let mut accepting = true;

    while accepting || !tasks.is_empty() {
        tokio::select! {
            task = rx.recv(), if accepting => {
                match task {
                    Some(task) => match available_workers.pop() {
                        Some(worker) => dispatch(worker, task),
                        None => tasks.push_back(task),
                    },
                    // Channel closed, only the queued tasks are left
                    None => accepting = false,
                }
            }
            worker = worker_rx.recv() => {
                match worker {
                    Some(worker) => match tasks.pop_front() {
                        Some(task) => dispatch(worker, task),
                        None => available_workers.push(worker),
                    },
                    None => {
                        tracing::error!("All inference workers have exited");
                        break;
                    }
                }
            }
        }
    }

    tracing::info!("Task distributor stopped");
}

/// A free worker waiting for its next task.
type WorkerSlot<I, O> = oneshot::Sender<InferenceTask<I, O>>;

fn dispatch<I, O>(worker: WorkerSlot<I, O>, task: InferenceTask<I, O>) {
    if worker.send(task).is_err() {
        tracing::error!("Failed to send task to worker");
    }
}

/// Worker task that processes inference tasks one at a time using the provided function. It
/// stops once the task distributor is gone.
///
/// # Arguments
///
/// * `id` - Worker task identifier.
/// * `pipeline` - The inference pipeline that is going to be used to process the tasks.
/// * `worker_tx` - Sender to communicate with the task distributor.
/// * `process_fn` - The function that processes the inference task.
async fn worker_loop<P, I, O>(
    id: usize,
    pipeline: Arc<P>,
    worker_tx: mpsc::Sender<WorkerSlot<I, O>>,
    process_fn: Arc<ProcessFn<P, I, O>>,
) where
    P: Send + Sync + 'static,
    I: Send + 'static,
    O: Send + 'static,
{
    loop {
        let (task_tx, task_rx) = oneshot::channel();
        if worker_tx.send(task_tx).await.is_err() {
            break;
        }

        let Ok(InferenceTask { req, resp_tx }) = task_rx.await else {
            break;
        };

        // The forward pass is CPU bound, so it runs outside of the async runtime
        let pipeline = Arc::clone(&pipeline);
        let process_fn = Arc::clone(&process_fn);
        match tokio::task::spawn_blocking(move || process_fn(&pipeline, req)).await {
            Ok(result) => {
                if resp_tx.send(result).is_err() {
                    tracing::error!("Worker {} failed to send response", id);
                }
            }
            Err(e) => tracing::error!("Worker {} failed to process task: {}", id, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tasks_are_processed_by_workers() {
        let (tx, rx) = mpsc::channel::<InferenceTask<usize, usize>>(8);
        let offset = Arc::new(10usize);
        let process_fn: Arc<ProcessFn<usize, usize, usize>> =
            Arc::new(|offset: &usize, req: usize| offset + req);
        let distributor = tokio::spawn(task_distributor(rx, offset, 2, process_fn));

        let mut receivers = Vec::new();
        for req in 0..5 {
            let (resp_tx, resp_rx) = oneshot::channel();
            tx.send(InferenceTask { req, resp_tx }).await.unwrap();
            receivers.push(resp_rx);
        }

        for (req, resp_rx) in receivers.into_iter().enumerate() {
            assert_eq!(resp_rx.await.unwrap(), req + 10);
        }

        drop(tx);
        distributor.await.unwrap();
    }
}
