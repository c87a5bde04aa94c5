//! Fixed-size worker pool draining the command queue.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::{DrainPolicy, MAX_WORKERS};
use crate::error::{MegaError, Result};
use crate::session::command::{Command, CommandKind, CommandOutput, CommandTicket};

/// Executes the body of a command on a worker.
#[async_trait]
pub trait CommandHandler: Send + Sync + 'static {
    async fn execute(&self, kind: &CommandKind, epoch: u64) -> Result<CommandOutput>;
}

type Queue = Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Command>>>;

struct PoolInner {
    tx: Option<mpsc::UnboundedSender<Command>>,
    rx: Queue,
    handles: Vec<JoinHandle<()>>,
    discard: Arc<AtomicBool>,
}

impl PoolInner {
    fn fresh() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx: Some(tx),
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
            handles: Vec::new(),
            discard: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// N workers pulling from one unbounded FIFO queue.
///
/// `enqueue` only appends; commands never run on the caller's task. Commands
/// may finish in any order.
pub struct WorkerPool {
    workers: usize,
    policy: DrainPolicy,
    inner: Mutex<PoolInner>,
    /// Held for the whole of `stop`; later callers wait on it.
    stopping: tokio::sync::Mutex<()>,
}

impl WorkerPool {
    pub fn new(workers: usize, policy: DrainPolicy) -> Self {
        Self {
            workers: workers.clamp(1, MAX_WORKERS),
            policy,
            inner: Mutex::new(PoolInner::fresh()),
            stopping: tokio::sync::Mutex::new(()),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn policy(&self) -> DrainPolicy {
        self.policy
    }

    /// True between `start` and `stop`.
    pub fn is_running(&self) -> bool {
        !self.inner.lock().handles.is_empty()
    }

    /// Spawn the workers. Must be called inside a tokio runtime.
    ///
    /// Commands enqueued before `start` wait in the queue. Calling `start`
    /// on a running pool does nothing; after `stop` it opens a new queue.
    pub fn start(&self, handler: Arc<dyn CommandHandler>) {
        let mut inner = self.inner.lock();
        if !inner.handles.is_empty() {
            return;
        }
        if inner.tx.is_none() {
            *inner = PoolInner::fresh();
        }
        for worker in 0..self.workers {
            let rx = inner.rx.clone();
            let discard = inner.discard.clone();
            let handler = handler.clone();
            inner
                .handles
                .push(tokio::spawn(worker_loop(worker, rx, handler, discard)));
        }
        info!("worker pool started with {} workers", self.workers);
    }

    /// Queue a command and return immediately.
    ///
    /// Fails with `PoolStopped` once `stop` has begun; the callback of a
    /// rejected command is not invoked.
    pub fn enqueue(&self, command: Command) -> Result<CommandTicket> {
        let ticket = command.ticket();
        let inner = self.inner.lock();
        let Some(tx) = inner.tx.as_ref() else {
            command.disarm();
            return Err(MegaError::PoolStopped);
        };
        debug!("queued {} command #{}", command.kind().name(), ticket.id());
        tx.send(command).map_err(|rejected| {
            rejected.0.disarm();
            MegaError::PoolStopped
        })?;
        Ok(ticket)
    }

    /// Stop accepting commands and wait for the workers to exit.
    ///
    /// In-flight commands always finish. Queued ones are run or failed with
    /// `PoolStopped` according to the drain policy. When this returns every
    /// command ever accepted has had its callback invoked.
    ///
    /// A concurrent second caller returns only after the first stop has
    /// finished. Must not be awaited from inside a command callback.
    pub async fn stop(&self) {
        let _stopping = self.stopping.lock().await;
        let (tx, handles, rx) = {
            let mut inner = self.inner.lock();
            inner
                .discard
                .store(self.policy == DrainPolicy::Discard, Ordering::SeqCst);
            (
                inner.tx.take(),
                std::mem::take(&mut inner.handles),
                inner.rx.clone(),
            )
        };
        if tx.is_none() && handles.is_empty() {
            return;
        }
        // Closing the sender lets workers exit once the queue is empty.
        drop(tx);

        let count = handles.len();
        for handle in handles {
            if let Err(e) = handle.await {
                error!("worker task ended abnormally: {}", e);
            }
        }

        // Nothing ran the queue if the pool was never started. The
        // leftovers are failed on a task of their own, not the caller's.
        let leftover = tokio::spawn(async move {
            let mut rx = rx.lock().await;
            let mut failed = 0usize;
            while let Ok(command) = rx.try_recv() {
                command.complete(Err(MegaError::PoolStopped));
                failed += 1;
            }
            failed
        })
        .await
        .unwrap_or_else(|e| {
            error!("failing queued commands ended abnormally: {}", e);
            0
        });
        info!(
            "worker pool stopped ({} workers joined, {} queued commands failed)",
            count, leftover
        );
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers)
            .field("policy", &self.policy)
            .field("running", &self.is_running())
            .finish()
    }
}

async fn worker_loop(
    worker: usize,
    rx: Queue,
    handler: Arc<dyn CommandHandler>,
    discard: Arc<AtomicBool>,
) {
    debug!("worker {} up", worker);
    loop {
        let next = rx.lock().await.recv().await;
        let Some(command) = next else {
            break;
        };
        if discard.load(Ordering::SeqCst) {
            debug!("worker {} discarding command #{}", worker, command.id());
            command.complete(Err(MegaError::PoolStopped));
            continue;
        }
        run_command(worker, handler.as_ref(), command).await;
    }
    debug!("worker {} down", worker);
}

async fn run_command(worker: usize, handler: &dyn CommandHandler, command: Command) {
    command.mark_running();
    let id = command.id();
    let name = command.kind().name();
    debug!("worker {} running {} command #{}", worker, name, id);

    let kind = command.kind();
    let epoch = command.epoch();
    let outcome = AssertUnwindSafe(handler.execute(kind, epoch))
        .catch_unwind()
        .await;

    let result = match outcome {
        Ok(result) => result,
        Err(panic) => {
            let reason = panic_message(panic.as_ref());
            error!("{} command #{} panicked: {}", name, id, reason);
            Err(MegaError::Transfer(format!("{} panicked: {}", name, reason)))
        }
    };
    match &result {
        Ok(_) => debug!("{} command #{} completed", name, id),
        Err(e) => debug!("{} command #{} failed: {}", name, id, e),
    }
    command.complete(result);
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
