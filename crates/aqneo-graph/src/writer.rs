//! Parallel transactional writer.
//!
//! Payloads are split into chunks and pulled from a shared queue by a fixed
//! pool of worker tasks. Every worker opens the sealed credentials and builds
//! its own sink connection; no connection crosses a task boundary. Each
//! payload runs in its own transaction. Results come back in completion
//! order and are re-sorted by submission index before they are returned.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use aqneo_core::Payload;

use crate::client::GraphConfig;
use crate::credentials::{CredentialBundle, EphemeralKey};
use crate::error::{SinkError, WriteError};

/// One row returned by the sink.
pub type Record = serde_json::Value;

/// The outcome of one payload.
pub type ItemResult = Result<Vec<Record>, SinkError>;

/// Transaction mode for a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Write,
    Read,
}

/// An open connection, owned by exactly one worker.
#[async_trait]
pub trait SinkConnection: Send {
    /// Run `payload` in a single transaction.
    async fn run(&mut self, payload: &Payload, mode: AccessMode) -> Result<Vec<Record>, SinkError>;
}

/// Builds worker connections from decrypted credentials.
#[async_trait]
pub trait SinkConnector: Send + Sync + 'static {
    type Connection: SinkConnection + 'static;

    async fn connect(&self, config: &GraphConfig) -> Result<Self::Connection, SinkError>;
}

/// What to do after a failed payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    Continue,
    Abort,
}

#[derive(Debug, Clone)]
pub struct WriteOptions {
    pub workers: usize,
    pub chunksize: usize,
    pub connect_timeout: Duration,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            chunksize: 1,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

type ItemCallback<'a> = Box<dyn FnMut(usize, &[Record]) + Send + 'a>;
type ErrorCallback<'a> = Box<dyn FnMut(usize, &SinkError) -> ErrorPolicy + Send + 'a>;

/// Per-call observers. `on_item` fires once per successful payload;
/// `on_error` decides whether a failed payload aborts the call. Without
/// `on_error` the first failure aborts.
#[derive(Default)]
pub struct Callbacks<'a> {
    on_item: Option<ItemCallback<'a>>,
    on_error: Option<ErrorCallback<'a>>,
}

impl<'a> Callbacks<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_item(mut self, callback: impl FnMut(usize, &[Record]) + Send + 'a) -> Self {
        self.on_item = Some(Box::new(callback));
        self
    }

    pub fn on_error(mut self, callback: impl FnMut(usize, &SinkError) -> ErrorPolicy + Send + 'a) -> Self {
        self.on_error = Some(Box::new(callback));
        self
    }
}

/// Tolerate constraint conditions, abort on anything else.
pub fn tolerate_constraints(_index: usize, error: &SinkError) -> ErrorPolicy {
    if error.is_constraint() {
        ErrorPolicy::Continue
    } else {
        ErrorPolicy::Abort
    }
}

type Chunk = (usize, Vec<Payload>);

enum WorkerEvent {
    Item { index: usize, result: ItemResult },
    ConnectFailed { worker: usize, error: SinkError },
}

/// Shared by every worker of one call. Read-only apart from the queue and
/// the abort flag.
struct WorkerContext<C> {
    connector: Arc<C>,
    bundle: Arc<CredentialBundle>,
    key: Arc<EphemeralKey>,
    connect_timeout: Duration,
    mode: AccessMode,
    queue: Mutex<mpsc::UnboundedReceiver<Chunk>>,
    abort: AtomicBool,
}

/// Executes payload lists against a sink with a fixed worker pool.
pub struct ParallelWriter<C: SinkConnector> {
    connector: Arc<C>,
    bundle: Arc<CredentialBundle>,
    key: Arc<EphemeralKey>,
    options: WriteOptions,
}

impl<C: SinkConnector> ParallelWriter<C> {
    /// Seal `config` for the workers. The plaintext config is not retained.
    pub fn new(connector: C, config: &GraphConfig, options: WriteOptions) -> Result<Self, SinkError> {
        let key = EphemeralKey::generate();
        let bundle = CredentialBundle::seal(config, &key)?;
        Ok(Self {
            connector: Arc::new(connector),
            bundle: Arc::new(bundle),
            key: Arc::new(key),
            options,
        })
    }

    /// Execute `payloads` in write transactions. The returned list is
    /// index-aligned with the input.
    pub async fn write(&self, payloads: Vec<Payload>, callbacks: Callbacks<'_>) -> Result<Vec<ItemResult>, WriteError> {
        self.run(payloads, AccessMode::Write, callbacks).await
    }

    /// Like [`write`](Self::write) but every transaction is rolled back.
    pub async fn read(&self, payloads: Vec<Payload>, callbacks: Callbacks<'_>) -> Result<Vec<ItemResult>, WriteError> {
        self.run(payloads, AccessMode::Read, callbacks).await
    }

    async fn run(
        &self,
        payloads: Vec<Payload>,
        mode: AccessMode,
        mut callbacks: Callbacks<'_>,
    ) -> Result<Vec<ItemResult>, WriteError> {
        let total = payloads.len();
        if total == 0 {
            return Ok(Vec::new());
        }

        let chunks = chunk(payloads, self.options.chunksize);
        let workers = self.options.workers.max(1).min(chunks.len());

        let (job_tx, job_rx) = mpsc::unbounded_channel();
        for c in chunks {
            // The receiver is alive in this scope, so sending cannot fail.
            let _ = job_tx.send(c);
        }
        drop(job_tx);

        let context = Arc::new(WorkerContext {
            connector: Arc::clone(&self.connector),
            bundle: Arc::clone(&self.bundle),
            key: Arc::clone(&self.key),
            connect_timeout: self.options.connect_timeout,
            mode,
            queue: Mutex::new(job_rx),
            abort: AtomicBool::new(false),
        });

        info!(payloads = total, workers, chunksize = self.options.chunksize, ?mode, "Starting parallel write");

        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let handles: Vec<JoinHandle<()>> = (0..workers)
            .map(|worker| tokio::spawn(work(worker, Arc::clone(&context), event_tx.clone())))
            .collect();
        drop(event_tx);

        let mut completed: Vec<(usize, ItemResult)> = Vec::with_capacity(total);
        let mut failure: Option<WriteError> = None;

        while let Some(event) = event_rx.recv().await {
            match event {
                WorkerEvent::Item { index, result: Ok(records) } => {
                    if let Some(on_item) = callbacks.on_item.as_mut() {
                        on_item(index, &records);
                    }
                    completed.push((index, Ok(records)));
                }
                WorkerEvent::Item { index, result: Err(error) } => {
                    let policy = match callbacks.on_error.as_mut() {
                        Some(on_error) => on_error(index, &error),
                        None => ErrorPolicy::Abort,
                    };
                    match policy {
                        ErrorPolicy::Continue => {
                            debug!(index, error = %error, "Payload failed, continuing");
                            completed.push((index, Err(error)));
                        }
                        ErrorPolicy::Abort => {
                            warn!(index, error = %error, "Payload failed, aborting write");
                            context.abort.store(true, Ordering::SeqCst);
                            failure = Some(WriteError::Aborted { index, source: error });
                            break;
                        }
                    }
                }
                WorkerEvent::ConnectFailed { worker, error } => {
                    warn!(worker, error = %error, "Worker could not connect, aborting write");
                    context.abort.store(true, Ordering::SeqCst);
                    failure = Some(WriteError::Connect { worker, source: error });
                    break;
                }
            }
        }
        drop(event_rx);

        for handle in handles {
            handle.await.map_err(|e| WriteError::Worker(e.to_string()))?;
        }

        if let Some(failure) = failure {
            return Err(failure);
        }
        if completed.len() != total {
            return Err(WriteError::Worker(format!(
                "{} of {total} payloads were not executed",
                total - completed.len()
            )));
        }

        completed.sort_by_key(|(index, _)| *index);
        let failed = completed.iter().filter(|(_, r)| r.is_err()).count();
        info!(payloads = total, failed, "Parallel write complete");
        Ok(completed.into_iter().map(|(_, result)| result).collect())
    }
}

/// Group payloads into `(first index, payloads)` chunks.
fn chunk(payloads: Vec<Payload>, chunksize: usize) -> Vec<Chunk> {
    let chunksize = chunksize.max(1);
    let mut chunks = Vec::with_capacity(payloads.len().div_ceil(chunksize));
    let mut current = Vec::with_capacity(chunksize);
    let mut start = 0;
    for (index, payload) in payloads.into_iter().enumerate() {
        if current.is_empty() {
            start = index;
        }
        current.push(payload);
        if current.len() == chunksize {
            chunks.push((start, std::mem::take(&mut current)));
        }
    }
    if !current.is_empty() {
        chunks.push((start, current));
    }
    chunks
}

/// Open the bundle and connect, both inside `connect_timeout`. Key
/// stretching is CPU-bound and runs on the blocking pool.
async fn connect<C: SinkConnector>(context: &WorkerContext<C>) -> Result<C::Connection, SinkError> {
    let bundle = Arc::clone(&context.bundle);
    let key = Arc::clone(&context.key);
    let establish = async {
        let config = tokio::task::spawn_blocking(move || bundle.open(&key))
            .await
            .map_err(|e| SinkError::Credentials(format!("credential task failed: {e}")))??;
        context.connector.connect(&config).await
    };
    match tokio::time::timeout(context.connect_timeout, establish).await {
        Ok(connection) => connection,
        Err(_) => Err(SinkError::Timeout(context.connect_timeout)),
    }
}

async fn work<C: SinkConnector>(
    worker: usize,
    context: Arc<WorkerContext<C>>,
    events: mpsc::UnboundedSender<WorkerEvent>,
) {
    let mut connection = match connect(&context).await {
        Ok(connection) => connection,
        Err(error) => {
            let _ = events.send(WorkerEvent::ConnectFailed { worker, error });
            return;
        }
    };
    debug!(worker, "Writer worker connected");

    let mut executed = 0usize;
    loop {
        if context.abort.load(Ordering::SeqCst) {
            break;
        }
        let next = context.queue.lock().await.recv().await;
        let Some((start, payloads)) = next else {
            break;
        };

        for (offset, payload) in payloads.iter().enumerate() {
            if context.abort.load(Ordering::SeqCst) {
                break;
            }
            let result = connection.run(payload, context.mode).await;
            executed += 1;
            if events
                .send(WorkerEvent::Item {
                    index: start + offset,
                    result,
                })
                .is_err()
            {
                return;
            }
        }
    }
    debug!(worker, executed, "Writer worker finished");
}
