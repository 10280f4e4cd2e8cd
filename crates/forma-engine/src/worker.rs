//! Evaluation worker
//!
//! The kernel is not `Send`, so each worker owns a dedicated thread and is
//! driven purely by messages: requests arrive through an unbounded mailbox,
//! replies leave through another. Both carry the JSON wire form, and a
//! request that fails validation never reaches the kernel. The bridge never
//! touches the kernel.
//!
//! ```text
//! Uninitialized ──first evaluate──► InitializingKernel ──ok──► Ready ⇄ Evaluating
//!       ▲                                   │                    │
//!       └────────────── init failed ────────┘      terminate ──► Terminated
//! ```

use crate::error::{EngineError, Result};
use forma_kernel::{EvalScope, Kernel, KernelError, KernelFactory};
use forma_protocol::{EvaluationOutcome, EvaluationResult, WorkerReply, WorkerRequest};
use parking_lot::Mutex;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Lifecycle of one worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Uninitialized,
    InitializingKernel,
    Ready,
    Evaluating,
    Terminated,
}

/// Where a worker sends its replies
pub type ReplyFn = Arc<dyn Fn(WorkerReply) + Send + Sync>;

/// Runs `cleanup` when an evaluation ends, however it ends
struct CleanupGuard<'a>(&'a mut dyn Kernel);

impl Drop for CleanupGuard<'_> {
    fn drop(&mut self) {
        let kernel = &mut *self.0;
        if panic::catch_unwind(AssertUnwindSafe(|| kernel.cleanup())).is_err() {
            warn!("Kernel cleanup panicked");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Synchronous core of a worker: one kernel, one state machine
pub struct EvaluationWorker {
    kernel: Box<dyn Kernel>,
    state: WorkerState,
    kernel_binary_address: Option<String>,
    terminated: Arc<AtomicBool>,
    replies: ReplyFn,
}

impl EvaluationWorker {
    pub fn new(kernel: Box<dyn Kernel>, replies: ReplyFn, terminated: Arc<AtomicBool>) -> Self {
        Self {
            kernel,
            state: WorkerState::Uninitialized,
            kernel_binary_address: None,
            terminated,
            replies,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Process one request; evaluations return their outcome
    pub fn handle(&mut self, request: WorkerRequest) -> Option<EvaluationOutcome> {
        match request {
            WorkerRequest::Init {
                kernel_binary_address,
            } => {
                debug!("Kernel binary at {}", kernel_binary_address);
                self.kernel_binary_address = Some(kernel_binary_address);
                None
            }
            WorkerRequest::Evaluate { code } => Some(self.evaluate(&code)),
        }
    }

    /// Decode a wire payload and process it
    ///
    /// A payload that fails validation is answered with a failure result, so
    /// an evaluation waiting on it still completes.
    pub fn handle_payload(&mut self, payload: &str) -> Option<EvaluationOutcome> {
        match WorkerRequest::decode(payload) {
            Ok(request) => self.handle(request),
            Err(e) => {
                warn!("Rejected worker request: {}", e);
                let message = format!("Error: malformed request: {e}");
                (self.replies)(WorkerReply::log(message.clone()));
                let result = EvaluationResult::Failure { message };
                (self.replies)(result.to_reply());
                None
            }
        }
    }

    /// Mark the worker terminated; later requests are ignored
    pub fn terminate(&mut self) {
        self.terminated.store(true, Ordering::Release);
        self.state = WorkerState::Terminated;
    }

    fn evaluate(&mut self, code: &str) -> EvaluationOutcome {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let lines = Arc::clone(&lines);
            let replies = Arc::clone(&self.replies);
            move |line: &str| {
                lines.lock().push(line.to_string());
                replies(WorkerReply::log(line));
            }
        };
        let scope = EvalScope::new(Arc::new(sink), Arc::clone(&self.terminated));

        let result = if self.state == WorkerState::Terminated {
            Err(KernelError::Terminated.to_string())
        } else {
            self.ensure_kernel().and_then(|()| self.run(code, &scope))
        };

        let result = match result {
            Ok(asset_url) => EvaluationResult::Model { asset_url },
            Err(message) => {
                scope.log(&message);
                EvaluationResult::Failure { message }
            }
        };
        (self.replies)(result.to_reply());

        let log_lines = lines.lock().clone();
        EvaluationOutcome { result, log_lines }
    }

    /// Initialize the kernel on first use
    fn ensure_kernel(&mut self) -> std::result::Result<(), String> {
        if self.state == WorkerState::Ready {
            return Ok(());
        }

        let Some(address) = self.kernel_binary_address.clone() else {
            return Err("Error: kernel binary address unknown, init was never received".to_string());
        };

        self.state = WorkerState::InitializingKernel;
        let started = Instant::now();
        let kernel = &mut self.kernel;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| kernel.initialize(&address)));

        match outcome {
            Ok(Ok(())) => {
                info!("Kernel ready in {:?}", started.elapsed());
                self.state = WorkerState::Ready;
                Ok(())
            }
            Ok(Err(e)) => {
                self.state = WorkerState::Uninitialized;
                Err(format!("Error: {e}"))
            }
            Err(payload) => {
                self.state = WorkerState::Uninitialized;
                Err(format!(
                    "Error: kernel initialization panicked: {}",
                    panic_message(payload.as_ref())
                ))
            }
        }
    }

    fn run(&mut self, code: &str, scope: &EvalScope) -> std::result::Result<String, String> {
        self.state = WorkerState::Evaluating;
        let started = Instant::now();

        let outcome = {
            let guard = CleanupGuard(self.kernel.as_mut());
            panic::catch_unwind(AssertUnwindSafe(|| guard.0.evaluate(code, scope)))
        };

        self.state = if self.terminated.load(Ordering::Acquire) {
            WorkerState::Terminated
        } else {
            WorkerState::Ready
        };
        debug!("Evaluation finished in {:?}", started.elapsed());

        match outcome {
            Ok(Ok(url)) => Ok(url),
            Ok(Err(e)) => Err(format!("Error: {e}")),
            Err(payload) => Err(format!(
                "Error: kernel panicked: {}",
                panic_message(payload.as_ref())
            )),
        }
    }
}

/// Owner's side of a worker thread
pub struct WorkerHandle {
    name: String,
    requests: Option<mpsc::UnboundedSender<String>>,
    terminated: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Post a request in its wire form; false if the worker is gone
    pub fn send(&self, request: &WorkerRequest) -> bool {
        self.requests
            .as_ref()
            .is_some_and(|tx| tx.send(request.encode()).is_ok())
    }

    /// Stop the worker: raise the termination flag and close its mailbox
    ///
    /// A running script stops at its next progress check. Nothing it
    /// produces afterwards is delivered.
    pub fn terminate(&mut self) {
        if self.requests.take().is_some() {
            self.terminated.store(true, Ordering::Release);
            debug!("Terminated worker {}", self.name);
        }
        // Detach; the thread exits on its own once the kernel yields
        self.thread.take();
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Start a worker thread with a fresh kernel
///
/// Returns the handle and the worker's reply mailbox, which carries
/// wire-encoded [`WorkerReply`]s. Replies stop as soon as the worker is
/// terminated.
pub fn spawn_worker(
    name: &str,
    factory: KernelFactory,
) -> Result<(WorkerHandle, mpsc::UnboundedReceiver<String>)> {
    let (request_tx, mut request_rx) = mpsc::unbounded_channel::<String>();
    let (reply_tx, reply_rx) = mpsc::unbounded_channel::<String>();
    let terminated = Arc::new(AtomicBool::new(false));

    let flag = Arc::clone(&terminated);
    let thread_name = format!("forma-worker-{name}");
    let thread = thread::Builder::new()
        .name(thread_name.clone())
        .spawn(move || {
            let gate = Arc::clone(&flag);
            let replies: ReplyFn = Arc::new(move |reply: WorkerReply| {
                if !gate.load(Ordering::Acquire) {
                    let _ = reply_tx.send(reply.encode());
                }
            });

            let kernel = match panic::catch_unwind(AssertUnwindSafe(|| factory())) {
                Ok(kernel) => kernel,
                Err(payload) => {
                    error!("Kernel construction panicked: {}", panic_message(payload.as_ref()));
                    return;
                }
            };
            let mut worker = EvaluationWorker::new(kernel, replies, Arc::clone(&flag));

            while let Some(payload) = request_rx.blocking_recv() {
                if flag.load(Ordering::Acquire) {
                    break;
                }
                if let Some(outcome) = worker.handle_payload(&payload) {
                    debug!(
                        "Evaluation {} with {} log lines",
                        if outcome.result.is_model() { "succeeded" } else { "failed" },
                        outcome.log_lines.len()
                    );
                }
            }

            worker.terminate();
            debug!("Worker thread exiting");
        })
        .map_err(EngineError::WorkerSpawn)?;

    info!("Spawned worker {}", thread_name);
    Ok((
        WorkerHandle {
            name: thread_name,
            requests: Some(request_tx),
            terminated,
            thread: Some(thread),
        },
        reply_rx,
    ))
}
