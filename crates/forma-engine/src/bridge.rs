//! UI bridge
//!
//! Lives inside the preview surface. It owns the evaluation worker, routes
//! host submissions to it one at a time, and folds worker replies into the
//! [`RenderState`] that presentation watches.
//!
//! ```text
//! Bootstrapping ──worker up──► Idle ⇄ Dispatching
//!       │                        │         │
//!       └──failed──► Failed      └─────────┴──close──► Terminated
//! ```
//!
//! At most one evaluation runs at a time. A submission that arrives while
//! the worker is busy (or still being built) waits in a queue of one; a newer
//! submission replaces it.
//!
//! A worker that dies is replaced. After [`MAX_SILENT_RESTARTS`] losses in a
//! row without a reply in between, the bridge stops replacing it and reports
//! [`BridgeStatus::Failed`].

use crate::error::{EngineError, Result};
use crate::worker::{WorkerHandle, spawn_worker};
use forma_kernel::{KernelFactory, path_from_address};
use forma_protocol::{
    BridgeMessage, HostMessage, RenderState, ScriptSubmission, WorkerReply, WorkerRequest,
};
use serde::{Deserialize, Serialize};
use std::future::pending;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Worker protocol revision this bridge speaks
pub const PROTOCOL_VERSION: u32 = 1;

/// Consecutive worker losses without a reply before the bridge gives up
pub const MAX_SILENT_RESTARTS: u32 = 3;

/// Observable bridge lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeStatus {
    Bootstrapping,
    Ready,
    /// The worker could not be constructed; the surface stays inert
    Failed(String),
    Terminated,
}

/// Contents of the worker-bootstrap asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerBootstrap {
    /// Worker name, used for the thread name and diagnostics
    pub name: String,
    /// Protocol revision the worker expects
    pub protocol: u32,
}

impl WorkerBootstrap {
    /// Fetch and validate the bootstrap resource
    pub async fn fetch(address: &str) -> Result<Self> {
        let path = path_from_address(address);
        let text = tokio::fs::read_to_string(&path).await.map_err(|e| {
            EngineError::BridgeBootstrap(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let bootstrap: Self = serde_json::from_str(text).map_err(|e| {
            EngineError::BridgeBootstrap(format!("invalid worker bootstrap: {e}"))
        })?;

        if bootstrap.protocol != PROTOCOL_VERSION {
            return Err(EngineError::BridgeBootstrap(format!(
                "worker speaks protocol {}, expected {}",
                bootstrap.protocol, PROTOCOL_VERSION
            )));
        }
        if bootstrap.name.trim().is_empty() {
            return Err(EngineError::BridgeBootstrap("worker name is empty".to_string()));
        }
        Ok(bootstrap)
    }
}

/// Asset addresses and limits a bridge needs
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub worker_bootstrap: String,
    pub kernel_binary: String,
    /// Terminate and recreate the worker after this long (None = never)
    pub evaluation_timeout: Option<Duration>,
}

/// Running bridge task and the channels attached to it
pub struct BridgeHandle {
    /// Host → bridge mailbox carrying wire-encoded [`HostMessage`]s
    pub inbox: mpsc::UnboundedSender<String>,
    /// Bridge → host mailbox carrying wire-encoded [`BridgeMessage`]s
    pub events: mpsc::UnboundedReceiver<String>,
    pub render: watch::Receiver<RenderState>,
    pub status: watch::Receiver<BridgeStatus>,
    pub task: JoinHandle<()>,
}

/// Start a bridge on the current tokio runtime
pub fn spawn_bridge(config: BridgeConfig, factory: KernelFactory) -> BridgeHandle {
    let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (render_tx, render_rx) = watch::channel(RenderState::default());
    let (status_tx, status_rx) = watch::channel(BridgeStatus::Bootstrapping);

    let bridge = Bridge {
        config,
        factory,
        host: events_tx,
        render: render_tx,
        status: status_tx,
        worker_name: String::new(),
        worker: None,
        queued: None,
        silent_losses: 0,
    };
    let task = tokio::spawn(bridge.run(inbox_rx));

    BridgeHandle {
        inbox: inbox_tx,
        events: events_rx,
        render: render_rx,
        status: status_rx,
        task,
    }
}

/// An evaluation the worker is currently running
struct InFlight {
    source_id: String,
    started: Instant,
}

/// The bridge's side of one worker lifetime
struct WorkerSession {
    handle: WorkerHandle,
    replies: mpsc::UnboundedReceiver<String>,
    in_flight: Option<InFlight>,
}

impl WorkerSession {
    fn start(name: &str, factory: KernelFactory, kernel_binary: &str) -> Result<Self> {
        let (handle, replies) = spawn_worker(name, factory)?;
        let init = WorkerRequest::Init {
            kernel_binary_address: kernel_binary.to_string(),
        };
        if !handle.send(&init) {
            return Err(EngineError::BridgeBootstrap("worker exited during init".to_string()));
        }
        Ok(Self {
            handle,
            replies,
            in_flight: None,
        })
    }

    /// Post an evaluation request; false if the worker is gone
    fn begin(&mut self, submission: &ScriptSubmission) -> bool {
        let request = WorkerRequest::Evaluate {
            code: submission.code().to_string(),
        };
        if !self.handle.send(&request) {
            return false;
        }
        self.in_flight = Some(InFlight {
            source_id: submission.source_id().to_string(),
            started: Instant::now(),
        });
        true
    }
}

async fn bootstrap(
    config: &BridgeConfig,
    factory: KernelFactory,
) -> Result<(String, WorkerSession)> {
    let descriptor = WorkerBootstrap::fetch(&config.worker_bootstrap).await?;
    let session = WorkerSession::start(&descriptor.name, factory, &config.kernel_binary)?;
    Ok((descriptor.name, session))
}

async fn next_reply(worker: &mut Option<WorkerSession>) -> Option<String> {
    match worker {
        Some(session) => session.replies.recv().await,
        None => pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => pending().await,
    }
}

fn decode(payload: &str) -> Option<ScriptSubmission> {
    match HostMessage::decode(payload) {
        Ok(HostMessage::UpdateScript(submission)) => Some(submission),
        Err(e) => {
            warn!("Dropping malformed host message: {}", e);
            None
        }
    }
}

struct Bridge {
    config: BridgeConfig,
    factory: KernelFactory,
    host: mpsc::UnboundedSender<String>,
    render: watch::Sender<RenderState>,
    status: watch::Sender<BridgeStatus>,
    worker_name: String,
    worker: Option<WorkerSession>,
    /// Latest submission waiting for the worker
    queued: Option<ScriptSubmission>,
    /// Workers lost in a row without a single reply
    silent_losses: u32,
}

impl Bridge {
    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<String>) {
        if self.bootstrap_phase(&mut inbox).await {
            self.serve(&mut inbox).await;
        } else {
            self.inert(&mut inbox).await;
        }
        self.shutdown();
    }

    /// Build the worker while buffering submissions; false if it failed or
    /// the host went away
    async fn bootstrap_phase(&mut self, inbox: &mut mpsc::UnboundedReceiver<String>) -> bool {
        let outcome = {
            let startup = bootstrap(&self.config, self.factory.clone());
            tokio::pin!(startup);

            loop {
                tokio::select! {
                    biased;
                    message = inbox.recv() => match message {
                        Some(payload) => {
                            if let Some(submission) = decode(&payload)
                                && let Some(older) = self.queued.replace(submission)
                            {
                                debug!(
                                    "Discarding pre-ready submission from {}",
                                    older.display_name()
                                );
                            }
                        }
                        None => return false,
                    },
                    outcome = &mut startup => break outcome,
                }
            }
        };

        match outcome {
            Ok((name, session)) => {
                info!("Preview bridge ready with worker {}", name);
                self.worker_name = name;
                self.worker = Some(session);
                self.status.send_replace(BridgeStatus::Ready);
                self.notify(&BridgeMessage::Ready);

                if let Some(submission) = self.queued.take() {
                    self.dispatch(submission);
                }
                true
            }
            Err(e) => {
                let message = e.to_string();
                error!("{}", message);
                self.status.send_replace(BridgeStatus::Failed(message.clone()));
                self.notify(&BridgeMessage::BootstrapFailed { message });
                false
            }
        }
    }

    async fn serve(&mut self, inbox: &mut mpsc::UnboundedReceiver<String>) {
        loop {
            let deadline = self.deadline();
            tokio::select! {
                biased;
                message = inbox.recv() => match message {
                    Some(payload) => {
                        if let Some(submission) = decode(&payload) {
                            self.submit(submission);
                        }
                    }
                    None => break,
                },
                reply = next_reply(&mut self.worker) => match reply {
                    Some(payload) => match WorkerReply::decode(&payload) {
                        Ok(reply) => self.on_reply(reply),
                        Err(e) => warn!("Dropping malformed worker reply: {}", e),
                    },
                    None => self.on_worker_lost(),
                },
                () = sleep_until(deadline) => self.on_timeout(),
            }
        }
    }

    /// No worker will ever exist; drop everything until the host leaves
    async fn inert(&mut self, inbox: &mut mpsc::UnboundedReceiver<String>) {
        self.queued = None;
        while let Some(payload) = inbox.recv().await {
            if let Some(submission) = decode(&payload) {
                warn!(
                    "Worker not ready; dropping submission from {}",
                    submission.display_name()
                );
            }
        }
    }

    fn notify(&self, message: &BridgeMessage) {
        match message.encode() {
            Ok(payload) => {
                if self.host.send(payload).is_err() {
                    debug!("Host is gone; {:?} not delivered", message);
                }
            }
            Err(e) => error!("Failed to encode bridge message: {}", e),
        }
    }

    fn deadline(&self) -> Option<Instant> {
        let timeout = self.config.evaluation_timeout?;
        let in_flight = self.worker.as_ref()?.in_flight.as_ref()?;
        Some(in_flight.started + timeout)
    }

    fn submit(&mut self, submission: ScriptSubmission) {
        let Some(worker) = &self.worker else {
            warn!(
                "Worker not ready; dropping submission from {}",
                submission.display_name()
            );
            return;
        };

        if worker.in_flight.is_some() {
            if let Some(older) = self.queued.replace(submission) {
                debug!("Superseded queued submission from {}", older.display_name());
            }
        } else {
            self.dispatch(submission);
        }
    }

    fn dispatch(&mut self, submission: ScriptSubmission) {
        if self.worker.is_none() {
            warn!(
                "Worker not ready; dropping submission from {}",
                submission.display_name()
            );
            return;
        }

        let mut generation = 0;
        self.render.send_modify(|state| generation = state.begin());
        info!(
            "Evaluating {} (generation {})",
            submission.display_name(),
            generation
        );

        if self.worker.as_mut().is_some_and(|w| w.begin(&submission)) {
            return;
        }
        warn!("Evaluation worker is gone; restarting");
        self.restart_worker();
        if !self.worker.as_mut().is_some_and(|w| w.begin(&submission)) {
            self.render.send_modify(|state| {
                state.push_log("Error: the evaluation worker could not be started");
            });
        }
    }

    fn on_reply(&mut self, reply: WorkerReply) {
        self.silent_losses = 0;
        let Some(worker) = self.worker.as_mut() else {
            return;
        };
        let Some(in_flight) = &worker.in_flight else {
            debug!("Ignoring reply outside an evaluation: {:?}", reply);
            return;
        };

        let finished = reply.is_result();
        if finished {
            debug!(
                "Evaluation of {} finished in {:?}",
                in_flight.source_id,
                in_flight.started.elapsed()
            );
            worker.in_flight = None;
        }
        self.render.send_modify(|state| state.apply(reply));

        if finished && let Some(next) = self.queued.take() {
            self.dispatch(next);
        }
    }

    fn on_timeout(&mut self) {
        let Some(timeout) = self.config.evaluation_timeout else {
            return;
        };
        if let Some(worker) = &self.worker {
            warn!(
                "Evaluation exceeded {:?}; restarting {}",
                timeout,
                worker.handle.name()
            );
        }
        self.render.send_modify(|state| {
            state.push_log(format!(
                "Error: evaluation timed out after {} ms; the kernel was restarted",
                timeout.as_millis()
            ));
        });
        self.restart_worker();
        self.flush_queue();
    }

    fn on_worker_lost(&mut self) {
        let Some(lost) = self.worker.take() else {
            return;
        };
        self.silent_losses += 1;
        warn!("{} stopped unexpectedly", lost.handle.name());
        if lost.in_flight.is_some() {
            self.render.send_modify(|state| {
                state.push_log("Error: the evaluation worker stopped unexpectedly");
            });
        }
        drop(lost);

        if self.silent_losses >= MAX_SILENT_RESTARTS {
            let message = EngineError::BridgeBootstrap(format!(
                "the evaluation worker stopped {} times without replying",
                self.silent_losses
            ))
            .to_string();
            error!("{}", message);
            self.queued = None;
            self.status.send_replace(BridgeStatus::Failed(message.clone()));
            self.notify(&BridgeMessage::BootstrapFailed { message });
            return;
        }

        self.restart_worker();
        self.flush_queue();
    }

    fn flush_queue(&mut self) {
        if let Some(next) = self.queued.take() {
            self.dispatch(next);
        }
    }

    /// Replace the worker with a fresh one; the kernel initializes again
    fn restart_worker(&mut self) {
        if let Some(mut old) = self.worker.take() {
            old.handle.terminate();
        }

        let started = WorkerSession::start(
            &self.worker_name,
            self.factory.clone(),
            &self.config.kernel_binary,
        );
        match started {
            Ok(session) => self.worker = Some(session),
            Err(e) => {
                let message = e.to_string();
                error!("Could not restart worker: {}", message);
                self.status.send_replace(BridgeStatus::Failed(message.clone()));
                self.notify(&BridgeMessage::BootstrapFailed { message });
            }
        }
    }

    fn shutdown(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.handle.terminate();
        }
        self.queued = None;
        self.status.send_replace(BridgeStatus::Terminated);
        info!("Preview bridge closed");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_parse() {
        let ok = WorkerBootstrap::parse(r#"{ "name": "rhai", "protocol": 1 }"#).unwrap();
        assert_eq!(ok.name, "rhai");

        assert!(matches!(
            WorkerBootstrap::parse(r#"{ "name": "rhai", "protocol": 9 }"#),
            Err(EngineError::BridgeBootstrap(_))
        ));
        assert!(matches!(
            WorkerBootstrap::parse(r#"{ "name": " ", "protocol": 1 }"#),
            Err(EngineError::BridgeBootstrap(_))
        ));
        assert!(WorkerBootstrap::parse("<html>").is_err());
    }

    #[tokio::test]
    async fn test_unreadable_bootstrap_fails() {
        let err = WorkerBootstrap::fetch("file:///nonexistent/forma/worker-bootstrap.json")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cannot read"));
    }
}
