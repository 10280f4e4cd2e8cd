//! Forma Protocol - messages exchanged by the preview pipeline
//!
//! The pipeline is split across three isolated contexts that only talk
//! through ordered, fire-and-forget mailboxes:
//!
//! ```text
//! Host Controller ──updateScript──► UI Bridge ──init / {code}──► Evaluation Worker
//!        ▲                              │  ▲                            │
//!        └──────── ready ───────────────┘  └──── {log} / {assetUrl} ────┘
//! ```
//!
//! This crate owns the typed messages, their JSON wire form, and the
//! values that flow through them ([`ScriptSubmission`], [`RenderState`]).

mod error;
pub mod message;
pub mod render;
pub mod script;

pub use error::{ProtocolError, Result};
pub use message::{BridgeMessage, HostMessage, WorkerReply, WorkerRequest};
pub use render::{EvaluationOutcome, EvaluationResult, RenderState};
pub use script::{SCRIPT_EXTENSIONS, ScriptSubmission, is_cad_script, prepare_source};
