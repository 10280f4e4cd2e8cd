//! Host controller
//!
//! Runs on the editor side. It owns at most one preview [`Session`], reacts
//! to editor events, and relays script text to the surface. It never waits
//! for an evaluation: results flow from the bridge straight to presentation.

use crate::assets::{AssetResolver, AssetRole};
use crate::bridge::BridgeStatus;
use crate::error::Result;
use crate::surface::{Surface, SurfaceContent, SurfaceFactory, SurfaceParts};
use forma_protocol::{BridgeMessage, HostMessage, RenderState, ScriptSubmission, is_cad_script};
use std::future::pending;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// An editor document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub path: PathBuf,
    pub text: String,
}

impl Document {
    pub fn new(path: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            text: text.into(),
        }
    }

    pub fn is_cad_script(&self) -> bool {
        is_cad_script(&self.path)
    }

    pub fn submission(&self) -> ScriptSubmission {
        ScriptSubmission::from_document(&self.text, &self.path)
    }
}

/// What the host needs from the editor
pub trait EditorEnvironment: Send {
    /// The focused document, if any
    fn active_document(&self) -> Option<Document>;

    /// Documents currently visible, in display order
    fn visible_documents(&self) -> Vec<Document>;

    /// Show a persistent error notice to the user
    fn show_error(&self, message: &str);
}

/// Events the editor delivers to the host
#[derive(Debug, Clone)]
pub enum EditorEvent {
    OpenPreview,
    DocumentSaved(Document),
    SurfaceClosed,
    Shutdown,
}

/// One open preview
pub struct Session {
    surface: Box<dyn Surface>,
    events: mpsc::UnboundedReceiver<String>,
    render: watch::Receiver<RenderState>,
    status: watch::Receiver<BridgeStatus>,
    content: SurfaceContent,
    ready: bool,
    last_script: Option<ScriptSubmission>,
}

impl Session {
    fn new(parts: SurfaceParts, content: SurfaceContent) -> Self {
        Self {
            surface: parts.surface,
            events: parts.events,
            render: parts.render,
            status: parts.status,
            content,
            ready: false,
            last_script: None,
        }
    }

    /// Whether the bridge has signaled readiness
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Most recent submission sent to the surface
    pub fn last_script(&self) -> Option<&ScriptSubmission> {
        self.last_script.as_ref()
    }

    /// Subscribe to presentation state
    pub fn render(&self) -> watch::Receiver<RenderState> {
        self.render.clone()
    }

    /// Subscribe to bridge status
    pub fn status(&self) -> watch::Receiver<BridgeStatus> {
        self.status.clone()
    }

    /// Content the surface was opened with
    pub fn content(&self) -> &SurfaceContent {
        &self.content
    }

    fn dispatch(&mut self, submission: ScriptSubmission) {
        debug!("Sending {} to the preview", submission.display_name());
        self.surface
            .post_message(&HostMessage::UpdateScript(submission.clone()));
        self.last_script = Some(submission);
    }
}

/// Editor-side controller for the preview pipeline
pub struct HostController<E: EditorEnvironment> {
    editor: E,
    assets: Box<dyn AssetResolver>,
    surfaces: Arc<dyn SurfaceFactory>,
    title: String,
    session: Option<Session>,
}

impl<E: EditorEnvironment> HostController<E> {
    pub fn new(
        editor: E,
        assets: Box<dyn AssetResolver>,
        surfaces: Arc<dyn SurfaceFactory>,
    ) -> Self {
        Self {
            editor,
            assets,
            surfaces,
            title: "Forma Preview".to_string(),
            session: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn editor(&self) -> &E {
        &self.editor
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Open the preview, or reveal it if it is already open
    ///
    /// A missing asset is reported to the user and no surface is created.
    pub fn open_preview(&mut self) -> Result<()> {
        if let Some(session) = &mut self.session {
            session.surface.reveal();
            return Ok(());
        }

        let content = match self
            .assets
            .resolve(&AssetRole::ALL)
            .and_then(|assets| SurfaceContent::from_assets(self.title.clone(), &assets))
        {
            Ok(content) => content,
            Err(e) => {
                self.editor.show_error(&e.to_string());
                return Err(e);
            }
        };

        let parts = match self.surfaces.create(content.clone()) {
            Ok(parts) => parts,
            Err(e) => {
                self.editor.show_error(&e.to_string());
                return Err(e);
            }
        };

        info!("Preview opened");
        self.session = Some(Session::new(parts, content));
        Ok(())
    }

    /// The bridge finished bootstrapping
    ///
    /// If a script was already sent before readiness the bridge holds it and
    /// runs it now, so nothing more is sent.
    pub fn on_surface_ready(&mut self) {
        let Some(session) = &mut self.session else {
            return;
        };
        session.ready = true;

        if session.last_script.is_some() {
            debug!("Pre-ready submission pending in the bridge");
            return;
        }

        let document = self
            .editor
            .active_document()
            .filter(Document::is_cad_script)
            .or_else(|| {
                self.editor
                    .visible_documents()
                    .into_iter()
                    .find(Document::is_cad_script)
            });

        match document {
            Some(document) => session.dispatch(document.submission()),
            None => debug!("No CAD script open; waiting for a save"),
        }
    }

    /// A document was saved; scripts are sent whether or not the bridge is ready
    pub fn on_document_saved(&mut self, document: &Document) {
        let Some(session) = &mut self.session else {
            return;
        };
        if !document.is_cad_script() {
            return;
        }
        session.dispatch(document.submission());
    }

    /// The surface was closed by the user or the host is shutting down
    pub fn on_surface_closed(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.surface.dispose();
            info!("Preview closed");
        }
    }

    /// Handle a wire payload from the bridge
    pub fn on_bridge_message(&mut self, payload: &str) {
        match BridgeMessage::decode(payload) {
            Ok(BridgeMessage::Ready) => self.on_surface_ready(),
            Ok(BridgeMessage::BootstrapFailed { message }) => self.editor.show_error(&message),
            Err(e) => warn!("Ignoring malformed bridge message: {}", e),
        }
    }

    /// Wait for one bridge message and handle it
    ///
    /// Returns false if no preview is open or its bridge has stopped.
    pub async fn pump_bridge(&mut self) -> bool {
        let payload = match &mut self.session {
            Some(session) => session.events.recv().await,
            None => None,
        };
        match payload {
            Some(payload) => {
                self.on_bridge_message(&payload);
                true
            }
            None => false,
        }
    }

    /// Drive the controller until `Shutdown` or the event source closes
    pub async fn run(&mut self, mut events: mpsc::UnboundedReceiver<EditorEvent>) {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(EditorEvent::OpenPreview) => {
                        // Already reported through the editor
                        let _ = self.open_preview();
                    }
                    Some(EditorEvent::DocumentSaved(document)) => self.on_document_saved(&document),
                    Some(EditorEvent::SurfaceClosed) => self.on_surface_closed(),
                    Some(EditorEvent::Shutdown) | None => break,
                },
                message = next_bridge_message(&mut self.session) => match message {
                    Some(payload) => self.on_bridge_message(&payload),
                    None => {
                        warn!("Preview bridge stopped");
                        self.on_surface_closed();
                    }
                },
            }
        }
        self.on_surface_closed();
    }
}

async fn next_bridge_message(session: &mut Option<Session>) -> Option<String> {
    match session {
        Some(session) => session.events.recv().await,
        None => pending().await,
    }
}
