//! Preview surfaces
//!
//! A surface is the isolated context the UI bridge runs in. The host only
//! talks to it through [`Surface::post_message`] and the event mailbox it
//! gets back from the factory; both carry JSON wire payloads.

use crate::assets::{AssetRole, ResolvedAssets};
use crate::bridge::{BridgeConfig, BridgeStatus, spawn_bridge};
use crate::error::Result;
use forma_kernel::KernelFactory;
use forma_protocol::{HostMessage, RenderState};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Everything a surface needs to boot: a title and the six asset addresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceContent {
    pub title: String,
    pub worker_bootstrap: String,
    pub kernel_binary: String,
    pub ui_script: String,
    pub ui_stylesheet: String,
    pub play_icon: String,
    pub pause_icon: String,
}

impl SurfaceContent {
    /// Build from resolved assets; every role must be present
    pub fn from_assets(title: impl Into<String>, assets: &ResolvedAssets) -> Result<Self> {
        Ok(Self {
            title: title.into(),
            worker_bootstrap: assets.require(AssetRole::WorkerBootstrap)?.to_string(),
            kernel_binary: assets.require(AssetRole::KernelBinary)?.to_string(),
            ui_script: assets.require(AssetRole::UiScript)?.to_string(),
            ui_stylesheet: assets.require(AssetRole::UiStylesheet)?.to_string(),
            play_icon: assets.require(AssetRole::PlayIcon)?.to_string(),
            pause_icon: assets.require(AssetRole::PauseIcon)?.to_string(),
        })
    }

    /// Render the bootstrap page a webview-style surface would load
    pub fn to_html(&self) -> String {
        format!(
            r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <title>{title}</title>
  <link rel="stylesheet" href="{stylesheet}">
</head>
<body data-worker-bootstrap="{bootstrap}" data-kernel-binary="{kernel}">
  <div id="viewport"></div>
  <div id="controls">
    <button id="toggle-rotation"><img src="{pause}" data-play-icon="{play}" data-pause-icon="{pause}" alt="Pause"></button>
  </div>
  <pre id="console"></pre>
  <script src="{script}"></script>
</body>
</html>
"#,
            title = escape(&self.title),
            stylesheet = escape(&self.ui_stylesheet),
            bootstrap = escape(&self.worker_bootstrap),
            kernel = escape(&self.kernel_binary),
            play = escape(&self.play_icon),
            pause = escape(&self.pause_icon),
            script = escape(&self.ui_script),
        )
    }

    fn bridge_config(&self, evaluation_timeout: Option<Duration>) -> BridgeConfig {
        BridgeConfig {
            worker_bootstrap: self.worker_bootstrap.clone(),
            kernel_binary: self.kernel_binary.clone(),
            evaluation_timeout,
        }
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// A presentation surface hosting one UI bridge
pub trait Surface: Send {
    /// Bring the surface to the foreground
    fn reveal(&mut self);

    /// Fire-and-forget delivery to the bridge; no reply is awaited
    fn post_message(&self, message: &HostMessage);

    /// Tear the surface down, terminating its worker
    fn dispose(&mut self);
}

/// A new surface plus the channels the host observes
pub struct SurfaceParts {
    pub surface: Box<dyn Surface>,
    /// Wire-encoded `BridgeMessage`s from the bridge
    pub events: mpsc::UnboundedReceiver<String>,
    pub render: watch::Receiver<RenderState>,
    pub status: watch::Receiver<BridgeStatus>,
}

/// Creates surfaces on demand
pub trait SurfaceFactory: Send + Sync {
    fn create(&self, content: SurfaceContent) -> Result<SurfaceParts>;
}

/// Factory running each bridge as a task on the current tokio runtime
pub struct LocalSurfaceFactory {
    kernels: KernelFactory,
    evaluation_timeout: Option<Duration>,
    created: AtomicUsize,
}

impl LocalSurfaceFactory {
    pub fn new(kernels: KernelFactory) -> Self {
        Self {
            kernels,
            evaluation_timeout: None,
            created: AtomicUsize::new(0),
        }
    }

    pub fn with_evaluation_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.evaluation_timeout = timeout;
        self
    }

    /// Number of surfaces created so far
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl SurfaceFactory for LocalSurfaceFactory {
    fn create(&self, content: SurfaceContent) -> Result<SurfaceParts> {
        let bridge = spawn_bridge(
            content.bridge_config(self.evaluation_timeout),
            self.kernels.clone(),
        );
        self.created.fetch_add(1, Ordering::SeqCst);
        info!("Opened preview surface '{}'", content.title);

        let surface = LocalSurface {
            title: content.title,
            inbox: Some(bridge.inbox),
        };

        Ok(SurfaceParts {
            surface: Box::new(surface),
            events: bridge.events,
            render: bridge.render,
            status: bridge.status,
        })
    }
}

/// In-process surface; the bridge task is its only content
///
/// The task is detached and ends on its own once the inbox closes.
pub struct LocalSurface {
    title: String,
    inbox: Option<mpsc::UnboundedSender<String>>,
}

impl Surface for LocalSurface {
    fn reveal(&mut self) {
        info!("Revealing preview surface '{}'", self.title);
    }

    fn post_message(&self, message: &HostMessage) {
        let Some(inbox) = &self.inbox else {
            debug!("Surface disposed; message dropped");
            return;
        };
        match message.encode() {
            Ok(payload) => {
                if inbox.send(payload).is_err() {
                    warn!("Preview bridge has stopped; message dropped");
                }
            }
            Err(e) => warn!("Failed to encode host message: {}", e),
        }
    }

    fn dispose(&mut self) {
        // Closing the inbox makes the bridge terminate its worker and stop
        if self.inbox.take().is_some() {
            info!("Disposed preview surface '{}'", self.title);
        }
    }
}

impl Drop for LocalSurface {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::EngineError;

    fn assets() -> ResolvedAssets {
        let mut assets = ResolvedAssets::default();
        for role in AssetRole::ALL {
            assets.insert(role, format!("file:///assets/{role}"));
        }
        assets
    }

    #[test]
    fn test_content_requires_every_role() {
        let content = SurfaceContent::from_assets("Preview", &assets()).unwrap();
        assert_eq!(content.kernel_binary, "file:///assets/kernel-binary");

        let mut partial = ResolvedAssets::default();
        partial.insert(AssetRole::WorkerBootstrap, "file:///b.json");
        assert!(matches!(
            SurfaceContent::from_assets("Preview", &partial),
            Err(EngineError::AssetMissing {
                role: AssetRole::KernelBinary
            })
        ));
    }

    #[test]
    fn test_html_embeds_addresses() {
        let content = SurfaceContent::from_assets("Gear <v2>", &assets()).unwrap();
        let html = content.to_html();

        assert!(html.contains("<title>Gear &lt;v2&gt;</title>"));
        assert!(html.contains(r#"href="file:///assets/ui-stylesheet""#));
        assert!(html.contains(r#"data-kernel-binary="file:///assets/kernel-binary""#));
        assert!(html.contains(r#"src="file:///assets/ui-script""#));
        assert!(html.contains("file:///assets/play-icon"));
    }
}
