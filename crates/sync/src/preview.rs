//! Single-slot media preview.
//!
//! At most one preview (a target image or a platform's live stream) is
//! shown at a time. Opening a new one replaces the old; closing clears it.

use tacmap_core::map::MediaRef;
use tokio::sync::watch;

pub struct PreviewOverlay {
    active: watch::Sender<Option<MediaRef>>,
}

impl PreviewOverlay {
    pub fn new() -> Self {
        Self {
            active: watch::channel(None).0,
        }
    }

    /// Show `media`, replacing whatever is currently shown.
    pub fn open(&self, media: MediaRef) {
        tracing::debug!(kind = ?media.kind, url = %media.url, "Preview opened");
        self.active.send_if_modified(|current| {
            if current.as_ref() == Some(&media) {
                return false;
            }
            *current = Some(media);
            true
        });
    }

    pub fn close(&self) {
        self.active.send_if_modified(|current| current.take().is_some());
    }

    pub fn active(&self) -> Option<MediaRef> {
        self.active.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<MediaRef>> {
        self.active.subscribe()
    }
}

impl Default for PreviewOverlay {
    fn default() -> Self {
        Self::new()
    }
}
