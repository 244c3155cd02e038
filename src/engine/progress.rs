// UI collaborators: the loading overlay and the fatal error banner.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{error, warn};

use crate::source::traits::DownloadProgress;

/// Loading overlay. Calls must return quickly; they only update displayed text.
pub trait LoadingIndicator: Send + Sync {
    fn show(&self, text: &str);
    fn update_text(&self, text: &str);
    fn hide(&self);
}

/// Fatal error banner.
pub trait ErrorDisplay: Send + Sync {
    fn show(&self, title: &str, message: &str);
}

/// Status line for an in-flight download.
pub fn download_status(progress: &DownloadProgress) -> String {
    match progress.percent() {
        Some(pct) => format!("Downloading ROM... {}%", pct),
        None => "Downloading ROM...".to_string(),
    }
}

/// Forwards at most one fatal error per session to the underlying display.
pub struct FatalLatch {
    display: Arc<dyn ErrorDisplay>,
    fired: AtomicBool,
}

impl FatalLatch {
    pub fn new(display: Arc<dyn ErrorDisplay>) -> Self {
        Self {
            display,
            fired: AtomicBool::new(false),
        }
    }

    /// Show the error unless one was already shown. Returns whether it was shown.
    pub fn raise(&self, title: &str, message: &str) -> bool {
        if self.fired.swap(true, Ordering::SeqCst) {
            warn!("suppressed second fatal error: {}: {}", title, message);
            return false;
        }
        error!("{}: {}", title, message);
        self.display.show(title, message);
        true
    }
}
