use std::collections::HashMap;
use std::sync::{Arc, Once};

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::LaunchConfig;
use crate::engine::cache::DiskCache;
use crate::engine::emulator::EmulatorCore;
use crate::engine::progress::{ErrorDisplay, LoadingIndicator};
use crate::engine::session::EmulatorSession;
use crate::source::http_source::HttpSource;

static INIT_TRACING: Once = Once::new();

/// Install the global fmt subscriber. Safe to call more than once.
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,hyper=warn,reqwest=warn"));

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init();

        info!("rom boot tracing initialized");
    });
}

/// Build a session wired to the on-disk cache and the HTTP source described by `config`.
pub fn build_session(
    config: LaunchConfig,
    core: Arc<dyn EmulatorCore>,
    loading: Arc<dyn LoadingIndicator>,
    errors: Arc<dyn ErrorDisplay>,
) -> EmulatorSession {
    let cache = Arc::new(DiskCache::new(&config.cache_dir));
    let source =
        Arc::new(HttpSource::new(config.base_url.clone(), HashMap::new()).with_pacing(&config.delays));
    EmulatorSession::new(config, core, cache, source, loading, errors)
}

/// Loading overlay that writes status changes to the log.
#[derive(Default)]
pub struct ConsoleLoading;

impl LoadingIndicator for ConsoleLoading {
    fn show(&self, text: &str) {
        info!("[loading] {}", text);
    }

    fn update_text(&self, text: &str) {
        info!("[loading] {}", text);
    }

    fn hide(&self) {
        info!("[loading] done");
    }
}

/// Error banner that prints to stderr.
#[derive(Default)]
pub struct ConsoleErrors;

impl ErrorDisplay for ConsoleErrors {
    fn show(&self, title: &str, message: &str) {
        eprintln!("{}: {}", title, message);
    }
}
