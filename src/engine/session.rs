// Emulator session state machine: resolves, validates, installs and starts one ROM.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::cache::ContentCache;
use super::emulator::{Button, CoreAdapter, CoreEvent, EmulatorCore};
use super::loader::{ContentLoader, ContentOrigin};
use super::progress::{ErrorDisplay, FatalLatch, LoadingIndicator};
use crate::config::{pace, LaunchConfig};
use crate::detect::rom::{detect_format, gba_checksum_ok, validate, RomFormat};
use crate::error::{LaunchError, LaunchResult};
use crate::source::traits::RomSource;

pub const LOAD_ERROR_TITLE: &str = "Error loading the game";
pub const CRASH_ERROR_TITLE: &str = "Emulator Crashed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    Idle,
    FetchingContent,
    Validating,
    InstallingIntoEngine,
    Starting,
    Running,
    Failed,
}

impl BootstrapState {
    pub fn is_terminal(self) -> bool {
        matches!(self, BootstrapState::Running | BootstrapState::Failed)
    }

    fn next(self) -> Option<Self> {
        use BootstrapState::*;
        match self {
            Idle => Some(FetchingContent),
            FetchingContent => Some(Validating),
            Validating => Some(InstallingIntoEngine),
            InstallingIntoEngine => Some(Starting),
            Starting => Some(Running),
            Running | Failed => None,
        }
    }

    /// Only the single forward step, or `Failed` from any non-terminal state.
    pub fn can_transition_to(self, to: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        to == BootstrapState::Failed || self.next() == Some(to)
    }
}

pub struct EmulatorSession {
    config: LaunchConfig,
    adapter: CoreAdapter,
    loader: ContentLoader,
    loading: Arc<dyn LoadingIndicator>,
    fatal: Arc<FatalLatch>,
    history: Mutex<Vec<BootstrapState>>,
    held_buttons: Mutex<HashSet<Button>>,
    crashed: Arc<AtomicBool>,
    shutdown_token: CancellationToken,
    event_worker: Mutex<Option<JoinHandle<()>>>,
}

impl EmulatorSession {
    pub fn new(
        config: LaunchConfig,
        core: Arc<dyn EmulatorCore>,
        cache: Arc<dyn ContentCache>,
        source: Arc<dyn RomSource>,
        loading: Arc<dyn LoadingIndicator>,
        errors: Arc<dyn ErrorDisplay>,
    ) -> Self {
        let loader =
            ContentLoader::new(cache, source).with_cache_hit_delay(config.delays.cache_hit());
        let adapter = CoreAdapter::new(core, config.rom_name.clone());
        Self {
            config,
            adapter,
            loader,
            loading,
            fatal: Arc::new(FatalLatch::new(errors)),
            history: Mutex::new(vec![BootstrapState::Idle]),
            held_buttons: Mutex::new(HashSet::new()),
            crashed: Arc::new(AtomicBool::new(false)),
            shutdown_token: CancellationToken::new(),
            event_worker: Mutex::new(None),
        }
    }

    pub fn state(&self) -> BootstrapState {
        let history = self.history.lock();
        *history.last().unwrap_or(&BootstrapState::Idle)
    }

    /// Every state visited so far, starting with `Idle`.
    pub fn history(&self) -> Vec<BootstrapState> {
        self.history.lock().clone()
    }

    pub fn rom_name(&self) -> &str {
        &self.config.rom_name
    }

    fn transition(&self, to: BootstrapState) {
        let mut history = self.history.lock();
        let from = *history.last().unwrap_or(&BootstrapState::Idle);
        if !from.can_transition_to(to) {
            warn!("ignoring illegal transition {:?} -> {:?}", from, to);
            return;
        }
        debug!("bootstrap {:?} -> {:?}", from, to);
        history.push(to);
    }

    /// Run the bootstrap sequence once. A failure is terminal for this session
    /// and is shown through the error display exactly once.
    pub async fn bootstrap(&self) -> LaunchResult<ContentOrigin> {
        {
            let mut history = self.history.lock();
            if history.last() != Some(&BootstrapState::Idle) {
                return Err(LaunchError::AlreadyStarted);
            }
            history.push(BootstrapState::FetchingContent);
        }

        info!("bootstrapping rom={}", self.config.rom_name);
        self.loading.show("Loading ROM...");

        match self.run_steps().await {
            Ok(origin) => {
                self.transition(BootstrapState::Running);
                info!("session running rom={} origin={:?}", self.config.rom_name, origin);
                Ok(origin)
            }
            Err(e) => {
                error!(
                    "bootstrap failed at {:?} kind={}: {}",
                    self.state(),
                    e.kind(),
                    e
                );
                self.transition(BootstrapState::Failed);
                self.fatal.raise(LOAD_ERROR_TITLE, &e.to_string());
                Err(e)
            }
        }
    }

    async fn run_steps(&self) -> LaunchResult<ContentOrigin> {
        let name = self.config.rom_name.as_str();
        let delays = &self.config.delays;

        let (data, origin) = self
            .loader
            .resolve(name, &self.config.cache_key, self.loading.as_ref())
            .await?;

        self.transition(BootstrapState::Validating);
        self.loading.update_text("Validating ROM data...");
        pace(delays.validate()).await;
        validate(&data, name)?;
        match detect_format(&data) {
            RomFormat::Gba if !gba_checksum_ok(&data) => {
                warn!("rom={} has a GBA header with a bad checksum", name)
            }
            RomFormat::Gba => debug!("rom={} has a valid GBA header", name),
            RomFormat::Unknown => debug!("rom={} header not recognized", name),
        }

        self.transition(BootstrapState::InstallingIntoEngine);
        self.loading.update_text("Setting up emulator...");
        pace(delays.setup()).await;
        let settings = self
            .config
            .core
            .to_map(self.adapter.core().shared_memory_available());
        self.adapter.prepare(&settings).await?;
        let path = self.config.install_path();
        self.adapter.install(&path, &data).await?;

        self.transition(BootstrapState::Starting);
        self.loading.update_text("Loading game...");
        pace(delays.start()).await;
        self.adapter.start(&path).await?;
        info!("ROM loaded");
        self.loading.hide();

        self.wire_callbacks();
        Ok(origin)
    }

    /// Start the single worker that handles core events one at a time.
    fn wire_callbacks(&self) {
        let mut events = self.adapter.subscribe();
        let core = Arc::clone(self.adapter.core());
        let fatal = Arc::clone(&self.fatal);
        let crashed = Arc::clone(&self.crashed);
        let token = self.shutdown_token.clone();

        let handle = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    event = events.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                    _ = token.cancelled() => break,
                };

                match event {
                    CoreEvent::SaveDataUpdated => {
                        if crashed.load(Ordering::SeqCst) {
                            debug!("skipping save sync: core crashed");
                            continue;
                        }
                        match core.sync_filesystem().await {
                            Ok(()) => debug!("save data synced"),
                            Err(e) => warn!("save data sync failed: {}", e),
                        }
                    }
                    CoreEvent::CoreCrashed => {
                        error!("Core has crashed!");
                        crashed.store(true, Ordering::SeqCst);
                        fatal.raise(CRASH_ERROR_TITLE, &LaunchError::EngineCrash.to_string());
                    }
                }
            }
            debug!("core event worker stopped");
        });

        *self.event_worker.lock() = Some(handle);
    }

    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    fn accepts_input(&self) -> bool {
        self.state() == BootstrapState::Running && !self.has_crashed()
    }

    /// Forward a button press. Returns `false` if ignored.
    pub fn press(&self, button: Button) -> bool {
        if !self.accepts_input() {
            return false;
        }
        if !self.held_buttons.lock().insert(button) {
            return false;
        }
        self.adapter.core().button_press(button);
        true
    }

    /// Forward a button release. Returns `false` if the button was not held.
    pub fn release(&self, button: Button) -> bool {
        if !self.held_buttons.lock().remove(&button) {
            return false;
        }
        self.adapter.core().button_unpress(button);
        true
    }

    pub fn release_all(&self) {
        let held: Vec<Button> = self.held_buttons.lock().drain().collect();
        for button in held {
            self.adapter.core().button_unpress(button);
        }
    }

    /// Wait for detached cache writes from this session's download.
    pub async fn flush_cache_writes(&self) {
        self.loader.flush_cache_writes().await;
    }

    /// Stop handling core events.
    pub fn shutdown(&self) {
        self.shutdown_token.cancel();
    }

    /// Stop the event worker and wait for it to exit.
    pub async fn close(&self) {
        self.shutdown();
        let handle = self.event_worker.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("core event worker failed: {}", e);
            }
        }
    }
}

impl Drop for EmulatorSession {
    fn drop(&mut self) {
        debug!("EmulatorSession {} dropped, stopping event worker", self.config.rom_name);
        self.shutdown_token.cancel();
    }
}
