// Emulator core seam: the opaque engine contract and the adapter the sequencer drives.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::LaunchError;

/// Notifications raised by the core at arbitrary times after start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreEvent {
    SaveDataUpdated,
    CoreCrashed,
}

/// Handle the core uses to deliver [`CoreEvent`]s.
#[derive(Clone)]
pub struct CoreEventSink {
    tx: mpsc::UnboundedSender<CoreEvent>,
}

impl CoreEventSink {
    pub fn save_data_updated(&self) {
        self.emit(CoreEvent::SaveDataUpdated);
    }

    pub fn core_crashed(&self) {
        self.emit(CoreEvent::CoreCrashed);
    }

    fn emit(&self, event: CoreEvent) {
        if self.tx.send(event).is_err() {
            debug!("core event {:?} dropped: session closed", event);
        }
    }
}

/// GBA buttons as named by the core's input API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Button {
    A,
    B,
    L,
    R,
    Start,
    Select,
    Up,
    Down,
    Left,
    Right,
}

impl Button {
    pub const ALL: [Button; 10] = [
        Button::A,
        Button::B,
        Button::L,
        Button::R,
        Button::Start,
        Button::Select,
        Button::Up,
        Button::Down,
        Button::Left,
        Button::Right,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Button::A => "a",
            Button::B => "b",
            Button::L => "l",
            Button::R => "r",
            Button::Start => "start",
            Button::Select => "select",
            Button::Up => "up",
            Button::Down => "down",
            Button::Left => "left",
            Button::Right => "right",
        }
    }
}

impl FromStr for Button {
    type Err = LaunchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|b| b.name() == name)
            .ok_or(LaunchError::UnknownButton(name))
    }
}

impl fmt::Display for Button {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The opaque emulation engine.
#[async_trait]
pub trait EmulatorCore: Send + Sync {
    /// Project name and version, for logs.
    fn version(&self) -> String;

    /// Whether the host can share memory with worker threads.
    fn shared_memory_available(&self) -> bool {
        false
    }

    async fn configure(&self, settings: &Map<String, Value>) -> Result<()>;
    async fn init_filesystem(&self) -> Result<()>;
    async fn write_file(&self, path: &str, data: &[u8]) -> Result<()>;
    async fn load_game(&self, path: &str) -> Result<()>;
    async fn list_saves(&self) -> Result<Vec<String>>;

    /// Flush engine-internal save data to durable storage.
    async fn sync_filesystem(&self) -> Result<()>;

    /// Register the sink save/crash notifications are delivered to.
    fn add_core_callbacks(&self, sink: CoreEventSink);

    fn button_press(&self, button: Button);
    fn button_unpress(&self, button: Button);
}

/// Labels core failures with the ROM they concern. Never retries.
pub struct CoreAdapter {
    core: Arc<dyn EmulatorCore>,
    rom_name: String,
}

impl CoreAdapter {
    pub fn new(core: Arc<dyn EmulatorCore>, rom_name: impl Into<String>) -> Self {
        Self {
            core,
            rom_name: rom_name.into(),
        }
    }

    pub fn core(&self) -> &Arc<dyn EmulatorCore> {
        &self.core
    }

    fn install_error(&self, source: anyhow::Error) -> LaunchError {
        LaunchError::EngineInstall {
            name: self.rom_name.clone(),
            source,
        }
    }

    /// Apply settings and bring up the core's filesystem.
    pub async fn prepare(&self, settings: &Map<String, Value>) -> Result<Vec<String>, LaunchError> {
        info!("emulator core {}", self.core.version());
        self.core
            .configure(settings)
            .await
            .map_err(|e| self.install_error(e.context("applying core settings")))?;
        self.core
            .init_filesystem()
            .await
            .map_err(|e| self.install_error(e.context("initializing filesystem")))?;
        let saves = self
            .core
            .list_saves()
            .await
            .map_err(|e| self.install_error(e.context("listing saves")))?;
        info!("saves: {:?}", saves);
        Ok(saves)
    }

    pub async fn install(&self, path: &str, data: &[u8]) -> Result<(), LaunchError> {
        self.core
            .write_file(path, data)
            .await
            .map_err(|e| self.install_error(e.context(format!("writing {}", path))))
    }

    pub async fn start(&self, path: &str) -> Result<(), LaunchError> {
        self.core.load_game(path).await.map_err(|e| {
            let message = e.to_string();
            LaunchError::EngineStart {
                name: self.rom_name.clone(),
                message: if message.trim().is_empty() {
                    "Invalid ROM format".to_string()
                } else {
                    message
                },
            }
        })
    }

    /// Register callbacks and return the receiving end of the event channel.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<CoreEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.core.add_core_callbacks(CoreEventSink { tx });
        rx
    }
}
