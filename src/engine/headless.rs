// In-process core without video or audio output: a virtual filesystem plus
// the cartridge checks a real core performs on load.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::emulator::{Button, CoreEventSink, EmulatorCore};
use crate::detect::rom::{detect_format, RomFormat};

/// Virtual directory holding battery saves.
pub const SAVES_DIR: &str = "/data/saves/";

pub struct HeadlessCore {
    files: RwLock<HashMap<String, Bytes>>,
    settings: RwLock<Map<String, Value>>,
    fs_ready: AtomicBool,
    loaded: RwLock<Option<String>>,
    held: Mutex<HashSet<Button>>,
    sink: Mutex<Option<CoreEventSink>>,
    save_dir: Option<PathBuf>,
}

impl HeadlessCore {
    /// `save_dir` receives battery saves on every filesystem sync.
    pub fn new(save_dir: Option<PathBuf>) -> Self {
        Self {
            files: RwLock::new(HashMap::new()),
            settings: RwLock::new(Map::new()),
            fs_ready: AtomicBool::new(false),
            loaded: RwLock::new(None),
            held: Mutex::new(HashSet::new()),
            sink: Mutex::new(None),
            save_dir,
        }
    }

    /// Write battery save data the way a running game would, then notify.
    pub fn write_save(&self, name: &str, data: impl Into<Bytes>) {
        self.files
            .write()
            .insert(format!("{}{}", SAVES_DIR, name), data.into());
        if let Some(sink) = self.sink.lock().as_ref() {
            sink.save_data_updated();
        }
    }

    /// Simulate a fatal fault inside the core.
    pub fn raise_crash(&self) {
        if let Some(sink) = self.sink.lock().as_ref() {
            sink.core_crashed();
        }
    }

    pub fn file(&self, path: &str) -> Option<Bytes> {
        self.files.read().get(path).cloned()
    }

    pub fn loaded_game(&self) -> Option<String> {
        self.loaded.read().clone()
    }

    pub fn setting(&self, name: &str) -> Option<Value> {
        self.settings.read().get(name).cloned()
    }

    pub fn is_held(&self, button: Button) -> bool {
        self.held.lock().contains(&button)
    }
}

#[async_trait]
impl EmulatorCore for HeadlessCore {
    fn version(&self) -> String {
        format!("headless {}", env!("CARGO_PKG_VERSION"))
    }

    async fn configure(&self, settings: &Map<String, Value>) -> Result<()> {
        debug!("core settings: {:?}", settings);
        *self.settings.write() = settings.clone();
        Ok(())
    }

    async fn init_filesystem(&self) -> Result<()> {
        if let Some(dir) = &self.save_dir {
            tokio::fs::create_dir_all(dir).await?;
            let mut entries = tokio::fs::read_dir(dir).await?;
            let mut restored = 0usize;
            while let Some(entry) = entries.next_entry().await? {
                if !entry.file_type().await?.is_file() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy().into_owned();
                let data = tokio::fs::read(entry.path()).await?;
                self.files
                    .write()
                    .insert(format!("{}{}", SAVES_DIR, name), Bytes::from(data));
                restored += 1;
            }
            info!("restored {} save file(s) from {}", restored, dir.display());
        }
        self.fs_ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        if !self.fs_ready.load(Ordering::SeqCst) {
            bail!("filesystem not initialized");
        }
        self.files
            .write()
            .insert(path.to_string(), Bytes::copy_from_slice(data));
        debug!("wrote {} ({} bytes)", path, data.len());
        Ok(())
    }

    async fn load_game(&self, path: &str) -> Result<()> {
        let data = self
            .file(path)
            .ok_or_else(|| anyhow!("no such file: {}", path))?;
        if detect_format(&data) != RomFormat::Gba {
            bail!("Invalid ROM format");
        }
        *self.loaded.write() = Some(path.to_string());
        info!("game loaded from {}", path);
        Ok(())
    }

    async fn list_saves(&self) -> Result<Vec<String>> {
        let mut saves: Vec<String> = self
            .files
            .read()
            .keys()
            .filter_map(|k| k.strip_prefix(SAVES_DIR).map(str::to_string))
            .collect();
        saves.sort();
        Ok(saves)
    }

    async fn sync_filesystem(&self) -> Result<()> {
        let Some(dir) = &self.save_dir else {
            return Ok(());
        };
        let saves: Vec<(String, Bytes)> = self
            .files
            .read()
            .iter()
            .filter_map(|(k, v)| {
                k.strip_prefix(SAVES_DIR)
                    .map(|name| (name.to_string(), v.clone()))
            })
            .collect();
        for (name, data) in saves {
            if name.contains('/') {
                warn!("skipping nested save path {}", name);
                continue;
            }
            tokio::fs::write(dir.join(&name), &data).await?;
        }
        Ok(())
    }

    fn add_core_callbacks(&self, sink: CoreEventSink) {
        *self.sink.lock() = Some(sink);
    }

    fn button_press(&self, button: Button) {
        self.held.lock().insert(button);
    }

    fn button_unpress(&self, button: Button) {
        self.held.lock().remove(&button);
    }
}
