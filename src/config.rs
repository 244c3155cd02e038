// Launcher configuration: ROM addressing, cache location, pacing and core settings.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Smallest buffer accepted as a ROM image (1 KB).
pub const MIN_ROM_SIZE: usize = 1024;

/// Number of leading bytes inspected for an HTML error page.
pub const HTML_SNIFF_BYTES: usize = 100;

/// Remote path prefix under which ROM images are served.
pub const DATA_PATH_PREFIX: &str = "data/";

/// Name of the persistent store directory inside `cache_dir`.
pub const CACHE_STORE_NAME: &str = "ROMCache";

/// Name of the single keyed table inside the store.
pub const CACHE_TABLE_NAME: &str = "roms";

/// Frame-rate target of the GBA LCD.
pub const GBA_FPS_TARGET: f64 = 59.7275;

/// Top-level configuration for a launch.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LaunchConfig {
    /// Logical ROM name; fetched from `data/<rom_name>` and installed at `/<rom_name>`.
    pub rom_name: String,
    /// Cache key. Empty disables caching for this launch.
    pub cache_key: String,
    /// Origin the `data/` directory is served from.
    pub base_url: String,
    /// Directory holding the persistent ROM store.
    pub cache_dir: String,
    pub delays: LoadingDelays,
    pub core: CoreSettings,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            rom_name: String::new(),
            cache_key: String::new(),
            base_url: "http://127.0.0.1:8080/".to_string(),
            cache_dir: ".rom-cache".to_string(),
            delays: LoadingDelays::default(),
            core: CoreSettings::default(),
        }
    }
}

impl LaunchConfig {
    /// Parse a TOML document. Missing fields fall back to defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).context("invalid launcher config")
    }

    /// Read and parse a TOML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config {}", path.display()))?;
        Self::from_toml_str(&text)
    }

    /// Virtual filesystem path the ROM is installed at inside the core.
    pub fn install_path(&self) -> String {
        format!("/{}", self.rom_name)
    }
}

/// Artificial pacing between bootstrap steps.
///
/// Disabled by default. When enabled, each step sleeps for its configured
/// duration so the loading overlay stays readable during demos.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoadingDelays {
    pub enabled: bool,
    pub cache_hit_ms: u64,
    pub unsized_download_ms: u64,
    pub chunk_delay_ms: u64,
    pub validate_ms: u64,
    pub setup_ms: u64,
    pub start_ms: u64,
}

impl Default for LoadingDelays {
    fn default() -> Self {
        Self {
            enabled: false,
            cache_hit_ms: 500,
            unsized_download_ms: 2000,
            chunk_delay_ms: 50,
            validate_ms: 1200,
            setup_ms: 1000,
            start_ms: 1500,
        }
    }
}

impl LoadingDelays {
    fn pick(&self, ms: u64) -> Option<Duration> {
        (self.enabled && ms > 0).then(|| Duration::from_millis(ms))
    }

    pub fn cache_hit(&self) -> Option<Duration> {
        self.pick(self.cache_hit_ms)
    }

    pub fn unsized_download(&self) -> Option<Duration> {
        self.pick(self.unsized_download_ms)
    }

    pub fn chunk(&self) -> Option<Duration> {
        self.pick(self.chunk_delay_ms)
    }

    pub fn validate(&self) -> Option<Duration> {
        self.pick(self.validate_ms)
    }

    pub fn setup(&self) -> Option<Duration> {
        self.pick(self.setup_ms)
    }

    pub fn start(&self) -> Option<Duration> {
        self.pick(self.start_ms)
    }
}

/// Sleep for `delay` when pacing is enabled.
pub async fn pace(delay: Option<Duration>) {
    if let Some(d) = delay {
        tokio::time::sleep(d).await;
    }
}

/// Settings applied to the core once, before any content is installed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CoreSettings {
    pub base_fps_target: f64,
    pub allow_opposing_directions: bool,
    pub video_sync: bool,
    pub audio_sync: bool,
    /// `None` lets the core decide based on shared-memory availability.
    pub threaded_video: Option<bool>,
    pub rewind_enable: bool,
    pub show_fps_counter: bool,
    pub auto_save_state_enable: bool,
    pub restore_auto_save_state_on_load: bool,
}

impl Default for CoreSettings {
    fn default() -> Self {
        Self {
            base_fps_target: GBA_FPS_TARGET,
            allow_opposing_directions: false,
            video_sync: false,
            audio_sync: true,
            threaded_video: None,
            rewind_enable: false,
            show_fps_counter: true,
            auto_save_state_enable: false,
            restore_auto_save_state_on_load: false,
        }
    }
}

impl CoreSettings {
    /// Flatten into the named-settings map the core consumes.
    ///
    /// `threaded_video` resolves to `shared_memory` when left unset.
    pub fn to_map(&self, shared_memory: bool) -> Map<String, Value> {
        let mut resolved = self.clone();
        resolved.threaded_video = Some(self.threaded_video.unwrap_or(shared_memory));
        match serde_json::to_value(resolved) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}
