// Engine orchestration: cache, loader, core seam and the bootstrap session.

pub mod cache;
pub mod emulator;
pub mod headless;
pub mod loader;
pub mod progress;
pub mod session;
