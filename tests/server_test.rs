mod common;

use std::sync::Arc;

use reqwest::StatusCode;

use common::{config, eventually, gba_rom, rom_bytes, RecordingUi};
use rom_boot_engine::api::launcher::build_session;
use rom_boot_engine::engine::emulator::Button;
use rom_boot_engine::engine::headless::HeadlessCore;
use rom_boot_engine::engine::session::BootstrapState;
use rom_boot_engine::server::handler::ContentServer;

fn site_with_rom(name: &str, data: &[u8]) -> tempfile::TempDir {
    let site = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(site.path().join("data")).unwrap();
    std::fs::write(site.path().join("data").join(name), data).unwrap();
    std::fs::write(site.path().join("index.html"), b"<!doctype html><title>player</title>").unwrap();
    site
}

#[tokio::test]
async fn test_server_serves_rom_with_isolation_headers() {
    let rom = rom_bytes(4096);
    let site = site_with_rom("game.gba", &rom);
    let server = ContentServer::start(site.path(), "127.0.0.1:0").await.unwrap();

    let resp = reqwest::get(format!("{}data/game.gba", server.base_url()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.content_length(), Some(4096));
    assert_eq!(
        resp.headers()["cross-origin-opener-policy"],
        "same-origin"
    );
    assert_eq!(
        resp.headers()["cross-origin-embedder-policy"],
        "require-corp"
    );
    assert_eq!(resp.bytes().await.unwrap().to_vec(), rom);

    let index = reqwest::get(server.base_url()).await.unwrap();
    assert_eq!(index.status(), StatusCode::OK);
    assert!(index.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/html"));

    server.shutdown();
}

#[tokio::test]
async fn test_server_always_sends_whole_file() {
    let rom = rom_bytes(4096);
    let site = site_with_rom("game.gba", &rom);
    let server = ContentServer::start(site.path(), "127.0.0.1:0").await.unwrap();

    let resp = reqwest::Client::new()
        .get(format!("{}data/game.gba", server.base_url()))
        .header("Range", "bytes=100-199")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().get("content-range").is_none());
    assert_eq!(resp.content_length(), Some(4096));
    assert_eq!(resp.bytes().await.unwrap().to_vec(), rom);
}

#[tokio::test]
async fn test_server_missing_file_is_not_found() {
    let site = site_with_rom("game.gba", &rom_bytes(2048));
    let server = ContentServer::start(site.path(), "127.0.0.1:0").await.unwrap();

    let resp = reqwest::get(format!("{}data/other.gba", server.base_url()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = reqwest::get(format!("{}data/%2e%2e/%2e%2e/etc/passwd", server.base_url()))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_end_to_end_headless_boot() {
    let site = site_with_rom("game.gba", &gba_rom(4096));
    let server = ContentServer::start(site.path(), "127.0.0.1:0").await.unwrap();
    let cache_dir = tempfile::tempdir().unwrap();
    let save_dir = tempfile::tempdir().unwrap();

    let core = Arc::new(HeadlessCore::new(Some(save_dir.path().to_path_buf())));
    let ui = Arc::new(RecordingUi::default());
    let session = build_session(
        config("game.gba", "game-v1", &server.base_url(), cache_dir.path()),
        core.clone(),
        ui.clone(),
        ui.clone(),
    );

    session.bootstrap().await.unwrap();
    assert_eq!(session.state(), BootstrapState::Running);
    assert_eq!(core.loaded_game(), Some("/game.gba".to_string()));
    assert_eq!(core.file("/game.gba").unwrap().len(), 4096);
    assert!(core.setting("baseFpsTarget").is_some());

    assert!(session.press(Button::A));
    assert!(core.is_held(Button::A));
    session.release_all();
    assert!(!core.is_held(Button::A));

    core.write_save("game.sav", vec![7u8; 128]);
    let save = save_dir.path().join("game.sav");
    assert!(eventually(|| save.exists()).await);

    session.flush_cache_writes().await;
    session.close().await;
    server.shutdown();
    assert!(ui.errors().is_empty());
}

#[tokio::test]
async fn test_end_to_end_non_gba_image_rejected_by_core() {
    let site = site_with_rom("blob.bin", &rom_bytes(4096));
    let server = ContentServer::start(site.path(), "127.0.0.1:0").await.unwrap();
    let cache_dir = tempfile::tempdir().unwrap();

    let core = Arc::new(HeadlessCore::new(None));
    let ui = Arc::new(RecordingUi::default());
    let session = build_session(
        config("blob.bin", "", &server.base_url(), cache_dir.path()),
        core.clone(),
        ui.clone(),
        ui.clone(),
    );

    let err = session.bootstrap().await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Failed to load ROM \"blob.bin\": Invalid ROM format"
    );
    assert_eq!(session.state(), BootstrapState::Failed);
    assert!(core.loaded_game().is_none());
}
