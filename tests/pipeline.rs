//! Pipeline Integration Tests
//!
//! Drives full scheduler cycles against a mock HTTP server standing in for
//! the release feed, the media host and the Telegram Bot API. Only the
//! transcoder is faked, so no ffmpeg is needed.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use httpmock::prelude::*;
use reelcast::adapters::{
    ApiReleaseSource, EncodeError, HttpFetcher, LocatorFetcher, MagnetFetcher, ProgressSink,
    TelegramClient, TelegramConfig, Transcoder,
};
use reelcast::core::{Orchestrator, Scheduler, SchedulerConfig, StateStore, Workspace};
use reelcast::domain::EncodeProfile;
use serde_json::json;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Copies the input, keeping its extension
struct CopyTranscoder;

#[async_trait]
impl Transcoder for CopyTranscoder {
    async fn transcode(
        &self,
        input: &Path,
        output_stem: &Path,
        _profile: &EncodeProfile,
        progress: &dyn ProgressSink,
        _cancel: &CancellationToken,
    ) -> Result<PathBuf, EncodeError> {
        let mut name = output_stem.file_name().unwrap_or_default().to_os_string();
        name.push(".mkv");
        let output = output_stem.with_file_name(name);
        tokio::fs::copy(input, &output).await?;
        progress.progress("frame=1");
        Ok(output)
    }
}

fn feed_body(server: &MockServer) -> serde_json::Value {
    json!({
        "data": [
            {"release_title": "Show A - 01", "link": server.url("/media/a01.mkv")},
            {"release_title": "Show B - 07", "link": server.url("/media/b07.mkv")}
        ]
    })
}

fn mock_feed_and_media(server: &MockServer) {
    let body = feed_body(server);
    server.mock(|when, then| {
        when.method(GET).path("/feed");
        then.status(200)
            .header("content-type", "application/json")
            .json_body(body);
    });
    server.mock(|when, then| {
        when.method(GET).path("/media/a01.mkv");
        then.status(200).body("episode a01");
    });
    server.mock(|when, then| {
        when.method(GET).path("/media/b07.mkv");
        then.status(200).body("episode b07");
    });
}

fn scheduler(temp: &TempDir, server: &MockServer) -> Scheduler {
    let source = ApiReleaseSource::new(server.url("/feed"), Duration::from_secs(5)).unwrap();
    let telegram = TelegramClient::new(TelegramConfig {
        bot_token: "T".to_string(),
        chat_id: "100".to_string(),
        api_base: server.base_url(),
    });
    let orchestrator = Orchestrator::new(
        Arc::new(LocatorFetcher::new(HttpFetcher::new(), MagnetFetcher::default())),
        Arc::new(CopyTranscoder),
        Arc::new(telegram),
        Workspace::new(temp.path().join("downloads"), temp.path().join("encoded")),
        EncodeProfile::default(),
    );
    let store = StateStore::open(temp.path().join("downloaded.json")).unwrap();

    Scheduler::new(Arc::new(source), store, orchestrator, SchedulerConfig::default())
}

fn leftover_entries(dir: &Path) -> usize {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries.count(),
        Err(_) => 0,
    }
}

#[tokio::test]
async fn test_cycle_delivers_new_releases_once() {
    let server = MockServer::start_async().await;
    mock_feed_and_media(&server);
    server.mock(|when, then| {
        when.method(POST).path("/botT/sendDocument");
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({"ok": true, "result": {"message_id": 1}}));
    });

    let temp = TempDir::new().unwrap();
    let mut scheduler = scheduler(&temp, &server);

    let first = scheduler.run_once().await.unwrap();
    assert_eq!(first.discovered, 2);
    assert_eq!(first.delivered, 2);
    assert_eq!(first.failed, 0);

    let processed = StateStore::load(&temp.path().join("downloaded.json")).unwrap();
    assert!(processed.contains(&server.url("/media/a01.mkv")));
    assert!(processed.contains(&server.url("/media/b07.mkv")));

    // Nothing new: every item is skipped, nothing is uploaded again
    let second = scheduler.run_once().await.unwrap();
    assert_eq!(second.skipped, 2);
    assert_eq!(second.delivered, 0);

    assert_eq!(leftover_entries(&temp.path().join("downloads").join("auto")), 0);
    assert_eq!(leftover_entries(&temp.path().join("encoded").join("auto")), 0);
}

#[tokio::test]
async fn test_delivery_failure_leaves_locator_unrecorded() {
    let server = MockServer::start_async().await;
    mock_feed_and_media(&server);
    server.mock(|when, then| {
        when.method(POST).path("/botT/sendDocument");
        then.status(500)
            .header("content-type", "application/json")
            .json_body(json!({"ok": false, "description": "Internal Server Error"}));
    });

    let temp = TempDir::new().unwrap();
    let mut scheduler = scheduler(&temp, &server);

    let report = scheduler.run_once().await.unwrap();

    assert_eq!(report.failed, 2);
    assert_eq!(report.delivered, 0);
    assert!(scheduler.store().is_empty());
    assert!(StateStore::load(&temp.path().join("downloaded.json"))
        .unwrap()
        .is_empty());

    assert_eq!(leftover_entries(&temp.path().join("downloads").join("auto")), 0);
    assert_eq!(leftover_entries(&temp.path().join("encoded").join("auto")), 0);
}

#[tokio::test]
async fn test_missing_media_fails_only_that_item() {
    let server = MockServer::start_async().await;
    let body = json!({
        "data": [
            {"release_title": "Gone - 01", "link": server.url("/media/gone.mkv")},
            {"release_title": "Here - 01", "link": server.url("/media/here.mkv")}
        ]
    });
    server.mock(|when, then| {
        when.method(GET).path("/feed");
        then.status(200)
            .header("content-type", "application/json")
            .json_body(body);
    });
    server.mock(|when, then| {
        when.method(GET).path("/media/gone.mkv");
        then.status(404);
    });
    server.mock(|when, then| {
        when.method(GET).path("/media/here.mkv");
        then.status(200).body("here");
    });
    server.mock(|when, then| {
        when.method(POST).path("/botT/sendDocument");
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({"ok": true, "result": {"message_id": 2}}));
    });

    let temp = TempDir::new().unwrap();
    let mut scheduler = scheduler(&temp, &server);

    let report = scheduler.run_once().await.unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.delivered, 1);
    assert!(!scheduler.store().contains(&server.url("/media/gone.mkv")));
    assert!(scheduler.store().contains(&server.url("/media/here.mkv")));
}

#[tokio::test]
async fn test_feed_outage_is_an_empty_cycle() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(GET).path("/feed");
        then.status(502);
    });

    let temp = TempDir::new().unwrap();
    let mut scheduler = scheduler(&temp, &server);

    let report = scheduler.run_once().await.unwrap();
    assert_eq!(report.discovered, 0);
    assert_eq!(report.delivered, 0);
}
