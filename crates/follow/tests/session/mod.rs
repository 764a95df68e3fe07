use std::{path::Path, time::Duration};

use hls_follow::{
    api::{ApiEndpoints, UsherVariant},
    config::{DedupeMode, SessionConfig, StreamSpec},
    StreamSession,
};
use url::Url;
use wiremock::{
    matchers::{method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

use crate::files_ending_with;

const TOKEN_PATH: &str = "/api/channels/demo/access_token";

fn config(server: &MockServer, variant: UsherVariant) -> SessionConfig {
    let api = Url::parse(&format!("{}/api", server.uri())).unwrap();
    let usher = Url::parse(&server.uri()).unwrap();
    SessionConfig {
        endpoints: ApiEndpoints::with_base(api, usher).with_variant(variant),
        poll_interval: Duration::from_millis(50),
        retry_delay: Duration::from_millis(50),
        bucket_window: None,
        ..Default::default()
    }
}

fn spec(dir: &Path) -> StreamSpec {
    format!("demo,{}", dir.display()).parse().unwrap()
}

async fn mock_token(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"token":"T","sig":"S"}"#))
        .mount(server)
        .await;
}

async fn mock_manifest(server: &MockServer, segments: &[&str]) {
    let mut body = "#EXTM3U\n#EXT-X-TARGETDURATION:2\n".to_string();
    for segment in segments {
        body.push_str("#EXTINF:2.000,\n");
        body.push_str(segment);
        body.push('\n');
    }
    Mock::given(method("GET"))
        .and(path("/edge/manifest.m3u8"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

async fn mock_segment(server: &MockServer, name: &str, body: &[u8]) {
    Mock::given(method("GET"))
        .and(path(format!("/edge/{name}")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
        .expect(1)
        .mount(server)
        .await;
}

fn master_playlist(server: &MockServer) -> String {
    format!(
        "#EXTM3U\n#EXT-X-MEDIA:TYPE=VIDEO,GROUP-ID=\"chunked\",NAME=\"Source\"\n#EXT-X-STREAM-INF:BANDWIDTH=3000000\n{}/edge/manifest.m3u8?token=edge\n",
        server.uri()
    )
}

async fn requests_to(server: &MockServer, request_path: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|request| request.url.path() == request_path)
        .count()
}

async fn wait_for<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

#[tokio::test]
async fn test_follow_stream_end_to_end() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mock_token(&server).await;
    Mock::given(method("GET"))
        .and(path("/api/channel/hls/demo.m3u8"))
        .and(query_param("player", "twitchweb"))
        .and(query_param("type", "any"))
        .and(query_param("sig", "S"))
        .and(query_param("token", "T"))
        .and(query_param("allow_source", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_string(master_playlist(&server)))
        .mount(&server)
        .await;
    mock_manifest(&server, &["seg1.ts", "seg2.ts"]).await;
    mock_segment(&server, "seg1.ts", b"first").await;
    mock_segment(&server, "seg2.ts", b"second").await;

    let dir = tempfile::tempdir()?;
    let session = StreamSession::new(spec(dir.path()), config(&server, UsherVariant::Hls))?;
    let handle = tokio::spawn(session.run());

    wait_for(|| {
        files_ending_with(dir.path(), "-seg1.ts").len() == 1
            && files_ending_with(dir.path(), "-seg2.ts").len() == 1
    })
    .await;

    // let the manifest be polled a few more times
    tokio::time::sleep(Duration::from_millis(300)).await;
    handle.abort();

    assert!(requests_to(&server, "/edge/manifest.m3u8").await > 1);
    assert_eq!(requests_to(&server, TOKEN_PATH).await, 1);

    let seg1 = &files_ending_with(dir.path(), "-seg1.ts")[0];
    let seg2 = &files_ending_with(dir.path(), "-seg2.ts")[0];
    assert_eq!(std::fs::read(seg1)?, b"first");
    assert_eq!(std::fs::read(seg2)?, b"second");
    assert_eq!(std::fs::read_dir(dir.path())?.count(), 2);

    Ok(())
}

#[tokio::test]
async fn test_select_variant_with_redirected_token() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", "/api/token-mirror"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/token-mirror"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"token":"T","sig":"S"}"#))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/select/demo.json"))
        .and(query_param("nauthsig", "S"))
        .and(query_param("nauth", "T"))
        .and(query_param("allow_source", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_string(master_playlist(&server)))
        .mount(&server)
        .await;
    mock_manifest(&server, &["seg1.ts"]).await;
    mock_segment(&server, "seg1.ts", b"only").await;

    let dir = tempfile::tempdir()?;
    let mut config = config(&server, UsherVariant::Select);
    config.dedupe = DedupeMode::FilesystemOnly;
    let session = StreamSession::new(spec(dir.path()), config)?;
    let handle = tokio::spawn(session.run());

    // no timestamp prefix when deduplicating on the filesystem
    let saved = dir.path().join("seg1.ts");
    wait_for(|| saved.exists()).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    handle.abort();

    assert_eq!(std::fs::read(&saved)?, b"only");
    assert_eq!(requests_to(&server, "/api/token-mirror").await, 1);
    Ok(())
}

#[tokio::test]
async fn test_offline_channel_keeps_retrying() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mock_token(&server).await;
    Mock::given(method("GET"))
        .and(path("/api/channel/hls/demo.m3u8"))
        .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir()?;
    let session = StreamSession::new(spec(dir.path()), config(&server, UsherVariant::Hls))?;
    let handle = tokio::spawn(session.run());

    tokio::time::sleep(Duration::from_millis(500)).await;
    handle.abort();

    assert!(requests_to(&server, TOKEN_PATH).await >= 2);
    assert_eq!(std::fs::read_dir(dir.path()).map(Iterator::count).unwrap_or(0), 0);
    Ok(())
}

#[tokio::test]
async fn test_manifest_failure_reauths() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mock_token(&server).await;
    Mock::given(method("GET"))
        .and(path("/api/channel/hls/demo.m3u8"))
        .respond_with(ResponseTemplate::new(200).set_body_string(master_playlist(&server)))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/edge/manifest.m3u8"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir()?;
    let session = StreamSession::new(spec(dir.path()), config(&server, UsherVariant::Hls))?;
    let handle = tokio::spawn(session.run());

    tokio::time::sleep(Duration::from_millis(500)).await;
    handle.abort();

    // every failed manifest fetch goes through the whole token chain again
    let tokens = requests_to(&server, TOKEN_PATH).await;
    let manifests = requests_to(&server, "/edge/manifest.m3u8").await;
    assert!(tokens >= 2);
    assert!(manifests <= tokens);
    Ok(())
}
