use hls_follow::{
    fetch::{Fetcher, MAX_REDIRECTS},
    util::http::HttpClient,
    FollowError,
};
use reqwest::StatusCode;
use url::Url;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

use crate::AssertWrapper;

fn fetcher() -> Fetcher {
    Fetcher::new(HttpClient::with_proxy(None).assert_success())
}

fn url(server: &MockServer, path: &str) -> Url {
    Url::parse(&format!("{}{path}", server.uri())).assert_success()
}

#[tokio::test]
async fn test_fetch_success() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/body"))
        .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
        .expect(1)
        .mount(&server)
        .await;

    let body = fetcher().get("test", url(&server, "/body")).await?;
    assert_eq!(&body[..], b"hello");
    Ok(())
}

#[tokio::test]
async fn test_redirect_followed_once() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(
            ResponseTemplate::new(302).insert_header("Location", format!("{}/new", server.uri())),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/new"))
        .respond_with(ResponseTemplate::new(200).set_body_string("moved"))
        .expect(1)
        .mount(&server)
        .await;

    let body = fetcher().get("test", url(&server, "/old")).await?;
    assert_eq!(&body[..], b"moved");
    Ok(())
}

#[tokio::test]
async fn test_relative_redirect() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a/old"))
        .respond_with(ResponseTemplate::new(307).insert_header("Location", "new"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/a/new"))
        .respond_with(ResponseTemplate::new(200).set_body_string("relative"))
        .mount(&server)
        .await;

    let body = fetcher().get("test", url(&server, "/a/old")).await?;
    assert_eq!(&body[..], b"relative");
    Ok(())
}

#[tokio::test]
async fn test_redirect_loop_is_capped() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/loop"))
        .respond_with(ResponseTemplate::new(301).insert_header("Location", "/loop"))
        .expect(MAX_REDIRECTS as u64 + 1)
        .mount(&server)
        .await;

    let result = fetcher().get("test", url(&server, "/loop")).await;
    assert!(matches!(result, Err(FollowError::TooManyRedirects(MAX_REDIRECTS))));
}

#[tokio::test]
async fn test_custom_redirect_cap() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/loop"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", "/loop"))
        .expect(3)
        .mount(&server)
        .await;

    let result = fetcher()
        .with_max_redirects(2)
        .get("test", url(&server, "/loop"))
        .await;
    assert!(matches!(result, Err(FollowError::TooManyRedirects(2))));
}

#[tokio::test]
async fn test_redirect_without_location() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/nowhere"))
        .respond_with(ResponseTemplate::new(302))
        .mount(&server)
        .await;

    let result = fetcher().get("test", url(&server, "/nowhere")).await;
    assert!(matches!(result, Err(FollowError::InvalidRedirect(None))));
}

#[tokio::test]
async fn test_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not here"))
        .mount(&server)
        .await;

    let result = fetcher().get("test", url(&server, "/missing")).await;
    assert!(matches!(
        result,
        Err(FollowError::HttpError(status)) if status == StatusCode::NOT_FOUND
    ));
}

#[tokio::test]
async fn test_transport_error() {
    // discard port, nothing accepts connections there
    let result = fetcher()
        .get("test", Url::parse("http://127.0.0.1:9/").assert_success())
        .await;
    assert!(matches!(result, Err(FollowError::RequestError(_))));
}
