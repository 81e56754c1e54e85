//! End-to-end pipeline tests against a local mock server.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use mockito::Matcher;
use serde::Deserialize;
use serde_json::json;

use reqx::{opts, Client, Error, UploadInfo};

#[derive(Debug, Deserialize, PartialEq)]
struct User {
    name: String,
}

#[tokio::test]
async fn typed_get_decodes_json() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/users/42")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"name":"roc"}"#)
        .create_async()
        .await;

    let url = format!("{}/users/42", server.url());
    let response = reqx::get::<User>(&url, ()).await.expect("response");

    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(response.into_body(), User { name: "roc".into() });
    mock.assert_async().await;
}

#[tokio::test]
async fn string_target_passes_body_through_as_text() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/plain")
        .with_status(200)
        .with_body("not json at all")
        .create_async()
        .await;

    let url = format!("{}/plain", server.url());
    let response = reqx::get::<String>(&url, ()).await.expect("response");
    assert_eq!(response.into_body(), "not json at all");
}

#[tokio::test]
async fn bytes_target_passes_body_through_untouched() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/raw")
        .with_status(200)
        .with_body(&[0x00u8, 0xff, 0x01][..])
        .create_async()
        .await;

    let url = format!("{}/raw", server.url());
    let response = reqx::get::<Vec<u8>>(&url, ()).await.expect("response");
    assert_eq!(response.into_body(), vec![0x00, 0xff, 0x01]);
}

#[tokio::test]
async fn non_success_maps_to_http_error_with_raw_body() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/fail")
        .with_status(400)
        .with_body("bad")
        .create_async()
        .await;

    let url = format!("{}/fail", server.url());
    let err = reqx::get::<User>(&url, ()).await.unwrap_err();

    match &err {
        Error::Http(http) => {
            assert_eq!(http.status, 400);
            assert_eq!(http.body().as_ref(), b"bad");
        }
        other => panic!("expected http error, got {other:?}"),
    }
    assert_eq!(
        err.response().map(|p| p.status.as_u16()),
        Some(400),
        "parts stay inspectable on the error"
    );
}

#[tokio::test]
async fn empty_success_body_normalizes_to_empty_value() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("DELETE", "/users/1")
        .with_status(204)
        .create_async()
        .await;

    let url = format!("{}/users/1", server.url());
    let response = reqx::delete::<HashMap<String, serde_json::Value>>(&url, ())
        .await
        .expect("response");
    assert!(response.body.is_empty());
    assert_eq!(response.status().as_u16(), 204);
}

#[tokio::test]
async fn unsupported_method_fails_before_any_io() {
    let err = reqx::request::<serde_json::Value>("TRACE-UNKNOWN", "http://127.0.0.1:1/", ())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnsupportedMethod(t) if t == "TRACE-UNKNOWN"));
}

#[tokio::test]
async fn invalid_header_surfaces_before_any_io() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/guarded")
        .expect(0)
        .create_async()
        .await;

    let url = format!("{}/guarded", server.url());
    let err = reqx::get::<String>(&url, reqx::header("bad header name", "x"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Header(_)));
    mock.assert_async().await;
}

#[tokio::test]
async fn later_options_win_over_earlier_ones() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/ordered")
        .match_header("X-Trace", "2")
        .with_status(200)
        .with_body("ok")
        .create_async()
        .await;

    let url = format!("{}/ordered", server.url());
    let chain = opts().header("X-Trace", "1").header("X-Trace", "2");
    reqx::get::<String>(&url, chain).await.expect("response");
    mock.assert_async().await;
}

#[tokio::test]
async fn per_call_options_do_not_leak_across_calls() {
    let mut server = mockito::Server::new_async().await;
    let with_auth = server
        .mock("GET", "/a")
        .match_header("Authorization", "Bearer s3cret")
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;
    let without_auth = server
        .mock("GET", "/b")
        .match_header("Authorization", Matcher::Missing)
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;

    let client = Client::new(()).expect("client");
    let base = server.url();
    client
        .get::<serde_json::Value>(&format!("{base}/a"), reqx::bearer("s3cret"))
        .await
        .expect("authorized call");
    client
        .get::<serde_json::Value>(&format!("{base}/b"), ())
        .await
        .expect("plain call");

    with_auth.assert_async().await;
    without_auth.assert_async().await;
}

#[tokio::test]
async fn base_url_and_path_params_resolve_relative_calls() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/orgs/acme/users/7")
        .with_status(200)
        .with_body(r#"{"name":"Ana"}"#)
        .create_async()
        .await;

    let client = Client::new(reqx::base_url(server.url())).expect("client");
    let user = client
        .get::<User>(
            "/orgs/{org}/users/{id}",
            opts().path("org", "acme").path("id", 7),
        )
        .await
        .expect("response")
        .into_body();

    assert_eq!(user.name, "Ana");
    mock.assert_async().await;
}

#[tokio::test]
async fn json_body_is_posted_with_json_content_type() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/users")
        .match_header("content-type", "application/json")
        .match_body(Matcher::Json(json!({"name": "Ana"})))
        .with_status(200)
        .with_body(r#"{"name":"Ana"}"#)
        .create_async()
        .await;

    let url = format!("{}/users", server.url());
    let created = reqx::post::<User>(&url, reqx::json(json!({"name": "Ana"})))
        .await
        .expect("response")
        .into_body();
    assert_eq!(created.name, "Ana");
    mock.assert_async().await;
}

#[tokio::test]
async fn form_body_is_url_encoded() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/login")
        .match_header("content-type", "application/x-www-form-urlencoded")
        .match_body(Matcher::AllOf(vec![
            Matcher::UrlEncoded("user".into(), "ana".into()),
            Matcher::UrlEncoded("pass".into(), "pw".into()),
        ]))
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;

    let url = format!("{}/login", server.url());
    reqx::post::<serde_json::Value>(&url, reqx::form([("user", "ana"), ("pass", "pw")]))
        .await
        .expect("response");
    mock.assert_async().await;
}

#[tokio::test]
async fn client_and_call_queries_merge() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/search")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("tenant".into(), "acme".into()),
            Matcher::UrlEncoded("q".into(), "rust".into()),
        ]))
        .with_status(200)
        .with_body("[]")
        .create_async()
        .await;

    let client = Client::new(
        opts()
            .base_url(server.url())
            .query(["tenant", "acme"]),
    )
    .expect("client");
    client
        .get::<Vec<serde_json::Value>>("/search", opts().query(["q", "rust"]))
        .await
        .expect("response");
    mock.assert_async().await;
}

#[tokio::test]
async fn custom_error_mapper_replaces_the_default() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/teapot")
        .with_status(418)
        .create_async()
        .await;

    let url = format!("{}/teapot", server.url());
    let err = reqx::get::<String>(
        &url,
        reqx::error_mapper(|parts| Error::custom(format!("mapped {}", parts.status.as_u16()))),
    )
    .await
    .unwrap_err();
    assert_eq!(err.to_string(), "mapped 418");
}

#[tokio::test]
async fn retry_exhaustion_reports_the_last_response() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/flaky")
        .with_status(503)
        .expect(3)
        .create_async()
        .await;

    let url = format!("{}/flaky", server.url());
    let err = reqx::get::<String>(
        &url,
        opts()
            .retry_count(2)
            .retry_fixed_interval(std::time::Duration::from_millis(1)),
    )
    .await
    .unwrap_err();

    assert_eq!(err.response().map(|p| p.status.as_u16()), Some(503));
    mock.assert_async().await;
}

#[tokio::test]
async fn custom_retry_condition_drives_the_loop() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/missing")
        .with_status(404)
        .expect(2)
        .create_async()
        .await;

    let url = format!("{}/missing", server.url());
    let err = reqx::get::<String>(
        &url,
        opts()
            .retry_count(1)
            .retry_fixed_interval(std::time::Duration::from_millis(1))
            .retry_condition(|parts, _| parts.is_some_and(|p| p.status.as_u16() == 404)),
    )
    .await
    .unwrap_err();

    assert_eq!(err.response().map(|p| p.status.as_u16()), Some(404));
    mock.assert_async().await;
}

#[tokio::test]
async fn upload_callback_sees_a_complete_terminal_tick() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/upload")
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;

    let payload = "x".repeat(200_000);
    let expected_total = payload.len() as u64;
    let ticks: Arc<Mutex<Vec<UploadInfo>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&ticks);

    let url = format!("{}/upload", server.url());
    reqx::post::<serde_json::Value>(
        &url,
        opts()
            .body(payload)
            .upload_callback(move |info| sink.lock().expect("sink").push(*info)),
    )
    .await
    .expect("response");

    let ticks = ticks.lock().expect("ticks");
    assert!(!ticks.is_empty());
    let last = ticks.last().expect("terminal tick");
    assert_eq!(last.uploaded, expected_total);
    assert_eq!(last.total, expected_total);
    assert!(last.is_complete());
    assert!(
        ticks.windows(2).all(|w| w[0].uploaded <= w[1].uploaded),
        "ticks are monotonic"
    );
}

#[tokio::test]
async fn multipart_file_upload_reports_progress() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/files")
        .match_header(
            "content-type",
            Matcher::Regex("^multipart/form-data".into()),
        )
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;

    let content = vec![7u8; 90_000];
    let expected_total = content.len() as u64;
    let ticks: Arc<Mutex<Vec<UploadInfo>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&ticks);

    let url = format!("{}/files", server.url());
    reqx::post::<serde_json::Value>(
        &url,
        opts()
            .file_bytes("file", "blob.bin", content)
            .upload_callback(move |info| sink.lock().expect("sink").push(*info)),
    )
    .await
    .expect("response");

    let last = *ticks.lock().expect("ticks").last().expect("terminal tick");
    assert_eq!(last.uploaded, expected_total);
    assert!(last.is_complete());
    mock.assert_async().await;
}

#[tokio::test]
async fn middleware_edits_every_request() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/traced")
        .match_header("X-Request-Id", "fixed")
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;

    let client = Client::new(
        opts()
            .base_url(server.url())
            .middleware(|req| {
                req.set_header("X-Request-Id", "fixed");
                Ok(())
            }),
    )
    .expect("client");
    client
        .get::<serde_json::Value>("/traced", ())
        .await
        .expect("response");
    mock.assert_async().await;
}

#[tokio::test]
async fn after_hook_error_propagates_for_nonempty_bodies() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/inspected")
        .with_status(200)
        .with_body("data")
        .create_async()
        .await;

    let client = Client::new(
        opts()
            .base_url(server.url())
            .after_response(|_| Err(Error::custom("rejected by hook"))),
    )
    .expect("client");
    let err = client
        .get::<String>("/inspected", ())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "rejected by hook");
}

#[tokio::test]
async fn after_hook_error_on_blank_success_still_yields_empty_value() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/blank")
        .with_status(200)
        .create_async()
        .await;

    let client = Client::new(
        opts()
            .base_url(server.url())
            .after_response(|_| Err(Error::custom("hook failed"))),
    )
    .expect("client");
    let response = client
        .get::<HashMap<String, serde_json::Value>>("/blank", ())
        .await
        .expect("reconciled response");
    assert!(response.body.is_empty());
}

#[tokio::test]
async fn decode_error_keeps_the_response_inspectable() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/mangled")
        .with_status(200)
        .with_body("not json")
        .create_async()
        .await;

    let url = format!("{}/mangled", server.url());
    let err = reqx::get::<User>(&url, ()).await.unwrap_err();

    assert!(matches!(err, Error::Decode { .. }));
    let parts = err.response().expect("parts travel with decode errors");
    assert_eq!(parts.status.as_u16(), 200);
    assert_eq!(parts.body.as_ref(), b"not json");
}

#[tokio::test]
async fn output_file_streams_the_body_to_disk() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/download")
        .with_status(200)
        .with_body("file contents")
        .create_async()
        .await;

    let path = std::env::temp_dir().join(format!("reqx-download-{}", std::process::id()));
    let url = format!("{}/download", server.url());
    let response = reqx::get::<String>(&url, reqx::output_file(&path))
        .await
        .expect("response");

    // body was diverted to the file, not the result
    assert!(response.into_body().is_empty());
    let written = tokio::fs::read_to_string(&path).await.expect("file");
    assert_eq!(written, "file contents");
    let _ = tokio::fs::remove_file(&path).await;
}

#[tokio::test]
async fn failed_download_leaves_no_partial_file() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    // A server that advertises more body than it delivers, then hangs up,
    // so the body stream errors after some bytes were already written.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        if let Ok((mut socket, _)) = listener.accept().await {
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let _ = socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 100000\r\n\r\npartial body")
                .await;
            let _ = socket.flush().await;
        }
    });

    let path = std::env::temp_dir().join(format!("reqx-partial-{}", std::process::id()));
    let url = format!("http://{addr}/file");
    let err = reqx::get::<String>(&url, reqx::output_file(&path))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Transport { .. }));
    assert!(
        !tokio::fs::try_exists(&path).await.unwrap_or(true),
        "partial download was not cleaned up"
    );
}
