//! Health checks, trailing-slash redirects, metrics and the gateway binary

mod common;

use common::{get, no_redirect_client, upload_file, GatewayProcess, TestServer};

#[tokio::test]
async fn test_health_and_ready() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    let (status, _, body) = get(&client, &format!("{}/-/healthy/", server.endpoint())).await;
    assert_eq!(status, 200);
    assert_eq!(body, b"OK\n");

    let (status, _, body) = get(&client, &format!("{}/-/ready/", server.endpoint())).await;
    assert_eq!(status, 200);
    assert_eq!(body, b"OK\n");
}

#[tokio::test]
async fn test_trailing_slash_redirects() {
    let server = TestServer::start().await;
    let client = no_redirect_client();
    let cid = server.container();

    let resp = client
        .get(format!("{}/-/ready", server.endpoint()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 301);
    assert_eq!(resp.headers().get("location").unwrap(), "/-/ready/");

    let resp = client
        .get(format!("{}/get/{}/oid/?download=1", server.endpoint(), cid))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 301);
    assert_eq!(
        resp.headers().get("location").unwrap(),
        format!("/get/{}/oid?download=1", cid).as_str()
    );

    let resp = client
        .post(format!("{}/upload/{}/", server.endpoint(), cid))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 308);
    assert_eq!(
        resp.headers().get("location").unwrap(),
        format!("/upload/{}", cid).as_str()
    );
}

#[tokio::test]
async fn test_redirect_is_followed() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    let (status, _, body) = get(&client, &format!("{}/-/healthy", server.endpoint())).await;
    assert_eq!(status, 200);
    assert_eq!(body, b"OK\n");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let server = TestServer::builder().metrics().start().await;
    let client = reqwest::Client::new();
    let cid = server.container().to_string();
    upload_file(&client, &server.endpoint(), &cid, "file.txt", "data").await;

    let (status, _, body) = get(&client, &format!("{}/metrics/", server.endpoint())).await;
    assert_eq!(status, 200);
    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("neofs_http_gw_http_requests_total"), "{}", text);
    assert!(text.contains("operation=\"upload\""), "{}", text);
    assert!(
        text.contains("neofs_http_gw_pool_node_healthy{address=\"memory://node1\"} 1"),
        "{}",
        text
    );
}

#[tokio::test]
async fn test_metrics_disabled_by_default() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    let (status, _, _) = get(&client, &format!("{}/metrics/", server.endpoint())).await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn test_gateway_binary_serves_health_checks() {
    let gateway = GatewayProcess::spawn(&["--peer", "memory://node1=2", "--peer", "memory://node2"]).await;
    let client = reqwest::Client::new();

    let (status, _, body) = get(&client, &format!("{}/-/healthy/", gateway.endpoint())).await;
    assert_eq!(status, 200);
    assert_eq!(body, b"OK\n");

    let (status, _, _) = get(&client, &format!("{}/-/ready/", gateway.endpoint())).await;
    assert_eq!(status, 200);
}

#[tokio::test]
async fn test_gateway_binary_serves_configured_container() {
    let gateway = GatewayProcess::spawn(&["--peer", "memory://node1", "--container", "photos"]).await;
    let client = reqwest::Client::new();

    let oid = upload_file(&client, &gateway.endpoint(), "photos", "cat.jpg", "meow").await;
    let (status, headers, body) =
        get(&client, &format!("{}/get/photos/{}", gateway.endpoint(), oid)).await;
    assert_eq!(status, 200);
    assert_eq!(body, b"meow");
    assert!(headers.get("x-container-id").is_some());

    let (status, _, _) = get(&client, &format!("{}/get/videos/{}", gateway.endpoint(), oid)).await;
    assert_eq!(status, 400);
}

#[tokio::test]
async fn test_gateway_binary_fails_without_peers() {
    let status = std::process::Command::new(env!("CARGO_BIN_EXE_neofs_http_gw"))
        .args(["--listen", "127.0.0.1:0", "--key", "generated"])
        .env("RUST_LOG", "off")
        .env("HTTP_GW_RESOLVE_ORDER", "")
        .env_remove("HTTP_GW_PEERS_0_ADDRESS")
        .status()
        .expect("Failed to run gateway");
    assert_eq!(status.code(), Some(1));
}
