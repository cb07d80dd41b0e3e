use anyhow::Result;
use httpmock::prelude::*;
use proxysheet::server::{build_router, build_router_with_timeout};
use std::time::Duration;

/// Incompressible PNG comfortably above the minimum plausible image size.
fn card_png() -> Vec<u8> {
    let mut img = image::RgbImage::new(100, 140);
    let mut seed = 0x9E3779B97F4A7C15u64;
    for pixel in img.pixels_mut() {
        seed = seed
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        let b = seed.to_le_bytes();
        *pixel = image::Rgb([b[0], b[1], b[2]]);
    }
    let mut bytes = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

async fn spawn_proxy(allowed: Vec<String>) -> String {
    let app = build_router(allowed).unwrap();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn missing_and_malformed_urls_are_rejected() -> Result<()> {
    let proxy = spawn_proxy(vec!["127.0.0.1".to_string()]).await;
    let client = reqwest::Client::new();

    let resp = client.get(format!("{proxy}/image-proxy")).send().await?;
    assert_eq!(resp.status(), 400);
    assert!(resp.text().await?.contains("error"));

    let resp = client
        .get(format!("{proxy}/image-proxy"))
        .query(&[("url", "not a url at all")])
        .send()
        .await?;
    assert_eq!(resp.status(), 400);

    let resp = client
        .get(format!("{proxy}/image-proxy"))
        .query(&[("url", "ftp://cards.example/a.png")])
        .send()
        .await?;
    assert_eq!(resp.status(), 400);
    Ok(())
}

#[tokio::test]
async fn non_allowlisted_host_is_forbidden() -> Result<()> {
    let proxy = spawn_proxy(vec!["cards.scryfall.io".to_string()]).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{proxy}/image-proxy"))
        .query(&[("url", "https://attacker.example/a.png")])
        .send()
        .await?;
    assert_eq!(resp.status(), 403);
    Ok(())
}

#[tokio::test]
async fn upstream_status_passes_through() -> Result<()> {
    let upstream = MockServer::start();
    upstream.mock(|when, then| {
        when.method(GET).path("/gone.png");
        then.status(404);
    });

    let proxy = spawn_proxy(vec!["127.0.0.1".to_string()]).await;
    let resp = reqwest::Client::new()
        .get(format!("{proxy}/image-proxy"))
        .query(&[("url", upstream.url("/gone.png"))])
        .send()
        .await?;
    assert_eq!(resp.status(), 404);
    assert!(resp.text().await?.contains("error"));
    Ok(())
}

#[tokio::test]
async fn slow_upstream_times_out_as_504() -> Result<()> {
    let upstream = MockServer::start();
    upstream.mock(|when, then| {
        when.method(GET).path("/slow.png");
        then.status(200)
            .header("content-type", "image/png")
            .body("never arrives in time")
            .delay(Duration::from_secs(2));
    });

    let app = build_router_with_timeout(
        vec!["127.0.0.1".to_string()],
        Duration::from_millis(200),
    )
    .unwrap();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let resp = reqwest::Client::new()
        .get(format!("http://{addr}/image-proxy"))
        .query(&[("url", upstream.url("/slow.png"))])
        .send()
        .await?;
    assert_eq!(resp.status(), 504);
    Ok(())
}

#[tokio::test]
async fn tiny_success_body_is_treated_as_broken() -> Result<()> {
    let upstream = MockServer::start();
    upstream.mock(|when, then| {
        when.method(GET).path("/stub.png");
        then.status(200)
            .header("content-type", "image/png")
            .body("too short");
    });

    let proxy = spawn_proxy(vec!["127.0.0.1".to_string()]).await;
    let resp = reqwest::Client::new()
        .get(format!("{proxy}/image-proxy"))
        .query(&[("url", upstream.url("/stub.png"))])
        .send()
        .await?;
    assert_eq!(resp.status(), 500);
    Ok(())
}

#[tokio::test]
async fn success_carries_cors_and_cache_headers() -> Result<()> {
    let upstream = MockServer::start();
    let png = card_png();
    upstream.mock(|when, then| {
        when.method(GET).path("/card.png");
        then.status(200)
            .header("content-type", "image/png")
            .body(&png);
    });

    let proxy = spawn_proxy(vec!["127.0.0.1".to_string()]).await;
    let resp = reqwest::Client::new()
        .get(format!("{proxy}/image-proxy"))
        .query(&[("url", upstream.url("/card.png"))])
        .header("origin", "https://proxysheet.local")
        .send()
        .await?;

    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers().get("access-control-allow-origin").unwrap(),
        "*"
    );
    assert_eq!(resp.headers().get("content-type").unwrap(), "image/png");
    assert_eq!(
        resp.headers().get("cache-control").unwrap(),
        "public, max-age=0, must-revalidate"
    );
    assert_eq!(resp.bytes().await?.to_vec(), png);
    Ok(())
}

#[tokio::test]
async fn content_type_is_sniffed_when_upstream_lies() -> Result<()> {
    let upstream = MockServer::start();
    let png = card_png();
    upstream.mock(|when, then| {
        when.method(GET).path("/card");
        then.status(200)
            .header("content-type", "application/octet-stream")
            .body(&png);
    });

    let proxy = spawn_proxy(vec!["127.0.0.1".to_string()]).await;
    let resp = reqwest::Client::new()
        .get(format!("{proxy}/image-proxy"))
        .query(&[("url", upstream.url("/card"))])
        .send()
        .await?;

    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers().get("content-type").unwrap(), "image/png");
    Ok(())
}
