//! `HttpFetcher` and the production wiring against a local HTTP server.
//!
//! The server is a few lines over `tokio::net::TcpListener` that answers
//! each connection once and closes it.

use filepreview::{
    codec, ArtifactKind, ErrorKind, Fetcher, HttpFetcher, PipelineOutcome, PreviewConfig,
    PreviewError, PreviewPipeline, Stage,
};
use std::net::SocketAddr;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

async fn serve() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                }
                let request = String::from_utf8_lossy(&buf);
                let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();

                let (status, body): (&str, &[u8]) = match path.as_str() {
                    "/Sample.txt" => ("200 OK", b"hello from the server"),
                    "/broken.txt" => ("500 Internal Server Error", b"oops"),
                    "/slow.txt" => {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        ("200 OK", b"late")
                    }
                    _ => ("404 Not Found", b"missing"),
                };
                let head = format!(
                    "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(body).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    addr
}

fn fetcher(timeout_secs: u64) -> HttpFetcher {
    let config = PreviewConfig::builder()
        .fetch_timeout_secs(timeout_secs)
        .build()
        .unwrap();
    HttpFetcher::new(&config).unwrap()
}

#[tokio::test]
async fn downloads_body_on_success() {
    let addr = serve().await;
    let bytes = fetcher(10)
        .fetch(&format!("http://{addr}/Sample.txt"))
        .await
        .unwrap();
    assert_eq!(bytes, b"hello from the server");
}

#[tokio::test]
async fn maps_http_statuses() {
    let addr = serve().await;
    let f = fetcher(10);

    let err = f.fetch(&format!("http://{addr}/nope.docx")).await.unwrap_err();
    assert!(matches!(err, PreviewError::NotFound { .. }), "{err}");

    let err = f.fetch(&format!("http://{addr}/broken.txt")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NetworkError);
    assert!(err.to_string().contains("500"), "{err}");
}

#[tokio::test]
async fn slow_server_times_out() {
    let addr = serve().await;
    let err = fetcher(1)
        .fetch(&format!("http://{addr}/slow.txt"))
        .await
        .unwrap_err();
    assert!(
        matches!(
            err,
            PreviewError::Timeout {
                stage: Stage::Fetch,
                ..
            }
        ),
        "{err}"
    );
}

#[tokio::test]
async fn refused_connection_is_a_network_error() {
    // Bind then drop to get a port nobody listens on.
    let addr = {
        let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
        l.local_addr().unwrap()
    };
    let err = fetcher(5)
        .fetch(&format!("http://{addr}/Sample.txt"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NetworkError);
}

#[tokio::test]
async fn production_pipeline_serves_text_end_to_end() {
    let addr = serve().await;
    let dir = TempDir::new().unwrap();
    let config = PreviewConfig::builder()
        .cache_dir(dir.path().join("cache"))
        .fetch_timeout_secs(10)
        .build()
        .unwrap();
    let pipeline = PreviewPipeline::from_config(config).unwrap();

    let token = codec::encode(&format!("http://{addr}/Sample.txt"));
    let outcome = pipeline.preview(&token, false, "").await;
    let PipelineOutcome::Served { path, kind } = outcome else {
        panic!("expected Served, got {outcome:?}");
    };
    assert_eq!(kind, ArtifactKind::Text);
    assert_eq!(std::fs::read(path).unwrap(), b"hello from the server");

    let missing = codec::encode(&format!("http://{addr}/nonexistent.docx"));
    let outcome = pipeline.preview(&missing, false, "").await;
    assert_eq!(outcome.error_kind(), Some(ErrorKind::NotFound));
}
