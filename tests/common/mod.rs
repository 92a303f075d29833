//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::header;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use http_event_engine::config::EngineConfig;
use http_event_engine::{HttpServer, Runtime, Shutdown};

/// What a programmable upstream does with one connection.
pub enum Reply {
    Respond(u16, String),
    /// Close the socket without answering.
    Hangup,
}

/// Start a programmable upstream on an ephemeral port.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Reply> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        let mut buf = [0u8; 4096];
                        let _ = socket.read(&mut buf).await;
                        match f().await {
                            Reply::Respond(status, body) => {
                                let status_text = match status {
                                    200 => "200 OK",
                                    404 => "404 Not Found",
                                    503 => "503 Service Unavailable",
                                    _ => "200 OK",
                                };
                                let response = format!(
                                    "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                                    status_text,
                                    body.len(),
                                    body
                                );
                                let _ = socket.write_all(response.as_bytes()).await;
                                let _ = socket.shutdown().await;
                            }
                            Reply::Hangup => {
                                let _ = socket.shutdown().await;
                            }
                        }
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    });
                }
                Err(_) => break,
            }
        }
    });
    addr
}

/// Serve `runtime` on an ephemeral port until the returned `Shutdown` fires.
pub async fn spawn_server(config: &EngineConfig, runtime: Runtime) -> (SocketAddr, Shutdown) {
    spawn_http_server(HttpServer::new(config, runtime)).await
}

pub async fn spawn_http_server(server: HttpServer) -> (SocketAddr, Shutdown) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let (_, config_updates) = mpsc::unbounded_channel();
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, config_updates, server_shutdown).await;
    });
    (addr, shutdown)
}

/// Client that never follows redirects or reuses connections.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

/// The `name=value` pair of the cookie `name` set by `response`.
pub fn cookie_pair(response: &reqwest::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .find(|pair| pair.starts_with(&format!("{}=", name)))
        .map(str::to_string)
}
