//! Server adapter tests over real sockets.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;

use http_event_engine::caching::{remote_fallthrough, CachingStrategyEngine, HyperFetcher, MemoryCacheStorage};
use http_event_engine::config::{EngineConfig, TransportKind};
use http_event_engine::dispatch::Dispatcher;
use http_event_engine::http::response::{json_response, redirect};
use http_event_engine::messaging::{BackgroundMessage, MessageKind, PortTag, X_BACKGROUND_MESSAGING};
use http_event_engine::routing::{HandlerModule, Outcome, RouteTree};
use http_event_engine::storage::require::{Fallback, SUCCESS_REDIRECT_PARAM};
use http_event_engine::storage::{require, Required, Scope, StorageContext, Store, UserStorage};
use http_event_engine::{HttpEvent, HttpServer, Runtime};

mod common;

use common::Reply;

type Socket = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Next follow-up frame, or `None` once the server closes.
async fn next_message(socket: &mut Socket) -> Option<BackgroundMessage> {
    loop {
        match tokio::time::timeout(Duration::from_secs(5), socket.next()).await.unwrap() {
            Some(Ok(Message::Text(text))) => {
                return Some(serde_json::from_str(text.as_str()).unwrap());
            }
            Some(Ok(Message::Close(_))) | None => return None,
            Some(Ok(_)) => continue,
            Some(Err(_)) => return None,
        }
    }
}

fn account_tree() -> RouteTree {
    RouteTree::new()
        .route(
            "/account",
            HandlerModule::new().get(|event: HttpEvent, _input, _next| async move {
                Ok(match require(&event, Scope::User, &["id"], true).await.unwrap() {
                    Required::Resolved(values) => Outcome::Value(json!({ "id": values["id"] })),
                    Required::Respond(response) => Outcome::Response(response),
                    Required::Unresolved(_) => Outcome::Undefined,
                })
            }),
        )
        .route(
            "/signin",
            HandlerModule::new()
                .get(|event: HttpEvent, _input, _next| async move {
                    let message = event.redirect_message().unwrap_or(Value::Null);
                    Ok(Outcome::Value(json!({ "message": message })))
                })
                .post(|event: HttpEvent, _input, _next| async move {
                    let back = event
                        .url()
                        .query_pairs()
                        .find(|(k, _)| k == SUCCESS_REDIRECT_PARAM)
                        .map(|(_, v)| v.into_owned())
                        .unwrap_or_else(|| "/".to_string());
                    event.user().sign_in("u1", Store::new());
                    Ok(Outcome::Response(redirect(&back, StatusCode::FOUND).unwrap()))
                }),
        )
}

#[tokio::test]
async fn test_require_redirect_message_round_trip() {
    let config = EngineConfig::default();
    let storage = StorageContext::in_memory(&config.session)
        .with_user_fallback("id", Fallback::redirect("/signin").with_message("Please sign in"));
    let runtime = Runtime::builder(http_event_engine::ExecutionContext::Server, Dispatcher::builder(account_tree()).build())
        .storage(storage)
        .build();
    let (addr, shutdown) = common::spawn_server(&config, runtime).await;
    let client = common::client();
    let base = format!("http://{}", addr);

    // Anonymous: 302 to sign-in with a back-link and a one-shot message.
    let res = client.get(format!("{}/account", base)).send().await.unwrap();
    assert_eq!(res.status(), 302);
    let cookie = common::cookie_pair(&res, "__sessid").expect("session cookie");
    let location = res.headers()["location"].to_str().unwrap().to_string();
    let signin = url::Url::parse(&format!("{}{}", base, location)).unwrap();
    assert_eq!(signin.path(), "/signin");
    let back = signin
        .query_pairs()
        .find(|(k, _)| k == SUCCESS_REDIRECT_PARAM)
        .map(|(_, v)| v.into_owned());
    assert_eq!(back.as_deref(), Some("/account"));

    // The message is delivered once.
    let page: Value = client
        .get(signin.as_str())
        .header("cookie", &cookie)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(page["message"], "Please sign in");
    let again: Value = client
        .get(signin.as_str())
        .header("cookie", &cookie)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(again["message"], Value::Null);

    // Sign in, follow the back-link, and the requirement is met.
    let res = client
        .post(signin.as_str())
        .header("cookie", &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 302);
    assert_eq!(res.headers()["location"], "/account");

    let res = client
        .get(format!("{}/account", base))
        .header("cookie", &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body, json!({ "id": "u1" }));

    shutdown.trigger();
}

#[tokio::test]
async fn test_unrouted_requests_fall_through_to_upstream() {
    let calls = Arc::new(AtomicU32::new(0));
    let down = Arc::new(AtomicBool::new(false));
    let upstream = {
        let calls = calls.clone();
        let down = down.clone();
        common::start_programmable_backend(move || {
            let calls = calls.clone();
            let down = down.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                if down.load(Ordering::SeqCst) {
                    Reply::Hangup
                } else {
                    Reply::Respond(200, "from upstream".into())
                }
            }
        })
        .await
    };

    let mut config = EngineConfig::default();
    config.upstream.origin = Some(format!("http://{}", upstream));
    let fetcher = HyperFetcher::new(config.security.max_body_size)
        .with_upstream(&format!("http://{}", upstream))
        .unwrap();
    let engine = Arc::new(CachingStrategyEngine::new(
        &config.caching,
        Arc::new(MemoryCacheStorage::new()),
        Arc::new(fetcher),
    ));
    let dispatcher = Dispatcher::builder(RouteTree::new())
        .default_handler(remote_fallthrough(engine.clone()))
        .build();
    let server = HttpServer::new(&config, Runtime::server(&config, dispatcher)).with_caching(engine);
    let (addr, shutdown) = common::spawn_http_server(server).await;
    let client = common::client();

    let res = client.get(format!("http://{}/page", addr)).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "from upstream");

    // Network-first: the cached copy answers while the upstream is down.
    down.store(true, Ordering::SeqCst);
    let res = client.get(format!("http://{}/page", addr)).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "from upstream");
    assert!(calls.load(Ordering::SeqCst) >= 2);

    // Never cached and upstream down: the fetch error becomes a 500.
    let res = client.get(format!("http://{}/other", addr)).send().await.unwrap();
    assert_eq!(res.status(), 500);

    shutdown.trigger();
}

#[tokio::test]
async fn test_background_messages_stream_over_socket() {
    let tree = RouteTree::new().route(
        "/job",
        HandlerModule::new().post(|event: HttpEvent, _input, _next| async move {
            event.defer().unwrap();
            let worker = event.clone();
            event.wait_until(async move {
                let confirmed = UserStorage::confirm(&worker, "Proceed?").await;
                let done = json_response(StatusCode::OK, &json!({ "confirmed": confirmed })).unwrap();
                worker.respond_with(done).unwrap();
            });
            Ok(Outcome::Undefined)
        }),
    );
    let mut config = EngineConfig::default();
    config.messaging.transport = TransportKind::Socket;
    let (addr, shutdown) = common::spawn_server(&config, Runtime::server(&config, Dispatcher::builder(tree).build())).await;

    let res = common::client().post(format!("http://{}/job", addr)).send().await.unwrap();
    assert_eq!(res.status(), 202);
    let tag: PortTag = res.headers()[X_BACKGROUND_MESSAGING].to_str().unwrap().parse().unwrap();
    assert!(matches!(tag, PortTag::Socket(_)));

    let url = format!("ws://{}/.background/{}", addr, tag.id());
    let (mut socket, _) = tokio_tungstenite::connect_async(url).await.unwrap();

    let question = next_message(&mut socket).await.expect("confirm frame");
    assert_eq!(question.kind, MessageKind::Confirm);
    assert_eq!(question.body, "Proceed?");

    socket.send(Message::Text("true".into())).await.unwrap();

    let answer = next_message(&mut socket).await.expect("follow-up frame");
    assert_eq!(answer.kind, MessageKind::Response);
    assert_eq!(answer.status, 200);
    assert_eq!(serde_json::from_str::<Value>(&answer.body).unwrap(), json!({ "confirmed": true }));

    // Work settled: the port closes and so does the socket.
    assert!(next_message(&mut socket).await.is_none());

    shutdown.trigger();
}
