//! End-to-end dispatch through the route tree, storages and commit.

use axum::body::Bytes;
use axum::http::{header, Request, StatusCode};
use serde_json::{json, Value};

use http_event_engine::dispatch::{middleware_fn, Dispatcher};
use http_event_engine::http::request::get;
use http_event_engine::routing::{HandlerModule, Outcome, RouteTree};
use http_event_engine::storage::Store;
use http_event_engine::{ExecutionContext, HttpEvent, Runtime};

mod common;

fn blog_tree() -> RouteTree {
    RouteTree::new().route(
        "/blog/-",
        HandlerModule::new().get(|event: HttpEvent, _input, _next| async move {
            event.cookies().set("seen", "my-post");
            event.session().set("last_post", event.url().path());
            Ok(Outcome::Value(json!({ "title": "hi" })))
        }),
    )
}

fn set_cookies(response: &axum::http::Response<Bytes>) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_blog_post_end_to_end() {
    let dispatcher = Dispatcher::builder(blog_tree()).build();
    let event = HttpEvent::standalone(get("http://site.test/blog/my-post").unwrap());

    let response = dispatcher.dispatch(&event).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body, json!({ "title": "hi" }));

    let cookies = set_cookies(&response);
    assert_eq!(cookies.len(), 1);
    assert!(cookies[0].starts_with("seen=my-post"));
    assert_eq!(event.session().get("last_post"), Some(json!("/blog/my-post")));
}

#[tokio::test]
async fn test_untouched_cookies_are_not_reemitted() {
    let tree = RouteTree::new().route(
        "/prefs",
        HandlerModule::new().post(|event: HttpEvent, _input, _next| async move {
            let mut cookies = event.cookies();
            cookies.set("a", "1");
            cookies.delete("b");
            Ok(Outcome::Value(json!(null)))
        }),
    );
    let dispatcher = Dispatcher::builder(tree).build();
    let request = Request::post("http://site.test/prefs")
        .header(header::COOKIE, "b=2; keep=3")
        .body(Bytes::new())
        .unwrap();

    let response = dispatcher.dispatch(&HttpEvent::standalone(request)).await.unwrap();
    let cookies = set_cookies(&response);
    assert_eq!(cookies.len(), 2);
    assert!(cookies.iter().any(|c| c.starts_with("a=1")));
    assert!(cookies.iter().any(|c| c.starts_with("b=") && c.contains("Max-Age=0")));
    assert!(!cookies.iter().any(|c| c.starts_with("keep=")));
}

#[tokio::test]
async fn test_middleware_sees_router_result_and_commits_once() {
    let wrap = middleware_fn(|event: HttpEvent, _router, next| async move {
        event.cookies().set("mw", "before");
        let outcome = next.run(event.clone()).await.unwrap();
        Ok(match outcome {
            Outcome::Value(value) => Outcome::Value(json!({ "wrapped": value })),
            other => other,
        })
    });
    let dispatcher = Dispatcher::builder(blog_tree()).middleware(wrap).build();
    let event = HttpEvent::standalone(get("http://site.test/blog/x").unwrap());

    let response = dispatcher.dispatch(&event).await.unwrap();
    let body: Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body, json!({ "wrapped": { "title": "hi" } }));

    let cookies = set_cookies(&response);
    assert_eq!(cookies.len(), 2);
    assert!(!event.cookies().is_modified());
}

#[tokio::test]
async fn test_next_reaches_wildcard_child() {
    let tree = RouteTree::new()
        .route(
            "/a",
            HandlerModule::new().get(|_event: HttpEvent, input: Value, next| async move {
                let mut input = input;
                input["via"] = json!("a");
                next.run(input).await
            }),
        )
        .route(
            "/a/-",
            HandlerModule::new().get(|_event: HttpEvent, input: Value, _next| async move {
                Ok(Outcome::Value(json!({ "from": "wildcard", "input": input })))
            }),
        );
    let runtime = Runtime::builder(ExecutionContext::Client, Dispatcher::builder(tree).build()).build();
    let response = runtime.serve(get("http://site.test/a/b").unwrap()).await.unwrap();
    let body: Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(body["from"], "wildcard");
    assert_eq!(body["input"]["via"], "a");
}

#[tokio::test]
async fn test_user_sign_in_lands_in_session() {
    let tree = RouteTree::new().route(
        "/login",
        HandlerModule::new().post(|event: HttpEvent, _input, _next| async move {
            let mut profile = Store::new();
            profile.insert("name".into(), json!("Ada"));
            event.user().sign_in("u1", profile);
            Ok(Outcome::Value(json!({ "ok": true })))
        }),
    );
    let dispatcher = Dispatcher::builder(tree).build();
    let event = HttpEvent::standalone(Request::post("http://site.test/login").body(Bytes::new()).unwrap());
    dispatcher.dispatch(&event).await.unwrap();

    assert!(event.user().is_signed_in());
    let bag = event.session().get("user").unwrap();
    assert_eq!(bag["id"], "u1");
    assert_eq!(bag["name"], "Ada");
}
