//! Server multiplexer behavior over live transports

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use otlp_conduit::testing::HttpTestServer;
use otlp_conduit::{
    export_handler, unmarshal_json, Context, ServerMux, TracesRequest,
    TracesResponse,
};
use prost::Message;
use reqwest::header::CONTENT_TYPE;
use tonic::Status;

mod common;

fn fixture(name: &str) -> Vec<u8> {
    std::fs::read(format!("tests/testdata/{name}")).expect("fixture exists")
}

#[derive(Debug, Clone, PartialEq)]
struct LastLayer(&'static str);

#[tokio::test]
async fn http_json_trace_post_invokes_handler_once() {
    common::init_tracing();
    let body = fixture("trace.json");
    let expected: TracesRequest = unmarshal_json(&body).unwrap();

    let mux = ServerMux::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();
    mux.traces().handle_fn(move |_cx, request: TracesRequest| {
        let seen = seen.clone();
        let expected = expected.clone();
        async move {
            assert_eq!(request, expected);
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(TracesResponse::default())
        }
    });

    let server = HttpTestServer::spawn(&mux).await.unwrap();
    let response = reqwest::Client::new()
        .post(server.traces_url())
        .header(CONTENT_TYPE, "application/json")
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(
        response.headers()[CONTENT_TYPE].to_str().unwrap(),
        "application/json"
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    server.shutdown().await;
}

#[tokio::test]
async fn http_protobuf_trace_post_roundtrips() {
    common::init_tracing();
    let expected: TracesRequest = unmarshal_json(&fixture("trace.json")).unwrap();
    let body = expected.encode_to_vec();

    let mux = ServerMux::new();
    let captured = Arc::new(Mutex::new(None));
    let slot = captured.clone();
    mux.traces().handle_fn(move |_cx, request: TracesRequest| {
        let slot = slot.clone();
        async move {
            *slot.lock().unwrap() = Some(request);
            Ok(TracesResponse::default())
        }
    });

    let server = HttpTestServer::spawn(&mux).await.unwrap();
    let response = reqwest::Client::new()
        .post(server.traces_url())
        .header(CONTENT_TYPE, "application/x-protobuf")
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);

    let bytes = response.bytes().await.unwrap();
    let decoded = TracesResponse::decode(bytes.as_ref()).unwrap();
    assert!(decoded.partial_success.is_none());
    assert_eq!(captured.lock().unwrap().as_ref(), Some(&expected));
    server.shutdown().await;
}

#[tokio::test]
async fn non_post_method_is_405() {
    common::init_tracing();
    let mux = ServerMux::new();
    mux.traces()
        .handle_fn(|_cx, _req| async move { Ok(TracesResponse::default()) });
    let server = HttpTestServer::spawn(&mux).await.unwrap();

    let response = reqwest::Client::new()
        .get(server.traces_url())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 405);
    server.shutdown().await;
}

#[tokio::test]
async fn unknown_content_type_is_415() {
    common::init_tracing();
    let mux = ServerMux::new();
    mux.traces()
        .handle_fn(|_cx, _req| async move { Ok(TracesResponse::default()) });
    let server = HttpTestServer::spawn(&mux).await.unwrap();

    for value in ["text/plain", "application/json; charset=utf-8"] {
        let response = reqwest::Client::new()
            .post(server.traces_url())
            .header(CONTENT_TYPE, value)
            .body("{}")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 415, "{value}");
    }
    server.shutdown().await;
}

#[tokio::test]
async fn empty_body_yields_zero_valued_request() {
    common::init_tracing();
    let mux = ServerMux::new();
    let captured = Arc::new(Mutex::new(None));
    let slot = captured.clone();
    mux.traces().handle_fn(move |_cx, request: TracesRequest| {
        let slot = slot.clone();
        async move {
            *slot.lock().unwrap() = Some(request);
            Ok(TracesResponse::default())
        }
    });
    let server = HttpTestServer::spawn(&mux).await.unwrap();

    let response = reqwest::Client::new()
        .post(server.traces_url())
        .header(CONTENT_TYPE, "application/json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(
        captured.lock().unwrap().as_ref(),
        Some(&TracesRequest::default())
    );
    server.shutdown().await;
}

#[tokio::test]
async fn malformed_json_body_is_400() {
    common::init_tracing();
    let mux = ServerMux::new();
    mux.traces()
        .handle_fn(|_cx, _req| async move { Ok(TracesResponse::default()) });
    let server = HttpTestServer::spawn(&mux).await.unwrap();

    let response = reqwest::Client::new()
        .post(server.traces_url())
        .header(CONTENT_TYPE, "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);
    let body: serde_json::Value =
        serde_json::from_slice(&response.bytes().await.unwrap()).unwrap();
    assert_eq!(body["code"], tonic::Code::InvalidArgument as i32);
    server.shutdown().await;
}

#[tokio::test]
async fn unknown_path_is_404() {
    common::init_tracing();
    let mux = ServerMux::new();
    mux.traces()
        .handle_fn(|_cx, _req| async move { Ok(TracesResponse::default()) });
    let server = HttpTestServer::spawn(&mux).await.unwrap();

    let response = reqwest::Client::new()
        .post(format!("{}/v1/unknown", server.url()))
        .header(CONTENT_TYPE, "application/json")
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
    let body: serde_json::Value =
        serde_json::from_slice(&response.bytes().await.unwrap()).unwrap();
    assert_eq!(body["code"], tonic::Code::NotFound as i32);
    server.shutdown().await;
}

#[tokio::test]
async fn signal_without_entry_is_404() {
    common::init_tracing();
    let mux = ServerMux::new();
    mux.traces()
        .handle_fn(|_cx, _req| async move { Ok(TracesResponse::default()) });
    let server = HttpTestServer::spawn(&mux).await.unwrap();

    // No metrics entry was ever created.
    let response = reqwest::Client::new()
        .post(server.metrics_url())
        .header(CONTENT_TYPE, "application/json")
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
    server.shutdown().await;
}

#[tokio::test]
async fn entry_without_handler_is_501() {
    common::init_tracing();
    let mux = ServerMux::new();
    // Creating the entry publishes the path, but no handler is installed.
    mux.traces();
    let server = HttpTestServer::spawn(&mux).await.unwrap();

    let response = reqwest::Client::new()
        .post(server.traces_url())
        .header(CONTENT_TYPE, "application/json")
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 501);
    server.shutdown().await;
}

#[tokio::test]
async fn handler_status_codes_map_to_http_statuses() {
    common::init_tracing();
    let mux = ServerMux::new();
    mux.traces().handle_fn(|_cx, _req| async move {
        Err::<TracesResponse, _>(Status::resource_exhausted("trace buffer full"))
    });
    let server = HttpTestServer::spawn(&mux).await.unwrap();

    let response = reqwest::Client::new()
        .post(server.traces_url())
        .header(CONTENT_TYPE, "application/json")
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 429);
    let body: serde_json::Value =
        serde_json::from_slice(&response.bytes().await.unwrap()).unwrap();
    assert_eq!(body["code"], tonic::Code::ResourceExhausted as i32);
    assert_eq!(body["message"], "trace buffer full");
    server.shutdown().await;
}

#[tokio::test]
async fn cross_signal_layer_wraps_per_signal_layer() {
    common::init_tracing();
    let mux = ServerMux::new();
    mux.traces().handle_fn(|cx: Context, _req| async move {
        assert_eq!(cx.extensions().get::<LastLayer>(), Some(&LastLayer("inner")));
        Ok(TracesResponse::default())
    });
    mux.traces().layer(|next| {
        otlp_conduit::handler_fn::<otlp_conduit::Traces, _, _>(move |mut cx: Context, request| {
            let next = next.clone();
            async move {
                assert_eq!(cx.extensions().get::<LastLayer>(), Some(&LastLayer("outer")));
                cx.extensions_mut().insert(LastLayer("inner"));
                next.call(cx, request).await
            }
        })
    });
    mux.layer(|next| {
        export_handler(move |mut cx: Context, request| {
            let next = next.clone();
            async move {
                assert!(cx.extensions().get::<LastLayer>().is_none());
                cx.extensions_mut().insert(LastLayer("outer"));
                next(cx, request).await
            }
        })
    });

    let server = HttpTestServer::spawn(&mux).await.unwrap();
    let response = reqwest::Client::new()
        .post(server.traces_url())
        .header(CONTENT_TYPE, "application/json")
        .body(fixture("trace.json"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    server.shutdown().await;
}

#[tokio::test]
async fn http_headers_are_visible_to_cross_signal_middleware() {
    common::init_tracing();
    let mux = ServerMux::new();
    mux.traces()
        .handle_fn(|_cx, _req| async move { Ok(TracesResponse::default()) });

    let seen = Arc::new(AtomicUsize::new(0));
    let header_seen = seen.clone();
    mux.layer(move |next| {
        let header_seen = header_seen.clone();
        export_handler(move |cx: Context, request| {
            let next = next.clone();
            let header_seen = header_seen.clone();
            async move {
                assert!(cx.headers().is_some());
                if cx.header("test") == Some("test") {
                    header_seen.fetch_add(1, Ordering::SeqCst);
                }
                next(cx, request).await
            }
        })
    });

    let server = HttpTestServer::spawn(&mux).await.unwrap();
    let response = reqwest::Client::new()
        .post(server.traces_url())
        .header(CONTENT_TYPE, "application/json")
        .header("test", "test")
        .body(fixture("trace.json"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(seen.load(Ordering::SeqCst), 1);
    server.shutdown().await;
}
