//! Scripted Kubernetes API server for unit tests
//!
//! Backs a real `kube::Client` with a `tower-test` mock service. Each test
//! supplies a responder mapping `(method, path)` to a status and JSON body;
//! every request is recorded as `"METHOD /path"` for assertions. String
//! bodies are sent as plain text, as the API server does for pod logs.

use http::{Method, Request, Response};
use kube::client::Body;
use kube::Client;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tower_test::mock;

pub(crate) struct ApiServer {
    pub client: Client,
    log: Arc<Mutex<Vec<String>>>,
}

impl ApiServer {
    /// Requests seen so far, in order
    pub fn requests(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// Number of requests matching the method and path exactly
    pub fn count(&self, method: &str, path: &str) -> usize {
        let wanted = format!("{method} {path}");
        self.requests().iter().filter(|r| **r == wanted).count()
    }
}

/// Start a mock API server answering with `respond`
pub(crate) fn api_server<F>(respond: F) -> ApiServer
where
    F: Fn(&Method, &str) -> (u16, Value) + Send + 'static,
{
    let (service, mut handle) = mock::pair::<Request<Body>, Response<Body>>();
    let log = Arc::new(Mutex::new(Vec::new()));
    let seen = log.clone();

    tokio::spawn(async move {
        while let Some((request, send)) = handle.next_request().await {
            let path = request.uri().path().to_string();
            seen.lock()
                .unwrap()
                .push(format!("{} {}", request.method(), path));

            let (status, body) = respond(request.method(), &path);
            let bytes = match body {
                Value::String(text) => text.into_bytes(),
                other => serde_json::to_vec(&other).unwrap(),
            };
            send.send_response(Response::builder().status(status).body(Body::from(bytes)).unwrap());
        }
    });

    ApiServer {
        client: Client::new(service, "default"),
        log,
    }
}

pub(crate) fn ok(body: Value) -> (u16, Value) {
    (200, body)
}

pub(crate) fn not_found() -> (u16, Value) {
    (
        404,
        json!({
            "kind": "Status",
            "apiVersion": "v1",
            "metadata": {},
            "status": "Failure",
            "message": "not found",
            "reason": "NotFound",
            "code": 404
        }),
    )
}

pub(crate) fn server_error() -> (u16, Value) {
    (
        500,
        json!({
            "kind": "Status",
            "apiVersion": "v1",
            "metadata": {},
            "status": "Failure",
            "message": "etcdserver: request timed out",
            "reason": "InternalError",
            "code": 500
        }),
    )
}

/// A plain text response
pub(crate) fn text(body: &str) -> (u16, Value) {
    (200, Value::String(body.to_string()))
}

/// A list response with the given items
pub(crate) fn list(api_version: &str, kind: &str, items: Vec<Value>) -> (u16, Value) {
    ok(json!({
        "apiVersion": api_version,
        "kind": kind,
        "metadata": { "resourceVersion": "1" },
        "items": items
    }))
}

/// A minimal object of the given type
pub(crate) fn object(api_version: &str, kind: &str, name: &str) -> Value {
    json!({
        "apiVersion": api_version,
        "kind": kind,
        "metadata": { "name": name }
    })
}
