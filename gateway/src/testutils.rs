use crate::backend::{Backend, BackendRequest, BackendResponse, TransportError};
use crate::config::Config;
use async_trait::async_trait;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioExecutor;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

/// What a scripted backend does with one call.
pub enum ScriptedReply {
    Respond {
        status: u16,
        headers: Vec<(&'static str, String)>,
        body: Bytes,
    },
    /// Never answers within any reasonable deadline
    Hang,
    /// Fails at the transport level
    Fail(String),
}

impl ScriptedReply {
    pub fn json(status: u16, body: serde_json::Value) -> Self {
        ScriptedReply::Respond {
            status,
            headers: vec![("content-type", "application/json".to_string())],
            body: Bytes::from(body.to_string()),
        }
    }

    pub fn text(status: u16, body: &str) -> Self {
        ScriptedReply::Respond {
            status,
            headers: Vec::new(),
            body: Bytes::from(body.to_string()),
        }
    }

    /// Adds a response header. Only meaningful for `Respond`.
    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        if let ScriptedReply::Respond { headers, .. } = &mut self {
            headers.push((name, value.to_string()));
        }
        self
    }
}

fn header_map(headers: Vec<(&'static str, String)>) -> HeaderMap {
    headers
        .into_iter()
        .map(|(name, value)| {
            (
                HeaderName::from_static(name),
                HeaderValue::from_str(&value).unwrap(),
            )
        })
        .collect()
}

/// A request as seen by the mock HTTP backend, headers included.
#[derive(Clone, Debug)]
pub struct MockCall {
    pub request: BackendRequest,
    pub headers: HeaderMap,
}

pub type MockCalls = Arc<Mutex<Vec<MockCall>>>;

type Script = Box<dyn Fn(&BackendRequest) -> ScriptedReply + Send + Sync>;

/// In-memory backend double that records every call it receives.
pub struct ScriptedBackend {
    script: Script,
    calls: Arc<Mutex<Vec<BackendRequest>>>,
}

impl ScriptedBackend {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&BackendRequest) -> ScriptedReply + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn calls(&self) -> Vec<BackendRequest> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    async fn send(&self, request: BackendRequest) -> Result<BackendResponse, TransportError> {
        let reply = (self.script)(&request);
        self.calls.lock().unwrap().push(request);

        match reply {
            ScriptedReply::Respond {
                status,
                headers,
                body,
            } => {
                let mut response =
                    BackendResponse::new(StatusCode::from_u16(status).unwrap(), body);
                response.headers = header_map(headers);
                Ok(response)
            }
            ScriptedReply::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(TransportError::Request("hung backend woke up".to_string()))
            }
            ScriptedReply::Fail(message) => Err(TransportError::Request(message)),
        }
    }
}

/// Start a mock HTTP backend that answers every request through `script`.
///
/// Returns the bound port and the recorded calls.
pub async fn start_mock_server<F>(script: F) -> (u16, MockCalls)
where
    F: Fn(&BackendRequest) -> ScriptedReply + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let script = Arc::new(script);
    let calls: MockCalls = Arc::new(Mutex::new(Vec::new()));
    let recorded = calls.clone();

    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            let io = hyper_util::rt::TokioIo::new(stream);
            let script = script.clone();
            let recorded = recorded.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                    let script = script.clone();
                    let recorded = recorded.clone();
                    async move {
                        let (parts, body) = req.into_parts();
                        let body = body.collect().await.unwrap().to_bytes();
                        let request = BackendRequest {
                            method: parts.method,
                            path: parts
                                .uri
                                .path_and_query()
                                .map(|pq| pq.to_string())
                                .unwrap_or_default(),
                            body: (!body.is_empty()).then_some(body),
                        };

                        let reply = script(&request);
                        recorded.lock().unwrap().push(MockCall {
                            request,
                            headers: parts.headers,
                        });

                        let (status, headers, body) = match reply {
                            ScriptedReply::Respond {
                                status,
                                headers,
                                body,
                            } => (status, headers, body),
                            ScriptedReply::Hang => {
                                tokio::time::sleep(Duration::from_secs(3600)).await;
                                (504, Vec::new(), Bytes::new())
                            }
                            ScriptedReply::Fail(message) => {
                                (500, Vec::new(), Bytes::from(message))
                            }
                        };

                        let mut response = Response::new(Full::new(body));
                        *response.status_mut() = StatusCode::from_u16(status).unwrap();
                        *response.headers_mut() = header_map(headers);
                        Ok::<_, Infallible>(response)
                    }
                });

                let _ = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                    .serve_connection(io, service)
                    .await;
            });
        }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    (port, calls)
}

/// Config with two submission routes, a queue route and one status route.
/// Polling is fast so tests stay quick.
pub fn test_config(base_url: &str) -> Config {
    let yaml = format!(
        r#"
listener:
    host: "127.0.0.1"
    port: 3000
backend:
    base_url: "{base_url}"
    token_env: INFERENCE_GATEWAY_TEST_UNSET_TOKEN
    attempt_timeout_ms: 2000
resolution:
    submission_routes:
        - /run/predict
        - /api/predict
    queue_route: /queue/join
    poll_routes:
        - "/queue/status/{{session}}"
poll:
    max_attempts: 5
    interval_ms: 10
diagnostics:
    expose_upstream_detail: true
"#
    );
    let config: Config = serde_yaml::from_str(&yaml).unwrap();
    config.validate().unwrap();
    config
}
