use crate::transport::{OutboundRequest, Transport, TransportError};
use async_trait::async_trait;
use http::{Method, StatusCode};
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub user_agent: Option<String>,
}

/// A local API server answering every request with the same status.
pub struct TestApiServer {
    port: u16,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    connections: Arc<AtomicUsize>,
}

impl TestApiServer {
    pub async fn spawn(status: StatusCode) -> Self {
        Self::start(Some(status)).await
    }

    /// Accepts connections but never answers.
    pub async fn spawn_unresponsive() -> Self {
        Self::start(None).await
    }

    async fn start(status: Option<StatusCode>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to address");
        let port = listener.local_addr().unwrap().port();

        let requests = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));

        let server_requests = requests.clone();
        let server_connections = connections.clone();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                server_connections.fetch_add(1, Ordering::SeqCst);

                let Some(status) = status else {
                    // Hold the connection open without ever responding.
                    tokio::spawn(async move {
                        let _stream = stream;
                        std::future::pending::<()>().await;
                    });
                    continue;
                };

                let requests = server_requests.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req: Request<Incoming>| {
                        requests.lock().unwrap().push(record(&req));
                        async move {
                            let mut response = Response::new(Full::new(Bytes::from_static(b"{}")));
                            *response.status_mut() = status;
                            Ok::<_, Infallible>(response)
                        }
                    });
                    if let Err(err) = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                        .serve_connection(TokioIo::new(stream), service)
                        .await
                    {
                        eprintln!("Error serving connection: {:?}", err);
                    }
                });
            }
        });

        TestApiServer {
            port,
            requests,
            connections,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.port, path)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

fn record(req: &Request<Incoming>) -> RecordedRequest {
    let query = url::form_urlencoded::parse(req.uri().query().unwrap_or("").as_bytes())
        .into_owned()
        .collect();

    RecordedRequest {
        method: req.method().clone(),
        path: req.uri().path().to_string(),
        query,
        user_agent: req
            .headers()
            .get(http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(String::from),
    }
}

/// A transport replaying scripted results. The last result repeats forever.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<StatusCode, TransportError>>>,
    requests: Mutex<Vec<OutboundRequest>>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Result<StatusCode, TransportError>>) -> Arc<Self> {
        assert!(!script.is_empty(), "script needs at least one result");
        Arc::new(ScriptedTransport {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn always(result: Result<StatusCode, TransportError>) -> Arc<Self> {
        Self::new(vec![result])
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<OutboundRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, request: &OutboundRequest) -> Result<StatusCode, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        let mut script = self.script.lock().unwrap();
        if script.len() > 1 {
            script.pop_front().unwrap()
        } else {
            script.front().cloned().unwrap()
        }
    }
}

/// A transport that panics, standing in for a bug anywhere below the endpoint.
pub struct PanickingTransport;

#[async_trait]
impl Transport for PanickingTransport {
    async fn execute(&self, _request: &OutboundRequest) -> Result<StatusCode, TransportError> {
        panic!("transport blew up");
    }
}
