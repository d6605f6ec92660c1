//! Single-shot GET dispatch over a hyper HTTP/1 client connection.
//!
//! `Dispatcher::send` hands the exchange to a runtime it owns and returns a
//! `PendingResponse` at once. Exactly one continuation is attached with
//! `then`, and `wait` is the only point where the caller blocks.

use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use http::{header, HeaderMap, Method, Request, StatusCode};
use http_body_util::Empty;
use hyper::body::Incoming;
use hyper::client::conn::http1::Builder;
use hyper_util::rt::TokioIo;
use log::{debug, info, warn};
use tokio::runtime::{Handle, Runtime};
use tokio::task::JoinHandle;
use tokio_rustls::TlsConnector;

use crate::endpoint::{Endpoint, Scheme};
use crate::error::{BoxError, Error};
use crate::io::SocketStream;
use crate::tls;
use crate::uri::UriBuilder;

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub worker_threads: usize,
    pub ca_file: Option<PathBuf>,
    pub user_agent: Option<String>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions {
            worker_threads: 2,
            ca_file: None,
            user_agent: None,
        }
    }
}

/// Lifecycle of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Created,
    Sent,
    Resolved,
    Failed,
    ContinuationRun,
    Completed,
}

impl RequestState {
    fn allows(self, next: RequestState) -> bool {
        use RequestState::*;
        matches!(
            (self, next),
            (Created, Sent)
                | (Sent, Resolved)
                | (Sent, Failed)
                | (Resolved, ContinuationRun)
                | (ContinuationRun, Completed)
                | (ContinuationRun, Failed)
        )
    }
}

#[derive(Debug, Clone)]
struct StateTracker {
    id: u64,
    state: Arc<Mutex<RequestState>>,
}

impl StateTracker {
    fn new(id: u64) -> Self {
        StateTracker {
            id,
            state: Arc::new(Mutex::new(RequestState::Created)),
        }
    }

    fn get(&self) -> RequestState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn advance(&self, next: RequestState) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.allows(next) {
            warn!("request {}: refused transition {:?} -> {:?}", self.id, *state, next);
            return false;
        }
        debug!("request {}: {:?} -> {:?}", self.id, *state, next);
        *state = next;
        true
    }
}

/// Head of a received response. The body is never read.
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
}

impl Response {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn status_code(&self) -> u16 {
        self.status.as_u16()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}

impl From<hyper::Response<Incoming>> for Response {
    fn from(response: hyper::Response<Incoming>) -> Self {
        let (parts, _body) = response.into_parts();
        Response {
            status: parts.status,
            headers: parts.headers,
        }
    }
}

pub struct Dispatcher {
    endpoint: Arc<Endpoint>,
    tls: Option<TlsConnector>,
    user_agent: Option<String>,
    runtime: Runtime,
    next_id: AtomicU64,
}

impl Dispatcher {
    pub fn new(endpoint: Endpoint, options: &ClientOptions) -> Result<Self, Error> {
        let tls = match endpoint.scheme() {
            Scheme::Https => Some(tls::connector(options.ca_file.as_deref())?),
            Scheme::Http | Scheme::Unix => None,
        };

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(options.worker_threads.max(1))
            .enable_io()
            .enable_time()
            .thread_name("querystat-worker")
            .build()
            .map_err(Error::Runtime)?;

        Ok(Dispatcher {
            endpoint: Arc::new(endpoint),
            tls,
            user_agent: options.user_agent.clone(),
            runtime,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Issues `GET uri` without blocking. Every failure, including a uri
    /// that cannot be encoded, arrives through the returned handle.
    pub fn send(&self, uri: &UriBuilder) -> PendingResponse {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let tracker = StateTracker::new(id);
        let request = self.build_request(uri);

        let endpoint = self.endpoint.clone();
        let tls = self.tls.clone();
        let task_tracker = tracker.clone();
        let handle = self.runtime.spawn(async move {
            task_tracker.advance(RequestState::Sent);
            let result = exchange(&endpoint, tls.as_ref(), request).await;
            match &result {
                Ok(response) => {
                    info!(
                        "request {}: {} from {}, {} headers",
                        id,
                        response.status(),
                        endpoint,
                        response.headers().len()
                    );
                    task_tracker.advance(RequestState::Resolved);
                }
                Err(err) => {
                    debug!("request {}: {}", id, err);
                    task_tracker.advance(RequestState::Failed);
                }
            }
            result
        });

        PendingResponse {
            id,
            handle,
            runtime: self.runtime.handle().clone(),
            tracker,
        }
    }

    fn build_request(&self, uri: &UriBuilder) -> Result<Request<Empty<Bytes>>, Error> {
        let target = self.endpoint.resolve(&uri.build()?)?;
        info!("GET {}{}", self.endpoint, target);

        let mut builder = Request::builder()
            .method(Method::GET)
            .uri(target.as_str())
            .header(header::HOST, self.endpoint.authority());
        if let Some(agent) = &self.user_agent {
            builder = builder.header(header::USER_AGENT, agent.as_str());
        }
        Ok(builder.body(Empty::<Bytes>::new())?)
    }
}

async fn exchange(
    endpoint: &Endpoint,
    tls: Option<&TlsConnector>,
    request: Result<Request<Empty<Bytes>>, Error>,
) -> Result<Response, Error> {
    let request = request?;
    let stream = SocketStream::connect(endpoint, tls).await?;

    let (mut sender, conn) = Builder::new()
        .title_case_headers(true)
        .handshake(TokioIo::new(stream))
        .await?;

    // Drives the connection until the response head is consumed.
    tokio::task::spawn(async move {
        if let Err(err) = conn.await {
            debug!("connection closed: {:?}", err);
        }
    });

    let response = sender.send_request(request).await?;
    Ok(Response::from(response))
}

async fn join<T>(id: u64, handle: JoinHandle<Result<T, Error>>) -> Result<T, Error> {
    match handle.await {
        Ok(result) => result,
        // Continuations catch their own panics, so this is the exchange task.
        Err(err) if err.is_panic() => Err(Error::ExchangePanicked {
            id,
            message: panic_message(err.into_panic()),
        }),
        Err(_) => Err(Error::Aborted(id)),
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// An in-flight request. Resolves exactly once.
pub struct PendingResponse {
    id: u64,
    handle: JoinHandle<Result<Response, Error>>,
    runtime: Handle,
    tracker: StateTracker,
}

impl PendingResponse {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> RequestState {
        self.tracker.get()
    }

    /// Attaches the continuation, run on a runtime worker once the response
    /// head arrives. Not run when the exchange fails.
    pub fn then<T, E, F>(self, continuation: F) -> PendingCompletion<T>
    where
        F: FnOnce(Response) -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        let PendingResponse {
            id,
            handle,
            runtime,
            tracker,
        } = self;

        let task_tracker = tracker.clone();
        let handle = runtime.spawn(async move {
            let response = join(id, handle).await?;
            task_tracker.advance(RequestState::ContinuationRun);

            let outcome = match panic::catch_unwind(AssertUnwindSafe(|| continuation(response))) {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(err)) => Err(Error::Continuation(err.into())),
                Err(payload) => Err(Error::ContinuationPanicked(panic_message(payload))),
            };
            task_tracker.advance(if outcome.is_ok() {
                RequestState::Completed
            } else {
                RequestState::Failed
            });
            outcome
        });

        PendingCompletion { id, handle, tracker }
    }
}

/// A request with its continuation attached.
pub struct PendingCompletion<T> {
    id: u64,
    handle: JoinHandle<Result<T, Error>>,
    tracker: StateTracker,
}

impl<T> PendingCompletion<T> {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> RequestState {
        self.tracker.get()
    }

    /// Blocks the calling thread until the continuation has run or the
    /// request failed. Must not be called from inside an async context.
    pub fn wait(self) -> Result<T, Error> {
        let PendingCompletion { id, handle, tracker } = self;
        let result = futures::executor::block_on(join(id, handle));
        if let Err(err) = &result {
            debug!("request {} ended in {:?}: {}", id, tracker.get(), err);
        }
        result
    }
}
