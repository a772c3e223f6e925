//! In-process HTTP stand-in for the three external collaborators: the map
//! roster service, the killboard page feed, and the enrichment API.

use std::{
    collections::HashMap,
    convert::Infallible,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, RwLock,
    },
};

use anyhow::{Context, Result};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const PAGE_SIZE: usize = 5;

#[derive(Clone)]
pub struct KillSeed {
    pub id: u64,
    pub npc: bool,
}

#[derive(Clone)]
pub struct MockUniverse {
    inner: Arc<RwLock<UniverseInner>>,
    roster_requests: Arc<AtomicU64>,
    page_requests: Arc<AtomicU64>,
    detail_requests: Arc<AtomicU64>,
}

struct UniverseInner {
    systems: Vec<(String, u64)>,
    kills: HashMap<u64, Vec<KillSeed>>,
    roster_available: bool,
}

impl MockUniverse {
    pub fn new(systems: Vec<(&str, u64)>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(UniverseInner {
                systems: systems
                    .into_iter()
                    .map(|(name, id)| (name.to_owned(), id))
                    .collect(),
                kills: HashMap::new(),
                roster_available: true,
            })),
            roster_requests: Arc::new(AtomicU64::new(0)),
            page_requests: Arc::new(AtomicU64::new(0)),
            detail_requests: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn add_system(&self, name: &str, id: u64) {
        let mut inner = self.inner.write().expect("mock universe poisoned");
        inner.systems.push((name.to_owned(), id));
    }

    pub fn add_kill(&self, system_id: u64, kill_id: u64, npc: bool) {
        let mut inner = self.inner.write().expect("mock universe poisoned");
        inner
            .kills
            .entry(system_id)
            .or_default()
            .push(KillSeed { id: kill_id, npc });
    }

    pub fn set_roster_available(&self, available: bool) {
        let mut inner = self.inner.write().expect("mock universe poisoned");
        inner.roster_available = available;
    }

    pub fn roster_requests(&self) -> u64 {
        self.roster_requests.load(Ordering::SeqCst)
    }

    pub fn page_requests(&self) -> u64 {
        self.page_requests.load(Ordering::SeqCst)
    }

    pub fn detail_requests(&self) -> u64 {
        self.detail_requests.load(Ordering::SeqCst)
    }

    fn roster_body(&self) -> Option<Value> {
        let inner = self.inner.read().expect("mock universe poisoned");
        if !inner.roster_available {
            return None;
        }
        let data: Vec<Value> = inner
            .systems
            .iter()
            .map(|(name, id)| json!({ "name": name, "solar_system_id": id }))
            .collect();
        Some(json!({ "Data": data }))
    }

    fn page_body(&self, system_id: u64, page: usize) -> Value {
        let inner = self.inner.read().expect("mock universe poisoned");
        let kills = inner.kills.get(&system_id).cloned().unwrap_or_default();
        let start = (page.saturating_sub(1)) * PAGE_SIZE;
        let slice: Vec<Value> = kills
            .iter()
            .skip(start)
            .take(PAGE_SIZE)
            .map(|seed| {
                json!({
                    "killmail_id": seed.id,
                    "zkb": { "hash": hash_for(seed.id), "npc": seed.npc }
                })
            })
            .collect();
        Value::Array(slice)
    }

    fn detail_body(&self, kill_id: u64, hash: &str) -> Option<Value> {
        if hash != hash_for(kill_id) {
            return None;
        }
        Some(json!({
            "killmail_id": kill_id,
            "killmail_time": "2025-11-02T18:04:31Z",
            "attackers": [
                { "character_id": 1000 + kill_id, "corporation_id": 2000 + kill_id },
                { "character_id": 0, "corporation_id": 0, "alliance_id": 0 }
            ],
            "victim": { "character_id": 77, "corporation_id": 88, "alliance_id": 99 }
        }))
    }
}

fn hash_for(kill_id: u64) -> String {
    format!("hash-{kill_id}")
}

pub struct MockApiServer {
    url: String,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MockApiServer {
    pub async fn start(universe: MockUniverse) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to bind mock API listener")?;
        let addr = listener
            .local_addr()
            .context("failed to read mock listener address")?;
        let std_listener = listener
            .into_std()
            .context("failed to convert mock listener")?;
        std_listener
            .set_nonblocking(true)
            .context("failed to set mock listener non-blocking")?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let make_service = make_service_fn(move |_| {
            let universe = universe.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    serve_request(universe.clone(), req)
                }))
            }
        });

        let server = Server::from_tcp(std_listener)
            .context("failed to build mock HTTP server")?
            .serve(make_service);
        let graceful = server.with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });

        let handle = tokio::spawn(async move {
            if let Err(err) = graceful.await {
                eprintln!("mock API server stopped: {err}");
            }
        });

        Ok(Self {
            url: format!("http://{}", addr),
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

async fn serve_request(
    universe: MockUniverse,
    req: Request<Body>,
) -> Result<Response<Body>, Infallible> {
    if req.method() != Method::GET {
        return Ok(status(StatusCode::METHOD_NOT_ALLOWED, "unsupported method"));
    }

    let path = req.uri().path().to_owned();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    let response = match segments.as_slice() {
        ["api", "map", "systems"] => {
            universe.roster_requests.fetch_add(1, Ordering::SeqCst);
            match universe.roster_body() {
                Some(body) => json_response(body),
                None => status(StatusCode::INTERNAL_SERVER_ERROR, "roster unavailable"),
            }
        }
        ["api", "systemID", system_id, "pastSeconds", _, "page", page] => {
            universe.page_requests.fetch_add(1, Ordering::SeqCst);
            match (system_id.parse::<u64>(), page.parse::<usize>()) {
                (Ok(system_id), Ok(page)) => json_response(universe.page_body(system_id, page)),
                _ => status(StatusCode::BAD_REQUEST, "malformed page request"),
            }
        }
        ["latest", "killmails", kill_id, hash] => {
            universe.detail_requests.fetch_add(1, Ordering::SeqCst);
            match kill_id.parse::<u64>() {
                Ok(kill_id) => match universe.detail_body(kill_id, hash) {
                    Some(body) => json_response(body),
                    None => status(StatusCode::NOT_FOUND, "unknown killmail"),
                },
                Err(_) => status(StatusCode::BAD_REQUEST, "malformed killmail id"),
            }
        }
        _ => status(StatusCode::NOT_FOUND, "unknown route"),
    };

    Ok(response)
}

fn json_response(value: Value) -> Response<Body> {
    let mut response = Response::new(Body::from(value.to_string()));
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    response
}

fn status(code: StatusCode, message: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(message));
    *response.status_mut() = code;
    response
}
