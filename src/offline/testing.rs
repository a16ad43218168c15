//! Scripted network for offline-layer tests

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Method;
use tokio::sync::Notify;

use super::request::{FetchRequest, FetchResponse};
use super::transport::{FetchError, Fetcher};

#[derive(Clone)]
enum Reply {
    Respond(FetchResponse),
    Fail,
    Hold(Arc<Notify>, FetchResponse),
}

/// Replies by URL. Unknown URLs, and every URL while offline, fail with a
/// network error.
#[derive(Default)]
pub struct ScriptedFetcher {
    replies: Mutex<HashMap<String, Reply>>,
    offline: Mutex<bool>,
    calls: Mutex<Vec<(Method, String)>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, url: &str, response: FetchResponse) {
        self.replies
            .lock()
            .insert(url.to_string(), Reply::Respond(response));
    }

    pub fn fail(&self, url: &str) {
        self.replies.lock().insert(url.to_string(), Reply::Fail);
    }

    /// Block fetches of `url` until the returned gate is notified
    pub fn hold(&self, url: &str, response: FetchResponse) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.replies
            .lock()
            .insert(url.to_string(), Reply::Hold(gate.clone(), response));
        gate
    }

    pub fn set_offline(&self, offline: bool) {
        *self.offline.lock() = offline;
    }

    pub fn calls(&self) -> Vec<(Method, String)> {
        self.calls.lock().clone()
    }

    pub fn calls_to(&self, url: &str) -> usize {
        self.calls.lock().iter().filter(|(_, u)| u == url).count()
    }

    /// Wait until at least `n` fetches have started
    pub async fn wait_for_calls(&self, n: usize) {
        for _ in 0..500 {
            if self.calls.lock().len() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("expected {} fetches, saw {}", n, self.calls.lock().len());
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        let url = request.url.to_string();
        self.calls.lock().push((request.method.clone(), url.clone()));

        if *self.offline.lock() {
            return Err(FetchError::Network("offline".to_string()));
        }

        let reply = self.replies.lock().get(&url).cloned();
        match reply {
            Some(Reply::Respond(response)) => Ok(response),
            Some(Reply::Hold(gate, response)) => {
                gate.notified().await;
                Ok(response)
            }
            Some(Reply::Fail) => Err(FetchError::Network(format!("{} unreachable", url))),
            None => Err(FetchError::Network(format!("no route to {}", url))),
        }
    }
}

/// Poll `check` until it holds, for assertions on background work
pub async fn eventually<F: Fn() -> bool>(check: F) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("condition not reached");
}

/// Like `eventually`, for checks that need to await
pub async fn eventually_async<F, Fut>(check: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..500 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("condition not reached");
}
