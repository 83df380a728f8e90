//! Scripted in-memory transport for offline runs and tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use super::transport::{HttpResponse, HttpTransport, TransportError};

type Reply = Result<HttpResponse, TransportError>;

struct Route {
    needle: String,
    replies: VecDeque<Reply>,
}

/// Answers GETs from routes matched by URL substring.
///
/// Each route replays its replies in order and keeps repeating the last
/// one. Unmatched URLs get a 404.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<Vec<Route>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(self, needle: impl Into<String>, replies: Vec<Reply>) -> Self {
        if let Ok(mut routes) = self.routes.lock() {
            routes.push(Route {
                needle: needle.into(),
                replies: replies.into(),
            });
        }
        self
    }

    /// Route that always answers 200 with `body`.
    pub fn ok(self, needle: impl Into<String>, body: impl Into<String>) -> Self {
        self.route(needle, vec![Ok(HttpResponse::new(200, body))])
    }

    /// URLs requested so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self, needle: &str) -> usize {
        self.calls().iter().filter(|u| u.contains(needle)).count()
    }
}

impl HttpTransport for ScriptedTransport {
    fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(url.to_string());
        }
        let mut routes = self
            .routes
            .lock()
            .map_err(|_| TransportError::Other("scripted transport poisoned".into()))?;
        let Some(route) = routes.iter_mut().find(|r| url.contains(&r.needle)) else {
            return Ok(HttpResponse::new(404, ""));
        };
        match route.replies.len() {
            0 => Ok(HttpResponse::new(404, "")),
            1 => route.replies[0].clone(),
            _ => route
                .replies
                .pop_front()
                .unwrap_or_else(|| Ok(HttpResponse::new(404, ""))),
        }
    }
}
