//! Fakes for the ports, shared by unit and integration tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::ApiError;
use crate::ports::{ApiClient, Notifier, Page, PageRequest, PowerState};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// `{ id, object, data }` record in the remote shape.
pub fn record(id: i64, object: &str, data: Value) -> Value {
    json!({
        "id": id,
        "object": object,
        "data_updated_at": "2024-01-01T00:00:00.000000Z",
        "data": data,
    })
}

/// Scripted api client.
///
/// Responses are queued per path and consumed in order. A path with nothing
/// queued answers with an empty last page.
#[derive(Default)]
pub struct FakeApiClient {
    script: Mutex<HashMap<String, VecDeque<Result<Page, ApiError>>>>,
    calls: Mutex<Vec<PageRequest>>,
    delay: Mutex<Option<Duration>>,
}

impl FakeApiClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_page(&self, path: &str, page: Page) {
        lock(&self.script)
            .entry(path.to_string())
            .or_default()
            .push_back(Ok(page));
    }

    pub fn push_error(&self, path: &str, error: ApiError) {
        lock(&self.script)
            .entry(path.to_string())
            .or_default()
            .push_back(Err(error));
    }

    /// Every call sleeps this long before answering.
    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = Some(delay);
    }

    pub fn calls(&self) -> Vec<PageRequest> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    pub fn paths(&self) -> Vec<String> {
        lock(&self.calls).iter().map(|c| c.path.clone()).collect()
    }
}

#[async_trait]
impl ApiClient for FakeApiClient {
    async fn fetch(&self, request: &PageRequest) -> Result<Page, ApiError> {
        lock(&self.calls).push(request.clone());
        let delay = *lock(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let next = lock(&self.script)
            .get_mut(&request.path)
            .and_then(VecDeque::pop_front);
        next.unwrap_or_else(|| Ok(Page::default()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Posted {
        lessons: usize,
        reviews: usize,
        new_reviews: usize,
    },
    Cancelled,
}

#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Notification> {
        lock(&self.events).clone()
    }
}

impl Notifier for RecordingNotifier {
    fn post(&self, lessons: usize, reviews: usize, new_reviews: usize) {
        lock(&self.events).push(Notification::Posted {
            lessons,
            reviews,
            new_reviews,
        });
    }

    fn cancel(&self) {
        lock(&self.events).push(Notification::Cancelled);
    }
}

/// Power state toggled by tests.
#[derive(Default)]
pub struct FakePower {
    pub power_save: AtomicBool,
    pub idle: AtomicBool,
}

impl FakePower {
    pub fn set_power_save(&self, value: bool) {
        self.power_save.store(value, Ordering::SeqCst);
    }

    pub fn set_idle(&self, value: bool) {
        self.idle.store(value, Ordering::SeqCst);
    }
}

impl PowerState for FakePower {
    fn is_power_save(&self) -> bool {
        self.power_save.load(Ordering::SeqCst)
    }

    fn is_idle(&self) -> bool {
        self.idle.load(Ordering::SeqCst)
    }
}
