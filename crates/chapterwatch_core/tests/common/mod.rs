#![allow(dead_code)]

use async_trait::async_trait;
use chapterwatch_core::{
    Clock, ContentSource, EpochMs, Installment, LanguageSet, Notifier, NotifyError,
    ReconcileSettings, RecordKind, SeriesId, SourceError, StoreError, Subscription,
    SubscriptionId, SubscriptionStore, User, UserId,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

pub fn settings() -> ReconcileSettings {
    ReconcileSettings {
        fetch_timeout: Duration::from_secs(10),
        store_timeout: Duration::from_secs(5),
        delivery_timeout: Duration::from_secs(30),
        max_concurrent_checks: 4,
    }
}

pub fn subscription(
    id: SubscriptionId,
    user_id: UserId,
    series_id: &str,
    languages: &str,
    watermark_ms: EpochMs,
) -> Subscription {
    let mut sub = Subscription::new(
        user_id,
        series_id,
        format!("{series_id} title"),
        LanguageSet::parse(languages),
        watermark_ms,
    );
    sub.id = id;
    sub
}

pub fn installment(id: &str, series_id: &str, language: &str) -> Installment {
    Installment::new(id, series_id, language, 1_000)
}

#[derive(Default)]
struct MemoryState {
    users: HashMap<UserId, User>,
    subscriptions: BTreeMap<SubscriptionId, Subscription>,
    fail_list: bool,
    fail_save: HashSet<SubscriptionId>,
    fail_user: HashSet<UserId>,
    saves: usize,
    user_lookups: usize,
}

/// In-memory subscription store with failure switches.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, id: UserId, email: &str) {
        let mut user = User::new(email);
        user.id = id;
        self.state.lock().unwrap().users.insert(id, user);
    }

    pub fn deactivate_user(&self, id: UserId) {
        if let Some(user) = self.state.lock().unwrap().users.get_mut(&id) {
            user.active = false;
        }
    }

    pub fn add_subscription(&self, subscription: Subscription) {
        self.state
            .lock()
            .unwrap()
            .subscriptions
            .insert(subscription.id, subscription);
    }

    pub fn subscription(&self, id: SubscriptionId) -> Subscription {
        self.state.lock().unwrap().subscriptions[&id].clone()
    }

    pub fn fail_list(&self) {
        self.state.lock().unwrap().fail_list = true;
    }

    pub fn fail_save(&self, id: SubscriptionId) {
        self.state.lock().unwrap().fail_save.insert(id);
    }

    pub fn fail_user_lookup(&self, id: UserId) {
        self.state.lock().unwrap().fail_user.insert(id);
    }

    pub fn save_count(&self) -> usize {
        self.state.lock().unwrap().saves
    }

    pub fn user_lookup_count(&self) -> usize {
        self.state.lock().unwrap().user_lookups
    }
}

#[async_trait]
impl SubscriptionStore for MemoryStore {
    async fn list_active(&self) -> Result<Vec<Subscription>, StoreError> {
        let state = self.state.lock().unwrap();
        if state.fail_list {
            return Err(StoreError::Backend("disk unavailable".to_string()));
        }
        Ok(state
            .subscriptions
            .values()
            .filter(|sub| sub.active)
            .cloned()
            .collect())
    }

    async fn get_user(&self, id: UserId) -> Result<User, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.user_lookups += 1;
        if state.fail_user.contains(&id) {
            return Err(StoreError::Backend("user table locked".to_string()));
        }
        state.users.get(&id).cloned().ok_or(StoreError::NotFound {
            kind: RecordKind::User,
            id,
        })
    }

    async fn save_watermark(&self, subscription: &Subscription) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_save.contains(&subscription.id) {
            return Err(StoreError::Backend("write failed".to_string()));
        }
        state.saves += 1;
        let stored = state
            .subscriptions
            .get_mut(&subscription.id)
            .ok_or(StoreError::NotFound {
                kind: RecordKind::Subscription,
                id: subscription.id,
            })?;
        stored.advance_watermark(subscription.watermark_ms);
        stored.last_installment_at_ms = stored
            .last_installment_at_ms
            .max(subscription.last_installment_at_ms);
        Ok(())
    }
}

enum Script {
    Items(Vec<Installment>),
    Fail(SourceError),
    Hang,
}

/// Content source answering from per-series scripts.
#[derive(Default)]
pub struct ScriptedSource {
    scripts: Mutex<HashMap<SeriesId, Script>>,
    calls: Mutex<Vec<(SeriesId, EpochMs)>>,
    gate: Mutex<Option<(Arc<Notify>, Arc<Notify>)>>,
    delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn returns(&self, series_id: &str, items: Vec<Installment>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(series_id.to_string(), Script::Items(items));
    }

    pub fn fails(&self, series_id: &str, error: SourceError) {
        self.scripts
            .lock()
            .unwrap()
            .insert(series_id.to_string(), Script::Fail(error));
    }

    pub fn hangs(&self, series_id: &str) {
        self.scripts
            .lock()
            .unwrap()
            .insert(series_id.to_string(), Script::Hang);
    }

    /// Every fetch signals `entered` and then waits for `release`.
    pub fn gate(&self) -> (Arc<Notify>, Arc<Notify>) {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some((Arc::clone(&entered), Arc::clone(&release)));
        (entered, release)
    }

    /// Every fetch sleeps for `delay` before answering.
    pub fn delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Highest number of fetches that were in flight at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<(SeriesId, EpochMs)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ContentSource for ScriptedSource {
    async fn fetch_since(
        &self,
        series_id: &SeriesId,
        since_ms: EpochMs,
    ) -> Result<Vec<Installment>, SourceError> {
        self.calls
            .lock()
            .unwrap()
            .push((series_id.clone(), since_ms));
        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(in_flight, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let gate = self.gate.lock().unwrap().clone();
        if let Some((entered, release)) = gate {
            entered.notify_one();
            release.notified().await;
        }

        let outcome = match self.scripts.lock().unwrap().get(series_id) {
            Some(Script::Items(items)) => Some(Ok(items.clone())),
            Some(Script::Fail(err)) => Some(Err(err.clone())),
            Some(Script::Hang) => None,
            None => Some(Ok(Vec::new())),
        };
        match outcome {
            Some(result) => {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                result
            }
            None => std::future::pending().await,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentNotification {
    pub address: String,
    pub series_title: String,
    pub installment_ids: Vec<String>,
    pub languages: Vec<String>,
}

/// Notifier that records every send and can fail selected series titles.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentNotification>>,
    fail_titles: Mutex<HashSet<String>>,
    attempts: AtomicUsize,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_title(&self, title: &str) {
        self.fail_titles.lock().unwrap().insert(title.to_string());
    }

    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(
        &self,
        address: &str,
        series_title: &str,
        installments: &[Installment],
    ) -> Result<(), NotifyError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_titles.lock().unwrap().contains(series_title) {
            return Err(NotifyError("smtp connection refused".to_string()));
        }
        self.sent.lock().unwrap().push(SentNotification {
            address: address.to_string(),
            series_title: series_title.to_string(),
            installment_ids: installments.iter().map(|item| item.id.clone()).collect(),
            languages: installments
                .iter()
                .map(|item| item.language.clone())
                .collect(),
        });
        Ok(())
    }
}

/// Clock whose time only moves when the test says so.
pub struct ManualClock(AtomicI64);

impl ManualClock {
    pub fn at(now_ms: EpochMs) -> Self {
        Self(AtomicI64::new(now_ms))
    }

    pub fn set(&self, now_ms: EpochMs) {
        self.0.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> EpochMs {
        self.0.load(Ordering::SeqCst)
    }
}
