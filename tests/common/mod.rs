#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};

use supabookmarks::auth::{AuthChangeEvent, AuthSubscription, Session, User};
use supabookmarks::backend::{BookmarkStore, ChangeFeed, Identity};
use supabookmarks::bookmarks::{Bookmark, BookmarkChange, NewBookmark};
use supabookmarks::error::Error;
use supabookmarks::navigation::{Navigator, Route};
use supabookmarks::screens::DashboardView;

pub fn user(id: &str) -> User {
    User::new(id, Some(&format!("{}@example.com", id)))
}

pub fn session(id: &str) -> Session {
    Session::new("access".into(), "refresh".into(), user(id), 3600)
}

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
}

pub fn bookmark(id: &str, owner: &str, minute: i64) -> Bookmark {
    Bookmark {
        id: id.to_string(),
        title: format!("title {}", id),
        url: format!("https://example.com/{}", id),
        user_id: owner.to_string(),
        created_at: base_time() + ChronoDuration::minutes(minute),
    }
}

/// Identity and bookmark table kept in memory.
///
/// Writes can be held back with [`MemoryBackend::hold_writes`] to observe the
/// screen while a request is in flight. Every successful write is echoed to all
/// open change feeds, as the realtime service would.
pub struct MemoryBackend {
    session: Mutex<Option<Session>>,
    session_error: AtomicBool,
    auth_events: broadcast::Sender<AuthChangeEvent>,
    rows: Mutex<Vec<Bookmark>>,
    next_id: AtomicUsize,
    feeds: Mutex<Vec<mpsc::UnboundedSender<BookmarkChange>>>,
    writes_open: watch::Sender<bool>,
    subscribe_open: watch::Sender<bool>,
    fail_list: AtomicBool,
    fail_insert: AtomicBool,
    fail_delete: AtomicBool,
    fail_sign_out: AtomicBool,
    echo_writes: AtomicBool,
    pub inserted: Mutex<Vec<NewBookmark>>,
    pub deleted: Mutex<Vec<String>>,
    pub list_calls: AtomicUsize,
    pub subscribes_done: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Arc<Self> {
        let (auth_events, _) = broadcast::channel(16);
        let (writes_open, _) = watch::channel(true);
        let (subscribe_open, _) = watch::channel(true);
        Arc::new(Self {
            session: Mutex::new(None),
            session_error: AtomicBool::new(false),
            auth_events,
            rows: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(1),
            feeds: Mutex::new(Vec::new()),
            writes_open,
            subscribe_open,
            fail_list: AtomicBool::new(false),
            fail_insert: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
            fail_sign_out: AtomicBool::new(false),
            echo_writes: AtomicBool::new(true),
            inserted: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            list_calls: AtomicUsize::new(0),
            subscribes_done: AtomicUsize::new(0),
        })
    }

    pub fn signed_in(id: &str) -> Arc<Self> {
        let backend = Self::new();
        backend.set_session(Some(session(id)));
        backend
    }

    pub fn set_session(&self, session: Option<Session>) {
        *self.session.lock().unwrap() = session;
    }

    pub fn fail_session(&self) {
        self.session_error.store(true, Ordering::SeqCst);
    }

    pub fn seed(&self, rows: Vec<Bookmark>) {
        self.rows.lock().unwrap().extend(rows);
    }

    pub fn row_ids(&self) -> Vec<String> {
        let mut rows = self.rows.lock().unwrap().clone();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        rows.into_iter().map(|b| b.id).collect()
    }

    pub fn fail_list(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }

    pub fn fail_insert(&self, fail: bool) {
        self.fail_insert.store(fail, Ordering::SeqCst);
    }

    pub fn fail_delete(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }

    pub fn fail_sign_out(&self, fail: bool) {
        self.fail_sign_out.store(fail, Ordering::SeqCst);
    }

    /// Stop echoing own writes to the feeds; use `push_*` to deliver them by hand
    pub fn echo_writes(&self, echo: bool) {
        self.echo_writes.store(echo, Ordering::SeqCst);
    }

    pub fn hold_writes(&self) {
        self.writes_open.send_replace(false);
    }

    pub fn release_writes(&self) {
        self.writes_open.send_replace(true);
    }

    async fn wait_for_writes(&self) {
        let mut open = self.writes_open.subscribe();
        let _ = open.wait_for(|open| *open).await;
    }

    /// Keep `subscribe` calls pending until [`MemoryBackend::release_subscribe`]
    pub fn hold_subscribe(&self) {
        self.subscribe_open.send_replace(false);
    }

    pub fn release_subscribe(&self) {
        self.subscribe_open.send_replace(true);
    }

    /// End every open feed, as a dropped realtime connection does
    pub fn close_feeds(&self) {
        self.feeds.lock().unwrap().clear();
    }

    /// Feeds that are still held by someone
    pub fn open_feeds(&self) -> usize {
        self.feeds.lock().unwrap().iter().filter(|tx| !tx.is_closed()).count()
    }

    pub fn auth_listeners(&self) -> usize {
        self.auth_events.receiver_count()
    }

    pub fn emit(&self, event: AuthChangeEvent) {
        let _ = self.auth_events.send(event);
    }

    /// Deliver a change to every open feed without touching the table
    pub fn push(&self, change: BookmarkChange) {
        let feeds = self.feeds.lock().unwrap();
        for tx in feeds.iter() {
            let _ = tx.send(change.clone());
        }
    }

    /// A row written by another session
    pub fn remote_insert(&self, row: Bookmark) {
        self.rows.lock().unwrap().push(row.clone());
        self.push(BookmarkChange::Inserted(row));
    }

    pub fn remote_delete(&self, id: &str) {
        self.rows.lock().unwrap().retain(|b| b.id != id);
        self.push(BookmarkChange::Deleted {
            id: id.to_string(),
            user_id: None,
        });
    }
}

#[async_trait]
impl Identity for MemoryBackend {
    async fn get_session(&self) -> Result<Option<Session>, Error> {
        if self.session_error.load(Ordering::SeqCst) {
            return Err(Error::auth("invalid grant"));
        }
        Ok(self.session.lock().unwrap().clone())
    }

    async fn get_user(&self) -> Result<Option<User>, Error> {
        Ok(self.session.lock().unwrap().as_ref().map(|s| s.user.clone()))
    }

    async fn sign_out(&self) -> Result<(), Error> {
        self.set_session(None);
        self.emit(AuthChangeEvent::SignedOut);
        if self.fail_sign_out.load(Ordering::SeqCst) {
            return Err(Error::Api {
                status: 500,
                message: "logout failed".into(),
            });
        }
        Ok(())
    }

    fn on_auth_state_change(&self) -> AuthSubscription {
        AuthSubscription::new(self.auth_events.subscribe())
    }
}

#[async_trait]
impl BookmarkStore for MemoryBackend {
    async fn list(&self, user_id: &str) -> Result<Vec<Bookmark>, Error> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(Error::database("connection refused"));
        }
        let mut rows: Vec<Bookmark> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn insert(&self, bookmark: NewBookmark) -> Result<Bookmark, Error> {
        self.wait_for_writes().await;
        self.inserted.lock().unwrap().push(bookmark.clone());
        if self.fail_insert.load(Ordering::SeqCst) {
            return Err(Error::database("insert rejected"));
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let row = Bookmark {
            id: format!("new-{}", n),
            title: bookmark.title,
            url: bookmark.url,
            user_id: bookmark.user_id,
            created_at: base_time() + ChronoDuration::hours(1) + ChronoDuration::seconds(n as i64),
        };
        self.rows.lock().unwrap().push(row.clone());
        if self.echo_writes.load(Ordering::SeqCst) {
            self.push(BookmarkChange::Inserted(row.clone()));
        }
        Ok(row)
    }

    async fn delete(&self, id: &str) -> Result<(), Error> {
        self.wait_for_writes().await;
        self.deleted.lock().unwrap().push(id.to_string());
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(Error::database("delete rejected"));
        }
        self.rows.lock().unwrap().retain(|b| b.id != id);
        if self.echo_writes.load(Ordering::SeqCst) {
            self.push(BookmarkChange::Deleted {
                id: id.to_string(),
                user_id: None,
            });
        }
        Ok(())
    }

    async fn subscribe(&self) -> Result<ChangeFeed, Error> {
        let mut open = self.subscribe_open.subscribe();
        let _ = open.wait_for(|open| *open).await;
        let (tx, rx) = mpsc::unbounded_channel();
        self.feeds.lock().unwrap().push(tx);
        self.subscribes_done.fetch_add(1, Ordering::SeqCst);
        Ok(ChangeFeed::new(rx))
    }
}

/// Records every navigation
#[derive(Default)]
pub struct RecordingNavigator {
    routes: Mutex<Vec<Route>>,
}

impl RecordingNavigator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn routes(&self) -> Vec<Route> {
        self.routes.lock().unwrap().clone()
    }
}

impl Navigator for RecordingNavigator {
    fn navigate(&self, route: Route) {
        self.routes.lock().unwrap().push(route);
    }
}

/// Wait until the view satisfies `predicate`, failing the test after a second
pub async fn wait_for_view<F>(view: &mut watch::Receiver<DashboardView>, predicate: F) -> DashboardView
where
    F: FnMut(&DashboardView) -> bool,
{
    let result = tokio::time::timeout(Duration::from_secs(1), async {
        match view.wait_for(predicate).await {
            Ok(current) => Some(current.clone()),
            Err(_) => None,
        }
    })
    .await;
    match result {
        Ok(Some(current)) => current,
        Ok(None) => panic!("dashboard stopped"),
        Err(_) => panic!("timed out waiting for view, last: {:?}", *view.borrow()),
    }
}

/// Wait until `condition` holds, polling every millisecond for up to a second
pub async fn eventually<F: FnMut() -> bool>(mut condition: F) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached");
}
