//! The bookmark dashboard.
//!
//! All screen state lives in one task. Remote calls run on their own tasks and
//! report back through a completion channel tagged with the generation they were
//! started for; a user switch bumps the generation so stale results are dropped.
//! The auth subscription and the change feed are owned by that task, so ending it
//! (unmount, drop, sign out) releases both.

use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::auth::{AuthChangeEvent, AuthSubscription, User};
use crate::backend::{BookmarkStore, ChangeFeed, Identity};
use crate::bookmarks::{Bookmark, BookmarkChange, BookmarkList, ListEvent, NewBookmark};
use crate::error::Error;
use crate::navigation::{Navigator, Route};
use crate::screens::view::DashboardView;

#[derive(Debug)]
enum Command {
    SetTitle(String),
    SetUrl(String),
    Submit,
    Delete(String),
    Logout,
    DismissNotice,
}

enum Completion {
    Loaded {
        generation: u64,
        result: Result<Vec<Bookmark>, Error>,
    },
    Subscribed {
        generation: u64,
        result: Result<ChangeFeed, Error>,
    },
    Created {
        generation: u64,
        result: Result<Bookmark, Error>,
    },
    Deleted {
        generation: u64,
        id: String,
        result: Result<(), Error>,
    },
    SignedOut(Result<(), Error>),
}

/// Entry point of the dashboard screen
pub struct Dashboard;

impl Dashboard {
    /// Mount the dashboard for the current user.
    ///
    /// Without a signed in user this navigates home and returns `None`.
    pub async fn mount(
        identity: Arc<dyn Identity>,
        store: Arc<dyn BookmarkStore>,
        navigator: Arc<dyn Navigator>,
    ) -> Option<DashboardHandle> {
        let auth = identity.on_auth_state_change();

        let user = match identity.get_user().await {
            Ok(Some(user)) => user,
            Ok(None) => {
                info!("No user signed in, leaving dashboard");
                navigator.navigate(Route::Home);
                return None;
            }
            Err(e) => {
                warn!("Could not look up user: {}", e);
                navigator.navigate(Route::Home);
                return None;
            }
        };

        let (view_tx, view_rx) = watch::channel(DashboardView {
            email: user.email.clone(),
            loading: true,
            ..Default::default()
        });
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = mpsc::unbounded_channel();

        let screen = Screen {
            identity,
            store,
            navigator,
            list: BookmarkList::new(&user.id),
            user,
            generation: 0,
            title: String::new(),
            url: String::new(),
            notice: None,
            loading: true,
            signing_out: false,
            feed: None,
            view: view_tx,
            done: done_tx,
        };
        let task = tokio::spawn(screen.run(commands_rx, auth, done_rx));

        Some(DashboardHandle {
            commands: commands_tx,
            view: view_rx,
            task: Some(task),
        })
    }
}

/// A mounted dashboard.
///
/// Dropping the handle unmounts the screen.
pub struct DashboardHandle {
    commands: mpsc::UnboundedSender<Command>,
    view: watch::Receiver<DashboardView>,
    task: Option<JoinHandle<()>>,
}

impl DashboardHandle {
    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("Dashboard is gone, command dropped");
        }
    }

    pub fn set_title(&self, title: &str) {
        self.send(Command::SetTitle(title.to_string()));
    }

    pub fn set_url(&self, url: &str) {
        self.send(Command::SetUrl(url.to_string()));
    }

    /// Save the bookmark currently in the form
    pub fn submit(&self) {
        self.send(Command::Submit);
    }

    /// Fill in the form and save it
    pub fn submit_bookmark(&self, title: &str, url: &str) {
        self.set_title(title);
        self.set_url(url);
        self.submit();
    }

    pub fn delete(&self, id: &str) {
        self.send(Command::Delete(id.to_string()));
    }

    pub fn logout(&self) {
        self.send(Command::Logout);
    }

    pub fn dismiss_notice(&self) {
        self.send(Command::DismissNotice);
    }

    /// Watch the rendered state
    pub fn view(&self) -> watch::Receiver<DashboardView> {
        self.view.clone()
    }

    pub fn current(&self) -> DashboardView {
        self.view.borrow().clone()
    }

    /// Whether the screen is still running. It stops by itself on sign out.
    pub fn is_active(&self) -> bool {
        self.task.as_ref().map_or(false, |task| !task.is_finished())
    }

    /// Stop the screen and wait until its subscriptions are released
    pub async fn unmount(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
    }
}

impl Drop for DashboardHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

enum Flow {
    Continue,
    Exit,
}

struct Screen {
    identity: Arc<dyn Identity>,
    store: Arc<dyn BookmarkStore>,
    navigator: Arc<dyn Navigator>,
    user: User,
    generation: u64,
    list: BookmarkList,
    title: String,
    url: String,
    notice: Option<String>,
    loading: bool,
    signing_out: bool,
    feed: Option<ChangeFeed>,
    view: watch::Sender<DashboardView>,
    done: mpsc::UnboundedSender<Completion>,
}

/// Next change of an optional feed; pending forever without one
async fn next_change(feed: &mut Option<ChangeFeed>) -> Option<BookmarkChange> {
    match feed {
        Some(feed) => feed.recv().await,
        None => std::future::pending().await,
    }
}

impl Screen {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut auth: AuthSubscription,
        mut done: mpsc::UnboundedReceiver<Completion>,
    ) {
        let mut auth_open = true;
        self.start();

        loop {
            let flow = tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => Flow::Exit,
                },
                event = auth.recv(), if auth_open => match event {
                    Some(event) => self.on_auth_event(event),
                    None => {
                        debug!("Auth notifications closed");
                        auth_open = false;
                        Flow::Continue
                    }
                },
                change = next_change(&mut self.feed) => {
                    match change {
                        Some(change) => self.apply(ListEvent::from(change)),
                        None => {
                            self.feed = None;
                            self.notify("Live updates unavailable", Error::realtime("change feed closed"));
                            self.publish();
                        }
                    }
                    Flow::Continue
                },
                Some(completion) = done.recv() => self.on_completion(completion),
            };
            if let Flow::Exit = flow {
                break;
            }
        }
        debug!("Dashboard for {} stopped", self.user.id);
    }

    /// Fetch and subscribe for the current user
    fn start(&mut self) {
        self.generation += 1;
        let generation = self.generation;

        let store = self.store.clone();
        let done = self.done.clone();
        let user_id = self.user.id.clone();
        tokio::spawn(async move {
            let result = store.list(&user_id).await;
            let _ = done.send(Completion::Loaded { generation, result });
        });

        let store = self.store.clone();
        let done = self.done.clone();
        tokio::spawn(async move {
            let result = store.subscribe().await;
            let _ = done.send(Completion::Subscribed { generation, result });
        });
    }

    fn switch_user(&mut self, user: User) {
        info!("Signed in user changed from {} to {}", self.user.id, user.id);
        self.feed = None;
        self.list = BookmarkList::new(&user.id);
        self.user = user;
        self.title.clear();
        self.url.clear();
        self.notice = None;
        self.loading = true;
        self.start();
        self.publish();
    }

    fn on_command(&mut self, command: Command) -> Flow {
        match command {
            Command::SetTitle(title) => self.title = title,
            Command::SetUrl(url) => self.url = url,
            Command::Submit => self.submit(),
            Command::Delete(id) => self.delete(id),
            Command::Logout => self.logout(),
            Command::DismissNotice => self.notice = None,
        }
        self.publish();
        Flow::Continue
    }

    fn submit(&mut self) {
        if self.title.is_empty() || self.url.is_empty() {
            return;
        }
        let bookmark = NewBookmark {
            title: std::mem::take(&mut self.title),
            url: std::mem::take(&mut self.url),
            user_id: self.user.id.clone(),
        };

        let generation = self.generation;
        let store = self.store.clone();
        let done = self.done.clone();
        tokio::spawn(async move {
            let result = store.insert(bookmark).await;
            let _ = done.send(Completion::Created { generation, result });
        });
    }

    fn delete(&mut self, id: String) {
        let generation = self.generation;
        let store = self.store.clone();
        let done = self.done.clone();
        tokio::spawn(async move {
            let result = store.delete(&id).await;
            let _ = done.send(Completion::Deleted { generation, id, result });
        });
    }

    fn logout(&mut self) {
        if self.signing_out {
            return;
        }
        self.signing_out = true;
        let identity = self.identity.clone();
        let done = self.done.clone();
        tokio::spawn(async move {
            let result = identity.sign_out().await;
            let _ = done.send(Completion::SignedOut(result));
        });
    }

    fn on_auth_event(&mut self, event: AuthChangeEvent) -> Flow {
        match event {
            // Our own logout navigates once its result is in
            AuthChangeEvent::SignedOut if self.signing_out => Flow::Continue,
            AuthChangeEvent::SignedOut => {
                info!("Signed out, leaving dashboard");
                self.navigator.navigate(Route::Home);
                Flow::Exit
            }
            AuthChangeEvent::SignedIn(user) if user.id != self.user.id => {
                self.switch_user(user);
                Flow::Continue
            }
            AuthChangeEvent::SignedIn(_) | AuthChangeEvent::TokenRefreshed(_) => Flow::Continue,
        }
    }

    fn on_completion(&mut self, completion: Completion) -> Flow {
        match completion {
            Completion::Loaded { generation, .. }
            | Completion::Subscribed { generation, .. }
            | Completion::Created { generation, .. }
            | Completion::Deleted { generation, .. }
                if generation != self.generation =>
            {
                debug!("Dropping result for a previous user");
            }
            Completion::Loaded { result, .. } => {
                self.loading = false;
                match result {
                    Ok(rows) => {
                        debug!("Loaded {} bookmarks", rows.len());
                        self.list.apply(ListEvent::Loaded(rows));
                    }
                    Err(e) => self.notify("Could not load bookmarks", e),
                }
            }
            Completion::Subscribed { result, .. } => match result {
                Ok(feed) => self.feed = Some(feed),
                Err(e) => self.notify("Live updates unavailable", e),
            },
            Completion::Created { result, .. } => match result {
                Ok(bookmark) => {
                    self.list.apply(ListEvent::Inserted(bookmark));
                }
                Err(e) => self.notify("Could not save bookmark", e),
            },
            Completion::Deleted { id, result, .. } => match result {
                Ok(()) => {
                    self.list.apply(ListEvent::Removed { id, user_id: None });
                }
                Err(e) => self.notify("Could not delete bookmark", e),
            },
            Completion::SignedOut(result) => {
                if let Err(e) = result {
                    self.notify("Sign out failed", e);
                    self.publish();
                }
                self.navigator.navigate(Route::Home);
                return Flow::Exit;
            }
        }
        self.publish();
        Flow::Continue
    }

    fn apply(&mut self, event: ListEvent) {
        if self.list.apply(event) {
            self.publish();
        }
    }

    fn notify(&mut self, what: &str, e: Error) {
        warn!("{}: {}", what, e);
        self.notice = Some(format!("{}: {}", what, e));
    }

    fn render(&self) -> DashboardView {
        DashboardView {
            email: self.user.email.clone(),
            title: self.title.clone(),
            url: self.url.clone(),
            bookmarks: self.list.items().to_vec(),
            notice: self.notice.clone(),
            loading: self.loading,
            live: self.feed.is_some(),
        }
    }

    fn publish(&self) {
        let view = self.render();
        self.view.send_if_modified(|current| {
            if *current == view {
                return false;
            }
            *current = view;
            true
        });
    }
}
