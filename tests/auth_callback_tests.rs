mod common;

use std::time::Duration;
use tokio::task::yield_now;
use tokio::time::Instant;

use common::{MemoryBackend, RecordingNavigator};
use supabookmarks::navigation::Route;
use supabookmarks::screens::{AuthCallback, CallbackState, AUTH_FAILED_MESSAGE};

const DELAY: Duration = Duration::from_millis(3000);

#[tokio::test(start_paused = true)]
async fn test_session_navigates_to_dashboard_once() {
    let backend = MemoryBackend::signed_in("u1");
    let navigator = RecordingNavigator::new();
    let screen = AuthCallback::new(backend.clone(), navigator.clone(), DELAY);
    let state = screen.state();
    let started = Instant::now();

    let route = screen.run().await;

    assert_eq!(route, Route::Dashboard);
    assert_eq!(navigator.routes(), vec![Route::Dashboard]);
    assert_eq!(*state.borrow(), CallbackState::Authenticating);
    assert!(started.elapsed() < DELAY);
}

#[tokio::test(start_paused = true)]
async fn test_session_error_shows_message_then_redirects_after_delay() {
    let backend = MemoryBackend::new();
    backend.fail_session();
    let navigator = RecordingNavigator::new();
    let screen = AuthCallback::new(backend.clone(), navigator.clone(), DELAY);
    let state = screen.state();

    let run = tokio::spawn(async move { screen.run().await });

    // The message shows up before any time passes
    while *state.borrow() == CallbackState::Authenticating {
        yield_now().await;
    }
    assert_eq!(*state.borrow(), CallbackState::Failed(AUTH_FAILED_MESSAGE.to_string()));
    assert!(navigator.routes().is_empty());

    tokio::time::advance(Duration::from_millis(2999)).await;
    yield_now().await;
    assert!(navigator.routes().is_empty());

    tokio::time::advance(Duration::from_millis(1)).await;
    assert_eq!(run.await.unwrap(), Route::Home);
    assert_eq!(navigator.routes(), vec![Route::Home]);
}

#[tokio::test(start_paused = true)]
async fn test_missing_session_is_a_failure() {
    let backend = MemoryBackend::new();
    let navigator = RecordingNavigator::new();
    let screen = AuthCallback::new(backend.clone(), navigator.clone(), DELAY);
    let state = screen.state();
    let started = Instant::now();

    assert_eq!(screen.run().await, Route::Home);

    assert!(started.elapsed() >= DELAY);
    assert_eq!(navigator.routes(), vec![Route::Home]);
    assert_eq!(state.borrow().to_string(), format!("{}\nRedirecting you back to login...", AUTH_FAILED_MESSAGE));
}

#[tokio::test(start_paused = true)]
async fn test_redirect_delay_is_configurable() {
    let backend = MemoryBackend::new();
    backend.fail_session();
    let navigator = RecordingNavigator::new();
    let screen = AuthCallback::new(backend.clone(), navigator.clone(), Duration::from_millis(500));
    let started = Instant::now();

    screen.run().await;

    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(500) && elapsed < DELAY);
    assert_eq!(navigator.routes(), vec![Route::Home]);
}
