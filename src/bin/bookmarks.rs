use dotenv::dotenv;
use log::{error, info};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use supabookmarks::prelude::*;

const USAGE: &str = "commands: add <title> <url> | rm <id> | dismiss | logout | quit";

/// Returns false when the user asked to quit
fn dispatch(dashboard: &DashboardHandle, line: &str) -> bool {
    let line = line.trim();
    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    match command {
        "add" => match rest.trim().rsplit_once(' ') {
            Some((title, url)) => dashboard.submit_bookmark(title.trim(), url),
            None => println!("usage: add <title> <url>"),
        },
        "rm" if !rest.trim().is_empty() => dashboard.delete(rest.trim()),
        "dismiss" => dashboard.dismiss_notice(),
        "logout" => dashboard.logout(),
        "quit" | "exit" => return false,
        "" => {}
        _ => println!("{}", USAGE),
    }
    true
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    pretty_env_logger::init();

    let config = AppConfig::from_env()?;
    let supabase = Arc::new(Supabase::from_config(&config));
    let auth = supabase.auth_handle();

    // A callback URL from the identity provider, or password login from the environment
    if let Some(callback_url) = std::env::args().nth(1) {
        if let Err(e) = auth.get_session_from_url(&callback_url).await {
            error!("Could not read session from callback URL: {}", e);
        }
    } else if let (Ok(email), Ok(password)) = (
        std::env::var("BOOKMARKS_EMAIL"),
        std::env::var("BOOKMARKS_PASSWORD"),
    ) {
        if let Err(e) = auth.sign_in_with_password(&email, &password).await {
            error!("Sign in failed: {}", e);
        }
    } else {
        println!(
            "Log in at {} and pass the URL you are redirected to as the first argument",
            auth.get_oauth_sign_in_url(supabookmarks::auth::OAuthProvider::Github, None)
        );
    }

    let (routes_tx, mut routes) = mpsc::unbounded_channel();
    let navigator: Arc<dyn Navigator> = Arc::new(move |route: Route| {
        let _ = routes_tx.send(route);
    });

    let callback = AuthCallback::new(auth.clone(), navigator.clone(), config.redirect_delay);
    let mut callback_state = callback.state();
    println!("{}", *callback_state.borrow_and_update());
    let printer = tokio::spawn(async move {
        while callback_state.changed().await.is_ok() {
            println!("{}", *callback_state.borrow_and_update());
        }
    });
    let route = callback.run().await;
    printer.abort();
    if route == Route::Home {
        return Ok(());
    }

    let store: Arc<dyn BookmarkStore> = Arc::new(SupabaseBookmarks::new(supabase.clone(), &config.table));
    let dashboard = match Dashboard::mount(auth.clone(), store, navigator).await {
        Some(dashboard) => dashboard,
        None => {
            println!("Not signed in");
            return Ok(());
        }
    };

    println!("{}", USAGE);
    let mut view = dashboard.view();
    println!("{}", *view.borrow_and_update());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            changed = view.changed() => {
                if changed.is_err() {
                    break;
                }
                println!("{}", *view.borrow_and_update());
            }
            line = lines.next_line() => match line? {
                Some(line) => {
                    if !dispatch(&dashboard, &line) {
                        break;
                    }
                }
                None => break,
            },
            Some(route) = routes.recv() => {
                info!("Navigated to {}", route);
                if route == Route::Home {
                    break;
                }
            }
        }
    }

    dashboard.unmount().await;
    supabase.realtime().disconnect().await;
    Ok(())
}
