//! The two screens of the application

mod auth_callback;
mod dashboard;
mod view;

pub use auth_callback::{AuthCallback, CallbackState, AUTH_FAILED_MESSAGE};
pub use dashboard::{Dashboard, DashboardHandle};
pub use view::{DashboardView, TITLE_PLACEHOLDER, URL_PLACEHOLDER};
