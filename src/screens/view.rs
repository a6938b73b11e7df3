use std::fmt;

use crate::bookmarks::Bookmark;

pub const TITLE_PLACEHOLDER: &str = "Title (e.g. My Portfolio)";
pub const URL_PLACEHOLDER: &str = "URL (https://...)";

/// Everything the dashboard shows
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DashboardView {
    pub email: Option<String>,
    /// Form field contents
    pub title: String,
    pub url: String,
    pub bookmarks: Vec<Bookmark>,
    /// Last failure worth telling the user about
    pub notice: Option<String>,
    /// Initial fetch still running
    pub loading: bool,
    /// Change feed is open
    pub live: bool,
}

impl DashboardView {
    pub fn ids(&self) -> Vec<&str> {
        self.bookmarks.iter().map(|b| b.id.as_str()).collect()
    }
}

fn field<'a>(value: &'a str, placeholder: &'a str) -> &'a str {
    if value.is_empty() {
        placeholder
    } else {
        value
    }
}

impl fmt::Display for DashboardView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Dashboard")?;
        writeln!(f, "{}  [Logout]", self.email.as_deref().unwrap_or(""))?;
        writeln!(f)?;
        writeln!(f, "Add New Link")?;
        writeln!(f, "  [{}]", field(&self.title, TITLE_PLACEHOLDER))?;
        writeln!(f, "  [{}]", field(&self.url, URL_PLACEHOLDER))?;
        writeln!(f, "  [Save Bookmark]")?;
        writeln!(f)?;

        if let Some(notice) = &self.notice {
            writeln!(f, "! {}", notice)?;
            writeln!(f)?;
        }

        if self.bookmarks.is_empty() {
            if self.loading {
                return writeln!(f, "Loading...");
            }
            writeln!(f, "No bookmarks saved yet.")?;
            return writeln!(f, "Start by adding a link above!");
        }

        for bookmark in &self.bookmarks {
            writeln!(f, "* {}  [Delete {}]", bookmark.title, bookmark.id)?;
            writeln!(f, "  {}", bookmark.url)?;
        }
        Ok(())
    }
}
