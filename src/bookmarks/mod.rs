//! Bookmark rows and the reconciled in-memory list

mod list;
mod model;

pub use list::{BookmarkList, ListEvent};
pub use model::{Bookmark, BookmarkChange, NewBookmark};
