//! Rule-driven bookmark filing.
//!
//! Pages are matched against user-configured entries (a regex plus
//! required query parameters), grouped into areas that carry a folder
//! prefix. A matching entry names the folders a page may be bookmarked
//! under; the engine finds or creates them, applies post-processing to the
//! bookmark URL and title, and derives the toolbar indicator state.

pub mod and_then;
pub mod bookmarks;
pub mod canonical;
pub mod config;
pub mod error;
pub mod folders;
pub mod parameters;
pub mod protocol;
pub mod rules;
pub mod state;
pub mod store;
pub mod tabs;
pub mod validator;

pub use bookmarks::Bookmarker;
pub use config::{FileOptions, MemoryOptions, Options, OptionsSource};
pub use error::{BookmarkerError, Result};
pub use rules::{CompiledEntry, EntryKey, EntryPath, RuleSet};
pub use state::{IconState, StateAndTitle};
pub use store::{BookmarkStore, MemoryStore};
