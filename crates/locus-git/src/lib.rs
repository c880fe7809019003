//! Repository acquisition and version-control facts.
//!
//! - [`acquire`]: clone or refresh a remote repository, or open a local one
//! - [`preflight`]: ask the GitHub API about visibility and size before cloning
//! - [`history`]: per-file author, commit and date facts mined with git2

pub mod acquire;
pub mod history;
pub mod preflight;

pub use acquire::{acquire, AcquireOptions, AcquiredRepo};
pub use history::HistoryIndex;
pub use preflight::{preflight, RepoInfo};
