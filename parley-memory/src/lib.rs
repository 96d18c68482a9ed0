//! Parley Memory - Conversation history for the Parley relay.
//!
//! Each conversation keeps an ordered log of [`HistoryItem`]s that is trimmed,
//! oldest first, to fit a model's token budget. A [`HistoryBackend`] can
//! persist the log so it survives restarts.
//!
//! ```text
//! append ─→ in-memory deque ─→ TokenCounter ─→ trim oldest ─┐
//!      └──→ HistoryBackend::insert        HistoryBackend::delete ←┘
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod history;
pub mod item;
pub mod sqlite;
pub mod traits;

pub use history::HistoryStore;
pub use item::HistoryItem;
pub use sqlite::SqliteHistory;
pub use traits::{EstimatingCounter, HistoryBackend, TokenCounter};
