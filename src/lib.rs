//! # Folio Client
//!
//! Client-side pieces of the portfolio contact pipeline.
//!
//! ## Form Persistence
//!
//! In-progress form values survive restarts.
//! - Values are saved on a debounce timer, rapid edits coalesce into one write
//! - Every saved draft carries an expiry, stale drafts are discarded on restore
//! - Callers can ask whether leaving now would lose unsaved changes
//!
//! ### Stored Blob
//! ```json
//! { "data": { ... }, "savedAt": "2025-01-01T00:00:00Z", "expiresAt": "2025-01-02T00:00:00Z" }
//! ```
//!
//! ## Storage
//!
//! - [`MemoryStorage`]: process-local, for tests and short-lived tools
//! - [`FileStorage`]: one JSON object on disk, every write goes straight through
//!
//!
//!
//! ## Notes
//!
//! No eviction beyond expiry, and a single writer per storage file is assumed.

pub mod persist;
pub mod storage;

pub use persist::{FormPersistence, PersistOptions};
pub use storage::{DraftStorage, FileStorage, MemoryStorage, PersistError};
