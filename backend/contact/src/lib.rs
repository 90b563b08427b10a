//! # Contact
//!
//! Wire types shared by the server and the admin CLI.
//!
//! ## Submission Lifecycle
//!
//! - Public contact form creates a submission with status `new`
//! - Admin marks it `read`, `replied` or `archived`, optionally sets a priority (1-5) and tags
//! - Only an explicit admin delete removes it
//!
//! ## Payloads
//!
//! All JSON is camelCase. Callable functions answer with [`CallableResponse`] on success
//! and [`ErrorBody`] on failure.
pub mod forms;
pub mod query;
pub mod responses;
pub mod submission;

pub use forms::{ContactForm, FeedbackForm, FieldError};
pub use query::{ListQuery, Page, SortField, SortOrder};
pub use responses::{
    BulkStatusRequest, CallableResponse, ErrorBody, ErrorCode, ProjectViews, QueueStats,
    SessionRequest, StatusCounts,
};
pub use submission::{Priority, Submission, SubmissionPatch, SubmissionStatus};
