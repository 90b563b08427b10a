//! # Folio Admin
//!
//! Command line dashboard for the portfolio backend.
//!
//! ## Flow
//!
//! 1. `folio-admin login <api-key>` trades the key for a session cookie.
//! 2. The cookie is kept in the local state file and sent with every admin call.
//! 3. `logout` revokes it server side and forgets it locally.
//!
//! ## Contact Drafts
//!
//! `folio-admin contact` submits through the public endpoint. When validation or the request fails,
//! the form is kept as a draft in the same state file and `--resume` picks it back up.
//! Drafts expire after a day.
//!
//! ## Export
//!
//! Pages through every submission at the maximum page size and writes one JSON array.

pub mod client;
pub mod commands;
