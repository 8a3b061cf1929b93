//! Command handling.
//!
//! ## Structure
//!
//! - [`dispatcher`] - maps a decoded [`Request`](segid_resp_core::Request) to
//!   registry, allocator and settings operations and produces the
//!   [`Reply`](segid_resp_core::Reply).
//! - [`error`] - per-command failures, each answered with an error reply.

pub mod dispatcher;
pub mod error;
