//! Stock operations
//!
//! Each builder reads whatever facts it needs from the host and returns an
//! [`Operation`](crate::operation::Operation) whose command list is empty
//! when the host already matches.

pub mod docker;
pub mod files;
pub mod server;
