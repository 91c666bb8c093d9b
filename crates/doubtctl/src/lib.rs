//! doubtctl - command line client for the doubt solver daemon

pub mod api_client;
pub mod commands;

/// Daemon address used when neither --server nor DOUBT_SERVER is given
pub const DEFAULT_SERVER: &str = "http://127.0.0.1:7870";
