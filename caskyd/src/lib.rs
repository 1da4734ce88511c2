//! `caskyd` serves the casky storage engine over a line-oriented TCP
//! protocol. The protocol and server loop are library code so they can be
//! driven directly from tests; `main.rs` is just the CLI/logging/signal
//! glue around [`server::serve`].

pub mod config;
pub mod server;
pub mod signal;
pub mod trace;
