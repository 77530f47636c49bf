//! Connection front-end for a streaming media server: accept loop,
//! admission control, optional TLS, Shoutcast-legacy translation, and
//! request assembly up to the handoff into a worker pool.

pub mod accept;
pub mod auth;
pub mod client;
pub mod config;
pub mod conn;
pub mod dispatch;
pub mod error;
pub mod filter;
pub mod handlers;
pub mod parser;
pub mod request_assembly;
pub mod server;
pub mod shoutcast;
pub mod worker;

pub use config::{Config, ConfigStore};
pub use error::CoreError;
pub use server::Server;
