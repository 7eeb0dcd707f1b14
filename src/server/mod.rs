//! Server side: acceptor, connection pool, worker dispatch and routing.

pub mod conn;
pub mod pool;
pub mod router;
#[allow(clippy::module_inception)]
pub mod server;

pub use router::{Router, UrlArgs, View};
pub use server::Server;
