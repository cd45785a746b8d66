//! nexq_transport
//!
//! The TCP face of the broker: an accept loop that speaks the framed
//! command protocol, one session per connection, translating decoded
//! commands into engine operations.

pub mod server;

pub use server::{run, start_server};
