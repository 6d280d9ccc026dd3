//! Server configuration and background tasks.
//!
//! The service layer owns everything that is neither storage nor transport:
//! the server-wide configuration and the periodic garbage-collection loop
//! that prunes expired affiliate records.

pub mod config;
pub mod gc;

pub use config::ServerConfig;
pub use gc::spawn_gc_loop;
