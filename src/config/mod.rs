//! Application configuration
//!
//! Configuration is assembled once at startup from command line arguments
//! and is immutable afterwards.

mod schema;

pub use schema::*;
