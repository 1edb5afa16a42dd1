//! Request and response bodies of the HTTP API

mod messages;

pub use messages::*;
