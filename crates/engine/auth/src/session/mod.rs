//! Session bootstrap: markers, the session endpoint, the login controller
//! and forced logout.

pub mod backend;
pub mod controller;
pub mod markers;
pub mod reset;
