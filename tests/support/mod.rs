//! Helpers shared by integration tests.

pub mod socket_guard;
