//! Common utilities shared by the transport adapters.

pub mod poll;

// Re-export common helpers for easier access
pub use poll::poll_until;
