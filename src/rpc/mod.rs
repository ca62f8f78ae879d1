//! Inbound command handling.

pub mod router;

pub use router::CommandRouter;
