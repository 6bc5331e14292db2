//! Data models for vault-sync

pub mod commit;
pub mod conflict;
pub mod patterns;
pub mod pointer;
pub mod status;

pub use commit::*;
pub use conflict::*;
pub use patterns::TrackedPatterns;
pub use pointer::Pointer;
pub use status::*;
