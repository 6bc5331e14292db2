//! Service layer for vault-sync
//!
//! Services build on the object store and the history graph: a
//! filesystem view over store keys, large-file offload, history
//! mirroring, and the sync orchestrator on top of them.

pub mod busy;
pub mod lfs_service;
pub mod mirror_service;
pub mod remote_fs;
pub mod sync_service;

pub use busy::BusyGuard;
pub use lfs_service::LfsService;
pub use mirror_service::MirrorService;
pub use remote_fs::{EntryKind, RemoteFs, RemoteStat};
pub use sync_service::{
    ConflictResolver, ConnectOutcome, Continuation, PendingMerge, Reporter, SyncOutcome,
    SyncService,
};
