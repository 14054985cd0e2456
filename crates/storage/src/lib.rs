//! File-backed cache of published forecast snapshots.
//!
//! Provides:
//! - A compact, checksummed binary codec for scored hours and climatology frames
//! - Per-cycle manifests
//! - Staging directories with atomic publication and retention
//!
//! Readers only ever see complete snapshots: a cycle is written under
//! `staging/`, renamed into `cycles/` and then swapped into the current
//! pointer for its horizon.

pub mod codec;
pub mod error;
pub mod fsutil;
pub mod manifest;
pub mod store;

pub use codec::{FrameKind, PayloadReader};
pub use error::{Result, StorageError};
pub use manifest::{Manifest, MANIFEST_FILE};
pub use store::{CacheConfig, CacheStore, CleanReport, CycleWriter, InFlightGuard, Snapshot};
