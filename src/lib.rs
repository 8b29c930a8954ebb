//! # Treeline
//!
//! A versioned snapshot engine for project file trees.
//!
//! Every meaningful change to a project produces an immutable, numbered
//! snapshot. Most versions store only the delta against a baseline full
//! snapshot; the engine replays the chain to hand back any historical tree.
//!
//! ## Core Concepts
//!
//! - **Versions**: Append-only, 1-based, gap-free per project
//! - **Full vs differential**: Periodic full snapshots bound replay cost
//! - **Debounce**: Bursts of edits coalesce into one version per project
//! - **Identity**: Aliased project ids resolve to one canonical history
//!
//! ## Example
//!
//! ```ignore
//! use treeline::{ChangeType, EngineConfig, NullDirectory, SnapshotEngine, Version};
//! use std::sync::Arc;
//!
//! let engine = SnapshotEngine::open_or_create(
//!     EngineConfig { path: "./history".into(), ..Default::default() },
//!     Arc::new(NullDirectory),
//! )?;
//!
//! // Fire-and-forget, debounced.
//! engine.notify_change("project-1", files, ChangeType::UserEdit, None);
//!
//! // Immediate capture, then a historical read.
//! engine.capture_now("project-1", files, ChangeType::Upload).await?;
//! let tree = engine.reconstruct_full_snapshot("project-1", Version(1)).await?;
//! ```

pub mod diff;
pub mod engine;
pub mod error;
pub mod identity;
pub mod policy;
pub mod reconstruct;
pub mod store;
pub mod trigger;
pub mod types;

// Re-exports
pub use diff::{diff, ChangeKind, FileChange};
pub use engine::{EngineConfig, SnapshotEngine};
pub use error::{Result, SnapshotError};
pub use identity::{IdentityResolver, NullDirectory, ProjectDirectory, ProjectRecord};
pub use policy::SnapshotPolicy;
pub use reconstruct::reconstruct;
pub use store::SnapshotStore;
pub use trigger::ProjectScheduler;
pub use types::*;
