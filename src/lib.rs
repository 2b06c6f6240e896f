//! Concurrent persistence engine for per-user vault records.
//!
//! This crate keeps a hot in-memory working copy of each owner's durable
//! record and reconciles it with a pluggable storage backend using:
//! - **Moka** for the live cache with automatic idle expiry
//! - **A per-owner lock table** so loads and saves never interleave on
//!   one record
//! - **A pure resize engine** that splits records into accessible and
//!   overflow portions when capacity shrinks and merges overflow back
//!   when it grows
//!
//! # Features
//!
//! - Non-blocking per-owner mutual exclusion (busy means "retry", never
//!   a stall)
//! - Join-load with degrade-to-empty failure handling
//! - Quit-save with a bounded timeout, invalidate-before-save
//! - Periodic auto-save that skips busy owners and keeps entries warm
//! - Shutdown drain bounded by one overall timeout
//! - Write-back migration of legacy-format records off the read path
//!
//! # Example
//!
//! ```rust,no_run
//! use satchel::{Coordinator, EngineConfig, MemoryBackend};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::new()
//!         .with_quit_save_timeout(std::time::Duration::from_secs(10));
//!
//!     let backend = Arc::new(MemoryBackend::new(config.max_slots));
//!     let (engine, mut events) = Coordinator::new(config, backend)?;
//!     engine.start();
//!
//!     let owner = uuid::Uuid::new_v4();
//!     engine.handle_join(owner, "alice", 27).await?;
//!
//!     if let Some(vault) = engine.loaded_vault(owner).await {
//!         println!("{} slots ready", vault.capacity());
//!     }
//!
//!     // Render engine events however the host application likes.
//!     if let Ok(event) = events.try_recv() {
//!         println!("engine event: {event:?}");
//!     }
//!
//!     engine.handle_quit(owner).await?;
//!     engine.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │            Host Application                  │
//! └─────────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────────┐
//! │               Coordinator                    │
//! │  • handle_join / handle_quit                 │
//! │  • open / commit / sync_capacity             │
//! │  • auto_save_all / shutdown                  │
//! └─────────────────────────────────────────────┘
//!        │            │              │
//!        ▼            ▼              ▼
//! ┌───────────┐ ┌───────────┐ ┌──────────────┐
//! │ LockTable │ │ LiveCache │ │StorageBackend│
//! │ per-owner │ │   (moka)  │ │  (pluggable) │
//! └───────────┘ └───────────┘ └──────────────┘
//! ```
//!
//! # Consistency model
//!
//! - **Per owner**: operations that take the token are linearized by
//!   acquisition order; last writer wins.
//! - **Across owners**: fully concurrent, no ordering guarantee.
//! - **Failure policy**: load trouble degrades to an empty record with a
//!   loud warning; save trouble is absorbed and retried by the next
//!   auto-save sweep or the shutdown drain.

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod lock;
pub mod metrics;
pub mod resize;
pub mod storage;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export main types for convenience
pub use cache::LiveCache;
pub use config::EngineConfig;
pub use coordinator::Coordinator;
pub use error::{Error, Result, StorageError};
pub use events::VaultEvent;
pub use lock::{LockGuard, LockTable};
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use resize::{expected_display_size, merge_overflow, resize, ResizeOutcome};
pub use storage::{FormatTag, LoadOutcome, MemoryBackend, StorageBackend};
pub use types::{Item, OwnerId, Vault, VaultEntry};
