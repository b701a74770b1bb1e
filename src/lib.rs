//! # VecStore
//!
//! Embeddable vector database engine with durable writes and crash recovery.
//!
//! VecStore stores records that pair a fixed-dimension embedding with scalar
//! attributes, serves nearest-neighbor search with optional attribute
//! filtering, and recovers its in-memory indexes after a crash from a
//! snapshot plus a write-ahead log tail.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use vecstore::{Config, FilterSpec, IndexFamily, Record, VectorDb};
//!
//! // Open or create a database directory
//! let mut db = VectorDb::open("./vecstore", Config::with_dimension(128))?;
//!
//! // Insert or replace a record
//! db.upsert(
//!     Record::new(42, embedding).with_attr("tag", 5i64),
//!     IndexFamily::Hnsw,
//! )?;
//!
//! // Filtered nearest-neighbor search
//! let hits = db.search(
//!     &query,
//!     10,
//!     IndexFamily::Hnsw,
//!     Some(&FilterSpec::equal("tag", 5)),
//! )?;
//!
//! // Persist indexes and advance the recovery watermark
//! db.take_snapshot()?;
//! ```
//!
//! ## Key Concepts
//!
//! ### Index family
//!
//! Every database hosts two independent **index families**: `FLAT` (exact
//! brute-force scan) and `HNSW` (approximate graph search). Each family
//! owns its own ANN index and filter index; a record lives only in the
//! family it was upserted into.
//!
//! ### Write path
//!
//! Every upsert is appended to the write-ahead log and flushed before any
//! store is touched. The indexes and the scalar store are then updated in
//! a fixed order. Recovery replays the WAL tail through the same code
//! path, which is idempotent over a crash-interrupted prior attempt.
//!
//! ### Snapshot watermark
//!
//! [`VectorDb::take_snapshot`] persists every family's indexes and records
//! the next log id as the watermark; replay after reopen skips everything
//! at or below it. The scalar store is transactional on its own and is
//! never part of the snapshot.
//!
//! ## Thread Safety
//!
//! Mutation and snapshotting take `&mut self`, so a handle behaves as a
//! single-writer engine; wrap it in a reader/writer lock to share across
//! threads.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_op_in_unsafe_fn)]

mod config;
mod db;
mod error;
mod types;

/// ANN index adapters and the contract they implement.
pub mod ann;
/// Bitmap filter index over integer attributes.
pub mod filter;
/// Per-family index registry.
pub mod registry;
/// Scalar record storage.
pub mod scalar;
/// Write-ahead log and snapshot watermark.
pub mod wal;

// Main database interface
pub use db::{VectorDb, OP_UPSERT};

// Configuration
pub use config::{Config, HnswConfig, Metric};

// Error handling
pub use error::{Result, StorageError, ValidationError, VecStoreError};

// Core types
pub use types::{IndexFamily, Record, RecordId, ScalarValue, SearchHits, ID_FIELD};

// Search and filtering
pub use ann::{AnnIndex, SENTINEL_DISTANCE, SENTINEL_ID};
pub use filter::{FilterIndex, FilterOp, FilterSpec};

/// Convenience re-exports for embedding applications.
pub mod prelude {
    pub use crate::{
        Config, FilterOp, FilterSpec, IndexFamily, Record, RecordId, Result, ScalarValue,
        SearchHits, VecStoreError, VectorDb,
    };
}
