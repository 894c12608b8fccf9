#![forbid(unsafe_code)]

//! Bronze/silver ingestion pipeline for transit API feeds.
//!
//! The workspace crates compose in layers: [`tl_client`] fetches raw JSON,
//! [`tl_transform`] flattens it into [`tl_frame`] tables, and [`tl_store`]
//! persists them into a Parquet-backed lake with insert-only merge. This
//! crate wires those layers into the two pipeline stages and the CLI.

pub mod config;
pub mod pipeline;

pub use tl_client as client;
pub use tl_columnar as columnar;
pub use tl_frame as frame;
pub use tl_store as store;
pub use tl_transform as transform;
pub use tl_types as types;
