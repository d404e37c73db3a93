//! cumulus_index - hierarchical spatial indexing for massive point clouds.
//!
//! Unordered input files are ingested in parallel and every point is routed
//! into a node of an implicit octree/quadtree. Shallow depths live in one
//! permanently-resident base chunk; deeper depths page through sparse cold
//! chunks that serialize to a keyed blob store when their last worker
//! reference drops. The output is a self-describing tree (metadata plus
//! chunked point data) suitable for progressive LOD streaming.
//!
//! # Example
//!
//! ```ignore
//! use cumulus_index::{Builder, BuilderOptions};
//!
//! let builder = Builder::create(BuilderOptions { /* ... */ })?;
//! for path in inputs {
//!     builder.insert(&path)?;
//! }
//! builder.save()?;
//! ```

pub mod bounds;
pub mod builder;
pub mod chunk;
pub mod climber;
pub mod clipper;
pub mod endpoint;
pub mod manifest;
pub mod meta;
pub mod point;
pub mod pool;
pub mod reader;
pub mod registry;
pub mod schema;
pub mod stats;
pub mod structure;
pub mod threading;

#[cfg(test)]
pub(crate) mod testutil;

// Re-export the build surface.
pub use bounds::{Bounds, Range};
pub use builder::{merge, Builder, BuilderOptions};
pub use chunk::{BaseChunk, SparseChunk};
pub use climber::Climber;
pub use clipper::Clipper;
pub use endpoint::{DirectoryEndpoint, Endpoint, LocalHandle};
pub use manifest::{FileInfo, FileStatus, Manifest};
pub use meta::{MetaDoc, META_KEY};
pub use point::PointInfo;
pub use pool::PointPool;
pub use reader::{PointBatch, PointReader, Preview, Reprojection};
pub use registry::Registry;
pub use schema::{DimInfo, DimKind, Schema};
pub use stats::{Stats, StatsSnapshot};
pub use structure::{Structure, StructureConfig, Subset};
pub use threading::TaskPool;
