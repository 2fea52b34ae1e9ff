//! promosync Engine - Load and Rebuild
//!
//! - [`IngestionLoader`]: streams an input file into the primary store
//!   through a bounded worker pool and announces the new dataset
//! - [`RebuildCoordinator`]: copies the primary into the shadow replica
//!   slot and rotates it live
//! - [`PromotionService`]: the read and load operations exposed over HTTP

pub mod decode;
pub mod loader;
pub mod rebuild;
pub mod service;

pub use decode::{RawRecord, FIELD_COUNT};
pub use loader::{IngestionLoader, LoadReport, PrimarySink, RecordSink};
pub use rebuild::{stripe_offsets, RebuildCoordinator, RebuildReport};
pub use service::PromotionService;
