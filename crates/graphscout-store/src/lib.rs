//! Storage layer: durable (protocol, network, version) → dataset id registry.

mod error;
pub use error::StoreError;

pub mod registry;
pub use registry::{
    DatasetRecord, DatasetRegistry, NewDataset, RegistryStatistics, UsageEntry, FORMAT_VERSION,
};
