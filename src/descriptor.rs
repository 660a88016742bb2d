//! Wire-format version descriptor and the decode seam.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::{SundownError, SundownResult};

/// Snapshot of a build's deprecation state as published by the update
/// server.
///
/// Every field is optional. An absent deprecation field means "cleared":
/// the reconciler resets those to defaults before overlaying whatever the
/// descriptor carries. An absent `new_url` or `values` leaves the stored
/// url and custom values untouched. Unknown fields in the payload are
/// ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionDescriptor {
    /// Build is marked for deprecation, now or at a future time.
    pub deprecated: Option<bool>,
    /// Epoch seconds at which the build counts as deprecated.
    pub deprecation_time: Option<i64>,
    /// Epoch seconds from which hosts should start warning users.
    pub warn_time: Option<i64>,
    /// Server wall clock at response generation, epoch seconds. All time
    /// comparisons use this; the library never reads a local clock.
    pub server_time: Option<i64>,
    /// Replacement URL for subsequent queries.
    pub new_url: Option<String>,
    /// Host-defined key/value overrides. Entries with a null value are
    /// skipped during reconciliation; removal is not expressible here.
    pub values: Option<BTreeMap<String, Option<String>>>,
}

/// Turns raw fetched bytes into a [`VersionDescriptor`].
///
/// Object safe so the orchestrator can hold `Arc<dyn DescriptorDecoder>`.
pub trait DescriptorDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> SundownResult<VersionDescriptor>;
}

/// Default decoder for the JSON wire format.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDescriptorDecoder;

impl DescriptorDecoder for JsonDescriptorDecoder {
    fn decode(&self, bytes: &[u8]) -> SundownResult<VersionDescriptor> {
        serde_json::from_slice(bytes)
            .map_err(|err| SundownError::decode("version_descriptor", err))
    }
}
