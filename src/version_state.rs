//! The persisted version record and its reconciliation rules.

use std::collections::BTreeMap;

use tracing::info;

use crate::descriptor::VersionDescriptor;
use crate::errors::SundownResult;
use crate::state_store::{Batch, StateStore, Value};

/// Monotonically increasing build identifier supplied by the host.
pub type BuildId = u32;

const SECONDS_PER_DAY: i64 = 86_400;

// Store keys for the version record. The `values.custom.` prefix keeps
// host-defined values out of the control fields' namespace.
pub(crate) const KEY_MATCHED_BUILD: &str = "version_matched";
pub(crate) const KEY_DEPRECATED: &str = "deprecated";
pub(crate) const KEY_DEPRECATION_TIME: &str = "deprecation_time";
pub(crate) const KEY_WARN_TIME: &str = "warn_before_time";
pub(crate) const KEY_SERVER_TIME: &str = "server_time";
pub(crate) const KEY_URL: &str = "url";
pub(crate) const KEY_LAST_SEEN_BUILD: &str = "old_version";
pub(crate) const CUSTOM_VALUE_PREFIX: &str = "values.custom.";

/// Where the running build stands relative to the server's deprecation
/// plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeprecationStatus {
    /// No verdict: nothing stored for this build, or no usable times.
    NotDeprecated,
    /// Deprecation announced for a server time not yet reached.
    MarkedForDeprecation,
    /// The deprecation time has passed on the server's clock.
    Deprecated,
}

/// The locally persisted deprecation record.
///
/// All time fields are epoch seconds as published by the server; `0`
/// means unset. Every query gates on `matched_build == installed`: a
/// record written for another build answers as if nothing were stored,
/// so a stale verdict never leaks across an upgrade.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionState {
    pub matched_build: BuildId,
    pub deprecated: bool,
    pub deprecation_time: i64,
    pub warn_time: i64,
    pub server_time: i64,
    pub url: Option<String>,
    pub custom_values: BTreeMap<String, String>,
    /// Build seen by the most recent upgrade check. Owned by
    /// [`crate::VersionClient::is_just_upgraded`], never by
    /// reconciliation.
    pub last_seen_build: BuildId,
}

impl VersionState {
    /// Read the record from `store`, defaulting every absent or
    /// wrong-typed field. The first read on a fresh store yields the
    /// default record; nothing is written until a reconcile or an
    /// upgrade check runs.
    pub fn load(store: &dyn StateStore) -> SundownResult<VersionState> {
        let custom_values = store
            .scan_prefix(CUSTOM_VALUE_PREFIX)?
            .into_iter()
            .filter_map(|(key, value)| {
                let key = key.strip_prefix(CUSTOM_VALUE_PREFIX)?.to_string();
                Some((key, value.into_text()?))
            })
            .collect();

        Ok(VersionState {
            matched_build: read_build(store, KEY_MATCHED_BUILD)?,
            deprecated: store
                .get(KEY_DEPRECATED)?
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            deprecation_time: read_time(store, KEY_DEPRECATION_TIME)?,
            warn_time: read_time(store, KEY_WARN_TIME)?,
            server_time: read_time(store, KEY_SERVER_TIME)?,
            url: store.get(KEY_URL)?.and_then(Value::into_text),
            custom_values,
            last_seen_build: read_build(store, KEY_LAST_SEEN_BUILD)?,
        })
    }

    /// Two-phase reconciliation against a fetched descriptor.
    ///
    /// Phase one resets every deprecation field to its default and stamps
    /// the record with the installed build; the stored url, custom values
    /// and upgrade marker carry over. Phase two overlays only the fields
    /// the descriptor actually carries, so a field the server stopped
    /// sending reads as cleared instead of stale. Custom values merge
    /// additively; entries with a null value are skipped.
    #[must_use]
    pub fn reconciled(&self, installed: BuildId, descriptor: &VersionDescriptor) -> VersionState {
        let mut next = VersionState {
            matched_build: installed,
            url: self.url.clone(),
            custom_values: self.custom_values.clone(),
            last_seen_build: self.last_seen_build,
            ..VersionState::default()
        };

        if let Some(deprecated) = descriptor.deprecated {
            next.deprecated = deprecated;
        }
        if let Some(time) = descriptor.deprecation_time {
            next.deprecation_time = time;
        }
        if let Some(time) = descriptor.warn_time {
            next.warn_time = time;
        }
        if let Some(time) = descriptor.server_time {
            next.server_time = time;
        }
        if let Some(new_url) = &descriptor.new_url {
            next.url = Some(new_url.clone());
        }
        if let Some(values) = &descriptor.values {
            for (key, value) in values {
                if let Some(value) = value {
                    next.custom_values.insert(key.clone(), value.clone());
                }
            }
        }

        next
    }

    /// Store image of this record as one atomic batch.
    ///
    /// Unset fields become removals, so the stored record carries no
    /// leftovers from an earlier descriptor. The upgrade marker is not
    /// part of the image (see `last_seen_build`).
    pub(crate) fn to_batch(&self) -> Batch {
        let mut batch = Batch::new();
        batch.insert(KEY_MATCHED_BUILD, i64::from(self.matched_build));
        if self.deprecated {
            batch.insert(KEY_DEPRECATED, true);
        } else {
            batch.remove(KEY_DEPRECATED);
        }
        put_or_remove_time(&mut batch, KEY_DEPRECATION_TIME, self.deprecation_time);
        put_or_remove_time(&mut batch, KEY_WARN_TIME, self.warn_time);
        put_or_remove_time(&mut batch, KEY_SERVER_TIME, self.server_time);
        match &self.url {
            Some(url) => batch.insert(KEY_URL, url.clone()),
            None => batch.remove(KEY_URL),
        }
        for (key, value) in &self.custom_values {
            batch.insert(format!("{CUSTOM_VALUE_PREFIX}{key}"), value.clone());
        }
        batch
    }

    /// Record was written for this installed build.
    pub fn matches_build(&self, installed: BuildId) -> bool {
        self.matched_build == installed
    }

    /// Deprecation verdict for `installed`.
    pub fn deprecation_status(&self, installed: BuildId) -> DeprecationStatus {
        if !self.matches_build(installed) || !self.deprecated {
            return DeprecationStatus::NotDeprecated;
        }
        if self.server_time == 0 || self.deprecation_time == 0 {
            return DeprecationStatus::NotDeprecated;
        }
        if self.server_time >= self.deprecation_time {
            DeprecationStatus::Deprecated
        } else {
            DeprecationStatus::MarkedForDeprecation
        }
    }

    /// The deprecation time has passed for this build.
    pub fn is_deprecated(&self, installed: BuildId) -> bool {
        self.deprecation_status(installed) == DeprecationStatus::Deprecated
    }

    /// The server flagged this build, regardless of when (or whether) a
    /// deprecation time was announced.
    pub fn is_marked_for_deprecation(&self, installed: BuildId) -> bool {
        self.matches_build(installed) && self.deprecated
    }

    /// The warning window is open: flagged, not yet deprecated, and the
    /// server clock has reached `warn_time`.
    pub fn should_warn(&self, installed: BuildId) -> bool {
        self.is_marked_for_deprecation(installed)
            && !self.is_deprecated(installed)
            && self.warn_time != 0
            && self.server_time != 0
            && self.server_time >= self.warn_time
    }

    /// Whole days until deprecation, by the server's clock. `-1` when the
    /// record is for another build or either time is unset. The division
    /// truncates toward zero: the last partial day before the deadline
    /// reads as 0, and so does the first partial day after it. The
    /// subtraction wraps on extreme time pairs.
    pub fn days_left(&self, installed: BuildId) -> i64 {
        if !self.matches_build(installed) || self.server_time == 0 || self.deprecation_time == 0 {
            return -1;
        }
        self.deprecation_time.wrapping_sub(self.server_time) / SECONDS_PER_DAY
    }

    /// Custom value under `key`, or `default` when the record is for
    /// another build or the key was never pushed.
    pub fn value(&self, installed: BuildId, key: &str, default: &str) -> String {
        if !self.matches_build(installed) {
            return default.to_string();
        }
        self.custom_values
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }
}

/// Load, transform, commit: one full reconciliation against `descriptor`.
///
/// The transform itself cannot fail; the store is the only error source.
pub fn reconcile(
    store: &dyn StateStore,
    installed: BuildId,
    descriptor: &VersionDescriptor,
) -> SundownResult<VersionState> {
    let prior = VersionState::load(store)?;
    let next = prior.reconciled(installed, descriptor);
    store.commit(next.to_batch())?;
    info!(
        build = installed,
        deprecated = next.deprecated,
        deprecation_time = next.deprecation_time,
        "version descriptor reconciled"
    );
    Ok(next)
}

fn read_time(store: &dyn StateStore, key: &str) -> SundownResult<i64> {
    Ok(store.get(key)?.and_then(|v| v.as_int()).unwrap_or(0))
}

/// Build ids are stored as i64; anything outside u32 range reads as 0.
pub(crate) fn read_build(store: &dyn StateStore, key: &str) -> SundownResult<BuildId> {
    Ok(store
        .get(key)?
        .and_then(|v| v.as_int())
        .and_then(|int| BuildId::try_from(int).ok())
        .unwrap_or(0))
}

fn put_or_remove_time(batch: &mut Batch, key: &str, time: i64) {
    if time == 0 {
        batch.remove(key);
    } else {
        batch.insert(key, time);
    }
}
