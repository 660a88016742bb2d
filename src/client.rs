//! The version client: URL lifecycle, query orchestration, upgrade check.

use std::sync::{Arc, OnceLock};

use reqwest::Url;
use tokio::sync::mpsc;
use tokio::task;
use tracing::{debug, debug_span, error, info, warn};
use uuid::Uuid;

use crate::descriptor::{DescriptorDecoder, JsonDescriptorDecoder};
use crate::errors::{SundownError, SundownResult};
use crate::fetcher::{DescriptorFetcher, HttpFetcher};
use crate::state_store::{Batch, StateStore, Value};
use crate::version_state::{
    read_build, reconcile, BuildId, DeprecationStatus, VersionState, KEY_LAST_SEEN_BUILD, KEY_URL,
};

type CompletionFn = Box<dyn FnOnce() + Send>;

/// How a query cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOutcome {
    /// Descriptor fetched, decoded and committed.
    Reconciled,
    /// Fetch or decode failed; stored state untouched.
    Failed,
    /// No usable URL stored; nothing attempted.
    Skipped,
}

/// Client for one installed build against one update endpoint.
///
/// Read-side queries are synchronous store reads, callable from any
/// thread and reentrant. `query_server` and `query_server_with` run the
/// fetch → decode → reconcile pipeline on the Tokio blocking pool; a
/// cycle either reconciles (commits the fetched snapshot), fails (logged,
/// stored state untouched) or is skipped because no URL is stored.
/// Overlapping cycles are allowed and not coalesced; the last commit
/// wins, which is sound because every descriptor is a full snapshot.
pub struct VersionClient {
    installed: BuildId,
    store: Arc<dyn StateStore>,
    fetcher: Arc<dyn DescriptorFetcher>,
    decoder: Arc<dyn DescriptorDecoder>,
    completions: OnceLock<mpsc::UnboundedSender<CompletionFn>>,
}

impl VersionClient {
    /// Client over injected collaborators.
    pub fn new(
        installed: BuildId,
        store: Arc<dyn StateStore>,
        fetcher: Arc<dyn DescriptorFetcher>,
        decoder: Arc<dyn DescriptorDecoder>,
    ) -> Self {
        VersionClient {
            installed,
            store,
            fetcher,
            decoder,
            completions: OnceLock::new(),
        }
    }

    /// Client with the default HTTP fetcher and JSON decoder over `store`.
    pub fn with_http(installed: BuildId, store: Arc<dyn StateStore>) -> SundownResult<Self> {
        Ok(Self::new(
            installed,
            store,
            Arc::new(HttpFetcher::new()?),
            Arc::new(JsonDescriptorDecoder),
        ))
    }

    /// Build id this client answers for.
    pub fn installed_build(&self) -> BuildId {
        self.installed
    }

    /// Seed the descriptor URL. Writes only when the stored record belongs
    /// to a different build or no usable URL is stored, so a replacement
    /// URL pushed by the server survives host restarts.
    pub fn set_url_once(&self, base_url: &str) -> SundownResult<()> {
        let state = VersionState::load(self.store.as_ref())?;
        if state.matches_build(self.installed)
            && stamped_url(state.url.as_deref(), self.installed).is_some()
        {
            debug!("stored descriptor URL kept");
            return Ok(());
        }
        let mut batch = Batch::new();
        batch.insert(KEY_URL, base_url);
        self.store.commit(batch)?;
        debug!(url = base_url, "descriptor URL seeded");
        Ok(())
    }

    /// Run one query cycle and resolve when it completes.
    ///
    /// Transport and decode failures are absorbed into
    /// [`QueryOutcome::Failed`] after a warn log; an `Err` means the store
    /// itself failed. The caller's task only awaits, it never runs the
    /// pipeline.
    pub async fn query_server(&self) -> SundownResult<QueryOutcome> {
        let Some(url) = self.resolve_url()? else {
            warn!("no descriptor URL stored; call set_url_once first");
            return Ok(QueryOutcome::Skipped);
        };

        let store = Arc::clone(&self.store);
        let fetcher = Arc::clone(&self.fetcher);
        let decoder = Arc::clone(&self.decoder);
        let installed = self.installed;
        task::spawn_blocking(move || run_cycle(&*store, &*fetcher, &*decoder, installed, &url))
            .await
            .map_err(|e| SundownError::internal(format!("query task failed: {e}")))?
    }

    /// Fire one query cycle and invoke `on_complete` only if it ends in a
    /// successful reconcile. The callback runs on this client's completion
    /// task, never on the caller's thread and never on the pipeline's
    /// blocking thread. Failed and skipped cycles drop the callback.
    ///
    /// An immediate `Err` means the store failed while resolving the URL.
    /// Store failures inside the running cycle are logged at error level;
    /// there is no caller left to receive them.
    ///
    /// Must be called within a Tokio runtime.
    pub fn query_server_with<F>(&self, on_complete: F) -> SundownResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let Some(url) = self.resolve_url()? else {
            warn!("no descriptor URL stored; call set_url_once first");
            return Ok(());
        };

        let store = Arc::clone(&self.store);
        let fetcher = Arc::clone(&self.fetcher);
        let decoder = Arc::clone(&self.decoder);
        let installed = self.installed;
        let completions = self.completion_sender().clone();
        tokio::spawn(async move {
            let joined =
                task::spawn_blocking(move || run_cycle(&*store, &*fetcher, &*decoder, installed, &url))
                    .await;
            match joined {
                Ok(Ok(QueryOutcome::Reconciled)) => {
                    if completions.send(Box::new(on_complete)).is_err() {
                        warn!("completion loop gone; dropping callback");
                    }
                }
                Ok(Ok(_)) => {}
                Ok(Err(error)) => error!(%error, "query cycle aborted by store failure"),
                Err(error) => error!(%error, "query task panicked or was cancelled"),
            }
        });
        Ok(())
    }

    /// Compare the stored build marker against the installed build, then
    /// overwrite the marker. Returns `true` when the marker already equals
    /// the installed build (no change since the previous call) and `false`
    /// on the first call ever and on the first call after an upgrade. The
    /// polarity is inverted relative to the name; callers asking "did the
    /// build change?" negate the result.
    pub fn is_just_upgraded(&self) -> SundownResult<bool> {
        let stored = read_build(self.store.as_ref(), KEY_LAST_SEEN_BUILD)?;
        let mut batch = Batch::new();
        batch.insert(KEY_LAST_SEEN_BUILD, i64::from(self.installed));
        self.store.commit(batch)?;
        if stored != self.installed {
            info!(previous = stored, current = self.installed, "build change recorded");
        }
        Ok(stored == self.installed)
    }

    /// See [`VersionState::should_warn`].
    pub fn should_warn(&self) -> SundownResult<bool> {
        Ok(self.load()?.should_warn(self.installed))
    }

    /// See [`VersionState::is_marked_for_deprecation`].
    pub fn is_marked_for_deprecation(&self) -> SundownResult<bool> {
        Ok(self.load()?.is_marked_for_deprecation(self.installed))
    }

    /// See [`VersionState::is_deprecated`].
    pub fn is_deprecated(&self) -> SundownResult<bool> {
        Ok(self.load()?.is_deprecated(self.installed))
    }

    /// See [`VersionState::deprecation_status`].
    pub fn deprecation_status(&self) -> SundownResult<DeprecationStatus> {
        Ok(self.load()?.deprecation_status(self.installed))
    }

    /// See [`VersionState::days_left`].
    pub fn days_left(&self) -> SundownResult<i64> {
        Ok(self.load()?.days_left(self.installed))
    }

    /// See [`VersionState::value`].
    pub fn get_value(&self, key: &str, default: &str) -> SundownResult<String> {
        Ok(self.load()?.value(self.installed, key, default))
    }

    fn load(&self) -> SundownResult<VersionState> {
        VersionState::load(self.store.as_ref())
    }

    /// Stored URL stamped with the installed build, or `None` when
    /// nothing usable is stored.
    fn resolve_url(&self) -> SundownResult<Option<Url>> {
        let stored = self.store.get(KEY_URL)?.and_then(Value::into_text);
        Ok(stamped_url(stored.as_deref(), self.installed))
    }

    /// Completion dispatch loop, spawned lazily on first use so purely
    /// synchronous hosts never need a runtime.
    fn completion_sender(&self) -> &mpsc::UnboundedSender<CompletionFn> {
        self.completions.get_or_init(|| {
            let (tx, mut rx) = mpsc::unbounded_channel::<CompletionFn>();
            tokio::spawn(async move {
                debug!("completion dispatch loop started");
                while let Some(callback) = rx.recv().await {
                    callback();
                }
                debug!("completion dispatch loop ended");
            });
            tx
        })
    }
}

/// One fetch → decode → reconcile pass. Runs on the blocking pool.
fn run_cycle(
    store: &dyn StateStore,
    fetcher: &dyn DescriptorFetcher,
    decoder: &dyn DescriptorDecoder,
    installed: BuildId,
    url: &Url,
) -> SundownResult<QueryOutcome> {
    let span = debug_span!("query_cycle", id = %Uuid::new_v4(), build = installed);
    let _guard = span.enter();

    let bytes = match fetcher.fetch(url) {
        Ok(bytes) => bytes,
        Err(error) => {
            warn!(%url, %error, "descriptor fetch failed; keeping stored state");
            return Ok(QueryOutcome::Failed);
        }
    };
    let descriptor = match decoder.decode(&bytes) {
        Ok(descriptor) => descriptor,
        Err(error) => {
            warn!(%url, %error, "descriptor decode failed; keeping stored state");
            return Ok(QueryOutcome::Failed);
        }
    };
    reconcile(store, installed, &descriptor)?;
    Ok(QueryOutcome::Reconciled)
}

/// Parse `stored` and append the installed build as a `v` query
/// parameter, preserving any query string already present. Malformed
/// input reads as absent: the cycle is skipped rather than fired at a URL
/// we cannot interpret.
fn stamped_url(stored: Option<&str>, installed: BuildId) -> Option<Url> {
    let raw = stored?;
    match Url::parse(raw) {
        Ok(mut url) => {
            url.query_pairs_mut()
                .append_pair("v", &installed.to_string());
            Some(url)
        }
        Err(error) => {
            warn!(url = raw, %error, "stored descriptor URL is malformed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_store_mem::MemoryStateStore;

    const BUILD: BuildId = 42;

    struct NoFetch;

    impl DescriptorFetcher for NoFetch {
        fn fetch(&self, _url: &Url) -> SundownResult<Vec<u8>> {
            panic!("no fetch expected in this test");
        }
    }

    fn client_on(store: &Arc<MemoryStateStore>, installed: BuildId) -> VersionClient {
        VersionClient::new(
            installed,
            Arc::clone(store) as Arc<dyn StateStore>,
            Arc::new(NoFetch),
            Arc::new(JsonDescriptorDecoder),
        )
    }

    #[test]
    fn test_stamped_url_appends_build_parameter() {
        let url = stamped_url(Some("https://updates.example.com/check"), 7).expect("url");
        assert_eq!(url.as_str(), "https://updates.example.com/check?v=7");

        let url = stamped_url(Some("https://updates.example.com/check?channel=beta"), 7)
            .expect("url");
        assert_eq!(
            url.as_str(),
            "https://updates.example.com/check?channel=beta&v=7"
        );
    }

    #[test]
    fn test_stamped_url_rejects_malformed_input() {
        assert!(stamped_url(None, 7).is_none());
        assert!(stamped_url(Some("not a url"), 7).is_none());
        assert!(stamped_url(Some("example.com/missing-scheme"), 7).is_none());
    }

    #[test]
    fn test_set_url_once_seeds_and_keeps() {
        let store = Arc::new(MemoryStateStore::new());
        let client = client_on(&store, BUILD);

        client
            .set_url_once("https://updates.example.com/v1")
            .expect("seed");
        assert_eq!(
            store.get(KEY_URL).expect("get"),
            Some(Value::Text("https://updates.example.com/v1".into()))
        );

        // Same build, usable URL stored: later calls leave it alone. This
        // is what preserves a server-pushed new_url.
        let mut batch = Batch::new();
        batch.insert(crate::version_state::KEY_MATCHED_BUILD, i64::from(BUILD));
        batch.insert(KEY_URL, "https://updates.example.com/v2");
        store.commit(batch).expect("push new_url");

        client
            .set_url_once("https://updates.example.com/v1")
            .expect("no-op");
        assert_eq!(
            store.get(KEY_URL).expect("get"),
            Some(Value::Text("https://updates.example.com/v2".into()))
        );
    }

    #[test]
    fn test_set_url_once_reseeds_after_build_change() {
        let store = Arc::new(MemoryStateStore::new());
        let mut batch = Batch::new();
        batch.insert(crate::version_state::KEY_MATCHED_BUILD, i64::from(BUILD));
        batch.insert(KEY_URL, "https://updates.example.com/old");
        store.commit(batch).expect("seed old record");

        let upgraded = client_on(&store, BUILD + 1);
        upgraded
            .set_url_once("https://updates.example.com/new")
            .expect("reseed");
        assert_eq!(
            store.get(KEY_URL).expect("get"),
            Some(Value::Text("https://updates.example.com/new".into()))
        );
    }

    #[test]
    fn test_set_url_once_reseeds_over_malformed_url() {
        let store = Arc::new(MemoryStateStore::new());
        let mut batch = Batch::new();
        batch.insert(crate::version_state::KEY_MATCHED_BUILD, i64::from(BUILD));
        batch.insert(KEY_URL, "garbage url");
        store.commit(batch).expect("seed garbage");

        let client = client_on(&store, BUILD);
        client
            .set_url_once("https://updates.example.com/v1")
            .expect("reseed");
        assert_eq!(
            store.get(KEY_URL).expect("get"),
            Some(Value::Text("https://updates.example.com/v1".into()))
        );
    }

    #[test]
    fn test_is_just_upgraded_polarity() {
        let store = Arc::new(MemoryStateStore::new());
        let client = client_on(&store, BUILD);

        // First call ever: marker absent, reads as a change.
        assert!(!client.is_just_upgraded().expect("first call"));
        // Marker now matches.
        assert!(client.is_just_upgraded().expect("second call"));
        assert!(client.is_just_upgraded().expect("third call"));

        // Host upgrades: first call under the new build flips to false
        // once, then settles back to true.
        let upgraded = client_on(&store, BUILD + 1);
        assert!(!upgraded.is_just_upgraded().expect("after upgrade"));
        assert!(upgraded.is_just_upgraded().expect("settled"));
    }
}
