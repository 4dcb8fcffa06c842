use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::future::join_all;
use metrics::counter;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::DomainResult;
use crate::conversation::{InboxEntry, InboxView};
use crate::error::DomainError;
use crate::sources::ConversationSource;

const REFRESH_TOTAL: &str = "rukun_inbox_refresh_total";
const REFRESH_DISCARDED_TOTAL: &str = "rukun_inbox_refresh_discarded_total";
const SOURCE_FAILURES_TOTAL: &str = "rukun_inbox_source_failures_total";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FeedKind {
    UnreadPreview,
    FullListing,
}

/// Fans out to the conversation sources, merges their entries into one
/// ordered view, and sums the grand total. Every call is a full rebuild;
/// there is no incremental patch path.
pub struct InboxAggregator {
    sources: Vec<Arc<dyn ConversationSource>>,
}

impl InboxAggregator {
    pub fn new(sources: Vec<Arc<dyn ConversationSource>>) -> Self {
        Self { sources }
    }

    pub async fn build_unread_preview(&self, user_id: &str) -> DomainResult<InboxView> {
        self.build(user_id, FeedKind::UnreadPreview).await
    }

    pub async fn build_full_listing(&self, user_id: &str) -> DomainResult<InboxView> {
        self.build(user_id, FeedKind::FullListing).await
    }

    async fn build(&self, user_id: &str, feed: FeedKind) -> DomainResult<InboxView> {
        let passes = self.sources.iter().map(|source| async move {
            let result = match feed {
                FeedKind::UnreadPreview => source.unread_preview(user_id).await,
                FeedKind::FullListing => source.full_listing(user_id).await,
            };
            (source.kind(), result)
        });

        let mut entries: Vec<InboxEntry> = Vec::new();
        let mut failures = 0usize;
        for (kind, result) in join_all(passes).await {
            match result {
                Ok(mut source_entries) => entries.append(&mut source_entries),
                Err(err) => {
                    warn!(kind = kind.as_str(), error = %err, "conversation source failed");
                    counter!(SOURCE_FAILURES_TOTAL, "kind" => kind.as_str()).increment(1);
                    failures += 1;
                }
            }
        }

        if !self.sources.is_empty() && failures == self.sources.len() {
            return Err(DomainError::Unavailable(
                "all conversation sources failed".to_string(),
            ));
        }
        Ok(InboxView::from_entries(entries))
    }
}

/// Published inbox snapshot. `available = false` means the last refresh hit
/// the hard-failure path; `view` then still carries the stale last-known
/// state for display.
#[derive(Clone, Debug)]
pub struct InboxState {
    pub view: Option<InboxView>,
    pub available: bool,
    pub generation: u64,
}

impl Default for InboxState {
    fn default() -> Self {
        Self {
            view: None,
            available: true,
            generation: 0,
        }
    }
}

/// Serializes refresh commits behind a generation token: every request
/// takes the next generation, and only the pass holding the current one may
/// publish. Superseded or invalidated passes finish normally and have their
/// result dropped.
pub struct InboxRefresher {
    aggregator: Arc<InboxAggregator>,
    generation: AtomicU64,
    state: watch::Sender<InboxState>,
}

impl InboxRefresher {
    pub fn new(aggregator: Arc<InboxAggregator>) -> Self {
        let (state, _) = watch::channel(InboxState::default());
        Self {
            aggregator,
            generation: AtomicU64::new(0),
            state,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<InboxState> {
        self.state.subscribe()
    }

    pub fn current(&self) -> InboxState {
        self.state.borrow().clone()
    }

    /// Called when the session ends: bumps the generation so no in-flight
    /// pass can commit its result.
    pub fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    pub async fn refresh(&self, user_id: &str) -> DomainResult<()> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let built = self.aggregator.build_unread_preview(user_id).await;

        let mut discarded = false;
        self.state.send_if_modified(|state| {
            if generation != self.generation.load(Ordering::SeqCst) {
                // Dropping the result must not wake watchers either.
                discarded = true;
                return false;
            }
            state.generation = generation;
            match &built {
                Ok(view) => {
                    state.view = Some(view.clone());
                    state.available = true;
                }
                Err(_) => {
                    state.available = false;
                }
            }
            true
        });

        if discarded {
            debug!(generation, "discarding superseded inbox refresh");
            counter!(REFRESH_DISCARDED_TOTAL).increment(1);
            return Ok(());
        }

        match built {
            Ok(view) => {
                debug!(
                    generation,
                    entries = view.entries.len(),
                    total_unread = view.total_unread,
                    "inbox refresh committed"
                );
                counter!(REFRESH_TOTAL, "result" => "ok").increment(1);
                Ok(())
            }
            Err(err) => {
                warn!(generation, error = %err, "inbox refresh failed, keeping last view");
                counter!(REFRESH_TOTAL, "result" => "unavailable").increment(1);
                Err(err)
            }
        }
    }

    /// Fire-and-forget refresh for callers that must not wait, e.g. the
    /// mark-read path.
    pub fn spawn_refresh(self: &Arc<Self>, user_id: &str) {
        let refresher = Arc::clone(self);
        let user_id = user_id.to_string();
        tokio::spawn(async move {
            if let Err(err) = refresher.refresh(&user_id).await {
                warn!(error = %err, "background inbox refresh failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use tokio::sync::oneshot;

    use super::*;
    use crate::conversation::{ConversationKind, ConversationRef};
    use crate::ports::BoxFuture;

    fn entry(conversation: ConversationRef, at_ms: i64, unread: usize) -> InboxEntry {
        InboxEntry {
            conversation,
            title: "t".to_string(),
            counterpart_name: None,
            preview: String::new(),
            last_message_at_ms: Some(at_ms),
            unread_count: unread,
        }
    }

    /// Replays a scripted result per call; an exhausted script keeps
    /// returning the last entry set.
    struct ScriptedSource {
        kind: ConversationKind,
        script: Mutex<VecDeque<DomainResult<Vec<InboxEntry>>>>,
        fallback: Vec<InboxEntry>,
    }

    impl ScriptedSource {
        fn fixed(kind: ConversationKind, entries: Vec<InboxEntry>) -> Self {
            Self {
                kind,
                script: Mutex::new(VecDeque::new()),
                fallback: entries,
            }
        }

        fn failing(kind: ConversationKind) -> Self {
            Self {
                kind,
                script: Mutex::new(VecDeque::from([Err(DomainError::Unavailable(
                    "store unreachable".to_string(),
                ))])),
                fallback: vec![],
            }
        }

        fn next(&self) -> DomainResult<Vec<InboxEntry>> {
            let mut script = self.script.lock().unwrap();
            match script.pop_front() {
                Some(result) => result,
                None => Ok(self.fallback.clone()),
            }
        }
    }

    impl ConversationSource for ScriptedSource {
        fn kind(&self) -> ConversationKind {
            self.kind
        }

        fn unread_preview(&self, _user_id: &str) -> BoxFuture<'_, DomainResult<Vec<InboxEntry>>> {
            let result = self.next();
            Box::pin(async move { result })
        }

        fn full_listing(&self, _user_id: &str) -> BoxFuture<'_, DomainResult<Vec<InboxEntry>>> {
            let result = self.next();
            Box::pin(async move { result })
        }
    }

    /// Blocks its first call on a gate, then serves immediately.
    struct GatedSource {
        gate: Mutex<Option<oneshot::Receiver<()>>>,
        first: Vec<InboxEntry>,
        rest: Vec<InboxEntry>,
    }

    impl ConversationSource for GatedSource {
        fn kind(&self) -> ConversationKind {
            ConversationKind::Direct
        }

        fn unread_preview(&self, _user_id: &str) -> BoxFuture<'_, DomainResult<Vec<InboxEntry>>> {
            let gate = self.gate.lock().unwrap().take();
            let entries = if gate.is_some() {
                self.first.clone()
            } else {
                self.rest.clone()
            };
            Box::pin(async move {
                if let Some(gate) = gate {
                    let _ = gate.await;
                }
                Ok(entries)
            })
        }

        fn full_listing(&self, user_id: &str) -> BoxFuture<'_, DomainResult<Vec<InboxEntry>>> {
            self.unread_preview(user_id)
        }
    }

    #[tokio::test]
    async fn merge_keeps_every_entry_and_sums_unread() {
        let aggregator = InboxAggregator::new(vec![
            Arc::new(ScriptedSource::fixed(
                ConversationKind::Group,
                vec![entry(ConversationRef::Group("g-1".to_string()), 300, 2)],
            )),
            Arc::new(ScriptedSource::fixed(
                ConversationKind::LegacyDirect,
                vec![entry(ConversationRef::LegacyDirect("l-1".to_string()), 100, 1)],
            )),
            Arc::new(ScriptedSource::fixed(
                ConversationKind::Direct,
                vec![
                    entry(ConversationRef::Direct("d-1".to_string()), 200, 1),
                    entry(ConversationRef::Direct("d-2".to_string()), 400, 3),
                ],
            )),
        ]);

        let view = aggregator.build_unread_preview("u-1").await.unwrap();
        assert_eq!(view.entries.len(), 4);
        assert_eq!(view.total_unread, 7);
        let order: Vec<i64> = view
            .entries
            .iter()
            .map(|e| e.last_message_at_ms.unwrap())
            .collect();
        assert_eq!(order, vec![400, 300, 200, 100]);
    }

    #[tokio::test]
    async fn duplicate_counterparts_across_families_stay_separate_rows() {
        // Legacy and direct conversations with the same neighbor coexist;
        // the aggregator does not deduplicate them.
        let aggregator = InboxAggregator::new(vec![
            Arc::new(ScriptedSource::fixed(
                ConversationKind::LegacyDirect,
                vec![entry(ConversationRef::LegacyDirect("c-9".to_string()), 100, 1)],
            )),
            Arc::new(ScriptedSource::fixed(
                ConversationKind::Direct,
                vec![entry(ConversationRef::Direct("c-9".to_string()), 200, 1)],
            )),
        ]);

        let view = aggregator.build_unread_preview("u-1").await.unwrap();
        assert_eq!(view.entries.len(), 2);
        assert_eq!(view.total_unread, 2);
    }

    #[tokio::test]
    async fn one_failed_source_degrades_instead_of_failing_the_pass() {
        let aggregator = InboxAggregator::new(vec![
            Arc::new(ScriptedSource::fixed(
                ConversationKind::Group,
                vec![entry(ConversationRef::Group("g-1".to_string()), 300, 2)],
            )),
            Arc::new(ScriptedSource::failing(ConversationKind::LegacyDirect)),
            Arc::new(ScriptedSource::fixed(
                ConversationKind::Direct,
                vec![entry(ConversationRef::Direct("d-1".to_string()), 200, 1)],
            )),
        ]);

        let view = aggregator.build_unread_preview("u-1").await.unwrap();
        assert_eq!(view.entries.len(), 2);
        assert_eq!(view.total_unread, 3);
    }

    #[tokio::test]
    async fn all_sources_failing_is_a_hard_failure() {
        let aggregator = InboxAggregator::new(vec![
            Arc::new(ScriptedSource::failing(ConversationKind::Group)),
            Arc::new(ScriptedSource::failing(ConversationKind::Direct)),
        ]);

        let err = aggregator.build_unread_preview("u-1").await.unwrap_err();
        assert!(matches!(err, DomainError::Unavailable(_)));
    }

    #[tokio::test]
    async fn superseded_refresh_is_discarded() {
        let (release, gate) = oneshot::channel();
        let source = Arc::new(GatedSource {
            gate: Mutex::new(Some(gate)),
            first: vec![entry(ConversationRef::Direct("d-old".to_string()), 100, 9)],
            rest: vec![entry(ConversationRef::Direct("d-new".to_string()), 200, 1)],
        });
        let refresher = Arc::new(InboxRefresher::new(Arc::new(InboxAggregator::new(vec![
            source,
        ]))));

        let slow = {
            let refresher = Arc::clone(&refresher);
            tokio::spawn(async move { refresher.refresh("u-1").await })
        };
        tokio::task::yield_now().await;

        refresher.refresh("u-1").await.unwrap();
        let committed = refresher.current();
        assert_eq!(committed.view.as_ref().unwrap().total_unread, 1);

        release.send(()).unwrap();
        slow.await.unwrap().unwrap();

        let after = refresher.current();
        assert_eq!(after.generation, committed.generation);
        assert_eq!(after.view.unwrap().total_unread, 1);
    }

    #[tokio::test]
    async fn discarded_refresh_does_not_wake_watchers() {
        let (release, gate) = oneshot::channel();
        let source = Arc::new(GatedSource {
            gate: Mutex::new(Some(gate)),
            first: vec![entry(ConversationRef::Direct("d-old".to_string()), 100, 9)],
            rest: vec![entry(ConversationRef::Direct("d-new".to_string()), 200, 1)],
        });
        let refresher = Arc::new(InboxRefresher::new(Arc::new(InboxAggregator::new(vec![
            source,
        ]))));
        let mut snapshots = refresher.subscribe();

        let slow = {
            let refresher = Arc::clone(&refresher);
            tokio::spawn(async move { refresher.refresh("u-1").await })
        };
        tokio::task::yield_now().await;

        refresher.refresh("u-1").await.unwrap();
        assert!(snapshots.has_changed().unwrap());
        snapshots.borrow_and_update();

        release.send(()).unwrap();
        slow.await.unwrap().unwrap();

        assert!(!snapshots.has_changed().unwrap());
    }

    #[tokio::test]
    async fn invalidated_session_never_commits_in_flight_results() {
        let (release, gate) = oneshot::channel();
        let source = Arc::new(GatedSource {
            gate: Mutex::new(Some(gate)),
            first: vec![entry(ConversationRef::Direct("d-1".to_string()), 100, 1)],
            rest: vec![],
        });
        let refresher = Arc::new(InboxRefresher::new(Arc::new(InboxAggregator::new(vec![
            source,
        ]))));

        let in_flight = {
            let refresher = Arc::clone(&refresher);
            tokio::spawn(async move { refresher.refresh("u-1").await })
        };
        tokio::task::yield_now().await;

        refresher.invalidate();
        release.send(()).unwrap();
        in_flight.await.unwrap().unwrap();

        assert!(refresher.current().view.is_none());
    }

    #[tokio::test]
    async fn hard_failure_keeps_the_stale_view_and_flags_unavailable() {
        let source = Arc::new(ScriptedSource {
            kind: ConversationKind::Direct,
            script: Mutex::new(VecDeque::from([
                Ok(vec![entry(ConversationRef::Direct("d-1".to_string()), 100, 2)]),
                Err(DomainError::Unavailable("store unreachable".to_string())),
            ])),
            fallback: vec![entry(ConversationRef::Direct("d-1".to_string()), 100, 2)],
        });
        let refresher = Arc::new(InboxRefresher::new(Arc::new(InboxAggregator::new(vec![
            source,
        ]))));

        refresher.refresh("u-1").await.unwrap();
        assert!(refresher.current().available);

        let err = refresher.refresh("u-1").await.unwrap_err();
        assert!(matches!(err, DomainError::Unavailable(_)));
        let state = refresher.current();
        assert!(!state.available);
        assert_eq!(state.view.as_ref().unwrap().total_unread, 2);

        refresher.refresh("u-1").await.unwrap();
        assert!(refresher.current().available);
    }
}
