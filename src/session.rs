//! Board view lifecycle.
//!
//! A [`BoardSession`] owns everything scoped to one open board: the cache,
//! the query state, the event bindings on the shared connection, and the
//! loop that refetches the task list and held reaction summaries whenever
//! they are invalidated. `release`
//! tears all of it down so nothing carries over into the next board.

use std::sync::{Arc, PoisonError, RwLock};

use agentboard_common::{ReactionTarget, Status};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::api::BoardApi;
use crate::board::SharedBoard;
use crate::errors::{ApiError, SyncError};
use crate::events::{BoardEventBindings, BoardNotice, BoardTargets};
use crate::mutations::{BoardMutations, LocalMoves};
use crate::query::{QueryCache, QueryKey};
use crate::reactions::ReactionStore;
use crate::ws::{ConnectionManager, SubscriptionTarget};

type SharedStatuses = Arc<RwLock<Vec<Status>>>;

/// Everything a fetch needs, cheap to clone into a spawned task.
#[derive(Clone)]
struct Fetcher {
    api: Arc<dyn BoardApi>,
    board: SharedBoard,
    queries: QueryCache,
    reactions: ReactionStore,
    statuses: SharedStatuses,
    revision: watch::Sender<u64>,
    project_id: Uuid,
    board_id: Uuid,
}

impl Fetcher {
    fn tasks_key(&self) -> QueryKey {
        QueryKey::tasks(self.project_id, self.board_id)
    }

    /// Fetch statuses and tasks and replace every bucket in one step.
    async fn fetch(&self) -> Result<(), ApiError> {
        let mut statuses = self.api.list_statuses(self.project_id).await?;
        let tasks = self.api.list_tasks(self.project_id, self.board_id).await?;
        statuses.sort_by_key(|s| s.position);

        self.board
            .with(|store| store.load_fetched(statuses.iter().map(|s| s.id), tasks));
        *self.statuses.write().unwrap_or_else(PoisonError::into_inner) = statuses;
        self.queries.mark_fresh(&self.tasks_key());
        self.revision.send_modify(|r| *r += 1);
        Ok(())
    }

    /// Replace a held reaction summary with the server's.
    async fn fetch_reactions(&self, target: ReactionTarget) -> Result<(), ApiError> {
        let summary = self
            .api
            .get_reactions(self.project_id, self.board_id, &target)
            .await?;
        self.reactions.set(target, summary);
        self.queries.mark_fresh(&QueryKey::reactions(&target));
        Ok(())
    }

    /// Run one fetch as its own task, registered under `key` so a mutation
    /// can cancel it. Returns false once the session is shutting down.
    async fn tracked<F>(&self, key: QueryKey, work: F, cancel: &CancellationToken) -> bool
    where
        F: Future<Output = Result<(), ApiError>> + Send + 'static,
    {
        let mut task = tokio::spawn(work);
        let ticket = self.queries.begin_fetch(key.clone(), task.abort_handle());

        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                task.abort();
                self.queries.finish_fetch(ticket);
                return false;
            }
            outcome = &mut task => outcome,
        };
        self.queries.finish_fetch(ticket);

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(board_id = %self.board_id, %key, error = %e, "Refetch failed"),
            Err(e) if e.is_cancelled() => {
                tracing::debug!(board_id = %self.board_id, %key, "Refetch cancelled")
            }
            Err(e) => tracing::warn!(board_id = %self.board_id, %key, error = %e, "Refetch task failed"),
        }
        true
    }

    async fn tracked_fetch(&self, cancel: &CancellationToken) -> bool {
        let this = self.clone();
        self.tracked(self.tasks_key(), async move { this.fetch().await }, cancel)
            .await
    }

    async fn tracked_reactions(&self, target: ReactionTarget, cancel: &CancellationToken) -> bool {
        let this = self.clone();
        let key = QueryKey::reactions(&target);
        self.tracked(key, async move { this.fetch_reactions(target).await }, cancel)
            .await
    }
}

/// What a batch of invalidations asks to be fetched again.
#[derive(Default)]
struct Due {
    tasks: bool,
    everything: bool,
    prefixes: Vec<QueryKey>,
}

impl Due {
    fn note(&mut self, prefix: QueryKey, tasks_key: &QueryKey) {
        self.tasks |= prefix.covers(tasks_key);
        self.prefixes.push(prefix);
    }

    fn lagged(&mut self) {
        self.tasks = true;
        self.everything = true;
    }

    /// Held reaction summaries whose key falls under any invalidated prefix.
    fn reactions(&self, held: Vec<ReactionTarget>) -> Vec<ReactionTarget> {
        held.into_iter()
            .filter(|target| {
                let key = QueryKey::reactions(target);
                self.everything || self.prefixes.iter().any(|p| p.covers(&key))
            })
            .collect()
    }
}

/// Refetch whenever an invalidation covers the task list or a held reaction
/// summary. Invalidations that queue up while idle collapse into one pass.
async fn refetch_loop(
    fetcher: Fetcher,
    mut invalidations: broadcast::Receiver<QueryKey>,
    cancel: CancellationToken,
) {
    let tasks_key = fetcher.tasks_key();
    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => return,
            received = invalidations.recv() => received,
        };
        let mut due = Due::default();
        match received {
            Ok(prefix) => due.note(prefix, &tasks_key),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "Invalidation stream lagged; refetching");
                due.lagged();
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
        loop {
            match invalidations.try_recv() {
                Ok(prefix) => due.note(prefix, &tasks_key),
                Err(broadcast::error::TryRecvError::Lagged(_)) => due.lagged(),
                Err(_) => break,
            }
        }
        if due.tasks && !fetcher.tracked_fetch(&cancel).await {
            return;
        }
        for target in due.reactions(fetcher.reactions.held_targets()) {
            if !fetcher.tracked_reactions(target, &cancel).await {
                return;
            }
        }
    }
}

/// An open board view.
pub struct BoardSession {
    project_id: Uuid,
    board_id: Uuid,
    board: SharedBoard,
    queries: QueryCache,
    reactions: ReactionStore,
    statuses: SharedStatuses,
    revision: watch::Receiver<u64>,
    mutations: BoardMutations<dyn BoardApi>,
    bindings: BoardEventBindings,
    connection: Arc<ConnectionManager>,
    cancel: CancellationToken,
    refetch_task: Option<JoinHandle<()>>,
}

impl BoardSession {
    /// Open `board_id`: bind push events, connect, load the board, and start
    /// following invalidations. On a failed initial load nothing stays
    /// registered or connected.
    pub async fn acquire(
        api: Arc<dyn BoardApi>,
        connection: Arc<ConnectionManager>,
        project_id: Uuid,
        board_id: Uuid,
        credential: &str,
    ) -> Result<Self, SyncError> {
        let board = SharedBoard::new();
        let queries = QueryCache::new();
        let reactions = ReactionStore::new();
        let local_moves = LocalMoves::new();
        let statuses = SharedStatuses::default();
        let (revision_tx, revision) = watch::channel(0);

        let bindings = BoardEventBindings::new(BoardTargets {
            board: board.clone(),
            queries: queries.clone(),
            reactions: reactions.clone(),
            local_moves: local_moves.clone(),
            project_id,
            board_id,
        });
        let mutations = BoardMutations::new(
            api.clone(),
            board.clone(),
            queries.clone(),
            reactions.clone(),
            local_moves,
            project_id,
            board_id,
        );
        let fetcher = Fetcher {
            api,
            board: board.clone(),
            queries: queries.clone(),
            reactions: reactions.clone(),
            statuses: statuses.clone(),
            revision: revision_tx,
            project_id,
            board_id,
        };

        bindings.register(&connection);
        connection
            .connect(SubscriptionTarget::board(project_id, board_id), credential)
            .await;

        let invalidations = queries.subscribe();
        if let Err(e) = fetcher.fetch().await {
            tracing::warn!(%board_id, error = %e, "Initial board load failed");
            bindings.unregister(&connection);
            connection.disconnect().await;
            board.with(|store| store.clear_board());
            return Err(e.into());
        }

        let cancel = CancellationToken::new();
        let refetch_task = tokio::spawn(refetch_loop(fetcher, invalidations, cancel.clone()));
        tracing::info!(%project_id, %board_id, tasks = board.with(|s| s.len()), "Board session acquired");

        Ok(Self {
            project_id,
            board_id,
            board,
            queries,
            reactions,
            statuses,
            revision,
            mutations,
            bindings,
            connection,
            cancel,
            refetch_task: Some(refetch_task),
        })
    }

    pub fn project_id(&self) -> Uuid {
        self.project_id
    }

    pub fn board_id(&self) -> Uuid {
        self.board_id
    }

    pub fn board(&self) -> &SharedBoard {
        &self.board
    }

    pub fn queries(&self) -> &QueryCache {
        &self.queries
    }

    pub fn reactions(&self) -> &ReactionStore {
        &self.reactions
    }

    pub fn mutations(&self) -> &BoardMutations<dyn BoardApi> {
        &self.mutations
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// Statuses in column order, as of the last successful fetch.
    pub fn statuses(&self) -> Vec<Status> {
        self.statuses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Bumped after every successful fetch.
    pub fn subscribe_refreshes(&self) -> watch::Receiver<u64> {
        self.revision.clone()
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<BoardNotice> {
        self.bindings.subscribe_notices()
    }

    /// Ask for a refetch of the task list.
    pub fn refresh(&self) {
        self.queries
            .invalidate(&QueryKey::tasks(self.project_id, self.board_id));
    }

    /// Leave the board: stop refetching, unbind, disconnect, and clear the
    /// cache.
    pub async fn release(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.refetch_task.take() {
            let _ = task.await;
        }
        self.bindings.unregister(&self.connection);
        self.connection.disconnect().await;
        self.board.with(|store| store.clear_board());
        self.reactions.clear();
        tracing::info!(project_id = %self.project_id, board_id = %self.board_id, "Board session released");
    }
}

impl Drop for BoardSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use agentboard_common::{ReactionSummary, Task, WsEvent};
    use url::Url;

    use super::*;
    use crate::api::test_support::MockBoardApi;
    use crate::board::test_support::{ids, task_at};
    use crate::ws::test_support::{MockConnector, MockPeer};
    use crate::ws::ConnectionSettings;

    const TODO: u128 = 10;
    const DOING: u128 = 11;

    fn sid(id: u128) -> Uuid {
        Uuid::from_u128(id)
    }

    fn statuses() -> Vec<Status> {
        let mut todo = Status::with_id(sid(TODO));
        todo.position = 0;
        let mut doing = Status::with_id(sid(DOING));
        doing.position = 1;
        vec![doing, todo]
    }

    struct Fixture {
        api: Arc<MockBoardApi>,
        connector: MockConnector,
        connection: Arc<ConnectionManager>,
        session: BoardSession,
        peer: MockPeer,
    }

    async fn open() -> Fixture {
        let api = Arc::new(MockBoardApi::new(
            statuses(),
            vec![task_at(1, TODO, 1024.0), task_at(2, TODO, 2048.0)],
        ));
        let connector = MockConnector::new();
        let connection = Arc::new(ConnectionManager::new(
            Arc::new(connector.clone()),
            ConnectionSettings::new(Url::parse("ws://board.test").unwrap()),
        ));
        let session = BoardSession::acquire(
            api.clone(),
            connection.clone(),
            Uuid::from_u128(0xAA),
            Uuid::from_u128(0xBB),
            "token",
        )
        .await
        .unwrap();
        let mut peer = connector.next_peer().await;
        peer.recv_json().await.unwrap();
        Fixture {
            api,
            connector,
            connection,
            session,
            peer,
        }
    }

    async fn eventually(mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    fn push(peer: &MockPeer, kind: &str, task: &Task) {
        let event = WsEvent::new(kind, serde_json::to_value(task).unwrap());
        peer.send(&serde_json::to_string(&event).unwrap());
    }

    fn todo(session: &BoardSession) -> Vec<(u128, f64)> {
        session.board().with(|s| {
            s.tasks(sid(TODO))
                .iter()
                .map(|t| (t.id.as_u128(), t.position))
                .collect()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_loads_board_and_binds_events() {
        let f = open().await;
        assert_eq!(todo(&f.session), vec![(1, 1024.0), (2, 2048.0)]);
        assert!(f.session.board().with(|s| s.tasks(sid(DOING)).is_empty()));
        let order: Vec<Uuid> = f.session.statuses().iter().map(|s| s.id).collect();
        assert_eq!(order, vec![sid(TODO), sid(DOING)]);
        assert_eq!(f.connection.handler_count("task.created"), 1);
        assert!(f.peer.url.as_str().contains("board_id="));
        f.session.release().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_pushed_event_reaches_board() {
        let f = open().await;
        push(&f.peer, "task.created", &task_at(3, DOING, 1024.0));
        let session = &f.session;
        eventually(|| session.board().with(|s| ids(s.tasks(sid(DOING)))) == vec![3]).await;
        f.session.release().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidation_triggers_refetch() {
        let f = open().await;
        let mut refreshes = f.session.subscribe_refreshes();
        f.api.set_server_tasks(vec![task_at(2, DOING, 1024.0)]);
        f.session.refresh();
        refreshes.changed().await.unwrap();
        assert!(todo(&f.session).is_empty());
        assert_eq!(f.session.board().with(|s| ids(s.tasks(sid(DOING)))), vec![2]);
        f.session.release().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaction_invalidation_refetches_held_summary() {
        let f = open().await;
        let held = ReactionTarget::Task(sid(1));
        let unheld = ReactionTarget::Task(sid(2));
        let server = ReactionSummary::default().toggled("👍");
        f.api.set_reactions(held, server.clone());
        f.api.set_reactions(unheld, server.clone());
        f.session.reactions().set(held, ReactionSummary::default());

        f.session.queries().invalidate(&QueryKey::reactions(&unheld));
        f.session.queries().invalidate(&QueryKey::reactions(&held));
        let reactions = f.session.reactions();
        eventually(|| reactions.get(&held) == Some(server.clone())).await;

        assert!(reactions.get(&unheld).is_none());
        let fetches = f.api.calls().iter().filter(|c| *c == "get_reactions").count();
        assert_eq!(fetches, 1);
        assert!(!f.session.queries().is_stale(&QueryKey::reactions(&held)));
        f.session.release().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaction_prefix_invalidation_refetches_held() {
        let f = open().await;
        let target = ReactionTarget::Task(sid(1));
        let server = ReactionSummary::default().toggled("🎉").toggled("🚀");
        f.api.set_reactions(target, server.clone());
        f.session.reactions().set(target, ReactionSummary::default());

        f.session.queries().invalidate(&QueryKey::new(["reactions"]));
        let reactions = f.session.reactions();
        eventually(|| reactions.get(&target) == Some(server.clone())).await;
        f.session.release().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_tears_everything_down() {
        let f = open().await;
        let queries = f.session.queries().clone();
        let board = f.session.board().clone();
        f.session.release().await;

        assert_eq!(f.connection.handler_count("task.created"), 0);
        assert_eq!(f.connector.live(), 0);
        assert!(board.with(|s| s.is_empty()));

        let calls_before = f.api.calls().len();
        queries.invalidate(&QueryKey::tasks(Uuid::from_u128(0xAA), Uuid::from_u128(0xBB)));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(f.api.calls().len(), calls_before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_echo_of_local_move_converges_to_server_state() {
        let f = open().await;
        let release = f.api.hold_next();
        let mutations = f.session.mutations().clone();
        let pending = tokio::spawn(async move {
            mutations.move_task_to_index(Uuid::from_u128(2), sid(TODO), 0).await
        });
        eventually(|| f.api.calls().iter().any(|c| c == "move_task")).await;
        assert_eq!(todo(&f.session), vec![(2, 512.0), (1, 1024.0)]);

        // The push echo arrives before the HTTP response, carrying another key.
        let server_copy = task_at(2, TODO, 700.0);
        f.api.set_server_tasks(vec![task_at(1, TODO, 1024.0), server_copy.clone()]);
        push(&f.peer, "task.moved", &server_copy);
        let session = &f.session;
        eventually(|| todo(session) == vec![(2, 700.0), (1, 1024.0)]).await;

        release.send(()).unwrap();
        pending.await.unwrap().unwrap();

        let settled = f.api.server_task(Uuid::from_u128(2)).unwrap().position;
        let mut server = vec![(1u128, 1024.0), (2u128, settled)];
        server.sort_by(|a, b| a.1.total_cmp(&b.1));
        eventually(|| todo(session) == server).await;
        assert!(!f.session.mutations().local_moves().contains(Uuid::from_u128(2)));
        f.session.release().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_move_produces_notice() {
        let f = open().await;
        let mut notices = f.session.subscribe_notices();
        let mut event = WsEvent::new(
            "task.moved",
            serde_json::to_value(task_at(1, DOING, 1024.0)).unwrap(),
        );
        event.user = Some(agentboard_common::EventActor {
            id: Uuid::from_u128(5),
            username: "sam".into(),
            agent: None,
        });
        f.peer.send(&serde_json::to_string(&event).unwrap());
        let notice = notices.recv().await.unwrap();
        assert_eq!(notice.message, "sam moved a task");
        assert_eq!(notice.task_id, Uuid::from_u128(1));
        f.session.release().await;
    }
}
