//! Tracking and periodic polling of registered game servers.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use kartwatch_db::{Database, DbError, ServerRecord};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::client::{Answer, Knock, KnockError, Knocker, PingWindow};
use crate::cstr::strip_colors;
use crate::helpers::now;
use crate::info::{PlayerInfo, ServerInfo};
use crate::remote::{Remote, RemoteError, validate_label};

pub type ServerId = i64;
pub type GuildId = u64;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("server {0} is not being watched")]
    NotFound(ServerId),
}

/// Last known state of a watched server.
#[derive(Debug, Clone, Default)]
pub struct ServerStatus {
    /// Info from the last successful knock
    pub info: Option<ServerInfo>,
    /// Roster from the last successful knock
    pub players: Vec<PlayerInfo>,
    /// Whether the last knock succeeded
    pub online: bool,
    /// Unix timestamp of the last completed knock
    pub last_updated: Option<i64>,
    pub pings: PingWindow,
    /// Number of completed knocks
    pub generation: u64,
}

impl ServerStatus {
    /// Mean round-trip time in milliseconds.
    pub fn ping(&self) -> Option<f64> {
        self.pings.mean()
    }
}

/// A registered server and its last known state.
///
/// Only the server's own knock writes the status, and the poller never runs
/// two knocks for one server at a time.
#[derive(Debug)]
pub struct WatchedServer {
    id: ServerId,
    guild_id: GuildId,
    remote: Remote,
    label: watch::Sender<Option<String>>,
    inserted_at: i64,
    updated_at: AtomicI64,
    status: watch::Sender<ServerStatus>,
    removed: AtomicBool,
}

impl WatchedServer {
    fn new(record: ServerRecord, remote: Remote) -> Self {
        Self {
            id: record.id,
            guild_id: record.guild_id,
            remote,
            label: watch::Sender::new(record.label),
            inserted_at: record.inserted_at,
            updated_at: AtomicI64::new(record.updated_at),
            status: watch::Sender::new(ServerStatus::default()),
            removed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> ServerId {
        self.id
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn remote(&self) -> &Remote {
        &self.remote
    }

    pub fn label(&self) -> Option<String> {
        self.label.borrow().clone()
    }

    /// Label if set, otherwise the colour-stripped server name if known,
    /// otherwise the remote.
    pub fn display_name(&self) -> String {
        if let Some(label) = self.label() {
            return label;
        }
        match &self.status.borrow().info {
            Some(info) => strip_colors(&info.server_name),
            None => self.remote.to_string(),
        }
    }

    pub fn inserted_at(&self) -> i64 {
        self.inserted_at
    }

    pub fn updated_at(&self) -> i64 {
        self.updated_at.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> ServerStatus {
        self.status.borrow().clone()
    }

    pub fn info(&self) -> Option<ServerInfo> {
        self.status.borrow().info.clone()
    }

    pub fn players(&self) -> Vec<PlayerInfo> {
        self.status.borrow().players.clone()
    }

    pub fn ping(&self) -> Option<f64> {
        self.status.borrow().ping()
    }

    /// A receiver that sees every refresh after this call.
    pub fn subscribe(&self) -> watch::Receiver<ServerStatus> {
        self.status.subscribe()
    }

    /// Waits for the next completed knock, returning the refreshed status, or
    /// `None` if none completes within `timeout`.
    pub async fn wait_for_refresh(&self, timeout: Duration) -> Option<ServerStatus> {
        let mut rx = self.subscribe();
        match tokio::time::timeout(timeout, rx.changed()).await {
            Ok(Ok(())) => Some(rx.borrow_and_update().clone()),
            _ => None,
        }
    }

    fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }

    /// Queries the server and publishes the outcome to every subscriber.
    ///
    /// A failed knock keeps the previous info and roster and only marks the
    /// server offline. Results of a knock that finishes after the server was
    /// removed are dropped.
    pub async fn knock(&self, knocker: &Knocker) -> Result<Answer, KnockError> {
        let Knock {
            result,
            rtt_samples,
        } = knocker.knock(&self.remote).await;

        if self.is_removed() {
            debug!(id = self.id, remote = %self.remote, "discarding knock for removed server");
            return result;
        }

        match &result {
            Ok(answer) => debug!(
                id = self.id,
                remote = %self.remote,
                players = answer.players.len(),
                "server refreshed"
            ),
            Err(err) => warn!(id = self.id, remote = %self.remote, error = %err, "knock failed"),
        }

        let updated = now();
        self.status.send_modify(|status| {
            for rtt in &rtt_samples {
                status.pings.push(*rtt);
            }
            match &result {
                Ok(answer) => {
                    status.info = Some(answer.info.clone());
                    status.players = answer.players.clone();
                    status.online = true;
                }
                Err(_) => status.online = false,
            }
            status.last_updated = Some(updated);
            status.generation += 1;
        });

        result
    }
}

/// Servers in registration order plus a per-guild view of the same servers.
#[derive(Clone, Default)]
struct Index {
    servers: Vec<Arc<WatchedServer>>,
    by_guild: HashMap<GuildId, Vec<Arc<WatchedServer>>>,
}

impl Index {
    fn get(&self, id: ServerId) -> Option<&Arc<WatchedServer>> {
        self.servers
            .binary_search_by_key(&id, |s| s.id)
            .ok()
            .map(|pos| &self.servers[pos])
    }

    /// Inserts `server` unless its id is already tracked. Returns the server
    /// the index holds for that id.
    fn insert(&mut self, server: Arc<WatchedServer>) -> Arc<WatchedServer> {
        let pos = match self.servers.binary_search_by_key(&server.id, |s| s.id) {
            Ok(pos) => return self.servers[pos].clone(),
            Err(pos) => pos,
        };
        self.servers.insert(pos, server.clone());

        let group = self.by_guild.entry(server.guild_id).or_default();
        let pos = group.partition_point(|s| s.id < server.id);
        group.insert(pos, server.clone());
        server
    }

    fn remove(&mut self, server: &WatchedServer) {
        self.servers.retain(|s| s.id != server.id);
        if let Some(group) = self.by_guild.get_mut(&server.guild_id) {
            group.retain(|s| s.id != server.id);
            if group.is_empty() {
                self.by_guild.remove(&server.guild_id);
            }
        }
    }
}

/// Snapshot iterator over watched servers. Mutations of the watcher after the
/// snapshot was taken are not visible; clone it to iterate again.
#[derive(Clone)]
pub struct Servers {
    index: Arc<Index>,
    guild: Option<GuildId>,
    pos: usize,
}

impl Iterator for Servers {
    type Item = Arc<WatchedServer>;

    fn next(&mut self) -> Option<Self::Item> {
        let list = match self.guild {
            None => self.index.servers.as_slice(),
            Some(guild) => self
                .index
                .by_guild
                .get(&guild)
                .map_or(&[][..], Vec::as_slice),
        };
        let server = list.get(self.pos)?.clone();
        self.pos += 1;
        Some(server)
    }
}

/// Result of one poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub online: usize,
    pub offline: usize,
    /// Servers whose previous knock was still running
    pub skipped: usize,
}

/// Owns every watched server and refreshes them in the background.
pub struct Watcher {
    db: Database,
    knocker: Knocker,
    index: watch::Sender<Arc<Index>>,
    in_flight: scc::HashSet<ServerId>,
}

impl Watcher {
    pub fn new(db: Database, knocker: Knocker) -> Self {
        Self {
            db,
            knocker,
            index: watch::Sender::new(Arc::new(Index::default())),
            in_flight: scc::HashSet::new(),
        }
    }

    pub fn knocker(&self) -> &Knocker {
        &self.knocker
    }

    /// Loads every persisted registration. Servers already tracked are kept
    /// as they are. Returns the number of servers tracked afterwards.
    pub async fn load(&self) -> Result<usize, WatchError> {
        let records = self.db.list_servers().await?;

        let mut servers = Vec::with_capacity(records.len());
        for record in records {
            match record.remote.parse::<Remote>() {
                Ok(remote) => servers.push(Arc::new(WatchedServer::new(record, remote))),
                Err(err) => {
                    warn!(id = record.id, remote = %record.remote, error = %err, "skipping unparsable registration")
                }
            }
        }

        self.index.send_modify(|index| {
            let index = Arc::make_mut(index);
            for server in servers {
                index.insert(server);
            }
        });

        let count = self.index.borrow().servers.len();
        info!(count, "loaded watched servers");
        Ok(count)
    }

    /// Registers a new server under `guild`.
    ///
    /// Nothing is tracked unless the registration was persisted.
    pub async fn add(
        &self,
        guild: GuildId,
        remote: &str,
        label: Option<String>,
    ) -> Result<Arc<WatchedServer>, WatchError> {
        let remote: Remote = remote.parse()?;
        if let Some(label) = &label {
            validate_label(label)?;
        }

        let record = self
            .db
            .create_server(guild, remote.to_string(), label, now())
            .await?;
        let mut server = Arc::new(WatchedServer::new(record, remote));

        // A concurrent load may have tracked the new row already
        self.index.send_modify(|index| {
            server = Arc::make_mut(index).insert(server.clone());
        });

        info!(id = server.id, guild, remote = %server.remote, "watching server");
        Ok(server)
    }

    /// Stops watching a server. A knock already running for it completes but
    /// its result is not published.
    pub async fn remove(&self, server: &WatchedServer) -> Result<(), WatchError> {
        if self.get(server.id).is_none() {
            return Err(WatchError::NotFound(server.id));
        }

        self.db.delete_server(server.id).await?;
        server.removed.store(true, Ordering::Release);
        self.index
            .send_modify(|index| Arc::make_mut(index).remove(server));

        info!(id = server.id, remote = %server.remote, "stopped watching server");
        Ok(())
    }

    /// Changes a server's label, or clears it with `None`.
    pub async fn relabel(
        &self,
        server: &WatchedServer,
        label: Option<String>,
    ) -> Result<(), WatchError> {
        if let Some(label) = &label {
            validate_label(label)?;
        }
        if self.get(server.id).is_none() {
            return Err(WatchError::NotFound(server.id));
        }

        let updated = now();
        self.db
            .update_label(server.id, label.clone(), updated)
            .await?;
        server.label.send_replace(label);
        server.updated_at.store(updated, Ordering::Relaxed);
        Ok(())
    }

    pub fn get(&self, id: ServerId) -> Option<Arc<WatchedServer>> {
        self.index.borrow().get(id).cloned()
    }

    /// Finds a server of `guild` by its remote.
    pub fn find(&self, guild: GuildId, remote: &Remote) -> Option<Arc<WatchedServer>> {
        self.iter(Some(guild)).find(|s| s.remote == *remote)
    }

    /// Every tracked server, or those of one guild, in registration order.
    pub fn iter(&self, guild: Option<GuildId>) -> Servers {
        Servers {
            index: self.index.borrow().clone(),
            guild,
            pos: 0,
        }
    }

    /// Knocks every tracked server concurrently and waits for all of them.
    /// Servers with a knock still running from an earlier cycle are skipped.
    /// Knocks keep running to their own deadline if this future is dropped.
    pub async fn poll(self: &Arc<Self>) -> PollSummary {
        let mut summary = PollSummary::default();
        let mut knocks = Vec::new();

        for server in self.iter(None) {
            if self.in_flight.insert_async(server.id).await.is_err() {
                debug!(id = server.id, "previous knock still running");
                summary.skipped += 1;
                continue;
            }

            // Detached, so dropping this poll never cuts a knock short
            let watcher = Arc::clone(self);
            knocks.push(tokio::spawn(async move {
                let result = server.knock(&watcher.knocker).await;
                watcher.in_flight.remove_async(&server.id).await;
                result.is_ok()
            }));
        }

        for knock in knocks {
            match knock.await {
                Ok(true) => summary.online += 1,
                Ok(false) => summary.offline += 1,
                Err(err) => warn!(error = %err, "knock task failed"),
            }
        }

        summary
    }

    /// Polls every `period` until `shutdown` flips or its sender goes away.
    ///
    /// Each cycle runs in its own task, so knocks still running at shutdown
    /// finish on their own deadline.
    pub async fn run(self: Arc<Self>, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(period_secs = period.as_secs(), "poller started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let watcher = Arc::clone(&self);
                    tokio::spawn(async move {
                        let summary = watcher.poll().await;
                        debug!(
                            online = summary.online,
                            offline = summary.offline,
                            skipped = summary.skipped,
                            "poll cycle finished"
                        );
                    });
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("poller stopped");
    }
}
