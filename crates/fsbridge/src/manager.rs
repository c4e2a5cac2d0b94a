//! Registry of open sessions, one per cloud user.
//!
//! Sessions are blocking objects. Every call runs on the blocking pool with
//! the user's session locked, so commands for one user are serialized while
//! different users proceed in parallel.

use std::sync::{Arc, Mutex, PoisonError, TryLockError};

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::identity::UserTable;
use crate::nativefs::NativeFs;
use crate::ownership::OwnershipCache;
use crate::paths::PathTranslator;
use crate::session::Session;

type Slot = Arc<Mutex<Option<Session>>>;

pub struct SessionManager {
    config: Arc<BridgeConfig>,
    users: Arc<UserTable>,
    paths: Arc<PathTranslator>,
    ownership: Arc<OwnershipCache>,
    /// Cloud user -> session slot. An empty slot is opened on next use.
    sessions: DashMap<String, Slot>,
}

impl SessionManager {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            users: Arc::new(UserTable::new(&config.users)),
            paths: Arc::new(PathTranslator::new(&config.fs_root)),
            ownership: Arc::new(OwnershipCache::new()),
            config: Arc::new(config),
            sessions: DashMap::new(),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn users(&self) -> &UserTable {
        &self.users
    }

    pub fn ownership(&self) -> &OwnershipCache {
        &self.ownership
    }

    /// Run `f` on the session of `user`, opening it first if needed.
    ///
    /// A session that reports a fatal error, loses sync or whose helper died
    /// is discarded and reopened on the next call.
    pub async fn with_session<F, T>(&self, user: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut Session) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let identity = self.users.identity(user)?.clone();
        let helper = self.config.helper.clone();
        let slot = self.sessions.entry(user.to_string()).or_default().clone();

        tokio::task::spawn_blocking(move || {
            let mut guard = slot.lock().unwrap_or_else(|poisoned| {
                slot.clear_poison();
                poisoned.into_inner()
            });

            let dead = guard.as_mut().is_some_and(|session| !session.is_alive());
            if dead {
                warn!("Helper for {} is gone, reopening", identity.cloud_user);
                *guard = None;
            }
            if guard.is_none() {
                *guard = Some(Session::open(&helper, &identity)?);
            }
            let Some(session) = guard.as_mut() else {
                return Err(BridgeError::Closed);
            };

            let result = f(session);
            let discard = match &result {
                Err(e) => e.is_fatal() || !session.is_open(),
                Ok(_) => !session.is_open(),
            };
            if discard {
                debug!("Discarding session of {}", identity.cloud_user);
                *guard = None;
            }
            result
        })
        .await
        .map_err(|e| BridgeError::Worker(e.to_string()))?
    }

    /// Run `f` against the filesystem view of `user`'s session.
    pub async fn with_fs<F, T>(&self, user: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut NativeFs<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let paths = Arc::clone(&self.paths);
        let users = Arc::clone(&self.users);
        self.with_session(user, move |session| {
            let mut fs = NativeFs::new(session, &paths, &users);
            f(&mut fs)
        })
        .await
    }

    /// Creator of the home directory containing `path`, through the shared
    /// ownership cache.
    pub async fn owner_of(&self, user: &str, path: &str) -> Result<Option<String>> {
        let ownership = Arc::clone(&self.ownership);
        let path = path.to_string();
        self.with_fs(user, move |fs| ownership.lookup(fs, &path))
            .await
    }

    /// Close the session of `user`. Returns false if there was none.
    pub async fn logout(&self, user: &str) -> bool {
        let Some((_, slot)) = self.sessions.remove(user) else {
            return false;
        };
        info!("Logging out {}", user);
        close_slots(vec![slot]).await > 0
    }

    /// Close sessions that have been idle too long or whose helper died.
    /// Sessions in use are left alone.
    pub async fn reap_idle(&self) -> usize {
        let idle_timeout = self.config.sessions.idle_timeout();
        let mut expired = Vec::new();

        self.sessions.retain(|user, slot| {
            let mut guard = match slot.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::WouldBlock) => return true,
                Err(TryLockError::Poisoned(poisoned)) => {
                    slot.clear_poison();
                    poisoned.into_inner()
                }
            };
            let keep = match guard.as_mut() {
                Some(session) => session.idle_for() < idle_timeout && session.is_alive(),
                None => false,
            };
            if keep {
                return true;
            }
            if let Some(session) = guard.take() {
                debug!("Reaping session of {}", user);
                expired.push(session);
            }
            false
        });

        let count = expired.len();
        if count > 0 {
            info!("Reaped {} idle session(s)", count);
            close_sessions(expired).await;
        }
        count
    }

    /// Reap idle sessions every `reap_interval` until the task is aborted.
    pub fn spawn_reaper(self: &Arc<Self>) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let interval = self.config.sessions.reap_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                manager.reap_idle().await;
            }
        })
    }

    /// Close every session.
    pub async fn shutdown(&self) -> usize {
        let users: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        let slots: Vec<Slot> = users
            .iter()
            .filter_map(|user| self.sessions.remove(user).map(|(_, slot)| slot))
            .collect();
        let closed = close_slots(slots).await;
        info!("Closed {} session(s) on shutdown", closed);
        closed
    }

    /// Users with an open session, sorted. A session busy with a command
    /// counts as open.
    pub fn active_users(&self) -> Vec<String> {
        let mut users: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| match entry.value().try_lock() {
                Ok(guard) => guard.is_some(),
                Err(TryLockError::WouldBlock) => true,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().is_some(),
            })
            .map(|entry| entry.key().clone())
            .collect();
        users.sort();
        users
    }
}

async fn close_slots(slots: Vec<Slot>) -> usize {
    let result = tokio::task::spawn_blocking(move || {
        let mut closed = 0;
        for slot in slots {
            let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(mut session) = guard.take() {
                session.close();
                closed += 1;
            }
        }
        closed
    })
    .await;

    result.unwrap_or_else(|e| {
        warn!("Closing sessions failed: {}", e);
        0
    })
}

async fn close_sessions(sessions: Vec<Session>) {
    let result = tokio::task::spawn_blocking(move || {
        for mut session in sessions {
            session.close();
        }
    })
    .await;

    if let Err(e) = result {
        warn!("Closing sessions failed: {}", e);
    }
}
