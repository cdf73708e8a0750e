//! Stream synchronization: a rendezvous barrier with latency compensation.
//!
//! A [`StreamSync`] blocks every registered participant's `sync()` call
//! until all of them have arrived, then releases them towards a *common
//! deadline*: a participant that reported `latency` is released
//! `max_latency − latency` after the last arrival, so the effects of all
//! participants land at the same wall-clock moment.
//!
//! Participants register while the barrier is inactive and hold a
//! [`SyncRegistration`]; dropping the registration (or the participant
//! dying with it) removes it from the barrier.

use crate::error::{Error, Result};
use crate::message::{monitor, Monitor, MonitorGuard};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// Barrier configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncConfig {
    /// Terminate the barrier task once the last participant is gone.
    pub empty_exit: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Registered,
    Syncing,
}

struct Participant {
    status: Status,
    latency: Duration,
    reply: Option<oneshot::Sender<()>>,
}

enum SyncMessage {
    Register {
        id: Arc<str>,
        monitor: Monitor,
        reply: oneshot::Sender<Result<()>>,
    },
    Activate {
        reply: oneshot::Sender<Result<()>>,
    },
    Deactivate {
        reply: oneshot::Sender<Result<()>>,
    },
    Sync {
        id: Arc<str>,
        latency: Duration,
        reply: oneshot::Sender<()>,
    },
    Down {
        id: Arc<str>,
    },
}

/// Controller handle of a sync barrier.
///
/// Cheap to clone. The barrier itself is a task; it lives as long as a
/// handle or registration exists (or, with
/// [`empty_exit`](SyncConfig::empty_exit), until its last participant is
/// gone).
#[derive(Clone)]
pub struct StreamSync {
    tx: kanal::Sender<SyncMessage>,
}

impl StreamSync {
    /// Spawn a barrier task. Must be called from within a tokio runtime.
    pub fn spawn(config: SyncConfig) -> Self {
        let (tx, rx) = kanal::unbounded();
        let down_tx = tx.clone();
        tokio::spawn(barrier_task(config, rx.to_async(), down_tx));
        Self { tx }
    }

    async fn call<R>(&self, build: impl FnOnce(oneshot::Sender<R>) -> SyncMessage) -> Result<R> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(build(tx)).map_err(|_| Error::Terminated)?;
        rx.await.map_err(|_| Error::Terminated)
    }

    /// Register a participant. Only valid while the barrier is inactive;
    /// re-registering a live id is an activity error.
    pub async fn register(&self, id: impl Into<Arc<str>>) -> Result<SyncRegistration> {
        let id = id.into();
        let (guard, participant_monitor) = monitor();
        self.call(|reply| SyncMessage::Register {
            id: id.clone(),
            monitor: participant_monitor,
            reply,
        })
        .await??;
        Ok(SyncRegistration {
            id,
            tx: self.tx.clone(),
            _guard: guard,
        })
    }

    /// Activate the barrier. Activating an active barrier is an error.
    pub async fn activate(&self) -> Result<()> {
        self.call(|reply| SyncMessage::Activate { reply }).await?
    }

    /// Deactivate the barrier, releasing any participant currently
    /// waiting. Deactivating an inactive barrier is an error.
    pub async fn deactivate(&self) -> Result<()> {
        self.call(|reply| SyncMessage::Deactivate { reply }).await?
    }
}

impl fmt::Debug for StreamSync {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StreamSync")
    }
}

/// A participant's membership in a barrier. Dropping it leaves the
/// barrier.
pub struct SyncRegistration {
    id: Arc<str>,
    tx: kanal::Sender<SyncMessage>,
    _guard: MonitorGuard,
}

impl SyncRegistration {
    /// The participant's id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the rendezvous.
    ///
    /// Blocks until every registered participant has called `sync`, then
    /// returns `max_latency − latency` after the last arrival. Returns
    /// immediately while the barrier is inactive. There is no timeout;
    /// cancellation happens by dropping the registration.
    pub async fn sync(&self, latency: Duration) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(SyncMessage::Sync {
                id: self.id.clone(),
                latency,
                reply: tx,
            })
            .map_err(|_| Error::Terminated)?;
        rx.await.map_err(|_| Error::Terminated)
    }
}

impl fmt::Debug for SyncRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncRegistration")
            .field("id", &self.id)
            .finish()
    }
}

async fn barrier_task(
    config: SyncConfig,
    rx: kanal::AsyncReceiver<SyncMessage>,
    down_tx: kanal::Sender<SyncMessage>,
) {
    let mut participants: HashMap<Arc<str>, Participant> = HashMap::new();
    let mut active = false;

    while let Ok(message) = rx.recv().await {
        match message {
            SyncMessage::Register { id, monitor, reply } => {
                let result = if active || participants.contains_key(&id) {
                    Err(Error::BadActivityRequest)
                } else {
                    participants.insert(
                        id.clone(),
                        Participant {
                            status: Status::Registered,
                            latency: Duration::ZERO,
                            reply: None,
                        },
                    );
                    watch_participant(id, monitor, down_tx.clone());
                    Ok(())
                };
                let _ = reply.send(result);
            }
            SyncMessage::Activate { reply } => {
                let result = if active {
                    Err(Error::BadActivityRequest)
                } else {
                    active = true;
                    Ok(())
                };
                let _ = reply.send(result);
            }
            SyncMessage::Deactivate { reply } => {
                let result = if active {
                    active = false;
                    // Whoever is waiting gets released right away.
                    for participant in participants.values_mut() {
                        participant.status = Status::Registered;
                        if let Some(waiting) = participant.reply.take() {
                            let _ = waiting.send(());
                        }
                    }
                    Ok(())
                } else {
                    Err(Error::BadActivityRequest)
                };
                let _ = reply.send(result);
            }
            SyncMessage::Sync { id, latency, reply } => {
                if !active {
                    let _ = reply.send(());
                    continue;
                }
                match participants.get_mut(&id) {
                    Some(participant) => {
                        participant.status = Status::Syncing;
                        participant.latency = latency;
                        participant.reply = Some(reply);
                        try_release(&mut participants);
                    }
                    None => {
                        // Removed concurrently with the call; don't block it.
                        let _ = reply.send(());
                    }
                }
            }
            SyncMessage::Down { id } => {
                if participants.remove(&id).is_some() {
                    tracing::debug!(participant = %id, "sync participant left");
                    try_release(&mut participants);
                    if participants.is_empty() && config.empty_exit {
                        break;
                    }
                }
            }
        }
    }
}

fn watch_participant(id: Arc<str>, mut monitor: Monitor, tx: kanal::Sender<SyncMessage>) {
    tokio::spawn(async move {
        monitor.down().await;
        let _ = tx.send(SyncMessage::Down { id });
    });
}

/// Release everyone if all participants have arrived: compensation delays
/// target a common deadline, and cohorts sharing a latency are released by
/// the same task so they fire together.
fn try_release(participants: &mut HashMap<Arc<str>, Participant>) {
    if participants.is_empty()
        || participants.values().any(|p| p.status != Status::Syncing)
    {
        return;
    }
    let max_latency = participants
        .values()
        .map(|p| p.latency)
        .max()
        .unwrap_or(Duration::ZERO);

    let mut cohorts: BTreeMap<Duration, Vec<oneshot::Sender<()>>> = BTreeMap::new();
    for participant in participants.values_mut() {
        participant.status = Status::Registered;
        if let Some(reply) = participant.reply.take() {
            cohorts
                .entry(max_latency - participant.latency)
                .or_default()
                .push(reply);
        }
    }
    for (delay, replies) in cohorts {
        if delay.is_zero() {
            for reply in replies {
                let _ = reply.send(());
            }
        } else {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                for reply in replies {
                    let _ = reply.send(());
                }
            });
        }
    }
}
