//! Live membership of connections in sessions.
//!
//! Each session has a roster guarded by its own mutex. Joining, leaving and
//! fan-out all take that lock, so every member sees ordered events in the
//! order they were enqueued. The lock is never held across an await.
//!
//! A roster that empties out is dropped from the map and marked retired, so
//! callers that raced with the removal retry against a fresh one. Closed
//! sessions keep a memberless roster as a tombstone that refuses joins.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vocrypt_core::{ConnectionId, OutboundEvent, SessionId};
use vocrypt_telemetry::MetricsRecorder;

use crate::error::RelayError;
use crate::registry::SessionRegistry;

pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

pub type OutboundReceiver = mpsc::Receiver<Arc<OutboundEvent>>;

/// Sending half of one connection's outbound queue.
#[derive(Clone, Debug)]
pub struct Outbox {
    tx: mpsc::Sender<Arc<OutboundEvent>>,
    closed: CancellationToken,
}

impl Outbox {
    /// Tripped when the hub force-removes the connection.
    pub fn closed(&self) -> &CancellationToken {
        &self.closed
    }

    /// Enqueue an event for this connection only. Returns false if the
    /// queue is full or gone.
    pub fn try_send(&self, event: OutboundEvent) -> bool {
        self.tx.try_send(Arc::new(event)).is_ok()
    }
}

/// What to do when a member's queue cannot take an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Overflow {
    /// Remove the member. Used for ordered events.
    Evict,
    /// Skip the event for that member.
    DropNewest,
}

#[derive(Debug)]
pub struct Delivery<T> {
    pub value: T,
    pub delivered: usize,
    pub dropped: usize,
}

#[derive(Default)]
struct Roster {
    members: BTreeMap<ConnectionId, Outbox>,
    closed: bool,
    retired: bool,
}

impl Roster {
    fn idle(&self) -> bool {
        self.members.is_empty() && !self.closed
    }
}

type Stalled = Vec<(SessionId, ConnectionId)>;

pub struct ConnectionHub {
    registry: Arc<SessionRegistry>,
    rosters: DashMap<SessionId, Arc<Mutex<Roster>>>,
    memberships: DashMap<ConnectionId, SessionId>,
    queue_capacity: usize,
    metrics: Arc<MetricsRecorder>,
}

impl ConnectionHub {
    pub fn new(
        registry: Arc<SessionRegistry>,
        queue_capacity: usize,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        Self {
            registry,
            rosters: DashMap::new(),
            memberships: DashMap::new(),
            queue_capacity: queue_capacity.max(1),
            metrics,
        }
    }

    /// Create the bounded outbound queue for one transport attachment.
    pub fn open_channel(&self) -> (Outbox, OutboundReceiver) {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        (
            Outbox {
                tx,
                closed: CancellationToken::new(),
            },
            rx,
        )
    }

    fn roster(&self, session_id: &SessionId) -> Arc<Mutex<Roster>> {
        if let Some(roster) = self.rosters.get(session_id) {
            return Arc::clone(roster.value());
        }
        Arc::clone(self.rosters.entry(session_id.clone()).or_default().value())
    }

    fn existing_roster(&self, session_id: &SessionId) -> Option<Arc<Mutex<Roster>>> {
        self.rosters.get(session_id).map(|r| Arc::clone(r.value()))
    }

    /// Run `f` under the lock of the session's live roster.
    fn with_live_roster<R>(&self, session_id: &SessionId, f: impl FnOnce(&mut Roster) -> R) -> R {
        loop {
            let roster = self.roster(session_id);
            let mut guard = roster.lock();
            if guard.retired {
                continue;
            }
            let result = f(&mut *guard);
            let idle = guard.idle();
            drop(guard);
            if idle {
                self.prune(session_id, &roster);
            }
            return result;
        }
    }

    /// Drop an empty roster from the map.
    fn prune(&self, session_id: &SessionId, roster: &Arc<Mutex<Roster>>) {
        self.rosters.remove_if(session_id, |_, current| {
            if !Arc::ptr_eq(current, roster) {
                return false;
            }
            let mut guard = current.lock();
            if guard.idle() {
                guard.retired = true;
            }
            guard.retired
        });
    }

    /// Add a connection to an active session and announce the new count to
    /// every member, the joiner included. A connection that already belongs
    /// to another session leaves it first.
    pub fn join(
        self: &Arc<Self>,
        session_id: &SessionId,
        connection_id: &ConnectionId,
        outbox: Outbox,
    ) -> Result<Membership, RelayError> {
        if !self.registry.is_active(session_id) {
            return Err(RelayError::SessionNotFound(session_id.clone()));
        }

        let previous = self
            .memberships
            .get(connection_id)
            .map(|entry| entry.value().clone());
        if let Some(previous) = previous {
            if &previous != session_id {
                self.leave(connection_id);
            }
        }

        let (count, stalled) = self.with_live_roster(session_id, |roster| {
            if roster.closed {
                return Err(RelayError::SessionNotFound(session_id.clone()));
            }
            let fresh = roster
                .members
                .insert(connection_id.clone(), outbox)
                .is_none();
            self.memberships
                .insert(connection_id.clone(), session_id.clone());
            if fresh {
                self.metrics.gauge_inc("connections.joined", &[], 1.0);
            }

            let count = roster.members.len();
            let status = Arc::new(status(session_id, count));
            let mut stalled = Vec::new();
            deliver(roster, session_id, None, &status, Overflow::Evict, &mut stalled);
            Ok((count, stalled))
        })?;
        self.evict_all(stalled);

        info!(
            session_id = %session_id,
            connection_id = %connection_id,
            connected = count,
            "connection joined"
        );

        Ok(Membership {
            hub: Arc::downgrade(self),
            session_id: session_id.clone(),
            connection_id: connection_id.clone(),
            released: false,
        })
    }

    /// Remove a connection from whatever session it belongs to. Idempotent.
    pub fn leave(&self, connection_id: &ConnectionId) -> bool {
        let Some((_, session_id)) = self.memberships.remove(connection_id) else {
            return false;
        };
        self.finish_leave(&session_id, connection_id)
    }

    /// Leave `session_id` only if the connection still belongs to it.
    fn leave_scoped(&self, session_id: &SessionId, connection_id: &ConnectionId) -> bool {
        if self
            .memberships
            .remove_if(connection_id, |_, s| s == session_id)
            .is_none()
        {
            return false;
        }
        self.finish_leave(session_id, connection_id)
    }

    fn finish_leave(&self, session_id: &SessionId, connection_id: &ConnectionId) -> bool {
        match self.detach(session_id, connection_id) {
            Some((_, stalled)) => {
                debug!(session_id = %session_id, connection_id = %connection_id, "connection left");
                self.evict_all(stalled);
                true
            }
            None => false,
        }
    }

    /// Take a member off the roster and tell the rest the new count.
    fn detach(
        &self,
        session_id: &SessionId,
        connection_id: &ConnectionId,
    ) -> Option<(Outbox, Stalled)> {
        let roster = self.existing_roster(session_id)?;
        let mut stalled = Vec::new();
        let (outbox, idle) = {
            let mut guard = roster.lock();
            let outbox = guard.members.remove(connection_id)?;
            let status = Arc::new(status(session_id, guard.members.len()));
            deliver(&guard, session_id, None, &status, Overflow::Evict, &mut stalled);
            (outbox, guard.idle())
        };
        if idle {
            self.prune(session_id, &roster);
        }
        self.metrics.gauge_inc("connections.joined", &[], -1.0);
        Some((outbox, stalled))
    }

    /// Force-remove connections whose queues are full or closed. Removing
    /// one can stall another via its status event, so this drains a worklist.
    fn evict_all(&self, mut stalled: Stalled) {
        while let Some((session_id, connection_id)) = stalled.pop() {
            self.memberships
                .remove_if(&connection_id, |_, s| *s == session_id);
            if let Some((outbox, more)) = self.detach(&session_id, &connection_id) {
                outbox.closed.cancel();
                self.metrics.counter_inc("connections.evicted", &[], 1);
                warn!(
                    session_id = %session_id,
                    connection_id = %connection_id,
                    "evicted connection with stalled outbound queue"
                );
                stalled.extend(more);
            }
        }
    }

    /// Snapshot of the connections currently in a session.
    pub fn members_of(&self, session_id: &SessionId) -> Vec<ConnectionId> {
        self.existing_roster(session_id)
            .map(|r| r.lock().members.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn count(&self, session_id: &SessionId) -> usize {
        self.existing_roster(session_id)
            .map(|r| r.lock().members.len())
            .unwrap_or(0)
    }

    /// The session a connection currently belongs to.
    pub fn session_of(&self, connection_id: &ConnectionId) -> Option<SessionId> {
        self.memberships
            .get(connection_id)
            .map(|entry| entry.value().clone())
    }

    /// Remove every member, send each a final zero-count status and refuse
    /// further joins and fan-out. Returns how many members were removed.
    pub fn close_session(&self, session_id: &SessionId) -> usize {
        let removed = self.with_live_roster(session_id, |roster| {
            roster.closed = true;
            let members = std::mem::take(&mut roster.members);
            for connection_id in members.keys() {
                self.memberships
                    .remove_if(connection_id, |_, s| s == session_id);
            }
            members
        });

        let final_status = Arc::new(status(session_id, 0));
        for outbox in removed.values() {
            let _ = outbox.tx.try_send(Arc::clone(&final_status));
        }
        if !removed.is_empty() {
            self.metrics
                .gauge_inc("connections.joined", &[], -(removed.len() as f64));
        }
        info!(session_id = %session_id, removed = removed.len(), "session roster closed");
        removed.len()
    }

    /// Build an event under the session lock and enqueue it to every member
    /// except `except`. Whatever `build` does (such as allocating a sequence
    /// number) is serialized with delivery.
    pub fn fan_out<T>(
        &self,
        session_id: &SessionId,
        except: Option<&ConnectionId>,
        overflow: Overflow,
        build: impl FnOnce() -> (T, OutboundEvent),
    ) -> Result<Delivery<T>, RelayError> {
        let (delivery, stalled) = self.with_live_roster(session_id, |roster| {
            if roster.closed {
                return Err(RelayError::SessionNotFound(session_id.clone()));
            }
            let (value, event) = build();
            let event = Arc::new(event);
            let mut stalled = Vec::new();
            let (delivered, dropped) =
                deliver(roster, session_id, except, &event, overflow, &mut stalled);
            let delivery = Delivery {
                value,
                delivered,
                dropped,
            };
            Ok((delivery, stalled))
        })?;
        self.evict_all(stalled);
        Ok(delivery)
    }
}

fn status(session_id: &SessionId, count: usize) -> OutboundEvent {
    OutboundEvent::Status {
        session_id: session_id.clone(),
        connected_device_count: count,
    }
}

fn deliver(
    roster: &Roster,
    session_id: &SessionId,
    except: Option<&ConnectionId>,
    event: &Arc<OutboundEvent>,
    overflow: Overflow,
    stalled: &mut Stalled,
) -> (usize, usize) {
    let mut delivered = 0;
    let mut dropped = 0;
    for (connection_id, outbox) in &roster.members {
        if except == Some(connection_id) {
            continue;
        }
        match outbox.tx.try_send(Arc::clone(event)) {
            Ok(()) => delivered += 1,
            Err(TrySendError::Full(_)) if overflow == Overflow::DropNewest => dropped += 1,
            Err(_) => stalled.push((session_id.clone(), connection_id.clone())),
        }
    }
    (delivered, dropped)
}

/// Proof of membership. Dropping or revoking it leaves the session, unless
/// the connection has since moved elsewhere.
#[derive(Debug)]
#[must_use = "dropping a Membership leaves the session"]
pub struct Membership {
    hub: Weak<ConnectionHub>,
    session_id: SessionId,
    connection_id: ConnectionId,
    released: bool,
}

impl Membership {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    /// Leave now. Returns false if the connection was already gone.
    pub fn revoke(mut self) -> bool {
        self.release()
    }

    fn release(&mut self) -> bool {
        if std::mem::replace(&mut self.released, true) {
            return false;
        }
        match self.hub.upgrade() {
            Some(hub) => hub.leave_scoped(&self.session_id, &self.connection_id),
            None => false,
        }
    }
}

impl Drop for Membership {
    fn drop(&mut self) {
        self.release();
    }
}
