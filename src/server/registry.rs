// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Sessions, offices and resource subscriptions.
//!
//! All state sits behind one mutex. Every operation is short and never
//! awaits while holding it, so subscribe, unsubscribe and disconnect cleanup
//! never interleave on the same key.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, warn};

use crate::error::SessionError;
use crate::protocol::{JoinOfficeReq, Peer, Role, RoomMember};

/// A socket that has joined at least once.
#[derive(Debug, Clone)]
pub struct Session {
    pub peer: Arc<Peer>,
    /// Fixed by the first join.
    pub role: Role,
    pub name: String,
    pub office_id: Option<String>,
}

/// Identifies one resource on one Computer of one office.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionKey {
    pub office_id: String,
    pub computer: String,
    pub uri: String,
}

#[derive(Debug, Default)]
struct Office {
    agent: Option<u64>,
    computers: BTreeMap<String, u64>,
}

impl Office {
    fn is_empty(&self) -> bool {
        self.agent.is_none() && self.computers.is_empty()
    }
}

#[derive(Debug, Default)]
struct State {
    sessions: HashMap<u64, Session>,
    offices: HashMap<String, Office>,
    subscriptions: BTreeMap<SubscriptionKey, BTreeSet<u64>>,
}

/// What a successful join changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    /// The session was already in this office; nothing changed.
    pub already_joined: bool,
    /// Office a Computer left to join this one.
    pub previous_office: Option<String>,
}

/// A session leaving an office.
#[derive(Debug, Clone)]
pub struct Departure {
    pub session: Session,
    pub office_id: String,
    /// Subscriptions whose last subscriber this was.
    pub orphaned: Vec<SubscriptionKey>,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    state: Mutex<State>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Join an office.
    ///
    /// An Agent may sit in one office and an office admits one Agent. A
    /// Computer joining a new office leaves its old one; Computer names are
    /// unique per office.
    pub fn join(&self, peer: &Arc<Peer>, req: &JoinOfficeReq) -> Result<JoinOutcome, SessionError> {
        if req.name.trim().is_empty() || req.office_id.trim().is_empty() {
            return Err(SessionError::JoinRejected(
                "name and office_id are required".to_string(),
            ));
        }

        let mut state = self.state();
        let id = peer.id();

        if let Some(existing) = state.sessions.get(&id) {
            if existing.role != req.role {
                return Err(SessionError::RoleMismatch {
                    expected: existing.role.to_string(),
                    actual: req.role.to_string(),
                });
            }
            if existing.office_id.as_deref() == Some(req.office_id.as_str()) {
                warn!(peer = id, office = %req.office_id, "Session already in office");
                return Ok(JoinOutcome {
                    already_joined: true,
                    previous_office: None,
                });
            }
        }

        let previous = state.sessions.get(&id).and_then(|s| s.office_id.clone());
        let office = state.offices.get(&req.office_id);
        match req.role {
            Role::Agent => {
                if let Some(previous) = &previous {
                    return Err(SessionError::JoinRejected(format!(
                        "agent is already in office {}",
                        previous
                    )));
                }
                if office.is_some_and(|o| o.agent.is_some()) {
                    return Err(SessionError::JoinRejected(format!(
                        "office {} already has an agent",
                        req.office_id
                    )));
                }
            }
            Role::Computer => {
                if office.is_some_and(|o| o.computers.contains_key(&req.name)) {
                    return Err(SessionError::JoinRejected(format!(
                        "computer {} is already in office {}",
                        req.name, req.office_id
                    )));
                }
            }
        }

        if let Some(previous) = &previous {
            Self::detach(&mut state, id, previous);
        }

        let office = state.offices.entry(req.office_id.clone()).or_default();
        match req.role {
            Role::Agent => office.agent = Some(id),
            Role::Computer => {
                office.computers.insert(req.name.clone(), id);
            }
        }
        state.sessions.insert(
            id,
            Session {
                peer: Arc::clone(peer),
                role: req.role,
                name: req.name.clone(),
                office_id: Some(req.office_id.clone()),
            },
        );
        debug!(peer = id, role = %req.role, office = %req.office_id, "Joined office");

        Ok(JoinOutcome {
            already_joined: false,
            previous_office: previous,
        })
    }

    /// Remove a session from `office_id`, keeping its role.
    pub fn leave(&self, peer_id: u64, office_id: &str) -> Result<Departure, SessionError> {
        let mut state = self.state();
        let session = state
            .sessions
            .get(&peer_id)
            .cloned()
            .ok_or(SessionError::NotInOffice)?;
        if session.office_id.as_deref() != Some(office_id) {
            return Err(SessionError::NotInOffice);
        }
        let orphaned = Self::detach(&mut state, peer_id, office_id);
        Ok(Departure {
            session,
            office_id: office_id.to_string(),
            orphaned,
        })
    }

    /// Forget a socket entirely. Returns its departure if it was in an office.
    pub fn disconnect(&self, peer_id: u64) -> Option<Departure> {
        let mut state = self.state();
        let session = state.sessions.remove(&peer_id)?;
        let office_id = session.office_id.clone()?;
        let orphaned = Self::detach(&mut state, peer_id, &office_id);
        Some(Departure {
            session,
            office_id,
            orphaned,
        })
    }

    fn detach(state: &mut State, peer_id: u64, office_id: &str) -> Vec<SubscriptionKey> {
        let Some(session) = state.sessions.get_mut(&peer_id) else {
            return Vec::new();
        };
        session.office_id = None;
        let role = session.role;
        let name = session.name.clone();

        if let Some(office) = state.offices.get_mut(office_id) {
            match role {
                Role::Agent => {
                    if office.agent == Some(peer_id) {
                        office.agent = None;
                    }
                }
                Role::Computer => {
                    if office.computers.get(&name) == Some(&peer_id) {
                        office.computers.remove(&name);
                    }
                }
            }
            if office.is_empty() {
                state.offices.remove(office_id);
            }
        }

        let mut orphaned = Vec::new();
        state.subscriptions.retain(|key, subscribers| {
            if key.office_id != office_id {
                return true;
            }
            if role == Role::Computer && key.computer == name {
                return false;
            }
            if subscribers.remove(&peer_id) && subscribers.is_empty() {
                orphaned.push(key.clone());
                return false;
            }
            true
        });
        orphaned
    }

    pub fn session(&self, peer_id: u64) -> Option<Session> {
        self.state().sessions.get(&peer_id).cloned()
    }

    /// The session of `peer_id`, which must have `role` and be in an office.
    pub fn require(&self, peer_id: u64, role: Role) -> Result<(Session, String), SessionError> {
        let session = self.session(peer_id).ok_or(SessionError::NotInOffice)?;
        if session.role != role {
            return Err(SessionError::RoleMismatch {
                expected: role.to_string(),
                actual: session.role.to_string(),
            });
        }
        let office_id = session.office_id.clone().ok_or(SessionError::NotInOffice)?;
        Ok((session, office_id))
    }

    pub fn computer_peer(&self, office_id: &str, computer: &str) -> Option<Arc<Peer>> {
        let state = self.state();
        let id = state.offices.get(office_id)?.computers.get(computer)?;
        state.sessions.get(id).map(|s| Arc::clone(&s.peer))
    }

    /// Every peer in the office except `except`.
    pub fn office_peers(&self, office_id: &str, except: Option<u64>) -> Vec<Arc<Peer>> {
        let state = self.state();
        let Some(office) = state.offices.get(office_id) else {
            return Vec::new();
        };
        office
            .agent
            .iter()
            .chain(office.computers.values())
            .filter(|id| Some(**id) != except)
            .filter_map(|id| state.sessions.get(id))
            .map(|s| Arc::clone(&s.peer))
            .collect()
    }

    /// Agent first, then Computers by name.
    pub fn members(&self, office_id: &str) -> Vec<RoomMember> {
        let state = self.state();
        let Some(office) = state.offices.get(office_id) else {
            return Vec::new();
        };
        office
            .agent
            .iter()
            .chain(office.computers.values())
            .filter_map(|id| state.sessions.get(id))
            .map(|s| RoomMember {
                name: s.name.clone(),
                role: s.role,
            })
            .collect()
    }

    /// Record a subscriber. Returns true if it was not subscribed before.
    ///
    /// Fails unless `peer_id` is still an Agent sitting in the key's office,
    /// so a session that went away mid-request leaves nothing behind.
    pub fn subscribe(&self, key: SubscriptionKey, peer_id: u64) -> Result<bool, SessionError> {
        let mut state = self.state();
        let session = state.sessions.get(&peer_id).ok_or(SessionError::NotInOffice)?;
        if session.role != Role::Agent {
            return Err(SessionError::RoleMismatch {
                expected: Role::Agent.to_string(),
                actual: session.role.to_string(),
            });
        }
        if session.office_id.as_deref() != Some(key.office_id.as_str()) {
            return Err(SessionError::NotInOffice);
        }
        Ok(state.subscriptions.entry(key).or_default().insert(peer_id))
    }

    /// Whether anyone still watches `key`.
    pub fn is_subscribed(&self, key: &SubscriptionKey) -> bool {
        self.state().subscriptions.contains_key(key)
    }

    /// Drop a subscriber. Returns `(was_subscribed, was_last)`.
    pub fn unsubscribe(&self, key: &SubscriptionKey, peer_id: u64) -> (bool, bool) {
        let mut state = self.state();
        let Some(subscribers) = state.subscriptions.get_mut(key) else {
            return (false, false);
        };
        let removed = subscribers.remove(&peer_id);
        let last = removed && subscribers.is_empty();
        if subscribers.is_empty() {
            state.subscriptions.remove(key);
        }
        (removed, last)
    }

    pub fn subscribers(&self, key: &SubscriptionKey) -> Vec<Arc<Peer>> {
        let state = self.state();
        let Some(subscribers) = state.subscriptions.get(key) else {
            return Vec::new();
        };
        subscribers
            .iter()
            .filter_map(|id| state.sessions.get(id))
            .map(|s| Arc::clone(&s.peer))
            .collect()
    }

    pub fn subscription_count(&self) -> usize {
        self.state().subscriptions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ErrorBody, FrameHandler};
    use async_trait::async_trait;
    use serde_json::Value;

    struct Silent;

    #[async_trait]
    impl FrameHandler for Silent {
        async fn on_request(
            &self,
            _peer: Arc<Peer>,
            method: String,
            _params: Value,
        ) -> Result<Value, ErrorBody> {
            Err(ErrorBody::method_not_found(&method))
        }

        async fn on_notification(&self, _peer: Arc<Peer>, _method: String, _params: Value) {}
    }

    fn peer() -> Arc<Peer> {
        let (a, _b) = tokio::io::duplex(1024);
        Peer::spawn(a, Arc::new(Silent))
    }

    fn join(role: Role, name: &str, office: &str) -> JoinOfficeReq {
        JoinOfficeReq {
            role,
            name: name.to_string(),
            office_id: office.to_string(),
        }
    }

    fn key(computer: &str, uri: &str) -> SubscriptionKey {
        SubscriptionKey {
            office_id: "room-1".to_string(),
            computer: computer.to_string(),
            uri: uri.to_string(),
        }
    }

    #[tokio::test]
    async fn test_office_admits_one_agent() {
        let registry = SessionRegistry::new();
        let a1 = peer();
        let a2 = peer();
        registry.join(&a1, &join(Role::Agent, "a1", "room-1")).unwrap();
        let err = registry.join(&a2, &join(Role::Agent, "a2", "room-1")).unwrap_err();
        assert!(matches!(err, SessionError::JoinRejected(_)));

        let err = registry.join(&a1, &join(Role::Agent, "a1", "room-2")).unwrap_err();
        assert!(matches!(err, SessionError::JoinRejected(_)));
    }

    #[tokio::test]
    async fn test_rejoin_same_office_is_noop() {
        let registry = SessionRegistry::new();
        let c = peer();
        registry.join(&c, &join(Role::Computer, "comp-1", "room-1")).unwrap();
        let outcome = registry.join(&c, &join(Role::Computer, "comp-1", "room-1")).unwrap();
        assert!(outcome.already_joined);
        assert_eq!(registry.members("room-1").len(), 1);
    }

    #[tokio::test]
    async fn test_role_is_fixed() {
        let registry = SessionRegistry::new();
        let p = peer();
        registry.join(&p, &join(Role::Computer, "comp-1", "room-1")).unwrap();
        let err = registry.join(&p, &join(Role::Agent, "x", "room-2")).unwrap_err();
        assert!(matches!(err, SessionError::RoleMismatch { .. }));
    }

    #[tokio::test]
    async fn test_computer_moves_between_offices() {
        let registry = SessionRegistry::new();
        let c = peer();
        registry.join(&c, &join(Role::Computer, "comp-1", "room-1")).unwrap();
        let outcome = registry.join(&c, &join(Role::Computer, "comp-1", "room-2")).unwrap();
        assert_eq!(outcome.previous_office.as_deref(), Some("room-1"));
        assert!(registry.members("room-1").is_empty());
        assert!(registry.computer_peer("room-2", "comp-1").is_some());
    }

    #[tokio::test]
    async fn test_duplicate_computer_name_rejected() {
        let registry = SessionRegistry::new();
        registry.join(&peer(), &join(Role::Computer, "comp-1", "room-1")).unwrap();
        let err = registry
            .join(&peer(), &join(Role::Computer, "comp-1", "room-1"))
            .unwrap_err();
        assert!(matches!(err, SessionError::JoinRejected(_)));
    }

    #[tokio::test]
    async fn test_subscriptions_pruned_on_disconnect() {
        let registry = SessionRegistry::new();
        let agent = peer();
        let computer = peer();
        registry.join(&agent, &join(Role::Agent, "a", "room-1")).unwrap();
        registry.join(&computer, &join(Role::Computer, "comp-1", "room-1")).unwrap();

        assert!(registry.subscribe(key("comp-1", "file:///a"), agent.id()).unwrap());
        assert!(!registry.subscribe(key("comp-1", "file:///a"), agent.id()).unwrap());
        registry.subscribe(key("comp-1", "file:///b"), agent.id()).unwrap();
        assert_eq!(registry.subscribers(&key("comp-1", "file:///a")).len(), 1);

        let departure = registry.disconnect(agent.id()).unwrap();
        assert_eq!(departure.orphaned.len(), 2);
        assert_eq!(registry.subscription_count(), 0);
        assert!(registry.disconnect(agent.id()).is_none());
    }

    #[tokio::test]
    async fn test_subscribe_requires_agent_in_office() {
        let registry = SessionRegistry::new();
        let agent = peer();
        let computer = peer();
        registry.join(&computer, &join(Role::Computer, "comp-1", "room-1")).unwrap();

        let err = registry.subscribe(key("comp-1", "file:///a"), agent.id()).unwrap_err();
        assert!(matches!(err, SessionError::NotInOffice));

        let err = registry
            .subscribe(key("comp-1", "file:///a"), computer.id())
            .unwrap_err();
        assert!(matches!(err, SessionError::RoleMismatch { .. }));

        registry.join(&agent, &join(Role::Agent, "a", "room-2")).unwrap();
        assert!(registry.subscribe(key("comp-1", "file:///a"), agent.id()).is_err());

        registry.disconnect(agent.id());
        assert!(registry.subscribe(key("comp-1", "file:///a"), agent.id()).is_err());
        assert_eq!(registry.subscription_count(), 0);
        assert!(!registry.is_subscribed(&key("comp-1", "file:///a")));
    }

    #[tokio::test]
    async fn test_unsubscribe_reports_last() {
        let registry = SessionRegistry::new();
        let agent = peer();
        registry.join(&agent, &join(Role::Agent, "a", "room-1")).unwrap();
        registry.subscribe(key("comp-1", "file:///a"), agent.id()).unwrap();
        assert_eq!(registry.unsubscribe(&key("comp-1", "file:///a"), agent.id()), (true, true));
        assert_eq!(registry.unsubscribe(&key("comp-1", "file:///a"), agent.id()), (false, false));
    }

    #[tokio::test]
    async fn test_require_checks_role_and_office() {
        let registry = SessionRegistry::new();
        let agent = peer();
        assert!(matches!(
            registry.require(agent.id(), Role::Agent),
            Err(SessionError::NotInOffice)
        ));
        registry.join(&agent, &join(Role::Agent, "a", "room-1")).unwrap();
        let (_, office) = registry.require(agent.id(), Role::Agent).unwrap();
        assert_eq!(office, "room-1");
        assert!(matches!(
            registry.require(agent.id(), Role::Computer),
            Err(SessionError::RoleMismatch { .. })
        ));
        registry.leave(agent.id(), "room-1").unwrap();
        assert!(matches!(
            registry.require(agent.id(), Role::Agent),
            Err(SessionError::NotInOffice)
        ));
    }
}
