//! In-memory pool tracker
//!
//! Groups registering connections into pools by their requested
//! (amount, type, version) and keeps one `Session` per registered
//! connection.

use std::collections::{BTreeMap, HashMap};

use uuid::Uuid;

use super::{Outbound, PoolId, Registered, RegistrationError, Router, Session, Tracker};
use crate::network::{ConnectionHandle, ConnectionId};
use crate::protocol::{Packet, Phase, Registration, Signed};

#[derive(Debug)]
struct Member {
    conn: ConnectionHandle,
    number: u32,
    verification_key: String,
}

#[derive(Debug)]
struct Pool {
    params: Registration,
    session_id: Vec<u8>,
    members: Vec<Member>,
    next_number: u32,
    started: bool,
}

impl Pool {
    fn new(params: Registration) -> Self {
        Self {
            params,
            // ASCII so the id can never contain the delimiter
            session_id: Uuid::new_v4().to_string().into_bytes(),
            members: Vec::new(),
            next_number: 1,
            started: false,
        }
    }
}

/// Tracks sessions and pools for the relay
#[derive(Debug)]
pub struct PoolTracker {
    pool_size: usize,
    pools: BTreeMap<PoolId, Pool>,
    sessions: HashMap<ConnectionId, Session>,
    next_pool_id: PoolId,
}

impl PoolTracker {
    pub fn new(pool_size: usize) -> Self {
        Self {
            pool_size,
            pools: BTreeMap::new(),
            sessions: HashMap::new(),
            next_pool_id: 1,
        }
    }

    /// Number of pools currently open or running
    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    /// Find an open pool for these parameters, opening one if needed
    fn pool_for(&mut self, params: &Registration) -> PoolId {
        let open = self
            .pools
            .iter()
            .find(|(_, pool)| {
                !pool.started && pool.members.len() < self.pool_size && pool.params == *params
            })
            .map(|(id, _)| *id);

        open.unwrap_or_else(|| {
            let id = self.next_pool_id;
            self.next_pool_id += 1;
            self.pools.insert(id, Pool::new(params.clone()));
            tracing::debug!(pool = id, amount = params.amount, "Opened pool");
            id
        })
    }
}

impl Tracker for PoolTracker {
    fn session_for(&self, conn: ConnectionId) -> Option<Session> {
        self.sessions.get(&conn).cloned()
    }

    fn register(
        &mut self,
        conn: &ConnectionHandle,
        unit: &Signed,
    ) -> Result<Registered, RegistrationError> {
        if unit.packet.is_none() {
            return Err(RegistrationError::MissingPacket);
        }
        let key = unit.from_key().ok_or(RegistrationError::MissingKey)?;
        let params = unit
            .registration()
            .ok_or(RegistrationError::MissingRegistration)?;

        if self.sessions.values().any(|s| s.verification_key == key) {
            return Err(RegistrationError::DuplicateKey(key.to_string()));
        }

        let pool_id = self.pool_for(params);
        let Some(pool) = self.pools.get_mut(&pool_id) else {
            return Err(RegistrationError::MissingRegistration);
        };

        let number = pool.next_number;
        pool.next_number += 1;
        pool.members.push(Member {
            conn: conn.clone(),
            number,
            verification_key: key.to_string(),
        });

        let session = Session {
            pool: pool_id,
            session_id: pool.session_id.clone(),
            number,
            verification_key: key.to_string(),
        };
        self.sessions.insert(conn.id(), session.clone());

        tracing::info!(
            conn = %conn.id(),
            pool = pool_id,
            number,
            members = pool.members.len(),
            "Player registered"
        );

        let reply = Signed::from(Packet {
            session: session.session_id.clone(),
            number,
            ..Default::default()
        });

        Ok(Registered {
            session,
            reply: vec![reply],
        })
    }

    fn pool_size(&self, session: &Session) -> usize {
        self.pools
            .get(&session.pool)
            .map_or(0, |pool| pool.members.len())
    }

    fn target_pool_size(&self) -> usize {
        self.pool_size
    }

    fn on_pool_ready(&mut self, session: &Session) -> Vec<Outbound> {
        let Some(pool) = self.pools.get_mut(&session.pool) else {
            return Vec::new();
        };
        if pool.started {
            return Vec::new();
        }
        pool.started = true;

        tracing::info!(
            pool = session.pool,
            members = pool.members.len(),
            "Pool ready, starting round"
        );

        let size = pool.members.len() as u32;
        pool.members
            .iter()
            .map(|member| Outbound {
                conn: member.conn.clone(),
                units: vec![Signed::from(Packet {
                    session: pool.session_id.clone(),
                    number: size,
                    phase: Phase::Announcement as i32,
                    ..Default::default()
                })],
            })
            .collect()
    }

    fn remove(&mut self, conn: ConnectionId) {
        let Some(session) = self.sessions.remove(&conn) else {
            return;
        };

        if let Some(pool) = self.pools.get_mut(&session.pool) {
            pool.members.retain(|m| m.conn.id() != conn);
            if pool.members.is_empty() {
                self.pools.remove(&session.pool);
                tracing::debug!(pool = session.pool, "Closed empty pool");
            }
        }

        tracing::info!(conn = %conn, pool = session.pool, number = session.number, "Player left");
    }
}

impl Router for PoolTracker {
    fn peers_for(&self, session: &Session, unit: &Signed) -> Vec<ConnectionHandle> {
        let Some(pool) = self.pools.get(&session.pool) else {
            return Vec::new();
        };

        match unit.to_key() {
            Some(to) => pool
                .members
                .iter()
                .filter(|m| m.verification_key == to)
                .map(|m| m.conn.clone())
                .collect(),
            None => pool
                .members
                .iter()
                .filter(|m| m.number != session.number)
                .map(|m| m.conn.clone())
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ShuffleType, VerificationKey};

    fn handle() -> ConnectionHandle {
        let (_client, server) = tokio::io::duplex(64);
        ConnectionHandle::new(Box::new(server), None)
    }

    fn registration(key: &str, amount: u64) -> Signed {
        Signed::from(Packet {
            from_key: Some(VerificationKey::new(key)),
            registration: Some(Registration {
                amount,
                r#type: ShuffleType::Default as i32,
                version: 1,
            }),
            ..Default::default()
        })
    }

    fn directed(key: &str, to: &str) -> Signed {
        Signed::from(Packet {
            from_key: Some(VerificationKey::new(key)),
            to_key: Some(VerificationKey::new(to)),
            ..Default::default()
        })
    }

    #[test]
    fn test_register_assigns_numbers_in_join_order() {
        let mut tracker = PoolTracker::new(3);
        let (a, b) = (handle(), handle());

        let first = tracker.register(&a, &registration("a", 100)).unwrap();
        let second = tracker.register(&b, &registration("b", 100)).unwrap();

        assert_eq!(first.session.number, 1);
        assert_eq!(second.session.number, 2);
        assert_eq!(first.session.pool, second.session.pool);
        assert_eq!(first.session.session_id, second.session.session_id);
        assert_eq!(tracker.pool_size(&second.session), 2);
        assert_eq!(tracker.session_for(a.id()), Some(first.session.clone()));

        let reply = first.reply[0].packet.as_ref().unwrap();
        assert_eq!(reply.session, first.session.session_id);
        assert_eq!(reply.number, 1);
    }

    #[test]
    fn test_register_rejects_invalid_units() {
        let mut tracker = PoolTracker::new(3);
        let conn = handle();

        assert_eq!(
            tracker.register(&conn, &Signed::default()).unwrap_err(),
            RegistrationError::MissingPacket
        );
        assert_eq!(
            tracker.register(&conn, &Signed::from(Packet::default())).unwrap_err(),
            RegistrationError::MissingKey
        );
        assert_eq!(
            tracker.register(&conn, &directed("a", "b")).unwrap_err(),
            RegistrationError::MissingRegistration
        );

        tracker.register(&conn, &registration("a", 1)).unwrap();
        assert_eq!(
            tracker.register(&handle(), &registration("a", 1)).unwrap_err(),
            RegistrationError::DuplicateKey("a".to_string())
        );
    }

    #[test]
    fn test_pools_split_by_parameters_and_capacity() {
        let mut tracker = PoolTracker::new(2);

        let a = tracker.register(&handle(), &registration("a", 100)).unwrap();
        let b = tracker.register(&handle(), &registration("b", 200)).unwrap();
        let c = tracker.register(&handle(), &registration("c", 100)).unwrap();
        let d = tracker.register(&handle(), &registration("d", 100)).unwrap();

        assert_ne!(a.session.pool, b.session.pool);
        assert_eq!(a.session.pool, c.session.pool);
        assert_ne!(a.session.pool, d.session.pool);
        assert_eq!(tracker.pool_count(), 3);
    }

    #[test]
    fn test_pool_ready_announces_once() {
        let mut tracker = PoolTracker::new(2);
        let (a, b) = (handle(), handle());
        tracker.register(&a, &registration("a", 1)).unwrap();
        let session = tracker.register(&b, &registration("b", 1)).unwrap().session;

        let outbound = tracker.on_pool_ready(&session);
        assert_eq!(outbound.len(), 2);
        for out in &outbound {
            let packet = out.units[0].packet.as_ref().unwrap();
            assert_eq!(packet.phase(), Phase::Announcement);
            assert_eq!(packet.number, 2);
        }

        assert!(tracker.on_pool_ready(&session).is_empty());

        let next = tracker.register(&handle(), &registration("c", 1)).unwrap();
        assert_ne!(next.session.pool, session.pool);
    }

    #[test]
    fn test_peers_for_broadcast_and_directed() {
        let mut tracker = PoolTracker::new(3);
        let (a, b, c) = (handle(), handle(), handle());
        let session = tracker.register(&a, &registration("a", 1)).unwrap().session;
        tracker.register(&b, &registration("b", 1)).unwrap();
        tracker.register(&c, &registration("c", 1)).unwrap();

        let broadcast = tracker.peers_for(&session, &Signed::from(Packet::default()));
        assert_eq!(broadcast, vec![b.clone(), c.clone()]);

        let direct = tracker.peers_for(&session, &directed("a", "c"));
        assert_eq!(direct, vec![c]);
    }

    #[test]
    fn test_remove_forgets_session_and_empty_pool() {
        let mut tracker = PoolTracker::new(3);
        let (a, b) = (handle(), handle());
        let session = tracker.register(&a, &registration("a", 1)).unwrap().session;
        tracker.register(&b, &registration("b", 1)).unwrap();

        tracker.remove(a.id());
        assert_eq!(tracker.session_for(a.id()), None);
        assert_eq!(tracker.pool_size(&session), 1);

        tracker.remove(b.id());
        assert_eq!(tracker.pool_count(), 0);

        // Key is free again once its owner is gone
        assert!(tracker.register(&handle(), &registration("a", 1)).is_ok());
    }
}
