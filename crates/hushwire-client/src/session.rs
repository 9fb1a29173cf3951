//! Per-peer session registry
//!
//! One ratchet session exists per (local device, peer device) pair. The
//! registry is the single owner of live sessions in a process: a map from
//! peer device id to a slot, where an empty slot means no session has been
//! established (`Uninitialized`) and a filled slot is an active session
//! (`Established`).
//!
//! Every mutation of a session - bootstrap, encrypt, decrypt - happens
//! under that peer's async slot lock with persistence inside the critical
//! section, so interleaved operations against the same peer device can
//! never observe the same chain key. Operations against different peer
//! devices proceed concurrently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::Mutex as AsyncMutex;

use hushwire_core::crypto::ratchet::{ExportedRatchetState, RatchetState};
use hushwire_storage::Database;

use crate::error::Result;

/// A live session with one peer device
pub struct Session {
    pub peer_device_id: String,
    ratchet: RatchetState,
}

impl Session {
    pub fn new(peer_device_id: String, ratchet: RatchetState) -> Self {
        Self {
            peer_device_id,
            ratchet,
        }
    }

    pub fn ratchet(&self) -> &RatchetState {
        &self.ratchet
    }

    pub fn ratchet_mut(&mut self) -> &mut RatchetState {
        &mut self.ratchet
    }

    fn to_blob(&self) -> Result<Vec<u8>> {
        bincode::serialize(&self.ratchet.export())
            .map_err(|e| hushwire_storage::Error::Serialization(e.to_string()).into())
    }

    fn from_blob(peer_device_id: String, blob: &[u8]) -> Result<Self> {
        let exported: ExportedRatchetState = bincode::deserialize(blob)
            .map_err(|e| hushwire_storage::Error::Serialization(e.to_string()))?;
        Ok(Self {
            peer_device_id,
            ratchet: RatchetState::import(&exported),
        })
    }
}

/// Shared handle to a session slot
pub type SessionSlot = Arc<AsyncMutex<Option<Session>>>;

/// Registry of per-peer-device sessions backed by the local database
///
/// One instance per running process; torn down on shutdown via [`close`].
///
/// [`close`]: SessionManager::close
pub struct SessionManager {
    db: Arc<StdMutex<Database>>,
    slots: StdMutex<HashMap<String, SessionSlot>>,
}

impl SessionManager {
    pub fn new(db: Arc<StdMutex<Database>>) -> Self {
        Self {
            db,
            slots: StdMutex::new(HashMap::new()),
        }
    }

    /// The slot for a peer device, creating an empty one if needed
    ///
    /// Callers lock the slot, then use [`restore`] to pull any persisted
    /// state before deciding to bootstrap.
    ///
    /// [`restore`]: SessionManager::restore
    pub fn slot(&self, peer_device_id: &str) -> SessionSlot {
        let mut slots = self.slots.lock().expect("session registry lock poisoned");
        slots
            .entry(peer_device_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(None)))
            .clone()
    }

    /// Fill an empty slot from persisted state; returns whether a session
    /// was restored. Call while holding the slot lock.
    pub fn restore(&self, guard: &mut Option<Session>, peer_device_id: &str) -> Result<bool> {
        if guard.is_some() {
            return Ok(true);
        }

        let stored = {
            let db = self.db.lock().expect("database lock poisoned");
            db.load_session(peer_device_id)?
        };

        match stored {
            Some(stored) => {
                *guard = Some(Session::from_blob(peer_device_id.to_string(), &stored.state)?);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Persist a session's current state. Call while holding the slot lock
    /// so the stored blob always matches the in-memory chain position.
    pub fn persist(&self, session: &Session) -> Result<()> {
        let blob = session.to_blob()?;
        let db = self.db.lock().expect("database lock poisoned");
        db.save_session(&session.peer_device_id, &blob)?;
        Ok(())
    }

    /// Tear down the in-memory registry. Persisted state is untouched.
    pub fn close(&self) {
        let mut slots = self.slots.lock().expect("session registry lock poisoned");
        slots.clear();
    }
}
