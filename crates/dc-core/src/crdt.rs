//! CRDT storage boundary.
//!
//! The transactional core treats collaboration storage as an opaque
//! key-value store with change notification: a [`CrdtRoot`] hands out named
//! [`CrdtMap`]s whose values are opaque bytes. Conflict resolution belongs to
//! the backend.
//!
//! Two in-process backends are provided:
//!
//! - [`MemoryRoot`]: offline use. Pure in-memory, no persistence, observers
//!   only ever see [`ChangeOrigin::Local`] changes.
//! - [`LoopbackHub`]: several connected roots sharing one converged state.
//!   A write is reported as `Local` to the writer and `Remote` to every other
//!   peer, the way a network backend would report it after sync.
//!
//! Notifications raised inside [`CrdtRoot::transact`] are queued and
//! delivered when the outermost transaction ends.

use crate::error::Result;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::marker::PhantomData;
use std::rc::Rc;

// ─── Change notification ─────────────────────────────────────────────────

/// Whether a change originated from this client or from a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    Local,
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Set,
    Delete,
}

/// A single key change in a named map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapChange {
    pub map: String,
    pub key: String,
    pub kind: ChangeKind,
    pub origin: ChangeOrigin,
}

/// Callback invoked for every change to an observed map.
pub type Observer = Box<dyn FnMut(&MapChange)>;

// ─── Boundary traits ─────────────────────────────────────────────────────

/// A keyed store of opaque values living under a [`CrdtRoot`].
pub trait CrdtMap {
    fn name(&self) -> &str;

    fn get(&self, key: &str) -> Option<Vec<u8>>;

    fn set(&mut self, key: &str, value: Vec<u8>);

    /// Remove `key`. Returns whether it was present.
    fn delete(&mut self, key: &str) -> bool;

    /// All keys, sorted.
    fn keys(&self) -> Vec<String>;

    fn len(&self) -> usize {
        self.keys().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn observe(&mut self, observer: Observer);
}

/// The root handle of a CRDT document.
pub trait CrdtRoot {
    /// Identifier of this client within the session.
    fn client_id(&self) -> u64;

    /// Open (or create) the map called `name`.
    fn map(&self, name: &str) -> Box<dyn CrdtMap>;

    /// Run `f` as one transaction; change notifications are delivered after
    /// `f` returns.
    fn transact(&self, f: &mut dyn FnMut());
}

// ─── Typed view ──────────────────────────────────────────────────────────

/// A [`CrdtMap`] whose values are `T`, encoded as MessagePack.
pub struct TypedMap<T> {
    inner: Box<dyn CrdtMap>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned> TypedMap<T> {
    pub fn new(inner: Box<dyn CrdtMap>) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Decode the value stored under `key`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Codec`] if the stored bytes are not a valid `T`.
    pub fn get(&self, key: &str) -> Result<Option<T>> {
        match self.inner.get(key) {
            Some(bytes) => Ok(Some(rmp_serde::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Encode and store `value` under `key`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Codec`] if `value` cannot be encoded.
    pub fn set(&mut self, key: &str, value: &T) -> Result<()> {
        let bytes = rmp_serde::to_vec_named(value)?;
        log::trace!("crdt set {}/{key} ({} bytes)", self.inner.name(), bytes.len());
        self.inner.set(key, bytes);
        Ok(())
    }

    pub fn delete(&mut self, key: &str) -> bool {
        log::trace!("crdt delete {}/{key}", self.inner.name());
        self.inner.delete(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.keys()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn observe(&mut self, observer: Observer) {
        self.inner.observe(observer);
    }
}

// ─── Shared in-process state ─────────────────────────────────────────────

struct Peer {
    client_id: u64,
    observers: HashMap<String, Vec<Observer>>,
    tx_depth: usize,
    pending: Vec<(String, String, ChangeKind)>,
}

#[derive(Default)]
struct HubState {
    maps: HashMap<String, BTreeMap<String, Vec<u8>>>,
    peers: Vec<Peer>,
    next_client: u64,
}

impl HubState {
    fn peer_mut(&mut self, client_id: u64) -> Option<&mut Peer> {
        self.peers.iter_mut().find(|p| p.client_id == client_id)
    }

    fn connect(&mut self) -> u64 {
        self.next_client += 1;
        let client_id = self.next_client;
        self.peers.push(Peer {
            client_id,
            observers: HashMap::new(),
            tx_depth: 0,
            pending: Vec::new(),
        });
        client_id
    }
}

type Shared = Rc<RefCell<HubState>>;

/// Record a change by `writer`, queueing it if a transaction is open.
fn record(state: &Shared, writer: u64, map: &str, key: &str, kind: ChangeKind) {
    {
        let mut st = state.borrow_mut();
        if let Some(peer) = st.peer_mut(writer)
            && peer.tx_depth > 0
        {
            peer.pending.push((map.to_string(), key.to_string(), kind));
            return;
        }
    }
    broadcast(state, writer, map, key, kind);
}

/// Deliver a change to every peer's observers of `map`.
///
/// Observers are taken out of the shared state while they run so they can
/// read the maps (or register more observers) without a double borrow.
fn broadcast(state: &Shared, writer: u64, map: &str, key: &str, kind: ChangeKind) {
    let peer_ids: Vec<u64> = state.borrow().peers.iter().map(|p| p.client_id).collect();
    for client_id in peer_ids {
        let origin = if client_id == writer {
            ChangeOrigin::Local
        } else {
            ChangeOrigin::Remote
        };
        let change = MapChange {
            map: map.to_string(),
            key: key.to_string(),
            kind,
            origin,
        };

        let mut running = match state.borrow_mut().peer_mut(client_id) {
            Some(peer) => peer.observers.remove(map).unwrap_or_default(),
            None => continue,
        };
        for observer in running.iter_mut() {
            observer(&change);
        }
        if let Some(peer) = state.borrow_mut().peer_mut(client_id) {
            let slot = peer.observers.entry(map.to_string()).or_default();
            running.append(slot);
            *slot = running;
        }
    }
}

/// Map handle shared by both in-process backends.
struct SharedMap {
    name: String,
    client_id: u64,
    state: Shared,
}

impl CrdtMap for SharedMap {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.state
            .borrow()
            .maps
            .get(&self.name)
            .and_then(|m| m.get(key))
            .cloned()
    }

    fn set(&mut self, key: &str, value: Vec<u8>) {
        self.state
            .borrow_mut()
            .maps
            .entry(self.name.clone())
            .or_default()
            .insert(key.to_string(), value);
        record(&self.state, self.client_id, &self.name, key, ChangeKind::Set);
    }

    fn delete(&mut self, key: &str) -> bool {
        let removed = self
            .state
            .borrow_mut()
            .maps
            .get_mut(&self.name)
            .and_then(|m| m.remove(key))
            .is_some();
        if removed {
            record(&self.state, self.client_id, &self.name, key, ChangeKind::Delete);
        }
        removed
    }

    fn keys(&self) -> Vec<String> {
        self.state
            .borrow()
            .maps
            .get(&self.name)
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn len(&self) -> usize {
        self.state
            .borrow()
            .maps
            .get(&self.name)
            .map_or(0, BTreeMap::len)
    }

    fn observe(&mut self, observer: Observer) {
        if let Some(peer) = self.state.borrow_mut().peer_mut(self.client_id) {
            peer.observers
                .entry(self.name.clone())
                .or_default()
                .push(observer);
        }
    }
}

fn open_map(state: &Shared, client_id: u64, name: &str) -> Box<dyn CrdtMap> {
    Box::new(SharedMap {
        name: name.to_string(),
        client_id,
        state: Rc::clone(state),
    })
}

fn run_transaction(state: &Shared, client_id: u64, f: &mut dyn FnMut()) {
    if let Some(peer) = state.borrow_mut().peer_mut(client_id) {
        peer.tx_depth += 1;
    }
    f();
    let flushed = {
        let mut st = state.borrow_mut();
        match st.peer_mut(client_id) {
            Some(peer) => {
                peer.tx_depth -= 1;
                if peer.tx_depth == 0 {
                    std::mem::take(&mut peer.pending)
                } else {
                    Vec::new()
                }
            }
            None => Vec::new(),
        }
    };
    for (map, key, kind) in flushed {
        broadcast(state, client_id, &map, &key, kind);
    }
}

// ─── Offline backend ─────────────────────────────────────────────────────

/// In-memory root for offline, single-user documents.
pub struct MemoryRoot {
    state: Shared,
    client_id: u64,
}

impl MemoryRoot {
    pub fn new() -> Self {
        let state: Shared = Rc::default();
        let client_id = state.borrow_mut().connect();
        Self { state, client_id }
    }
}

impl Default for MemoryRoot {
    fn default() -> Self {
        Self::new()
    }
}

impl CrdtRoot for MemoryRoot {
    fn client_id(&self) -> u64 {
        self.client_id
    }

    fn map(&self, name: &str) -> Box<dyn CrdtMap> {
        open_map(&self.state, self.client_id, name)
    }

    fn transact(&self, f: &mut dyn FnMut()) {
        run_transaction(&self.state, self.client_id, f);
    }
}

// ─── Loopback backend ────────────────────────────────────────────────────

/// An in-process session that connects several roots to one shared state.
#[derive(Clone, Default)]
pub struct LoopbackHub {
    state: Shared,
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect a new peer to the session.
    pub fn connect(&self) -> LoopbackRoot {
        let client_id = self.state.borrow_mut().connect();
        log::debug!("loopback peer {client_id} connected");
        LoopbackRoot {
            state: Rc::clone(&self.state),
            client_id,
        }
    }

    pub fn peer_count(&self) -> usize {
        self.state.borrow().peers.len()
    }
}

/// One peer of a [`LoopbackHub`]. Dropping it disconnects the peer.
pub struct LoopbackRoot {
    state: Shared,
    client_id: u64,
}

impl CrdtRoot for LoopbackRoot {
    fn client_id(&self) -> u64 {
        self.client_id
    }

    fn map(&self, name: &str) -> Box<dyn CrdtMap> {
        open_map(&self.state, self.client_id, name)
    }

    fn transact(&self, f: &mut dyn FnMut()) {
        run_transaction(&self.state, self.client_id, f);
    }
}

impl Drop for LoopbackRoot {
    fn drop(&mut self) {
        if let Ok(mut st) = self.state.try_borrow_mut() {
            st.peers.retain(|p| p.client_id != self.client_id);
        }
    }
}
