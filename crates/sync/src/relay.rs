//! Local bus between the store, peer connections and in-process observers
//!
//! Every bundle that lands in the store through a [`Relay`] (committed
//! locally, received from a peer, or written to a shared store directory by
//! another process) is offered to every open connection and then to every
//! registered callback. Each connection decides for itself whether its peer
//! still needs the bundle.
//!
//! The relay owns an [`EventLoop`]; [`Relay::run_for`] and friends drive it.
//! Connections and listeners created through the relay are announced to the
//! loop on its next iteration.
//!
//! # Reentrancy
//!
//! Callbacks run while the relay holds its callback list and must not apply
//! bundles or drive the loop themselves.

use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use gink_core::proto::{sync_message, ConnectRequest, SyncMessage};
use gink_core::{BundleInfo, BundleWrapper, Error, HasMap, Result};
use gink_storage::BundleStore;

use crate::connection::{allow_all, AuthFunc, Connection, ConnectionStats, SyncFunc};
use crate::listener::{Listener, DEFAULT_PORT};
use crate::looping::{Announced, EventLoop, FileNo, Finished, Selectable};
use crate::permissions::Permissions;
use crate::transport::{dial, Transport};

/// Registry key of the relay's own selectable; never a real descriptor.
const RELAY_FILENO: FileNo = -1;

/// Observer of every bundle applied through the relay.
pub type OnBundle = Box<dyn FnMut(&BundleWrapper) + Send>;

/// Identifies one connection of a relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

/// How accepted peers are treated.
#[derive(Clone)]
pub struct RelayOptions {
    /// Permissions for each connecting peer
    pub auth_func: AuthFunc,
    /// Greeting for each accepted peer; defaults to the store's chain heads
    pub sync_func: Option<SyncFunc>,
}

impl Default for RelayOptions {
    fn default() -> Self {
        RelayOptions {
            auth_func: allow_all(),
            sync_func: None,
        }
    }
}

struct Shared {
    store: Arc<dyn BundleStore>,
    auth_func: AuthFunc,
    sync_func: SyncFunc,
    connections: Mutex<BTreeMap<ConnectionId, Arc<Mutex<Connection>>>>,
    callbacks: Mutex<Vec<OnBundle>>,
    pending: Mutex<Announced>,
    not_acked: Mutex<HashSet<BundleInfo>>,
    event_loop: Mutex<EventLoop>,
    next_id: AtomicU64,
}

/// Fans bundles out to peers and callbacks. Cheap to clone.
#[derive(Clone)]
pub struct Relay {
    inner: Arc<Shared>,
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("store", &self.inner.store.kind())
            .field("connections", &self.connection_count())
            .finish()
    }
}

/// Where to connect: `[ws://|wss://]host[:port][/path]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Host name or address
    pub host: String,
    /// TCP port; [`DEFAULT_PORT`] when omitted
    pub port: u16,
    /// Requested path, always starting with `/`
    pub path: String,
    /// Whether the target asked for TLS
    pub secure: bool,
}

impl Target {
    /// Parse a connection target.
    pub fn parse(target: &str) -> Result<Target> {
        let (secure, rest) = if let Some(rest) = target.strip_prefix("wss://") {
            (true, rest)
        } else if let Some(rest) = target.strip_prefix("ws://") {
            (false, rest)
        } else {
            (false, target)
        };
        let (authority, path) = match rest.find('/') {
            Some(slash) => (&rest[..slash], rest[slash..].trim_start_matches('/')),
            None => (rest, ""),
        };
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| Error::ConfigError(format!("bad port in target {target}")))?;
                (host, port)
            }
            None => (authority, DEFAULT_PORT),
        };
        if host.is_empty() {
            return Err(Error::ConfigError(format!("no host in target {target}")));
        }
        Ok(Target {
            host: host.to_string(),
            port,
            path: format!("/{path}"),
            secure,
        })
    }
}

impl Relay {
    /// Relay over `store` accepting every peer.
    pub fn new(store: Arc<dyn BundleStore>) -> Result<Self> {
        Self::with_options(store, RelayOptions::default())
    }

    /// Relay over `store` with explicit peer policy.
    ///
    /// Bundles still in the store's outbox count as unacknowledged.
    pub fn with_options(store: Arc<dyn BundleStore>, options: RelayOptions) -> Result<Self> {
        let sync_func = match options.sync_func {
            Some(sync_func) => sync_func,
            None => {
                let store = store.clone();
                let greeting: SyncFunc = Arc::new(move |_: &str, _: Permissions, _: &str| {
                    Ok(store.get_has_map(None)?.to_greeting())
                });
                greeting
            }
        };
        let not_acked = store
            .read_through_outbox()?
            .iter()
            .map(|wrapper| wrapper.info().clone())
            .collect();
        let inner = Arc::new(Shared {
            store,
            auth_func: options.auth_func,
            sync_func,
            connections: Mutex::new(BTreeMap::new()),
            callbacks: Mutex::new(Vec::new()),
            pending: Mutex::new(Vec::new()),
            not_acked: Mutex::new(not_acked),
            event_loop: Mutex::new(EventLoop::new()),
            next_id: AtomicU64::new(1),
        });
        inner.event_loop.lock().register(Box::new(RelayHub {
            relay: Arc::downgrade(&inner),
        }));
        Ok(Relay { inner })
    }

    fn upgrade(weak: &Weak<Shared>) -> Option<Relay> {
        weak.upgrade().map(|inner| Relay { inner })
    }

    /// The store bundles are applied to.
    pub fn store(&self) -> &Arc<dyn BundleStore> {
        &self.inner.store
    }

    /// Observe every bundle applied from now on.
    pub fn add_callback(&self, callback: impl FnMut(&BundleWrapper) + Send + 'static) {
        self.inner.callbacks.lock().push(Box::new(callback));
    }

    /// Apply a bundle and fan it out; returns whether it was new.
    ///
    /// `local` marks bundles this instance produced: they are queued in the
    /// outbox until a peer acknowledges them.
    pub fn receive(&self, wrapper: &BundleWrapper, local: bool) -> Result<bool> {
        let mut fan_out = |applied: &BundleWrapper| self.on_bundle(applied);
        let (info, accepted) = self
            .inner
            .store
            .apply_bundle(wrapper, Some(&mut fan_out), local)?;
        if accepted && local {
            self.inner.not_acked.lock().insert(info);
        }
        Ok(accepted)
    }

    fn on_bundle(&self, wrapper: &BundleWrapper) {
        debug!(info = %wrapper.info(), "relaying bundle");
        let connections: Vec<_> = self.inner.connections.lock().values().cloned().collect();
        for connection in connections {
            let mut connection = connection.lock();
            if let Err(e) = connection.send_bundle(wrapper) {
                warn!(peer = connection.name(), error = %e, "dropping connection");
                connection.close();
            }
        }
        for callback in self.inner.callbacks.lock().iter_mut() {
            callback(wrapper);
        }
    }

    /// Report bundles other processes journaled in a shared store.
    pub fn refresh(&self) -> Result<usize> {
        let mut fan_out = |found: &BundleWrapper| self.on_bundle(found);
        self.inner.store.refresh(Some(&mut fan_out))
    }

    /// Claim a chain of `identity` whose owner has exited, if any.
    ///
    /// Bundles other processes journaled in the meantime are fanned out.
    pub fn maybe_reuse_chain(&self, identity: &str) -> Result<Option<BundleInfo>> {
        let mut fan_out = |found: &BundleWrapper| self.on_bundle(found);
        self.inner
            .store
            .maybe_reuse_chain(identity, Some(&mut fan_out))
    }

    fn adopt(&self, connection: Connection) -> (ConnectionId, Box<dyn Selectable>) {
        let id = ConnectionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let fileno = connection.fileno();
        let connection = Arc::new(Mutex::new(connection));
        self.inner.connections.lock().insert(id, connection.clone());
        let handle = ConnectionHandle {
            id,
            fileno,
            connection,
            relay: Arc::downgrade(&self.inner),
        };
        (id, Box::new(handle))
    }

    fn adopt_outgoing(
        &self,
        transport: Transport,
        addr: SocketAddr,
        target: &Target,
        auth_data: Option<&[u8]>,
    ) -> Result<ConnectionId> {
        let request = ConnectRequest {
            path: target.path.clone(),
            auth_data: auth_data.unwrap_or_default().to_vec(),
        };
        let greeting = self.inner.store.get_has_map(None)?.to_greeting();
        let connection = Connection::client(transport, addr.to_string(), &request, &greeting)?;
        let (id, handle) = self.adopt(connection);
        self.inner.pending.lock().push(handle);
        Ok(id)
    }

    /// Open a connection to another instance.
    pub fn connect_to(&self, target: &str, auth_data: Option<&[u8]>) -> Result<ConnectionId> {
        info!(target, "initiating connection");
        let target = Target::parse(target)?;
        if target.secure {
            return Err(Error::ConfigError(format!(
                "{} requires a TLS client configuration",
                target.host
            )));
        }
        let (stream, addr) = dial(&target.host, target.port)?;
        self.adopt_outgoing(Transport::Plain(stream), addr, &target, auth_data)
    }

    /// Open a TLS connection to another instance.
    #[cfg(feature = "tls")]
    pub fn connect_secure(
        &self,
        target: &str,
        auth_data: Option<&[u8]>,
        config: &Arc<rustls::ClientConfig>,
    ) -> Result<ConnectionId> {
        info!(target, "initiating secure connection");
        let target = Target::parse(target)?;
        let (stream, addr) = dial(&target.host, target.port)?;
        let transport = crate::tls::connect(config, &target.host, stream)?;
        self.adopt_outgoing(transport, addr, &target, auth_data)
    }

    /// Accept peers on `addr:port`; returns the bound address.
    pub fn start_listening(&self, addr: &str, port: u16) -> Result<SocketAddr> {
        self.listen(Listener::bind(addr, port)?)
    }

    /// Accept TLS peers on `addr:port`; returns the bound address.
    #[cfg(feature = "tls")]
    pub fn start_listening_secure(
        &self,
        addr: &str,
        port: u16,
        config: Arc<rustls::ServerConfig>,
    ) -> Result<SocketAddr> {
        self.listen(Listener::bind(addr, port)?.with_tls(config))
    }

    fn listen(&self, listener: Listener) -> Result<SocketAddr> {
        let local = listener.local_addr()?;
        let handle = ListenerHandle {
            fileno: listener.fileno(),
            listener,
            relay: Arc::downgrade(&self.inner),
        };
        self.inner.pending.lock().push(Box::new(handle));
        Ok(local)
    }

    /// Hang up on one peer; it leaves the loop on the next iteration.
    pub fn disconnect(&self, id: ConnectionId) -> bool {
        let connection = self.inner.connections.lock().get(&id).cloned();
        match connection {
            Some(connection) => {
                connection.lock().close();
                true
            }
            None => false,
        }
    }

    /// Ids of open connections.
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.inner.connections.lock().keys().copied().collect()
    }

    /// Number of open connections.
    pub fn connection_count(&self) -> usize {
        self.inner.connections.lock().len()
    }

    /// Traffic counters of one connection.
    pub fn connection_stats(&self, id: ConnectionId) -> Option<ConnectionStats> {
        let connection = self.inner.connections.lock().get(&id).cloned();
        connection.map(|c| c.lock().stats())
    }

    /// What one peer is known to have.
    pub fn peer_has(&self, id: ConnectionId) -> Option<HasMap> {
        let connection = self.inner.connections.lock().get(&id).cloned();
        connection.and_then(|c| c.lock().peer_has().cloned())
    }

    /// Locally produced bundles no peer has acknowledged yet.
    pub fn not_acked(&self) -> usize {
        self.inner.not_acked.lock().len()
    }

    /// One loop iteration, sleeping up to `idle` when nothing is ready.
    pub fn run_once(&self, idle: Duration) -> usize {
        self.inner.event_loop.lock().run_once(idle)
    }

    /// Drive the loop until `deadline`.
    pub fn run_until(&self, deadline: Instant) {
        self.inner.event_loop.lock().run(Some(deadline));
    }

    /// Drive the loop for `duration`.
    pub fn run_for(&self, duration: Duration) {
        self.run_until(Instant::now() + duration);
    }

    /// Hang up on every peer and stop listening.
    pub fn close(&self) {
        let pending = std::mem::take(&mut *self.inner.pending.lock());
        for mut selectable in pending {
            selectable.close();
        }
        self.inner.event_loop.lock().close_all();
        self.inner.connections.lock().clear();
    }

    fn dispatch(&self, connection: &Arc<Mutex<Connection>>, message: SyncMessage) -> Result<()> {
        match message.contents {
            Some(sync_message::Contents::Bundle(bytes)) => {
                let wrapper = BundleWrapper::new(bytes)?;
                {
                    let mut peer = connection.lock();
                    if !peer.permissions().contains(Permissions::WRITE) {
                        debug!(peer = peer.name(), "ignoring bundle from peer without write access");
                        return Ok(());
                    }
                    peer.note_received(wrapper.info());
                }
                self.receive(&wrapper, false)?;
                connection.lock().send(&wrapper.info().as_ack())
            }
            Some(sync_message::Contents::Greeting(greeting)) => {
                let peer_has = HasMap::from_greeting(&greeting);
                {
                    let mut peer = connection.lock();
                    if !peer.permissions().contains(Permissions::READ) {
                        debug!(peer = peer.name(), "ignoring greeting from peer without read access");
                        return Ok(());
                    }
                    peer.set_peer_has(peer_has.clone());
                }
                self.send_missing(connection, &peer_has)
            }
            Some(sync_message::Contents::Ack(ack)) => {
                let info = BundleInfo::from_ack(&ack);
                connection.lock().note_ack(&info)?;
                if self.inner.not_acked.lock().remove(&info) {
                    self.inner.store.remove_from_outbox(&[info])?;
                }
                Ok(())
            }
            None => Err(Error::ProtocolError("message without contents".to_string())),
        }
    }

    /// Stream what a newly greeted peer lacks, in apply order.
    ///
    /// A store that keeps no journal can only offer its outbox.
    fn send_missing(&self, connection: &Arc<Mutex<Connection>>, peer_has: &HasMap) -> Result<()> {
        let mut sink = |wrapper: &BundleWrapper| -> Result<()> {
            connection.lock().send_bundle(wrapper).map(|_| ())
        };
        match self.inner.store.get_bundles(&mut sink, Some(peer_has), None) {
            Err(Error::RetentionConfig(_)) => {
                for wrapper in self.inner.store.read_through_outbox()? {
                    let mut peer = connection.lock();
                    let sendable = peer
                        .peer_has()
                        .is_some_and(|has| has.is_valid_extension(wrapper.info()));
                    if sendable {
                        peer.send_bundle(&wrapper)?;
                    } else {
                        debug!(info = %wrapper.info(), "outbox bundle does not extend peer");
                    }
                }
                Ok(())
            }
            other => other,
        }
    }
}

/// The relay's own selectable: announces new connections and listeners and
/// picks up bundles written by other processes.
struct RelayHub {
    relay: Weak<Shared>,
}

impl Selectable for RelayHub {
    fn fileno(&self) -> FileNo {
        RELAY_FILENO
    }

    fn poll_ready(&mut self) -> bool {
        match self.relay.upgrade() {
            Some(shared) => !shared.pending.lock().is_empty(),
            None => true,
        }
    }

    fn on_ready(&mut self) -> std::result::Result<Announced, Finished> {
        let shared = self.relay.upgrade().ok_or(Finished)?;
        let announced = std::mem::take(&mut *shared.pending.lock());
        Ok(announced)
    }

    fn on_timeout(&mut self) {
        if let Some(relay) = Relay::upgrade(&self.relay) {
            if let Err(e) = relay.refresh() {
                error!(error = %e, "store refresh failed");
            }
        }
    }
}

struct ConnectionHandle {
    id: ConnectionId,
    fileno: FileNo,
    connection: Arc<Mutex<Connection>>,
    relay: Weak<Shared>,
}

impl Selectable for ConnectionHandle {
    fn fileno(&self) -> FileNo {
        self.fileno
    }

    fn poll_ready(&mut self) -> bool {
        self.connection.lock().poll_ready()
    }

    fn on_ready(&mut self) -> std::result::Result<Announced, Finished> {
        let relay = Relay::upgrade(&self.relay).ok_or(Finished)?;
        let received = self.connection.lock().receive();
        let messages = received.map_err(|e| {
            warn!(error = %e, "unreadable message; closing connection");
            Finished
        })?;
        for message in messages {
            if let Err(e) = relay.dispatch(&self.connection, message) {
                warn!(error = %e, "closing connection");
                return Err(Finished);
            }
        }
        let connection = self.connection.lock();
        if connection.is_closed() || connection.hung_up() {
            return Err(Finished);
        }
        Ok(Vec::new())
    }

    fn on_timeout(&mut self) {
        let mut connection = self.connection.lock();
        if !connection.is_closed() {
            if let Err(e) = connection.flush() {
                debug!(peer = connection.name(), error = %e, "flush failed");
            }
        }
    }

    fn close(&mut self) {
        if let Some(shared) = self.relay.upgrade() {
            shared.connections.lock().remove(&self.id);
        }
        let mut connection = self.connection.lock();
        info!(peer = connection.name(), "disconnected");
        connection.close();
    }
}

struct ListenerHandle {
    fileno: FileNo,
    listener: Listener,
    relay: Weak<Shared>,
}

impl Selectable for ListenerHandle {
    fn fileno(&self) -> FileNo {
        self.fileno
    }

    fn poll_ready(&mut self) -> bool {
        self.listener.poll_ready()
    }

    fn on_ready(&mut self) -> std::result::Result<Announced, Finished> {
        let relay = Relay::upgrade(&self.relay).ok_or(Finished)?;
        let mut announced: Announced = Vec::new();
        for (transport, addr) in self.listener.take_accepted() {
            info!(%addr, "accepted incoming connection");
            let connection = Connection::server(
                transport,
                addr.to_string(),
                relay.inner.auth_func.clone(),
                relay.inner.sync_func.clone(),
            );
            let (_, handle) = relay.adopt(connection);
            announced.push(handle);
        }
        Ok(announced)
    }
}
