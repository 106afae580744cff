//! The BGP server: listener and dialer orchestration, the per-connection session loop, collision resolution between competing
//! connections to the same neighbor, and the merge of learned routes into the server-wide Loc-RIB.
//!
//! Each connection runs in its own tokio task. The server itself only holds the peer templates, the registry of live sessions and the
//! Loc-RIB; cross-session actions (collision resolution, shutdown) go through the registry and a per-session close signal instead of
//! direct task-to-task references.

use crate::{
    session::{
        fsm_error,
        Session,
        SessionState,
    },
    SessionError,
};
use async_trait::async_trait;
use aurelius_bgp::{
    is_full_message,
    message_length,
    prefix::ProtoTuple,
    rfc2918::RouteRefreshMessage,
    rfc3392::Capability,
    rfc4271::{
        BGPMessageHeader,
        NotificationMessage,
        UpdateMessage,
    },
    BGPMessage,
};
use aurelius_common::Prefix;
use aurelius_rt::{
    rib::Rib,
    route::{
        accept_all_filter,
        reject_all_filter,
        Filter,
        PeerId,
        Route,
        RouteAction,
    },
    RoutingTable,
};
use log::{
    debug,
    error,
    info,
    trace,
    warn,
};
use socket2::{
    Domain,
    Socket,
    Type,
};
use std::{
    collections::{
        BTreeSet,
        HashMap,
    },
    future,
    io,
    net::{
        IpAddr,
        Ipv4Addr,
        SocketAddr,
    },
    sync::Arc,
    time::Duration,
};
use tokio::{
    io::{
        AsyncReadExt,
        AsyncWriteExt,
    },
    net::{
        tcp::{
            OwnedReadHalf,
            OwnedWriteHalf,
        },
        TcpListener,
        TcpStream,
    },
    sync::{
        Mutex,
        MutexGuard,
        Notify,
    },
    task::JoinHandle,
    time::{
        sleep,
        sleep_until,
        Instant,
    },
};

/// Creates a TCP listener bound to the given address with the reuse flags a long-running routing daemon wants across restarts.
pub async fn create_tcp_listener(socket_address: SocketAddr) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(socket_address), Type::STREAM, None)?;
    if socket_address.is_ipv6() {
        socket.set_only_v6(true)?;
    }

    // Configure listener
    socket.set_reuse_address(true)?;
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&socket_address.into())?;
    socket.listen(4096)?;

    let listener = TcpListener::from_std(socket.into())?;
    debug!("TCP listener is listening on {}", socket_address);
    Ok(listener)
}

/// Application hooks invoked by the session loop. All methods default to doing nothing, an application implements the ones it cares
/// about and attaches the observer to its peer templates.
#[async_trait]
pub trait SessionObserver: Send + Sync {
    async fn on_established(&self, _peer: PeerId) {}
    async fn on_update(&self, _peer: PeerId, _update: &UpdateMessage) {}
    async fn on_route_refresh(&self, _peer: PeerId, _route_refresh: &RouteRefreshMessage) {}
    async fn on_notification(&self, _peer: PeerId, _notification: &NotificationMessage) {}
    async fn on_shutdown(&self, _peer: PeerId) {}
}

/// The configured settings for one neighbor (or a whole prefix of acceptable neighbors). Inbound connections are matched against the
/// templates by longest-prefix-match on the remote address; active templates additionally dial out themselves.
#[derive(Clone)]
pub struct PeerConfig {
    /// The prefix inbound connections are matched against. A single neighbor uses its host prefix.
    pub peer_prefix: Prefix,
    /// The address dialed for active peers.
    pub peer_address: Option<SocketAddr>,
    /// Whether the local side initiates the connection.
    pub active: bool,
    pub local_asn: u32,
    pub local_router_id: Ipv4Addr,
    pub hold_time: u16,
    pub connect_retry_time: u16,
    pub local_capabilities: Vec<Capability>,
    pub local_protocols: Vec<ProtoTuple>,
    /// Import policy: learned routes have to pass this filter to enter the Loc-RIB.
    pub filter_in: Filter,
    /// Export policy: routes have to pass this filter to enter the Adj-RIB-Out.
    pub filter_out: Filter,
    /// Routes seeded into the Adj-RIB-Out when a session to this neighbor is created; they are replayed once the session establishes.
    pub announcements: Vec<Route>,
    pub observer: Option<Arc<dyn SessionObserver>>,
}

impl PeerConfig {
    pub fn new(peer_prefix: Prefix, local_asn: u32, local_router_id: Ipv4Addr) -> Self {
        Self {
            peer_prefix,
            peer_address: None,
            active: false,
            local_asn,
            local_router_id,
            hold_time: 90,
            connect_retry_time: 30,
            local_capabilities: Vec::new(),
            local_protocols: Vec::new(),
            filter_in: reject_all_filter(),
            filter_out: accept_all_filter(),
            announcements: Vec::new(),
            observer: None,
        }
    }
}

/// The view other tasks have of one live session: its state for collision resolution and a close signal carrying the NOTIFICATION the
/// session should emit before tearing itself down.
struct SessionShared {
    state: Mutex<SessionState>,
    /// The initiator identity used as tie breaker in collision resolution, as (router id, AS number).
    initiator: Mutex<(u32, u32)>,
    close_reason: Mutex<Option<NotificationMessage>>,
    closed: Notify,
}

impl SessionShared {
    fn new() -> Self {
        Self {
            state: Mutex::new(SessionState::Idle),
            initiator: Mutex::new((0, 0)),
            close_reason: Mutex::new(None),
            closed: Notify::new(),
        }
    }

    async fn close_with(&self, notification: NotificationMessage) {
        *self.close_reason.lock().await = Some(notification);
        self.closed.notify_one();
    }
}

/// One live connection to a neighbor: the protocol state machine plus the per-peer route databases and timer deadlines. Owned by the
/// connection's task; everything other tasks may touch lives behind the shared handle.
pub struct ServerSession {
    pub session: Session,
    pub active: bool,
    pub peer_address: IpAddr,
    pub filter_in: Filter,
    pub filter_out: Filter,
    /// Learned routes of this peer, before import policy.
    pub adj_rib_in: Mutex<Rib<Route>>,
    /// Routes advertised to this peer, after export policy. Single writer, no lock needed.
    pub adj_rib_out: Rib<Route>,
    observer: Option<Arc<dyn SessionObserver>>,
    shared: Arc<SessionShared>,
    /// Whether this session reached the established state at some point; decides whether teardown has Loc-RIB state to withdraw.
    reached_established: bool,
    hold_deadline: Option<Instant>,
    keepalive_deadline: Option<Instant>,
}

impl ServerSession {
    pub(crate) fn from_config(config: &PeerConfig, peer_address: IpAddr, active: bool) -> Self {
        let mut session = Session::new(config.local_asn, config.local_router_id.to_bits(), config.hold_time);
        session.connect_retry_time = config.connect_retry_time;
        session.local_capabilities = config.local_capabilities.clone();
        session.local_protocols = config.local_protocols.clone();

        let mut server_session = Self {
            session,
            active,
            peer_address,
            filter_in: config.filter_in.clone(),
            filter_out: config.filter_out.clone(),
            adj_rib_in: Mutex::new(Rib::new()),
            adj_rib_out: Rib::new(),
            observer: config.observer.clone(),
            shared: Arc::new(SessionShared::new()),
            reached_established: false,
            hold_deadline: None,
            keepalive_deadline: None,
        };
        for route in &config.announcements {
            server_session.announce(route.clone());
        }
        server_session
    }

    /// The identity of the side that initiated this connection, as (router id, AS number).
    fn initiator(&self) -> (u32, u32) {
        if self.active {
            (self.session.local_router_id, self.session.local_asn)
        } else {
            (self.session.peer_router_id, self.session.peer_asn)
        }
    }

    pub(crate) async fn set_state(&mut self, state: SessionState) {
        debug!("Session with {} went from {} to {}", self.peer_address, self.session.state, state);
        self.session.state = state;
        *self.shared.state.lock().await = state;
    }

    /// Mirrors a transition the state machine took on its own into the shared handle other tasks observe.
    pub(crate) async fn sync_shared_state(&mut self) {
        let state = self.session.state;
        let mut shared = self.shared.state.lock().await;
        if *shared != state {
            debug!("Session with {} went from {} to {}", self.peer_address, *shared, state);
            *shared = state;
        }
    }

    /// Rearms the hold timer. A (negotiated) hold time of zero keeps the timer disabled.
    pub fn reset_hold_timer(&mut self) {
        let hold_time = self.session.hold_time;
        self.hold_deadline = (hold_time != 0).then(|| Instant::now() + Duration::from_secs(hold_time as u64));
    }

    /// Rearms the keep-alive timer to a third of the negotiated hold time.
    pub fn restart_keepalive_timer(&mut self) {
        let keepalive_time = self.session.keepalive_time();
        self.keepalive_deadline = (keepalive_time != 0).then(|| Instant::now() + Duration::from_secs(keepalive_time as u64));
    }

    fn cancel_timers(&mut self) {
        self.hold_deadline = None;
        self.keepalive_deadline = None;
    }

    /// Applies the export filter and stores the route in the Adj-RIB-Out. Returns the update message to send when the session is
    /// established.
    pub fn announce(&mut self, route: Route) -> Option<UpdateMessage> {
        if !(self.filter_out)(&route) {
            return None;
        }
        self.adj_rib_out.register_proto(route.proto());
        let update = route.to_update_message();
        if self.adj_rib_out.add(route).is_err() {
            return None;
        }
        (self.session.state == SessionState::Established).then_some(update)
    }

    /// Removes the route from the Adj-RIB-Out. Returns the withdrawal message to send when the session is established and the route was
    /// actually advertised before.
    pub fn withdraw(&mut self, route: &Route) -> Option<UpdateMessage> {
        let key = (route.afi, route.safi, *route.ip_prefix()?);
        if !self.adj_rib_out.contains_key(&key) {
            return None;
        }
        let _ = self.adj_rib_out.remove(&key);
        (self.session.state == SessionState::Established).then(|| route.to_withdraw_message())
    }

    #[cfg(test)]
    pub(crate) async fn close_requested(&self) -> Option<NotificationMessage> {
        self.shared.close_reason.lock().await.clone()
    }
}

fn message_name(message: &BGPMessage) -> &'static str {
    match message {
        BGPMessage::Open(_) => "OPEN",
        BGPMessage::Update(_) => "UPDATE",
        BGPMessage::Notification(_) => "NOTIFICATION",
        BGPMessage::KeepAlive => "KEEPALIVE",
        BGPMessage::RouteRefresh(_) => "ROUTE_REFRESH",
        BGPMessage::Unknown { .. } => "UNKNOWN",
    }
}

/// Reads whole BGP PDUs off a stream. Partially received bytes stay in the buffer across calls, which makes [`MessageReader::next_pdu`]
/// safe to race against timers in a `select!`.
struct MessageReader {
    reader: OwnedReadHalf,
    buffer: Vec<u8>,
}

impl MessageReader {
    fn new(reader: OwnedReadHalf) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(4096),
        }
    }

    /// Waits until the buffer holds one complete message and returns its raw bytes including the header.
    async fn next_pdu(&mut self) -> io::Result<Vec<u8>> {
        loop {
            if is_full_message(&self.buffer) {
                let length = message_length(&self.buffer).unwrap_or(BGPMessageHeader::LENGTH);
                return Ok(self.buffer.drain(..length).collect());
            }
            if matches!(message_length(&self.buffer), Some(length) if length < BGPMessageHeader::LENGTH) {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "peer declared an impossible message length"));
            }
            if self.reader.read_buf(&mut self.buffer).await? == 0 {
                return Err(io::Error::from(io::ErrorKind::UnexpectedEof));
            }
        }
    }
}

async fn send_message(writer: &mut OwnedWriteHalf, peer_address: &IpAddr, message: &BGPMessage) -> io::Result<()> {
    trace!("[{}] Outgoing: {}", peer_address, message_name(message));
    writer.write_all(&message.pack()).await
}

/// Sleeps until the deadline, or forever when the timer is disabled.
async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => future::pending().await,
    }
}

enum Flow {
    Continue,
    Shutdown,
}

struct ServerInner {
    peers: Mutex<RoutingTable<PeerConfig>>,
    sessions: Mutex<HashMap<PeerId, Arc<SessionShared>>>,
    loc_rib: Mutex<Rib<BTreeSet<Route>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// The BGP speaker. Peers are configured through templates matched by remote address; the server accepts inbound connections on any
/// listener handed to [`BGPServer::serve`] and dials active peers once [`BGPServer::start`] armed their reconnect loops.
#[derive(Clone)]
pub struct BGPServer {
    inner: Arc<ServerInner>,
}

impl Default for BGPServer {
    fn default() -> Self {
        Self::new()
    }
}

impl BGPServer {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ServerInner {
                peers: Mutex::new(RoutingTable::new()),
                sessions: Mutex::new(HashMap::new()),
                loc_rib: Mutex::new(Rib::new()),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Registers a peer template. Inbound connections from addresses covered by the template's prefix use its settings; the most
    /// specific template wins.
    pub async fn add_peer(&self, config: PeerConfig) {
        let mut peers = self.inner.peers.lock().await;
        // The peers table is rooted at ::/0 and coerces IPv4 prefixes itself, this cannot fail.
        let _ = peers.insert(config.peer_prefix, config);
    }

    /// The server-wide Loc-RIB holding the set of accepted paths per prefix. Iteration needs the guard held.
    pub async fn loc_rib(&self) -> MutexGuard<'_, Rib<BTreeSet<Route>>> {
        self.inner.loc_rib.lock().await
    }

    /// Whether a session to the given neighbor is currently registered.
    pub async fn has_session(&self, peer: &PeerId) -> bool {
        self.inner.sessions.lock().await.contains_key(peer)
    }

    /// Arms the reconnect loop of every active peer template.
    pub async fn start(&self) {
        let configs: Vec<PeerConfig> = {
            let peers = self.inner.peers.lock().await;
            peers.values().filter(|config| config.active).cloned().collect()
        };
        let mut tasks = self.inner.tasks.lock().await;
        for config in configs {
            tasks.push(self.spawn_connect_loop(config));
        }
    }

    /// Closes every live session with a CEASE notification and stops the reconnect loops.
    pub async fn stop(&self) {
        let sessions: Vec<Arc<SessionShared>> = self.inner.sessions.lock().await.values().cloned().collect();
        for shared in sessions {
            shared.close_with(NotificationMessage::new(NotificationMessage::CEASE, 0)).await;
        }
        for task in self.inner.tasks.lock().await.drain(..) {
            task.abort();
        }
    }

    /// Accept loop: runs until the listener fails, spawning one session task per inbound connection.
    pub async fn serve(&self, listener: TcpListener) -> io::Result<()> {
        loop {
            let (stream, peername) = listener.accept().await?;
            let server = self.clone();
            tokio::spawn(async move {
                server.handle_incoming(stream, peername).await;
            });
        }
    }

    async fn handle_incoming(&self, stream: TcpStream, peername: SocketAddr) {
        let config = {
            let peers = self.inner.peers.lock().await;
            match peers.lookup_address(&peername.ip()) {
                Ok((_, config)) => config.clone(),
                Err(_) => {
                    debug!("No peer template matches inbound connection from {}, dropping it", peername);
                    return;
                }
            }
        };

        info!("Accepted connection from peer {}", peername);
        let mut session = ServerSession::from_config(&config, peername.ip(), false);
        session.session.state = SessionState::Active;
        self.run_session(stream, session).await;
    }

    /// Dials the peer once and runs the session until it ends.
    pub async fn connect(&self, config: &PeerConfig) -> Result<(), SessionError> {
        let address = config
            .peer_address
            .ok_or_else(|| SessionError::Configuration("Active peer template without peer address".into()))?;

        let stream = TcpStream::connect(address).await?;
        info!("Successfully established connection to {}", address);
        let mut session = ServerSession::from_config(config, address.ip(), true);
        session.session.state = SessionState::Connect;
        self.run_session(stream, session).await;
        Ok(())
    }

    /// The reconnect fiber of one active peer: dial, run the session to its end, then retry after the configured connect-retry time.
    fn spawn_connect_loop(&self, config: PeerConfig) -> JoinHandle<()> {
        let server = self.clone();
        tokio::spawn(async move {
            let retry_time = Duration::from_secs(config.connect_retry_time.max(1) as u64);
            loop {
                match server.connect(&config).await {
                    Ok(()) => debug!("Session with {:?} ended, retry in {} seconds", config.peer_address, retry_time.as_secs()),
                    Err(error) => {
                        error!(
                            "Failed to establish connection to {:?} => {} (retry in {} seconds)",
                            config.peer_address,
                            error,
                            retry_time.as_secs()
                        );
                    }
                }
                sleep(retry_time).await;
            }
        })
    }

    /// Runs one connection through the handshake and the established message loop, then tears the session down: emit the appropriate
    /// NOTIFICATION (best effort), withdraw the peer's routes from the Loc-RIB, deregister and reset to idle.
    async fn run_session(&self, stream: TcpStream, mut session: ServerSession) {
        let (reader, mut writer) = stream.into_split();
        let mut reader = MessageReader::new(reader);
        let result = self.drive_session(&mut reader, &mut writer, &mut session).await;
        match &result {
            Ok(()) => {}
            Err(error) => {
                if let Some(notification) = error.to_notification() {
                    let message = BGPMessage::Notification(notification);
                    if let Err(error) = send_message(&mut writer, &session.peer_address, &message).await {
                        trace!("Unable to send closing notification to {} => {}", session.peer_address, error);
                    }
                }
                warn!("Session with {} failed => {}", session.peer_address, error);
            }
        }
        self.shutdown_session(&mut session).await;
    }

    async fn drive_session(
        &self,
        reader: &mut MessageReader,
        writer: &mut OwnedWriteHalf,
        session: &mut ServerSession,
    ) -> Result<(), SessionError> {
        // Our OPEN always goes out first; from OpenSent onwards the peer's messages drive the state machine. The hold and keep-alive
        // deadlines stay disabled until the session establishes, so only the read and close branches can fire during the handshake.
        let open = BGPMessage::Open(session.session.create_open_message());
        send_message(writer, &session.peer_address, &open).await?;
        session.set_state(SessionState::OpenSent).await;

        loop {
            let hold_deadline = session.hold_deadline;
            let keepalive_deadline = session.keepalive_deadline;
            tokio::select! {
                result = reader.next_pdu() => {
                    let message = session.session.decoder.decode(&result?)?;
                    trace!("[{}] Incoming: {}", session.peer_address, message_name(&message));
                    if session.session.state == SessionState::Established {
                        session.reset_hold_timer();
                    }
                    if let Flow::Shutdown = self.handle_message(writer, session, message).await? {
                        return Ok(());
                    }
                }
                _ = sleep_until_deadline(keepalive_deadline) => {
                    send_message(writer, &session.peer_address, &BGPMessage::KeepAlive).await?;
                    session.restart_keepalive_timer();
                }
                _ = sleep_until_deadline(hold_deadline) => {
                    return Err(SessionError::HoldTimerExpired);
                }
                _ = session.shared.closed.notified() => {
                    let reason = session.shared.close_reason.lock().await.take();
                    return Err(SessionError::Collision(
                        reason.unwrap_or_else(|| NotificationMessage::new(NotificationMessage::CEASE, 0)),
                    ));
                }
            }
        }
    }

    /// Dispatches one received message. UPDATE and ROUTE-REFRESH are served directly (they carry no state transition), everything else
    /// goes through [`Session::handle_message`]; the transitions the machine takes decide the server-side reactions: RIB setup and
    /// collision resolution once the peer's OPEN was loaded, timers and Adj-RIB-Out replay once the session established, teardown once
    /// a NOTIFICATION reset it to idle.
    async fn handle_message(
        &self,
        writer: &mut OwnedWriteHalf,
        session: &mut ServerSession,
        message: BGPMessage,
    ) -> Result<Flow, SessionError> {
        match &message {
            BGPMessage::Update(update) => {
                if session.session.state != SessionState::Established {
                    return Err(fsm_error(session.session.state));
                }
                self.on_update(session, update).await?;
                return Ok(Flow::Continue);
            }
            BGPMessage::RouteRefresh(route_refresh) => {
                if session.session.state != SessionState::Established {
                    return Err(fsm_error(session.session.state));
                }
                self.on_route_refresh(writer, session, route_refresh).await?;
                return Ok(Flow::Continue);
            }
            BGPMessage::Unknown { kind, .. } => {
                debug!("Peer {} sent a message of unknown kind {}", session.peer_address, kind);
                return Err(SessionError::Notification(NotificationMessage::new(NotificationMessage::MESSAGE_HEADER_ERROR, 3)));
            }
            _ => {}
        }

        let previous_state = session.session.state;
        let responses = session.session.handle_message(&message)?;

        if previous_state == SessionState::OpenSent && session.session.state == SessionState::OpenConfirm {
            // The peer's OPEN was just loaded: set up the RIBs for the negotiated protocols and resolve connection collisions before
            // the confirming KEEPALIVE goes out.
            let common_protocols: Vec<ProtoTuple> = session.session.common_protocols.iter().copied().collect();
            session.adj_rib_in.lock().await.register_protos(common_protocols.iter().copied());
            self.inner.loc_rib.lock().await.register_protos(common_protocols);
            self.register_session(session).await?;
        }
        session.sync_shared_state().await;

        for response in &responses {
            send_message(writer, &session.peer_address, response).await?;
        }

        if previous_state == SessionState::OpenConfirm && session.session.state == SessionState::Established {
            session.reached_established = true;
            info!("Session with {} (AS{}) established", session.peer_address, session.session.peer_asn);
            if let Some(observer) = &session.observer {
                observer.on_established(session.session.peer_id()).await;
            }

            // Replay the Adj-RIB-Out towards the fresh session.
            let updates: Vec<UpdateMessage> = session.adj_rib_out.values().map(Route::to_update_message).collect();
            for update in updates {
                send_message(writer, &session.peer_address, &BGPMessage::Update(update)).await?;
            }

            session.reset_hold_timer();
            session.restart_keepalive_timer();
        }

        if session.session.state == SessionState::Idle {
            // The peer ended the session with a NOTIFICATION; the machine recorded it as the last error.
            if let BGPMessage::Notification(notification) = &message {
                info!("Peer {} closed the session => {}", session.peer_address, notification);
                self.notify_observer_notification(session, notification).await;
            }
            return Ok(Flow::Shutdown);
        }
        Ok(Flow::Continue)
    }

    /// Imports the routes of one UPDATE: every action lands in the Adj-RIB-In first, announcements passing the import filter are merged
    /// into the Loc-RIB, withdrawals remove whatever the peer previously contributed for the prefix.
    async fn on_update(&self, session: &mut ServerSession, update: &UpdateMessage) -> Result<(), SessionError> {
        let peer_id = session.session.peer_id();
        let mut routes = Route::from_update(update).map_err(|_| {
            SessionError::Notification(NotificationMessage::new(NotificationMessage::UPDATE_MESSAGE_ERROR, 0))
        })?;
        for (_, route) in &mut routes {
            if !session.session.common_protocols.contains(&route.proto()) {
                return Err(SessionError::Notification(NotificationMessage::new(
                    NotificationMessage::UPDATE_MESSAGE_ERROR,
                    NotificationMessage::SUBCODE_OPTIONAL_ATTRIBUTE_ERROR,
                )));
            }
            route.source_router = Some(peer_id);
        }

        // First pass: the Adj-RIB-In. Withdrawals pull out the route the peer announced earlier so the Loc-RIB removal below matches
        // the stored path even when the withdrawal carries different attributes.
        let mut announced = Vec::new();
        let mut withdrawn = Vec::new();
        {
            let mut adj_rib_in = session.adj_rib_in.lock().await;
            for (action, route) in routes {
                match action {
                    RouteAction::Announce => {
                        adj_rib_in.add(route.clone())?;
                        announced.push(route);
                    }
                    RouteAction::Withdraw => {
                        let Some(net) = route.ip_prefix() else {
                            continue;
                        };
                        if let Ok(stored) = adj_rib_in.remove(&(route.afi, route.safi, *net)) {
                            withdrawn.push(stored);
                        }
                    }
                }
            }
        }

        // Second pass: merge into the Loc-RIB.
        {
            let mut loc_rib = self.inner.loc_rib.lock().await;
            for route in announced {
                if (session.filter_in)(&route) {
                    loc_rib.add_set(route)?;
                }
            }
            for route in &withdrawn {
                loc_rib.remove_set(route)?;
            }
        }

        if let Some(observer) = &session.observer {
            observer.on_update(peer_id, update).await;
        }
        Ok(())
    }

    /// Re-sends the Adj-RIB-Out entries of the requested address family context, closed off with an end-of-RIB marker.
    async fn on_route_refresh(
        &self,
        writer: &mut OwnedWriteHalf,
        session: &mut ServerSession,
        route_refresh: &RouteRefreshMessage,
    ) -> Result<(), SessionError> {
        debug!(
            "Peer {} asked for a route refresh of {}/{}",
            session.peer_address, route_refresh.afi, route_refresh.safi
        );
        let updates: Vec<UpdateMessage> = session
            .adj_rib_out
            .values()
            .filter(|route| route.afi == route_refresh.afi && route.safi == route_refresh.safi)
            .map(Route::to_update_message)
            .collect();
        for update in updates {
            send_message(writer, &session.peer_address, &BGPMessage::Update(update)).await?;
        }
        send_message(writer, &session.peer_address, &BGPMessage::Update(UpdateMessage::default())).await?;

        if let Some(observer) = &session.observer {
            observer.on_route_refresh(session.session.peer_id(), route_refresh).await;
        }
        Ok(())
    }

    async fn notify_observer_notification(&self, session: &ServerSession, notification: &NotificationMessage) {
        if let Some(observer) = &session.observer {
            observer.on_notification(session.session.peer_id(), notification).await;
        }
    }

    /// Registers the session under its peer id, resolving a collision with an already registered session to the same neighbor: a fully
    /// established session always wins, between two pending sessions the one whose initiator identifier is lower is dropped with a
    /// CEASE notification.
    pub(crate) async fn register_session(&self, session: &ServerSession) -> Result<(), SessionError> {
        let peer_id = session.session.peer_id();
        *session.shared.initiator.lock().await = session.initiator();

        let mut sessions = self.inner.sessions.lock().await;
        if let Some(other) = sessions.get(&peer_id) {
            let other_state = *other.state.lock().await;
            match other_state {
                SessionState::Established => {
                    return Err(SessionError::Notification(NotificationMessage::new(NotificationMessage::CEASE, 0)));
                }
                SessionState::OpenConfirm => {
                    let ours = session.initiator();
                    let theirs = *other.initiator.lock().await;
                    if ours > theirs {
                        debug!("Collision with pending session for {}, dropping the other side", peer_id);
                        other.close_with(NotificationMessage::new(NotificationMessage::CEASE, 0)).await;
                    } else {
                        return Err(SessionError::Notification(NotificationMessage::new(NotificationMessage::CEASE, 0)));
                    }
                }
                _ => {}
            }
        }
        sessions.insert(peer_id, session.shared.clone());
        Ok(())
    }

    async fn deregister_session(&self, session: &ServerSession) {
        let peer_id = session.session.peer_id();
        let mut sessions = self.inner.sessions.lock().await;
        if let Some(existing) = sessions.get(&peer_id) {
            if Arc::ptr_eq(existing, &session.shared) {
                sessions.remove(&peer_id);
            }
        }
    }

    /// The teardown path every session ends in: withdraw the peer's contribution from the Loc-RIB, reset the machine to idle, cancel
    /// the timers and drop the registration.
    async fn shutdown_session(&self, session: &mut ServerSession) {
        if session.reached_established {
            let adj_rib_in = session.adj_rib_in.lock().await;
            let mut loc_rib = self.inner.loc_rib.lock().await;
            for (_, _, _, route) in adj_rib_in.iter() {
                if let Err(error) = loc_rib.remove_set(route) {
                    error!("Unable to withdraw {:?} from the Loc-RIB => {}", route.ip_prefix(), error);
                }
            }
        }
        if let Some(observer) = &session.observer {
            observer.on_shutdown(session.session.peer_id()).await;
        }

        session.adj_rib_in.lock().await.clear();
        session.cancel_timers();
        session.set_state(SessionState::Idle).await;
        self.deregister_session(session).await;
        debug!("Session with {} shut down", session.peer_address);
    }
}
