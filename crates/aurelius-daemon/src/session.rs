//! The per-peer session core: the RFC 4271 finite state machine data, the capability negotiation performed over the OPEN exchange, and
//! the construction of our own OPEN message. Everything in here is free of I/O so the state machine can be driven by the server loop and
//! by tests alike.

use aurelius_bgp::{
    decoder::MessageDecoder,
    prefix::ProtoTuple,
    rfc3392::Capability,
    rfc4271::{
        NotificationMessage,
        OpenMessage,
        OptionalParameter,
    },
    rfc6793::AS_TRANS,
    rfc7911::AddPathCapability,
    BGPMessage,
};
use aurelius_common::next_enum_of;
use aurelius_rt::route::PeerId;
use core::fmt::{
    Display,
    Formatter,
};
use std::collections::BTreeSet;

use crate::SessionError;

/// This enum contains all connection states defined by the BGP base RFC for the BGP FSM (Finite State Machine). These states are per-peer
/// and are stored in the BGP session.
#[derive(Ord, PartialOrd, Eq, PartialEq, Copy, Clone, Debug, Default)]
pub enum SessionState {
    /// This is the initial state of a BGP session. In this state, the BGP session is waiting for a connection request from a peer or tries
    /// to establish one.
    #[default]
    Idle,

    /// In this state, the BGP router sent a TCP connection request to the remote peer. The router is waiting for a TCP connection to be
    /// established.
    Connect,

    /// In this state, the BGP session accepted an inbound TCP connection and is about to start the message exchange with the peer.
    Active,

    /// In this state, the TCP connection is established, the BGP router has sent an open message to the peer and the BGP router is waiting
    /// for an incoming open message from the peer.
    OpenSent,

    /// In this state, the BGP session wait for an incoming keep-alive or notification message by the BGP peer.
    OpenConfirm,

    /// In this state, the BGP session can exchange updates, notifications and keep-alive messages with the peer.
    Established,
}

impl Display for SessionState {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> core::fmt::Result {
        write!(formatter, "{:?}", self)
    }
}

/// The I/O-free core of one BGP session: local and learned peer identity, the negotiated capability and protocol sets, and the message
/// decoder bound to whatever the two sides agreed on. The server loop owns one of these per connection and drives it with the decoded
/// messages.
pub struct Session {
    pub state: SessionState,
    pub local_asn: u32,
    pub local_router_id: u32,
    pub hold_time: u16,
    pub connect_retry_time: u16,
    pub local_capabilities: Vec<Capability>,
    pub local_protocols: Vec<ProtoTuple>,
    pub peer_asn: u32,
    pub peer_router_id: u32,
    pub peer_capabilities: Vec<Capability>,
    pub peer_protocols: Vec<ProtoTuple>,
    pub common_capabilities: Vec<Capability>,
    pub common_protocols: BTreeSet<ProtoTuple>,
    pub decoder: MessageDecoder,
    pub last_error: Option<NotificationMessage>,
}

impl Session {
    pub fn new(local_asn: u32, local_router_id: u32, hold_time: u16) -> Self {
        Self {
            state: SessionState::Idle,
            local_asn,
            local_router_id,
            hold_time,
            connect_retry_time: 30,
            local_capabilities: Vec::new(),
            local_protocols: Vec::new(),
            peer_asn: 0,
            peer_router_id: 0,
            peer_capabilities: Vec::new(),
            peer_protocols: Vec::new(),
            common_capabilities: Vec::new(),
            common_protocols: BTreeSet::new(),
            decoder: MessageDecoder::new(),
            last_error: None,
        }
    }

    /// The pair identifying the neighbor of this session. Only meaningful after the peer's OPEN message was loaded.
    pub fn peer_id(&self) -> PeerId {
        PeerId {
            asn: self.peer_asn,
            router_id: self.peer_router_id,
        }
    }

    /// The interval keep-alive messages are emitted at, a third of the negotiated hold time. Zero disables the keep-alive timer together
    /// with the hold timer.
    pub fn keepalive_time(&self) -> u16 {
        self.hold_time / 3
    }

    fn advertises_asn4(capabilities: &[Capability]) -> bool {
        next_enum_of!(capabilities, Capability::FourOctetASN(asn) => *asn).is_some()
    }

    /// Builds the OPEN message announcing this side of the session: our protocols as multiprotocol capabilities, our configured
    /// capabilities, and the AS number translation scheme of RFC 6793 when we speak four-octet AS numbers. Every capability travels in
    /// its own capability parameter.
    pub fn create_open_message(&self) -> OpenMessage {
        let mut capabilities: Vec<Capability> = self
            .local_protocols
            .iter()
            .map(|(afi, safi)| Capability::Multiprotocol(aurelius_bgp::rfc4760::MultiprotocolCapability::new(*afi, *safi)))
            .collect();
        for capability in &self.local_capabilities {
            match capability {
                Capability::FourOctetASN(_) => capabilities.push(Capability::FourOctetASN(self.local_asn)),
                other => capabilities.push(other.clone()),
            }
        }

        let autonomous_system = if Self::advertises_asn4(&self.local_capabilities) {
            AS_TRANS
        } else {
            self.local_asn as u16
        };

        OpenMessage {
            version: 4,
            autonomous_system,
            hold_time: self.hold_time,
            bgp_identifier: self.local_router_id,
            optional_parameters: capabilities
                .into_iter()
                .map(|capability| OptionalParameter::Capabilities(vec![capability]))
                .collect(),
        }
    }

    /// Loads the peer's identity and announcements out of its OPEN message, negotiates the common capability and protocol sets and
    /// rebinds the session decoder accordingly. The effective hold time of the session becomes the smaller of both announcements.
    pub fn load_peer_data(&mut self, message: &OpenMessage) -> Result<(), SessionError> {
        if message.version != 4 {
            return Err(SessionError::Notification(NotificationMessage::new(
                NotificationMessage::OPEN_MESSAGE_ERROR,
                NotificationMessage::SUBCODE_UNSUPPORTED_VERSION,
            )));
        }

        self.peer_asn = message.effective_asn();
        self.peer_router_id = message.bgp_identifier;
        self.peer_capabilities = message.capabilities().cloned().collect();
        self.peer_protocols = self
            .peer_capabilities
            .iter()
            .filter_map(|capability| match capability {
                Capability::Multiprotocol(multiprotocol) => Some((multiprotocol.afi, multiprotocol.safi)),
                _ => None,
            })
            .collect();
        self.hold_time = self.hold_time.min(message.hold_time);

        self.compute_common();
        self.decoder = MessageDecoder::for_capabilities(&self.common_capabilities, None);
        Ok(())
    }

    /// Intersects the local announcements with the peer's. Four-octet ASN support and ADD-PATH need special treatment since their
    /// payloads differ per side: the former is common when both sides announced it (carrying the peer's real AS number), the latter is
    /// the tuple-wise intersection of both directions.
    fn compute_common(&mut self) {
        let mut common: Vec<Capability> = self
            .local_capabilities
            .iter()
            .filter(|capability| !matches!(capability, Capability::FourOctetASN(_) | Capability::AddPath(_)))
            .filter(|capability| self.peer_capabilities.contains(capability))
            .cloned()
            .collect();

        if Self::advertises_asn4(&self.local_capabilities) && Self::advertises_asn4(&self.peer_capabilities) {
            common.push(Capability::FourOctetASN(self.peer_asn));
        }

        let local_add_path = next_enum_of!(self.local_capabilities, Capability::AddPath(add_path) => add_path.clone());
        let peer_add_path = next_enum_of!(self.peer_capabilities, Capability::AddPath(add_path) => add_path.clone());
        if let (Some(local), Some(peer)) = (local_add_path, peer_add_path) {
            let add_path: AddPathCapability = local.intersect(&peer);
            if !add_path.protos.is_empty() {
                common.push(Capability::AddPath(add_path));
            }
        }

        self.common_capabilities = common;
        self.common_protocols = self
            .local_protocols
            .iter()
            .filter(|proto| self.peer_protocols.contains(proto))
            .copied()
            .collect();
    }

    /// Drives the state machine with one received message without performing any I/O, returning the messages to send in response. This
    /// is the only place handshake transitions happen; the server loop feeds it every OPEN, KEEPALIVE and NOTIFICATION off the wire and
    /// reacts to the transitions it takes. UPDATE and ROUTE-REFRESH carry no transition and are ignored here.
    pub fn handle_message(&mut self, message: &BGPMessage) -> Result<Vec<BGPMessage>, SessionError> {
        match message {
            BGPMessage::Open(open) => self.handle_open_message(open),
            BGPMessage::KeepAlive => {
                match self.state {
                    SessionState::OpenConfirm => {
                        self.state = SessionState::Established;
                        Ok(Vec::new())
                    }
                    // A KEEPALIVE cannot confirm a handshake whose OPEN exchange is still outstanding.
                    SessionState::OpenSent => Err(fsm_error(self.state)),
                    _ => Ok(Vec::new()),
                }
            }
            BGPMessage::Notification(notification) => {
                self.last_error = Some(notification.clone());
                self.state = SessionState::Idle;
                Ok(Vec::new())
            }
            _ => Ok(Vec::new()),
        }
    }

    fn handle_open_message(&mut self, message: &OpenMessage) -> Result<Vec<BGPMessage>, SessionError> {
        match self.state {
            // An OPEN after the handshake finished is a protocol violation.
            SessionState::Established | SessionState::OpenConfirm => Err(fsm_error(self.state)),
            SessionState::OpenSent => {
                self.load_peer_data(message)?;
                self.state = SessionState::OpenConfirm;
                Ok(vec![BGPMessage::KeepAlive])
            }
            // Our own OPEN always goes out on connection setup, so an OPEN can never arrive before the OpenSent transition.
            _ => Ok(Vec::new()),
        }
    }
}

/// The FSM error notification for a message that is illegal in the given state, with the subcode naming the state it hit.
///
/// ## References
/// - [Finite State Machine Error subcodes, RFC 6608](https://datatracker.ietf.org/doc/html/rfc6608)
pub(crate) fn fsm_error(state: SessionState) -> SessionError {
    let subcode = match state {
        SessionState::OpenSent => 1,
        SessionState::OpenConfirm => 2,
        SessionState::Established => 3,
        _ => 0,
    };
    SessionError::Notification(NotificationMessage::new(NotificationMessage::FSM_ERROR, subcode))
}
