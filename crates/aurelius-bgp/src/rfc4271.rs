//! This file implements the [RFC 4271 - A Border Gateway Protocol 4 (BGP-4)](https://datatracker.ietf.org/doc/html/rfc4271), the base RFC
//! of the BGP protocol which is specifying the base of the protocol.

use crate::{
    prefix::Nlri,
    rfc1997::Community,
    rfc3392::Capability,
    rfc4760::{
        MultiprotocolReachNLRI,
        MultiprotocolUnreachNLRI,
    },
    rfc6793::AsnLength,
    rfc8092::LargeCommunity,
    BGPElement,
};
use alloc::vec::Vec;
use bitflags::bitflags;
use core::{
    fmt::{
        Display,
        Formatter,
    },
    net::{
        IpAddr,
        Ipv4Addr,
    },
};
use nom::{
    bytes::complete::take,
    number::complete::{
        be_u128,
        be_u16,
        be_u32,
        be_u8,
    },
    IResult,
};

#[derive(Ord, PartialOrd, Eq, PartialEq, Debug, Clone, Copy, Hash)]
pub struct BGPMessageHeader {
    pub marker: [u8; 16],
    pub length: u16,
    pub kind: u8,
}

impl BGPMessageHeader {
    /// The length of the fixed message header in octets. Every message declares `Self::LENGTH + payload length` in its length field.
    pub const LENGTH: usize = 19;
}

impl BGPElement for BGPMessageHeader {
    fn unpack(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, marker) = take(16usize)(input)?;
        let (input, length) = be_u16(input)?;
        let (input, kind) = be_u8(input)?;
        Ok((
            input,
            Self {
                marker: marker.try_into().unwrap(),
                length,
                kind,
            },
        ))
    }

    fn pack(&self) -> Vec<u8> {
        let mut buffer = self.marker.to_vec();
        buffer.extend_from_slice(&self.length.to_be_bytes());
        buffer.extend_from_slice(&self.kind.to_be_bytes());
        buffer
    }
}

/// Optional parameters are sent with the open message of the BGP router to tell the other peer some extra information. A.e. the router's
/// capability list is sent as a optional parameter.
///
/// ## References
/// - [OPEN Message Format, Section 4.2 RFC 4271](https://datatracker.ietf.org/doc/html/rfc4271#section-4.2)
#[derive(Ord, PartialOrd, Eq, PartialEq, Debug, Hash, Clone)]
pub enum OptionalParameter {
    Capabilities(Vec<Capability>),
    Unknown {
        kind: u8,
        data: Vec<u8>,
    },
}

impl OptionalParameter {
    pub fn kind(&self) -> u8 {
        match self {
            Self::Capabilities(_) => 2,
            Self::Unknown { kind, .. } => *kind,
        }
    }

    pub fn pack(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        match self {
            Self::Capabilities(capabilities) => {
                let mut capabilities_data = Vec::new();
                for capability in capabilities {
                    capabilities_data.extend(capability.pack());
                }

                buffer.extend_from_slice(&2_u8.to_be_bytes());
                buffer.extend_from_slice(&(capabilities_data.len() as u8).to_be_bytes());
                buffer.extend(capabilities_data);
            }
            Self::Unknown { kind, data } => {
                buffer.extend_from_slice(&kind.to_be_bytes());
                buffer.extend_from_slice(&(data.len() as u8).to_be_bytes());
                buffer.extend(data);
            }
        }
        buffer
    }
}

/// This struct represents the BGP open message. The open message is sent between two BGP peers to initialize the connection and exchange
/// information about the router (supported extensions/capabilities etc.) to the other peer. It contains the BGP protocol version, this
/// library only supports BGP-4.
///
/// ## References
/// - [OPEN Message Format, Section 4.2 RFC 4271](https://datatracker.ietf.org/doc/html/rfc4271#section-4.2)
#[derive(Ord, PartialOrd, Eq, PartialEq, Debug, Hash, Clone)]
pub struct OpenMessage {
    pub version: u8,
    pub autonomous_system: u16,
    pub hold_time: u16,
    pub bgp_identifier: u32,
    pub optional_parameters: Vec<OptionalParameter>,
}

impl OpenMessage {
    /// The router ID of the sending peer. This is an alias view onto the `bgp_identifier` field.
    pub fn router_id(&self) -> Ipv4Addr {
        Ipv4Addr::from_bits(self.bgp_identifier)
    }

    /// All capabilities announced over the open message's capability parameters.
    pub fn capabilities(&self) -> impl Iterator<Item = &Capability> {
        self.optional_parameters
            .iter()
            .filter_map(|parameter| match parameter {
                OptionalParameter::Capabilities(capabilities) => Some(capabilities.iter()),
                _ => None,
            })
            .flatten()
    }

    /// The AS number effectively announced by the peer. When the peer advertises the four-octet ASN capability, the capability value
    /// replaces the (possibly truncated) two-octet field of the message header.
    ///
    /// ## References
    /// - [Section 4.2.3 RFC 6793](https://datatracker.ietf.org/doc/html/rfc6793#section-4)
    pub fn effective_asn(&self) -> u32 {
        self.capabilities()
            .find_map(|capability| match capability {
                Capability::FourOctetASN(asn) => Some(*asn),
                _ => None,
            })
            .unwrap_or(self.autonomous_system as u32)
    }

    pub fn pack(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&self.version.to_be_bytes());
        buffer.extend_from_slice(&self.autonomous_system.to_be_bytes());
        buffer.extend_from_slice(&self.hold_time.to_be_bytes());
        buffer.extend_from_slice(&self.bgp_identifier.to_be_bytes());

        let mut optional_parameters_data = Vec::new();
        for optional_parameter in &self.optional_parameters {
            optional_parameters_data.extend(optional_parameter.pack());
        }
        buffer.extend_from_slice(&(optional_parameters_data.len() as u8).to_be_bytes());
        buffer.extend(optional_parameters_data);
        buffer
    }
}

bitflags! {
    /// This structure contains the flags of a path attribute.
    ///
    /// ## References
    /// - [UPDATE Message Format, Section 4.2 RFC 4271](https://datatracker.ietf.org/doc/html/rfc4271#section-4.3)
    #[derive(Clone, Debug, Ord, PartialOrd, Eq, PartialEq, Hash, Copy)]
    pub struct PathAttributeFlags: u8 {
        /// This attribute flag indicates whether the path attribute is optional (1) or well-known (0).
        const OPTIONAL = 0b1000_0000;

        /// This attribute flag indicates whether the path attribute is transitive (1) or non-transitive (0). Well-known attributes require
        /// that the transitive bit is being set.
        const TRANSITIVE  = 0b0100_0000;

        /// This attribute flag indicates whether the information in the path attribute is partial (1) or complete (0). For well-known
        /// attributes and for optional non-transitive, the partial bit MUST be set to 0.
        const PARTIAL = 0b0010_0000;

        /// This attribute flags indicates whether the path attribute's length should be encoded as 2-byte value (1) or as 1-byte value (0).
        const EXTENDED_LENGTH = 0b0001_0000;
    }
}

impl Display for PathAttributeFlags {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> core::fmt::Result {
        let flags = [
            (PathAttributeFlags::OPTIONAL, "Optional"),
            (PathAttributeFlags::TRANSITIVE, "Transitive"),
            (PathAttributeFlags::PARTIAL, "Partial"),
            (PathAttributeFlags::EXTENDED_LENGTH, "Extended length"),
        ];

        let flags: Vec<&str> = flags.iter().filter_map(|&(flag, name)| if self.contains(flag) { Some(name) } else { None }).collect();
        if flags.is_empty() {
            write!(formatter, "None")
        } else {
            write!(formatter, "{}", flags.join(", "))
        }
    }
}

/// Origin is a well-known mandatory attribute that defines the origin of the path information.
///
/// ## References
/// - [ORIGIN Path Attribute Usage, Section 5.1.1 RFC 4271](https://datatracker.ietf.org/doc/html/rfc4271#section-5.1.1)
#[derive(Ord, PartialOrd, Eq, PartialEq, Debug, Hash, Clone, Copy)]
#[repr(u8)]
pub enum Origin {
    IGP = 0,
    EGP = 1,
    Incomplete = 2,
}

impl From<u8> for Origin {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::IGP,
            1 => Self::EGP,
            _ => Self::Incomplete,
        }
    }
}

impl From<&Origin> for u8 {
    fn from(value: &Origin) -> Self {
        match value {
            Origin::IGP => 0,
            Origin::EGP => 1,
            Origin::Incomplete => 2,
        }
    }
}

/// One segment of an AS path. Sequence segments are ordered, set segments are an unordered collection of AS numbers that were aggregated
/// away. The octet width of the contained AS numbers is not part of the wire format but negotiated session state, so packing and
/// unpacking take the width as parameter.
#[derive(Ord, PartialOrd, Eq, PartialEq, Debug, Hash, Clone)]
pub enum ASPathSegment {
    Set(Vec<u32>),
    Sequence(Vec<u32>),
}

impl ASPathSegment {
    pub fn unpack(input: &[u8], asn_length: AsnLength) -> IResult<&[u8], Self> {
        let (input, kind) = be_u8(input)?;
        let (mut input, length) = be_u8(input)?;
        let mut asns = Vec::with_capacity(length as usize);
        for _ in 0..length {
            let (rest, asn) = match asn_length {
                AsnLength::TwoOctet => {
                    let (rest, asn) = be_u16(input)?;
                    (rest, asn as u32)
                }
                AsnLength::FourOctet => be_u32(input)?,
            };
            asns.push(asn);
            input = rest;
        }
        match kind {
            1 => Ok((input, Self::Set(asns))),
            2 => Ok((input, Self::Sequence(asns))),
            _ => Err(nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Tag))),
        }
    }

    pub fn pack(&self, asn_length: AsnLength) -> Vec<u8> {
        let (kind, asns) = match self {
            Self::Set(asns) => (1_u8, asns),
            Self::Sequence(asns) => (2_u8, asns),
        };

        let mut buffer = Vec::new();
        buffer.extend_from_slice(&kind.to_be_bytes());
        buffer.extend_from_slice(&(asns.len() as u8).to_be_bytes());
        for asn in asns {
            match asn_length {
                AsnLength::TwoOctet => buffer.extend_from_slice(&(*asn as u16).to_be_bytes()),
                AsnLength::FourOctet => buffer.extend_from_slice(&asn.to_be_bytes()),
            }
        }
        buffer
    }
}

/// This enum represents the value of a path attribute sent in a BGP update message. Path attributes are providing information about the
/// prefixes being sent to the peer like communities, origin etc. Attribute types without a registered decoder stay in the `Unknown`
/// variant and are re-emitted verbatim, which also covers the extended communities attribute (type 16).
///
/// ## References
/// - [UPDATE Message Format, Section 4.2 RFC 4271](https://datatracker.ietf.org/doc/html/rfc4271#section-4.3)
/// - [Path Attributes, Section 5 RFC 4271](https://datatracker.ietf.org/doc/html/rfc4271#section-5)
#[derive(Ord, PartialOrd, Eq, PartialEq, Debug, Hash, Clone)]
pub enum PathAttributeValue {
    Origin(Origin),
    ASPath(Vec<ASPathSegment>),
    /// The four-octet rendition of the AS path. Carried as attribute type 17 (`AS4_PATH`) next to a two-octet `AS_PATH`, or directly as
    /// attribute type 2 on sessions that negotiated four-octet AS numbers.
    AS4Path {
        kind: u8,
        segments: Vec<ASPathSegment>,
    },
    NextHop(IpAddr),
    MultiExitDisc(u32),
    LocalPref(u32),
    AtomicAggregate,
    Aggregator {
        asn: u16,
        address: Ipv4Addr,
    },
    /// The four-octet rendition of the aggregator, as attribute type 18 or as type 7 on four-octet ASN sessions.
    Aggregator4 {
        kind: u8,
        asn: u32,
        address: Ipv4Addr,
    },
    Communities(Vec<Community>),
    MpReachNlri(MultiprotocolReachNLRI),
    MpUnreachNlri(MultiprotocolUnreachNLRI),
    LargeCommunities(Vec<LargeCommunity>),
    Unknown {
        kind: u8,
        data: Vec<u8>,
    },
}

impl PathAttributeValue {
    pub fn kind(&self) -> u8 {
        match self {
            Self::Origin(_) => 1,
            Self::ASPath(_) => 2,
            Self::AS4Path { kind, .. } => *kind,
            Self::NextHop(_) => 3,
            Self::MultiExitDisc(_) => 4,
            Self::LocalPref(_) => 5,
            Self::AtomicAggregate => 6,
            Self::Aggregator { .. } => 7,
            Self::Aggregator4 { kind, .. } => *kind,
            Self::Communities(_) => 8,
            Self::MpReachNlri(_) => 14,
            Self::MpUnreachNlri(_) => 15,
            Self::LargeCommunities(_) => 32,
            Self::Unknown { kind, .. } => *kind,
        }
    }

    /// The flags an attribute of this value carries when it is newly constructed by this implementation.
    pub fn default_flags(&self) -> PathAttributeFlags {
        match self {
            Self::Origin(_) | Self::ASPath(_) | Self::AS4Path { .. } | Self::NextHop(_) | Self::LocalPref(_) | Self::AtomicAggregate => {
                PathAttributeFlags::TRANSITIVE
            }
            Self::MultiExitDisc(_) | Self::MpReachNlri(_) | Self::MpUnreachNlri(_) | Self::Unknown { .. } => PathAttributeFlags::OPTIONAL,
            Self::Aggregator { .. } | Self::Aggregator4 { .. } | Self::Communities(_) | Self::LargeCommunities(_) => {
                PathAttributeFlags::OPTIONAL | PathAttributeFlags::TRANSITIVE
            }
        }
    }

    pub fn pack_payload(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        match self {
            Self::Origin(origin) => buffer.extend_from_slice(&u8::from(origin).to_be_bytes()),
            Self::ASPath(segments) => {
                for segment in segments {
                    buffer.extend(segment.pack(AsnLength::TwoOctet));
                }
            }
            Self::AS4Path { segments, .. } => {
                for segment in segments {
                    buffer.extend(segment.pack(AsnLength::FourOctet));
                }
            }
            Self::NextHop(next_hop) => match next_hop {
                IpAddr::V4(addr) => buffer.extend_from_slice(&addr.octets()),
                IpAddr::V6(addr) => buffer.extend_from_slice(&addr.octets()),
            },
            Self::MultiExitDisc(med) => buffer.extend_from_slice(&med.to_be_bytes()),
            Self::LocalPref(local_pref) => buffer.extend_from_slice(&local_pref.to_be_bytes()),
            Self::AtomicAggregate => {}
            Self::Aggregator { asn, address } => {
                buffer.extend_from_slice(&asn.to_be_bytes());
                buffer.extend_from_slice(&address.octets());
            }
            Self::Aggregator4 { asn, address, .. } => {
                buffer.extend_from_slice(&asn.to_be_bytes());
                buffer.extend_from_slice(&address.octets());
            }
            Self::Communities(communities) => {
                for community in communities {
                    buffer.extend_from_slice(&u32::from(*community).to_be_bytes());
                }
            }
            Self::MpReachNlri(attribute) => buffer.extend(attribute.pack_payload()),
            Self::MpUnreachNlri(attribute) => buffer.extend(attribute.pack_payload()),
            Self::LargeCommunities(communities) => {
                for community in communities {
                    buffer.extend(community.pack());
                }
            }
            Self::Unknown { data, .. } => buffer.extend_from_slice(data),
        }
        buffer
    }
}

/// A path attribute as it appears in an update message: the flag byte together with the typed value. The flags observed on the wire are
/// preserved so that a decoded attribute re-encodes bit-exact.
#[derive(Ord, PartialOrd, Eq, PartialEq, Debug, Hash, Clone)]
pub struct PathAttribute {
    pub flags: PathAttributeFlags,
    pub value: PathAttributeValue,
}

impl PathAttribute {
    pub fn new(value: PathAttributeValue) -> Self {
        Self {
            flags: value.default_flags(),
            value,
        }
    }

    pub fn with_flags(flags: PathAttributeFlags, value: PathAttributeValue) -> Self {
        Self { flags, value }
    }

    pub fn kind(&self) -> u8 {
        self.value.kind()
    }

    /// Splits the generic on-wire form of a path attribute into its header triple and payload slice. The payload is interpreted by the
    /// decoder registries afterwards.
    pub fn unpack_generic(input: &[u8]) -> IResult<&[u8], (PathAttributeFlags, u8, &[u8])> {
        let (input, flags) = be_u8(input)?;
        let flags = PathAttributeFlags::from_bits_retain(flags);
        let (input, kind) = be_u8(input)?;

        // Following to the parser rules for path attributes in section 4.3 of RFC 4271, the length is an u16 when the extended length flag
        // is applied. Otherwise, the length is just one byte.
        let (input, length) = if !flags.contains(PathAttributeFlags::EXTENDED_LENGTH) {
            let (input, length) = be_u8(input)?;
            (input, length as u16)
        } else {
            be_u16(input)?
        };

        let (input, data) = take(length)(input)?;
        Ok((input, (flags, kind, data)))
    }

    pub fn pack(&self) -> Vec<u8> {
        let payload = self.value.pack_payload();
        let mut flags = self.flags;
        if payload.len() > u8::MAX as usize {
            flags |= PathAttributeFlags::EXTENDED_LENGTH;
        }

        let mut buffer = Vec::new();
        buffer.extend_from_slice(&flags.bits().to_be_bytes());
        buffer.extend_from_slice(&self.kind().to_be_bytes());
        if flags.contains(PathAttributeFlags::EXTENDED_LENGTH) {
            buffer.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        } else {
            buffer.extend_from_slice(&(payload.len() as u8).to_be_bytes());
        }
        buffer.extend(payload);
        buffer
    }
}

/// One of the three NLRI collections of an update message (top-level announcements, top-level withdrawals, and the collections inside
/// the multiprotocol attributes). The NLRI encoding of a session depends on the negotiated capabilities, and those are only known once
/// the session is bound to a decoder, so a freshly parsed block stays in its raw form until
/// [`crate::decoder::MessageDecoder::resolve_update`] promotes it. Promotion is idempotent; raw blocks re-emit their bytes verbatim.
#[derive(Ord, PartialOrd, Eq, PartialEq, Debug, Hash, Clone)]
pub enum NlriBlock {
    Raw(Vec<u8>),
    Decoded(Vec<Nlri>),
}

impl NlriBlock {
    pub fn empty() -> Self {
        Self::Decoded(Vec::new())
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Decoded(_))
    }

    /// The decoded NLRIs, or `None` while the block is unresolved.
    pub fn nlris(&self) -> Option<&[Nlri]> {
        match self {
            Self::Raw(_) => None,
            Self::Decoded(nlris) => Some(nlris),
        }
    }

    pub fn pack(&self) -> Vec<u8> {
        match self {
            Self::Raw(data) => data.clone(),
            Self::Decoded(nlris) => {
                let mut buffer = Vec::new();
                for nlri in nlris {
                    buffer.extend(nlri.pack());
                }
                buffer
            }
        }
    }
}

impl Default for NlriBlock {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Vec<Nlri>> for NlriBlock {
    fn from(nlris: Vec<Nlri>) -> Self {
        Self::Decoded(nlris)
    }
}

/// This struct represents the BGP update message. The update message is sent after the establishment of the connection to exchange route
/// information to the BGP peer like Network Layer Reachability Information (NLRI, new reachable routes) with some information about the
/// prefixes itself (path attributes).
///
/// ## References
/// - [UPDATE Message Format, Section 4.3 RFC 4271](https://datatracker.ietf.org/doc/html/rfc4271#section-4.3)
#[derive(Ord, PartialOrd, Eq, PartialEq, Debug, Hash, Clone, Default)]
pub struct UpdateMessage {
    pub withdrawn: NlriBlock,
    pub path_attributes: Vec<PathAttribute>,
    pub nlri: NlriBlock,
}

impl UpdateMessage {
    pub fn pack(&self) -> Vec<u8> {
        let mut buffer = Vec::new();

        let withdrawn_buffer = self.withdrawn.pack();
        buffer.extend_from_slice(&(withdrawn_buffer.len() as u16).to_be_bytes());
        buffer.extend(withdrawn_buffer);

        let mut path_attr_buffer = Vec::new();
        for path_attribute in &self.path_attributes {
            path_attr_buffer.extend(path_attribute.pack());
        }
        buffer.extend_from_slice(&(path_attr_buffer.len() as u16).to_be_bytes());
        buffer.extend(path_attr_buffer);

        buffer.extend(self.nlri.pack());
        buffer
    }
}

/// This struct represents the BGP notification message. The notification message is sent to inform a peer about an error while processing
/// the peer's routes or generally something related to that peer.
///
/// ## References
/// - [NOTIFICATION Message Format, Section 4.5 RFC 4271](https://datatracker.ietf.org/doc/html/rfc4271#section-4.5)
#[derive(Ord, PartialOrd, Eq, PartialEq, Debug, Hash, Clone)]
pub struct NotificationMessage {
    pub error_code: u8,
    pub error_subcode: u8,
    pub data: Vec<u8>,
}

impl NotificationMessage {
    pub const MESSAGE_HEADER_ERROR: u8 = 1;
    pub const OPEN_MESSAGE_ERROR: u8 = 2;
    pub const UPDATE_MESSAGE_ERROR: u8 = 3;
    pub const HOLD_TIMER_EXPIRED: u8 = 4;
    pub const FSM_ERROR: u8 = 5;
    pub const CEASE: u8 = 6;

    pub const SUBCODE_UNSUPPORTED_VERSION: u8 = 1;
    pub const SUBCODE_BAD_PEER_AS: u8 = 2;
    pub const SUBCODE_OPTIONAL_ATTRIBUTE_ERROR: u8 = 9;

    pub fn new(error_code: u8, error_subcode: u8) -> Self {
        Self {
            error_code,
            error_subcode,
            data: Vec::new(),
        }
    }

    pub fn pack(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&self.error_code.to_be_bytes());
        buffer.extend_from_slice(&self.error_subcode.to_be_bytes());
        buffer.extend_from_slice(&self.data);
        buffer
    }

    pub(crate) fn unpack_payload(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, error_code) = be_u8(input)?;
        let (data, error_subcode) = be_u8(input)?;
        Ok((
            &[],
            Self {
                error_code,
                error_subcode,
                data: data.to_vec(),
            },
        ))
    }
}

impl Display for NotificationMessage {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> core::fmt::Result {
        write!(formatter, "error code {}, subcode {}", self.error_code, self.error_subcode)
    }
}

/// Reads a next-hop address whose family is derived from the payload width (16 octets for IPv6, 4 otherwise).
pub(crate) fn unpack_next_hop(input: &[u8]) -> IResult<&[u8], IpAddr> {
    match input.len() {
        16 => {
            let (input, addr) = be_u128(input)?;
            Ok((input, IpAddr::V6(addr.into())))
        }
        _ => {
            let (input, addr) = be_u32(input)?;
            Ok((input, IpAddr::V4(addr.into())))
        }
    }
}
