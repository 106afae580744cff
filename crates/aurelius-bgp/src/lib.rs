//! This crate (Aurelius project module) implements serialization and deserialization APIs for the Border Gateway Protocol (BGP), that is
//! **the** EGP (Exterior Gateway Protocol) used in the Internet for the exchange of routes between two networks. BGP itself is an unsafe
//! and limited protocol but there are many RFCs used as extensions for that protocol.
//!
//! ## RFCs currently implemented or planned to be implemented
//! | RFC                                                       | Title                                       | Status          |
//! |-----------------------------------------------------------|---------------------------------------------|-----------------|
//! | [RFC 1997](https://datatracker.ietf.org/doc/html/rfc1997) | BGP Communities Attribute                   | Implemented     |
//! | [RFC 2918](https://datatracker.ietf.org/doc/html/rfc2918) | Route Refresh Capability for BGP-4          | Implemented     |
//! | [RFC 3392](https://datatracker.ietf.org/doc/html/rfc3392) | Capabilities Advertisement with BGP-4       | Implemented     |
//! | [RFC 4271](https://datatracker.ietf.org/doc/html/rfc4271) | A Border Gateway Protocol 4 (BGP-4)         | Implemented     |
//! | [RFC 4360](https://datatracker.ietf.org/doc/html/rfc4360) | BGP Extended Communities Attribute          | Opaque          |
//! | [RFC 4724](https://datatracker.ietf.org/doc/html/rfc4724) | Graceful Restart Mechanism for BGP          | Capability only |
//! | [RFC 4760](https://datatracker.ietf.org/doc/html/rfc4760) | Multiprotocol Extensions for BGP-4          | Implemented     |
//! | [RFC 6793](https://datatracker.ietf.org/doc/html/rfc6793) | BGP Support for Four-Octet AS Numbers       | Implemented     |
//! | [RFC 7911](https://datatracker.ietf.org/doc/html/rfc7911) | Advertisement of Multiple Paths in BGP      | Implemented     |
//! | [RFC 8092](https://datatracker.ietf.org/doc/html/rfc8092) | BGP Large Communities Attribute             | Implemented     |
//!
//! Deserialization is registry-driven: a [`decoder::MessageDecoder`] maps message kinds, parameter kinds, capability codes, path
//! attribute types and (AFI, SAFI) pairs onto decoder functions, so a BGP session can rebind the decoding rules to whatever the two
//! routers negotiated in their OPEN exchange (four-octet AS numbers, ADD-PATH identifiers in the NLRI encoding, ...).
//!
//! ## References
//! - [Standards documents, Wikipedia "Border Gateway Protocol"](https://en.wikipedia.org/wiki/Border_Gateway_Protocol#Standards_documents)
//! - [RFC 4271 - A Border Gateway Protocol 4 (BGP-4)](https://datatracker.ietf.org/doc/html/rfc4271)

#![no_std]
extern crate alloc;

// BGP base
pub mod decoder;
pub mod error;
pub mod prefix;
pub mod rfc4271;

// BGP Extensions
pub mod rfc1997;
pub mod rfc2918;
pub mod rfc3392;
pub mod rfc4724;
pub mod rfc4760;
pub mod rfc6793;
pub mod rfc7911;
pub mod rfc8092;


use crate::{
    rfc2918::RouteRefreshMessage,
    rfc4271::{
        BGPMessageHeader,
        NotificationMessage,
        OpenMessage,
        UpdateMessage,
    },
};
use alloc::vec::Vec;
use nom::IResult;

pub trait BGPElement {
    fn unpack(input: &[u8]) -> IResult<&[u8], Self>
    where
        Self: Sized;
    fn pack(&self) -> Vec<u8>;
}

pub trait ParameterizedBGPElement {
    type Parameter;

    fn unpack(input: &[u8], parameter: Self::Parameter) -> IResult<&[u8], Self>
    where
        Self: Sized;

    fn pack(&self) -> Vec<u8>;
}

/// This enum is a wrapper around the BGP messages provided by the BGP serialization library. It allows the serialization and
/// deserialization of every BGP message received/being sent. Deserialization goes through [`decoder::MessageDecoder::decode`] since the
/// decoding rules depend on the negotiated session capabilities.
#[derive(Ord, PartialOrd, Eq, PartialEq, Debug, Hash, Clone)]
pub enum BGPMessage {
    Open(OpenMessage),
    Update(UpdateMessage),
    Notification(NotificationMessage),
    KeepAlive,
    RouteRefresh(RouteRefreshMessage),
    Unknown {
        kind: u8,
        data: Vec<u8>,
    },
}

impl BGPMessage {
    pub fn kind(&self) -> u8 {
        match self {
            Self::Open(_) => 1,
            Self::Update(_) => 2,
            Self::Notification(_) => 3,
            Self::KeepAlive => 4,
            Self::RouteRefresh(_) => 5,
            Self::Unknown { kind, .. } => *kind,
        }
    }

    pub fn pack(&self) -> Vec<u8> {
        let payload = match self {
            Self::Open(message) => message.pack(),
            Self::Update(message) => message.pack(),
            Self::Notification(message) => message.pack(),
            Self::KeepAlive => Vec::new(),
            Self::RouteRefresh(message) => message.pack(),
            Self::Unknown { data, .. } => data.clone(),
        };

        let mut buffer = BGPMessageHeader {
            marker: [0xFF; 16],
            kind: self.kind(),
            length: (payload.len() + BGPMessageHeader::LENGTH) as u16,
        }
        .pack();
        buffer.extend_from_slice(&payload);
        buffer
    }
}

/// Returns the total length a message buffer declares in its header, or `None` when the buffer does not even hold the length field yet.
pub fn message_length(input: &[u8]) -> Option<usize> {
    if input.len() < 18 {
        return None;
    }
    Some(u16::from_be_bytes([input[16], input[17]]) as usize)
}

/// Whether the buffer starts with at least one complete BGP message, that is the buffer holds the declared length and the declared
/// length covers a whole header.
pub fn is_full_message(input: &[u8]) -> bool {
    match message_length(input) {
        Some(length) => length >= BGPMessageHeader::LENGTH && input.len() >= length,
        None => false,
    }
}
