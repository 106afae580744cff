//! This module of the BGP serialization and deserialization library implements the serialization of capabilities in the BGP open message as
//! specified in [RFC 3392](https://datatracker.ietf.org/doc/html/rfc3392). It allows to tell the peer's router about the supported features
//! and extensions of this router.

use crate::{
    rfc4724::GracefulRestartCapability,
    rfc4760::MultiprotocolCapability,
    rfc7911::AddPathCapability,
};
use alloc::vec::Vec;

/// This enum represents a capability. Capabilities are sent in the open message of the BGP router to tell the other peer about the features
/// and supported extensions of this BGP router. Two capabilities compare equal exactly when their encoded forms are identical, so
/// capability sets deduplicate the way the wire format does.
///
/// ## References
/// - [Capabilities Optional Parameter, Section. 4 RFC 3392](https://datatracker.ietf.org/doc/html/rfc3392#section-4)
#[derive(Ord, PartialOrd, Eq, PartialEq, Debug, Hash, Clone)]
pub enum Capability {
    Multiprotocol(MultiprotocolCapability),
    RouteRefresh,
    GracefulRestart(GracefulRestartCapability),
    FourOctetASN(u32),
    AddPath(AddPathCapability),
    Unknown {
        code: u8,
        data: Vec<u8>,
    },
}

impl Capability {
    pub fn code(&self) -> u8 {
        match self {
            Self::Multiprotocol(_) => 1,
            Self::RouteRefresh => 2,
            Self::GracefulRestart(_) => 64,
            Self::FourOctetASN(_) => 65,
            Self::AddPath(_) => 69,
            Self::Unknown { code, .. } => *code,
        }
    }

    pub fn pack_payload(&self) -> Vec<u8> {
        match self {
            Self::Multiprotocol(capability) => capability.pack(),
            Self::RouteRefresh => Vec::new(),
            Self::GracefulRestart(capability) => capability.pack(),
            Self::FourOctetASN(asn) => asn.to_be_bytes().to_vec(),
            Self::AddPath(capability) => capability.pack(),
            Self::Unknown { data, .. } => data.clone(),
        }
    }

    pub fn pack(&self) -> Vec<u8> {
        let payload = self.pack_payload();
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&self.code().to_be_bytes());
        buffer.extend_from_slice(&(payload.len() as u8).to_be_bytes());
        buffer.extend(payload);
        buffer
    }
}
