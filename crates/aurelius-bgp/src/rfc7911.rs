//! This module implements the ADD-PATH extension as specified in [RFC 7911](https://datatracker.ietf.org/doc/html/rfc7911). The extension
//! lets one session carry multiple paths for the same prefix by prepending a four-octet path identifier to the NLRI encoding of the
//! negotiated address family contexts.

use crate::{
    error::DecodeError,
    prefix::{
        Afi,
        Nlri,
        Safi,
    },
    ParameterizedBGPElement,
};
use alloc::{
    collections::BTreeSet,
    vec::Vec,
};
use aurelius_common::Prefix;
use nom::{
    number::complete::{
        be_u32,
        be_u8,
    },
    IResult,
};

/// The peer is willing to receive path identifiers for the address family context.
pub const SEND_RECEIVE_RECEIVE: u8 = 1;
/// The peer would like to send path identifiers for the address family context.
pub const SEND_RECEIVE_SEND: u8 = 2;

/// The ADD-PATH capability announces per address family context whether the router wants to send path identifiers, receive them, or
/// both. The tuples are kept in an ordered set so the capability encodes deterministically and deduplicates.
///
/// ## References
/// - [ADD-PATH Capability, Section 4 RFC 7911](https://datatracker.ietf.org/doc/html/rfc7911#section-4)
#[derive(Ord, PartialOrd, Eq, PartialEq, Debug, Hash, Clone, Default)]
pub struct AddPathCapability {
    pub protos: BTreeSet<(Afi, Safi, u8)>,
}

impl AddPathCapability {
    pub fn new(protos: impl IntoIterator<Item = (Afi, Safi, u8)>) -> Self {
        Self {
            protos: protos.into_iter().collect(),
        }
    }

    /// Computes the tuples effective on a session from the local and the peer announcement: the address family contexts present on both
    /// sides, with the send/receive bits reduced to what both sides agreed on. Contexts whose bits cancel out are dropped.
    pub fn intersect(&self, other: &AddPathCapability) -> AddPathCapability {
        let mut protos = BTreeSet::new();
        for (afi, safi, send_receive) in &self.protos {
            for (other_afi, other_safi, other_send_receive) in &other.protos {
                if afi != other_afi || safi != other_safi {
                    continue;
                }
                let send_receive = send_receive & other_send_receive;
                if send_receive != 0 {
                    protos.insert((*afi, *safi, send_receive));
                }
            }
        }
        AddPathCapability { protos }
    }

    pub fn pack(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        for (afi, safi, send_receive) in &self.protos {
            buffer.extend(afi.pack());
            buffer.extend(safi.pack());
            buffer.extend_from_slice(&send_receive.to_be_bytes());
        }
        buffer
    }

    pub(crate) fn unpack_payload(input: &[u8]) -> IResult<&[u8], Self> {
        let mut input = input;
        let mut capability = Self::default();
        while input.len() >= 4 {
            let (rest, afi) = Afi::unpack(input)?;
            let (rest, safi) = Safi::unpack(rest)?;
            let (rest, send_receive) = be_u8(rest)?;
            capability.protos.insert((afi, safi, send_receive));
            input = rest;
        }
        Ok((input, capability))
    }
}

/// Decoder for the path-identifier-prefixed IP NLRI encoding. Installed into a session decoder for every address family context on which
/// the peer announced it will send path identifiers.
pub(crate) fn add_path_ip_nlri(afi: Afi, _safi: Safi, input: &[u8]) -> Result<(Nlri, usize), DecodeError> {
    let (after_path_id, path_id) = be_u32::<_, nom::error::Error<&[u8]>>(input)?;
    let (rest, net) = Prefix::unpack(after_path_id, afi)?;
    Ok((Nlri::AddPathIp { path_id, net }, input.len() - rest.len()))
}
