//! This module of the BGP serialization and deserialization library implements the serialization of the Multiprotocol extensions in the BGP
//! update message (and the capability) as specified in [RFC 4760](https://datatracker.ietf.org/doc/html/rfc4760). It allows to exchange
//! reachability for address families beyond IPv4 unicast over one BGP session.

use crate::{
    prefix::{
        Afi,
        Safi,
    },
    rfc4271::NlriBlock,
};
use alloc::vec::Vec;
use nom::{
    bytes::complete::take,
    number::complete::be_u8,
    IResult,
};

/// This capability announces one (AFI, SAFI) pair the router is willing to exchange routes for. A router announces one capability
/// instance per supported pair.
///
/// ## References
/// - [Use of BGP Capability Advertisement, Section 8 RFC 4760](https://datatracker.ietf.org/doc/html/rfc4760#section-8)
#[derive(Ord, PartialOrd, Eq, PartialEq, Debug, Hash, Clone, Copy)]
pub struct MultiprotocolCapability {
    pub afi: Afi,
    pub safi: Safi,
}

impl MultiprotocolCapability {
    pub fn new(afi: Afi, safi: Safi) -> Self {
        Self { afi, safi }
    }

    pub fn pack(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        buffer.extend(self.afi.pack());
        buffer.extend_from_slice(&0_u8.to_be_bytes());
        buffer.extend(self.safi.pack());
        buffer
    }

    pub(crate) fn unpack_payload(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, afi) = Afi::unpack(input)?;
        let (input, _reserved) = be_u8(input)?;
        let (input, safi) = Safi::unpack(input)?;
        Ok((input, Self { afi, safi }))
    }
}

/// This struct represents the multiprotocol reachable NLRI path attribute defined by the Multiprotocol Extensions for BGP as an optional
/// and non-transitive attribute announcing routes of the contained address family context. The next hop is kept in its packed form
/// since IPv6 announcements may carry a global and a link-local address back to back.
///
/// ## References
/// - [Multiprotocol Reachable NLRI - MP_REACH_NLRI, Section 3 RFC 4760](https://datatracker.ietf.org/doc/html/rfc4760#section-3)
#[derive(Ord, PartialOrd, Eq, PartialEq, Debug, Hash, Clone)]
pub struct MultiprotocolReachNLRI {
    pub afi: Afi,
    pub safi: Safi,
    pub next_hop: Vec<u8>,
    pub nlri: NlriBlock,
}

impl MultiprotocolReachNLRI {
    pub fn pack_payload(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        buffer.extend(self.afi.pack());
        buffer.extend(self.safi.pack());
        buffer.extend_from_slice(&(self.next_hop.len() as u8).to_be_bytes());
        buffer.extend_from_slice(&self.next_hop);
        buffer.extend_from_slice(&0_u8.to_be_bytes());
        buffer.extend(self.nlri.pack());
        buffer
    }

    pub(crate) fn unpack_payload(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, afi) = Afi::unpack(input)?;
        let (input, safi) = Safi::unpack(input)?;
        let (input, next_hop_length) = be_u8(input)?;
        let (input, next_hop) = take(next_hop_length as usize)(input)?;
        let (nlri, _reserved) = be_u8(input)?;
        Ok((
            &[],
            Self {
                afi,
                safi,
                next_hop: next_hop.to_vec(),
                nlri: NlriBlock::Raw(nlri.to_vec()),
            },
        ))
    }
}

/// This struct represents the multiprotocol unreachable NLRI path attribute defined by the Multiprotocol Extensions for BGP as an optional
/// and non-transitive attribute for withdrawing multiple routes from the service.
///
/// ## References
/// - [Multiprotocol Unreachable NLRI - MP_UNREACH_NLRI, Section 4 RFC 4760](https://datatracker.ietf.org/doc/html/rfc4760#section-4)
#[derive(Ord, PartialOrd, Eq, PartialEq, Debug, Hash, Clone)]
pub struct MultiprotocolUnreachNLRI {
    pub afi: Afi,
    pub safi: Safi,
    pub nlri: NlriBlock,
}

impl MultiprotocolUnreachNLRI {
    pub fn pack_payload(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        buffer.extend(self.afi.pack());
        buffer.extend(self.safi.pack());
        buffer.extend(self.nlri.pack());
        buffer
    }

    pub(crate) fn unpack_payload(input: &[u8]) -> IResult<&[u8], Self> {
        let (nlri, afi) = Afi::unpack(input)?;
        let (nlri, safi) = Safi::unpack(nlri)?;
        Ok((
            &[],
            Self {
                afi,
                safi,
                nlri: NlriBlock::Raw(nlri.to_vec()),
            },
        ))
    }
}
