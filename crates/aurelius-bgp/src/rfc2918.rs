//! This module of the BGP serialization and deserialization library implements the route refresh extension as specified in
//! [RFC 2918](https://datatracker.ietf.org/doc/html/rfc2918). It allows a router to ask its peer to re-send the routes of one address
//! family context, which is used to apply updated filters and policies without tearing the BGP connection down.

use crate::prefix::{
    Afi,
    Safi,
};
use alloc::vec::Vec;
use nom::{
    number::complete::be_u8,
    IResult,
};

/// This message tells the BGP peer to resend all routes matching the specified address family context. The subtype octet occupies the
/// reserved field of the original message format and carries the demarcation subtypes of the enhanced route refresh extension; plain
/// refresh requests use subtype 0.
///
/// ## References
/// - [Route Refresh Message, Section 3 RFC 2918](https://datatracker.ietf.org/doc/html/rfc2918#section-3)
#[derive(Ord, PartialOrd, Eq, PartialEq, Debug, Hash, Clone, Copy)]
pub struct RouteRefreshMessage {
    pub afi: Afi,
    pub subtype: u8,
    pub safi: Safi,
}

impl RouteRefreshMessage {
    pub fn new(afi: Afi, safi: Safi) -> Self {
        Self { afi, subtype: 0, safi }
    }

    pub fn pack(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        buffer.extend(self.afi.pack());
        buffer.extend_from_slice(&self.subtype.to_be_bytes());
        buffer.extend(self.safi.pack());
        buffer
    }

    pub(crate) fn unpack_payload(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, afi) = Afi::unpack(input)?;
        let (input, subtype) = be_u8(input)?;
        let (input, safi) = Safi::unpack(input)?;
        Ok((input, Self { afi, subtype, safi }))
    }
}
