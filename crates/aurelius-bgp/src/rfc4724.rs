//! This module implements the capability of the graceful restart mechanism as specified in
//! [RFC 4724](https://datatracker.ietf.org/doc/html/rfc4724). Only the capability encoding is provided, the restart behavior itself is
//! up to the embedding router.

use crate::prefix::{
    Afi,
    Safi,
};
use alloc::vec::Vec;
use nom::{
    number::complete::{
        be_u16,
        be_u8,
    },
    IResult,
};

/// The graceful restart capability announces for which address family contexts the router is able to preserve its forwarding state
/// across a restart, together with the restart flags (top four bits) and the estimated restart time in seconds (low twelve bits).
///
/// ## References
/// - [Graceful Restart Capability, Section 3 RFC 4724](https://datatracker.ietf.org/doc/html/rfc4724#section-3)
#[derive(Ord, PartialOrd, Eq, PartialEq, Debug, Hash, Clone)]
pub struct GracefulRestartCapability {
    pub restart_flags: u8,
    pub restart_time: u16,
    pub tuples: Vec<(Afi, Safi, u8)>,
}

impl GracefulRestartCapability {
    pub fn pack(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        let header = ((self.restart_flags as u16) << 12) | (self.restart_time & 0x0FFF);
        buffer.extend_from_slice(&header.to_be_bytes());
        for (afi, safi, flags) in &self.tuples {
            buffer.extend(afi.pack());
            buffer.extend(safi.pack());
            buffer.extend_from_slice(&flags.to_be_bytes());
        }
        buffer
    }

    pub(crate) fn unpack_payload(input: &[u8]) -> IResult<&[u8], Self> {
        let (mut input, header) = be_u16(input)?;
        let mut capability = Self {
            restart_flags: (header >> 12) as u8,
            restart_time: header & 0x0FFF,
            tuples: Vec::new(),
        };
        while input.len() >= 4 {
            let (rest, afi) = Afi::unpack(input)?;
            let (rest, safi) = Safi::unpack(rest)?;
            let (rest, flags) = be_u8(rest)?;
            capability.tuples.push((afi, safi, flags));
            input = rest;
        }
        Ok((input, capability))
    }
}
