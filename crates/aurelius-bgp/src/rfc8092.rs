//! This module implements the large communities attribute as specified in [RFC 8092](https://datatracker.ietf.org/doc/html/rfc8092).
//! Large communities are the four-octet counterpart of RFC 1997 communities: a four-octet global administrator (the AS number) followed
//! by two four-octet local data fields.

use crate::BGPElement;
use alloc::vec::Vec;
use core::fmt::{
    Display,
    Formatter,
};
use nom::{
    number::complete::be_u32,
    IResult,
};

/// A single large community value in its `<global>:<local 1>:<local 2>` form.
///
/// ## References
/// - [BGP Large Communities Attribute, Section 3 RFC 8092](https://datatracker.ietf.org/doc/html/rfc8092#section-3)
#[derive(Ord, PartialOrd, Eq, PartialEq, Debug, Hash, Clone, Copy)]
pub struct LargeCommunity {
    pub global_administrator: u32,
    pub local_data_1: u32,
    pub local_data_2: u32,
}

impl BGPElement for LargeCommunity {
    fn unpack(input: &[u8]) -> IResult<&[u8], Self> {
        let (input, global_administrator) = be_u32(input)?;
        let (input, local_data_1) = be_u32(input)?;
        let (input, local_data_2) = be_u32(input)?;
        Ok((
            input,
            Self {
                global_administrator,
                local_data_1,
                local_data_2,
            },
        ))
    }

    fn pack(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&self.global_administrator.to_be_bytes());
        buffer.extend_from_slice(&self.local_data_1.to_be_bytes());
        buffer.extend_from_slice(&self.local_data_2.to_be_bytes());
        buffer
    }
}

impl Display for LargeCommunity {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> core::fmt::Result {
        write!(formatter, "{}:{}:{}", self.global_administrator, self.local_data_1, self.local_data_2)
    }
}
