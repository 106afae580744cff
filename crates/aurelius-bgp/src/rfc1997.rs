//! This module provides the implementation defines for the BGP communities attribute as specified in RFC 1997. BGP communities are used to
//! add extra information to routes announced over BGP. There are some well-known communities standardized in the RFC whatever this feature
//! is allowing custom communities. The syntax for communities is `<AS number>:<Community>` with the AS number as a "namespace".
//!
//! Extended communities (RFC 4360) are not interpreted by this implementation, they round-trip as an opaque path attribute.
//!
//! ## References
//! - [RFC 1997 "BGP Communities Attribute"](https://datatracker.ietf.org/doc/html/rfc1997)

use core::fmt::{
    Display,
    Formatter,
};

/// A single RFC 1997 community, a packed 32-bit tag whose upper half is conventionally the AS number acting as namespace for the lower
/// half.
///
/// ## References
/// - [RFC 1997 "BGP Communities Attribute"](https://datatracker.ietf.org/doc/html/rfc1997)
#[derive(Ord, PartialOrd, Eq, PartialEq, Debug, Hash, Clone, Copy)]
pub struct Community(pub u32);

impl Community {
    /// All routes received with this community **MUST NOT** be advertised outside a BGP confederation
    pub const NO_EXPORT: Community = Community::new(65535, 65281);
    /// All routes received with this community **MUST NOT** be advertised to other BGP peers
    pub const NO_ADVERTISE: Community = Community::new(65535, 65282);
    /// All routes received with this community **MUST NOT** be advertised to eBGP peers
    pub const NO_EXPORT_SUBCONFED: Community = Community::new(65535, 65283);

    pub const fn new(global_administrator: u16, local_administrator: u16) -> Self {
        Self(((global_administrator as u32) << 16) | local_administrator as u32)
    }

    pub const fn global_administrator(&self) -> u16 {
        (self.0 >> 16) as u16
    }

    pub const fn local_administrator(&self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }
}

impl From<u32> for Community {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Community> for u32 {
    fn from(value: Community) -> Self {
        value.0
    }
}

impl Display for Community {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> core::fmt::Result {
        write!(formatter, "{}:{}", self.global_administrator(), self.local_administrator())
    }
}
