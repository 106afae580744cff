//! This module is implementing RFC 6793 which adds support for 4-byte AS numbers to the BGP implementation. A router announces its
//! support (and its real AS number) through the four-octet ASN capability while the open message header carries the translation value
//! [`AS_TRANS`]; once both sides announced the capability, the AS path and aggregator attributes switch to the four-octet encoding.

/// The reserved two-octet AS number placed into the open message header when the real AS number only fits into four octets.
///
/// ## References
/// - [Section 9 RFC 6793](https://datatracker.ietf.org/doc/html/rfc6793#section-9)
pub const AS_TRANS: u16 = 23456;

/// The octet width AS numbers are encoded with inside the AS path and aggregator attributes. The width is not visible on the wire, it is
/// a property of the session negotiated through the four-octet ASN capability.
#[derive(Ord, PartialOrd, Eq, PartialEq, Debug, Hash, Clone, Copy)]
pub enum AsnLength {
    TwoOctet,
    FourOctet,
}
