use crate::{
    error::DecodeError,
    ParameterizedBGPElement,
};
use alloc::vec::Vec;
use aurelius_common::{
    type_enum,
    Prefix,
};
use core::{
    cmp::min,
    net::{
        IpAddr,
        Ipv4Addr,
        Ipv6Addr,
    },
};
use nom::{
    bytes::complete::take,
    error::{
        Error,
        ErrorKind,
    },
    number::complete::be_u8,
    IResult,
};

type_enum! {
    /// This value represents the address family specified in the Multiprotocol Extensions associated attributes and capabilities. BGP-LS
    /// is recognized so that the value survives a round-trip, its payloads stay opaque.
    ///
    /// ## References
    /// - [Address Family Numbers, IANA](https://www.iana.org/assignments/address-family-numbers/address-family-numbers.xhtml)
    #[derive(Ord, PartialOrd, Eq, PartialEq, Debug, Hash, Clone, Copy)]
    pub enum Afi: be_u16(u16) {
        IPv4 = 1,
        IPv6 = 2,
        BgpLs = 16388
    }
}

type_enum! {
    /// This enum represents the SAFI (Subsequent address family identifier) values known to this BGP implementation. Values not listed
    /// here are preserved verbatim in the `Unknown` variant.
    ///
    /// ## References
    /// [Subsequent Address Family Identifier, Section 6 RFC 4760](https://datatracker.ietf.org/doc/html/rfc4760#section-6)
    #[derive(Ord, PartialOrd, Eq, PartialEq, Debug, Hash, Clone, Copy)]
    pub enum Safi: be_u8(u8) {
        Unicast = 1,
        Multicast = 2,
        BgpLs = 71,
        BgpLsVpn = 72,
        Flow4 = 133,
        Flow4Vpn = 134
    }
}

/// The (AFI, SAFI) pair identifying one protocol a BGP session can carry routes for.
pub type ProtoTuple = (Afi, Safi);

/// The protocols whose NLRIs are encoded as plain IP prefixes.
pub const IP_PROTOS: [ProtoTuple; 4] = [
    (Afi::IPv4, Safi::Unicast),
    (Afi::IPv4, Safi::Multicast),
    (Afi::IPv6, Safi::Unicast),
    (Afi::IPv6, Safi::Multicast),
];

/// The number of octets a prefix of `mask` bits occupies on the wire.
#[inline]
pub const fn prefix_octets(mask: u8) -> usize {
    ((mask as usize) + 7) / 8
}

impl ParameterizedBGPElement for Prefix {
    type Parameter = Afi;

    fn unpack(input: &[u8], parameter: Afi) -> IResult<&[u8], Prefix> {
        let (input, mask) = be_u8(input)?;
        let (input, prefix) = take(prefix_octets(mask))(input)?;
        Ok((
            input,
            Prefix {
                address: unpack_ip_address(prefix, parameter)?.1,
                mask,
            },
        ))
    }

    fn pack(&self) -> Vec<u8> {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&self.mask.to_be_bytes());
        match self.network().address {
            IpAddr::V4(addr) => buffer.extend_from_slice(&addr.octets()[0..prefix_octets(self.mask)]),
            IpAddr::V6(addr) => buffer.extend_from_slice(&addr.octets()[0..prefix_octets(self.mask)]),
        }
        buffer
    }
}

/// Reads an IP address of the given family out of the input. Inputs packed into fewer octets than the address family requires are
/// right-padded with zeros, as NLRIs only carry the significant octets of a prefix.
pub fn unpack_ip_address(input: &[u8], address_family: Afi) -> IResult<&[u8], IpAddr> {
    fn slice_to_array<const N: usize>(input: &[u8]) -> IResult<&[u8], [u8; N]> {
        let mut array = [0u8; N];
        let read = min(input.len(), N);
        let (input, bytes) = take(read)(input)?;
        array[0..read].copy_from_slice(bytes);
        Ok((input, array))
    }

    match address_family {
        Afi::IPv4 => {
            let (input, bytes) = slice_to_array::<4>(input)?;
            Ok((input, IpAddr::V4(Ipv4Addr::from(bytes))))
        }
        Afi::IPv6 => {
            let (input, bytes) = slice_to_array::<16>(input)?;
            Ok((input, IpAddr::V6(Ipv6Addr::from(bytes))))
        }
        _ => Err(nom::Err::Error(Error::new(input, ErrorKind::Complete))),
    }
}

/// A single NLRI (Network Layer Reachability Information) entry of an update message. IP-encoded families decode into [`Nlri::Ip`],
/// sessions that negotiated ADD-PATH for the family decode into [`Nlri::AddPathIp`], and families without a registered decoder are kept
/// as the generic length-prefixed form in [`Nlri::Opaque`].
///
/// ## References
/// - [UPDATE Message Format, Section 4.3 RFC 4271](https://datatracker.ietf.org/doc/html/rfc4271#section-4.3)
/// - [Advertisement of Multiple Paths, Section 3 RFC 7911](https://datatracker.ietf.org/doc/html/rfc7911#section-3)
#[derive(Ord, PartialOrd, Eq, PartialEq, Debug, Hash, Clone)]
pub enum Nlri {
    Ip(Prefix),
    AddPathIp {
        path_id: u32,
        net: Prefix,
    },
    Opaque {
        length: u8,
        payload: Vec<u8>,
    },
}

impl Nlri {
    /// The prefix of this NLRI, when it has an IP interpretation.
    pub fn net(&self) -> Option<&Prefix> {
        match self {
            Self::Ip(net) => Some(net),
            Self::AddPathIp { net, .. } => Some(net),
            Self::Opaque { .. } => None,
        }
    }

    pub fn pack(&self) -> Vec<u8> {
        match self {
            Self::Ip(net) => net.pack(),
            Self::AddPathIp { path_id, net } => {
                let mut buffer = path_id.to_be_bytes().to_vec();
                buffer.extend(net.pack());
                buffer
            }
            Self::Opaque { length, payload } => {
                let mut buffer = length.to_be_bytes().to_vec();
                buffer.extend_from_slice(payload);
                buffer
            }
        }
    }
}

/// Decoder for the IP prefix NLRI encoding. Registered for the protocols in [`IP_PROTOS`] by the default decoder tables.
pub(crate) fn ip_nlri(afi: Afi, _safi: Safi, input: &[u8]) -> Result<(Nlri, usize), DecodeError> {
    let (rest, net) = Prefix::unpack(input, afi)?;
    Ok((Nlri::Ip(net), input.len() - rest.len()))
}

/// Fallback decoder keeping the raw length-prefixed form for families without a registered NLRI decoder.
pub(crate) fn opaque_nlri(_afi: Afi, _safi: Safi, input: &[u8]) -> Result<(Nlri, usize), DecodeError> {
    let (input_after_length, length) = be_u8::<_, nom::error::Error<&[u8]>>(input)?;
    let (_, payload) = take::<_, _, nom::error::Error<&[u8]>>(prefix_octets(length))(input_after_length)?;
    Ok((
        Nlri::Opaque {
            length,
            payload: payload.to_vec(),
        },
        1 + prefix_octets(length),
    ))
}
