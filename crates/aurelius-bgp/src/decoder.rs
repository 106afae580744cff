//! Registry-driven deserialization of BGP messages. A [`MessageDecoder`] holds replaceable tables mapping message kinds, parameter
//! kinds, capability codes, path attribute types and (AFI, SAFI) pairs to decoder functions. Sessions derive their own decoder from a
//! base table via [`MessageDecoder::for_capabilities`] once the OPEN exchange settled which extensions are active: four-octet AS numbers
//! rebind the AS path and aggregator attributes, ADD-PATH rebinds the NLRI encoding of the negotiated address family contexts.

use crate::{
    error::DecodeError,
    prefix::{
        ip_nlri,
        opaque_nlri,
        Afi,
        Nlri,
        ProtoTuple,
        Safi,
        IP_PROTOS,
    },
    rfc1997::Community,
    rfc2918::RouteRefreshMessage,
    rfc3392::Capability,
    rfc4271::{
        ASPathSegment,
        BGPMessageHeader,
        NlriBlock,
        NotificationMessage,
        OpenMessage,
        OptionalParameter,
        PathAttribute,
        PathAttributeFlags,
        PathAttributeValue,
        UpdateMessage,
    },
    rfc4724::GracefulRestartCapability,
    rfc4760::{
        MultiprotocolCapability,
        MultiprotocolReachNLRI,
        MultiprotocolUnreachNLRI,
    },
    rfc6793::AsnLength,
    rfc7911::{
        add_path_ip_nlri,
        AddPathCapability,
    },
    rfc8092::LargeCommunity,
    BGPElement,
    BGPMessage,
    is_full_message,
};
use alloc::{
    collections::BTreeMap,
    vec::Vec,
};
use nom::{
    bytes::complete::take,
    number::complete::{
        be_u16,
        be_u32,
        be_u8,
    },
};

pub type MessageCtor = fn(&MessageDecoder, &[u8]) -> Result<BGPMessage, DecodeError>;
pub type ParameterCtor = fn(&MessageDecoder, u8, &[u8]) -> Result<OptionalParameter, DecodeError>;
pub type CapabilityCtor = fn(u8, &[u8]) -> Result<Capability, DecodeError>;
pub type PathAttributeCtor = fn(PathAttributeFlags, u8, &[u8]) -> Result<PathAttribute, DecodeError>;
pub type NlriCtor = fn(Afi, Safi, &[u8]) -> Result<(Nlri, usize), DecodeError>;

/// The decoding rule tables of one BGP session (or of the protocol defaults). Registration replaces an existing entry for the same key,
/// values without an entry fall back to the residual `Unknown`/opaque forms instead of failing, so unknown protocol elements round-trip.
#[derive(Clone, Debug)]
pub struct MessageDecoder {
    message_types: BTreeMap<u8, MessageCtor>,
    parameter_types: BTreeMap<u8, ParameterCtor>,
    capability_types: BTreeMap<u8, CapabilityCtor>,
    path_attribute_types: BTreeMap<u8, PathAttributeCtor>,
    nlri_types: BTreeMap<ProtoTuple, NlriCtor>,
}

impl Default for MessageDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageDecoder {
    /// A decoder without any registered tables. Every message decodes into [`BGPMessage::Unknown`].
    pub fn empty() -> Self {
        Self {
            message_types: BTreeMap::new(),
            parameter_types: BTreeMap::new(),
            capability_types: BTreeMap::new(),
            path_attribute_types: BTreeMap::new(),
            nlri_types: BTreeMap::new(),
        }
    }

    /// The protocol default tables: two-octet AS path and aggregator attributes, plain IP prefix NLRIs for the IPv4/IPv6
    /// unicast/multicast families.
    pub fn new() -> Self {
        let mut decoder = Self::empty();
        decoder.register_message_type(1, open_message);
        decoder.register_message_type(2, update_message);
        decoder.register_message_type(3, notification_message);
        decoder.register_message_type(4, keepalive_message);
        decoder.register_message_type(5, route_refresh_message);

        decoder.register_parameter_type(2, capability_parameter);

        decoder.register_capability_type(1, multiprotocol_capability);
        decoder.register_capability_type(2, route_refresh_capability);
        decoder.register_capability_type(64, graceful_restart_capability);
        decoder.register_capability_type(65, four_octet_asn_capability);
        decoder.register_capability_type(69, add_path_capability);

        decoder.register_path_attribute_type(1, origin_attribute);
        decoder.register_path_attribute_type(2, as_path_attribute);
        decoder.register_path_attribute_type(3, next_hop_attribute);
        decoder.register_path_attribute_type(4, multi_exit_disc_attribute);
        decoder.register_path_attribute_type(5, local_pref_attribute);
        decoder.register_path_attribute_type(6, atomic_aggregate_attribute);
        decoder.register_path_attribute_type(7, aggregator_attribute);
        decoder.register_path_attribute_type(8, communities_attribute);
        decoder.register_path_attribute_type(14, mp_reach_attribute);
        decoder.register_path_attribute_type(15, mp_unreach_attribute);
        decoder.register_path_attribute_type(17, as4_path_attribute);
        decoder.register_path_attribute_type(18, aggregator4_attribute);
        decoder.register_path_attribute_type(32, large_communities_attribute);

        for proto in IP_PROTOS {
            decoder.register_nlri_type(proto, ip_nlri);
        }
        decoder
    }

    /// The default tables with the AS path and aggregator attributes rebound to their four-octet encodings.
    pub fn new_asn4() -> Self {
        let mut decoder = Self::new();
        decoder.register_path_attribute_type(2, as4_path_attribute);
        decoder.register_path_attribute_type(7, aggregator4_attribute);
        decoder
    }

    /// Derives a session decoder from the given capability set. The base tables default to [`MessageDecoder::new`]; a four-octet ASN
    /// capability installs the four-octet attribute encodings, ADD-PATH tuples whose receive bit is set install the path-identifier NLRI
    /// encoding for their address family context (IP families only).
    pub fn for_capabilities<'a>(capabilities: impl IntoIterator<Item = &'a Capability>, base: Option<&MessageDecoder>) -> Self {
        let mut decoder = base.cloned().unwrap_or_else(Self::new);
        for capability in capabilities {
            match capability {
                Capability::FourOctetASN(_) => {
                    decoder.register_path_attribute_type(2, as4_path_attribute);
                    decoder.register_path_attribute_type(7, aggregator4_attribute);
                }
                Capability::AddPath(add_path) => {
                    for (afi, safi, send_receive) in &add_path.protos {
                        if (send_receive & crate::rfc7911::SEND_RECEIVE_RECEIVE) == 0 || !IP_PROTOS.contains(&(*afi, *safi)) {
                            continue;
                        }
                        decoder.register_nlri_type((*afi, *safi), add_path_ip_nlri);
                    }
                }
                _ => {}
            }
        }
        decoder
    }

    pub fn register_message_type(&mut self, kind: u8, ctor: MessageCtor) {
        self.message_types.insert(kind, ctor);
    }

    pub fn register_parameter_type(&mut self, kind: u8, ctor: ParameterCtor) {
        self.parameter_types.insert(kind, ctor);
    }

    pub fn register_capability_type(&mut self, code: u8, ctor: CapabilityCtor) {
        self.capability_types.insert(code, ctor);
    }

    pub fn register_path_attribute_type(&mut self, kind: u8, ctor: PathAttributeCtor) {
        self.path_attribute_types.insert(kind, ctor);
    }

    pub fn register_nlri_type(&mut self, proto: ProtoTuple, ctor: NlriCtor) {
        self.nlri_types.insert(proto, ctor);
    }

    /// Decodes the first message in the buffer. The buffer has to contain the whole message, the declared length is validated against the
    /// available bytes and the marker against its fixed all-ones value.
    pub fn decode(&self, input: &[u8]) -> Result<BGPMessage, DecodeError> {
        let (_, header) = BGPMessageHeader::unpack(input)?;
        if header.marker != [0xFF; 16] {
            return Err(DecodeError::InvalidMarker);
        }
        let declared = header.length as usize;
        if declared < BGPMessageHeader::LENGTH {
            return Err(DecodeError::LengthMismatch { declared: header.length });
        }
        if input.len() < declared {
            return Err(DecodeError::Truncated);
        }

        let payload = &input[BGPMessageHeader::LENGTH..declared];
        match self.message_types.get(&header.kind) {
            Some(ctor) => ctor(self, payload),
            None => {
                Ok(BGPMessage::Unknown {
                    kind: header.kind,
                    data: payload.to_vec(),
                })
            }
        }
    }

    /// Decodes every message in a buffer of back-to-back PDUs.
    pub fn decode_all(&self, mut input: &[u8]) -> Result<Vec<BGPMessage>, DecodeError> {
        let mut messages = Vec::new();
        while !input.is_empty() {
            if !is_full_message(input) {
                return Err(DecodeError::Truncated);
            }
            messages.push(self.decode(input)?);
            let length = u16::from_be_bytes([input[16], input[17]]) as usize;
            input = &input[length..];
        }
        Ok(messages)
    }

    pub fn decode_parameter(&self, kind: u8, payload: &[u8]) -> Result<OptionalParameter, DecodeError> {
        match self.parameter_types.get(&kind) {
            Some(ctor) => ctor(self, kind, payload),
            None => {
                Ok(OptionalParameter::Unknown {
                    kind,
                    data: payload.to_vec(),
                })
            }
        }
    }

    pub fn decode_capability(&self, code: u8, payload: &[u8]) -> Result<Capability, DecodeError> {
        match self.capability_types.get(&code) {
            Some(ctor) => ctor(code, payload),
            None => {
                Ok(Capability::Unknown {
                    code,
                    data: payload.to_vec(),
                })
            }
        }
    }

    pub fn decode_path_attribute(&self, flags: PathAttributeFlags, kind: u8, payload: &[u8]) -> Result<PathAttribute, DecodeError> {
        match self.path_attribute_types.get(&kind) {
            Some(ctor) => ctor(flags, kind, payload),
            None => {
                Ok(PathAttribute::with_flags(flags, PathAttributeValue::Unknown {
                    kind,
                    data: payload.to_vec(),
                }))
            }
        }
    }

    /// Decodes a single packed NLRI value of the given address family context, returning the value and the consumed octets. Contexts
    /// without a registered decoder keep the generic length-prefixed form.
    pub fn decode_nlri(&self, afi: Afi, safi: Safi, input: &[u8]) -> Result<(Nlri, usize), DecodeError> {
        match self.nlri_types.get(&(afi, safi)) {
            Some(ctor) => ctor(afi, safi, input),
            None => opaque_nlri(afi, safi, input),
        }
    }

    pub fn decode_nlris(&self, afi: Afi, safi: Safi, input: &[u8]) -> Result<Vec<Nlri>, DecodeError> {
        let mut nlris = Vec::new();
        let mut input = input;
        while !input.is_empty() {
            let (nlri, consumed) = self.decode_nlri(afi, safi, input)?;
            nlris.push(nlri);
            input = &input[consumed..];
        }
        Ok(nlris)
    }

    /// Promotes every raw NLRI block of the update message to its decoded form: the top-level blocks with the implicit IPv4 unicast
    /// context, the multiprotocol attribute blocks with their own announced context. Already resolved blocks are left alone, so calling
    /// this twice is harmless.
    pub fn resolve_update(&self, message: &mut UpdateMessage) -> Result<(), DecodeError> {
        self.resolve_block(&mut message.withdrawn, Afi::IPv4, Safi::Unicast)?;
        self.resolve_block(&mut message.nlri, Afi::IPv4, Safi::Unicast)?;
        for attribute in &mut message.path_attributes {
            match &mut attribute.value {
                PathAttributeValue::MpReachNlri(attribute) => {
                    let (afi, safi) = (attribute.afi, attribute.safi);
                    self.resolve_block(&mut attribute.nlri, afi, safi)?;
                }
                PathAttributeValue::MpUnreachNlri(attribute) => {
                    let (afi, safi) = (attribute.afi, attribute.safi);
                    self.resolve_block(&mut attribute.nlri, afi, safi)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn resolve_block(&self, block: &mut NlriBlock, afi: Afi, safi: Safi) -> Result<(), DecodeError> {
        if let NlriBlock::Raw(raw) = block {
            *block = NlriBlock::Decoded(self.decode_nlris(afi, safi, raw)?);
        }
        Ok(())
    }
}

fn open_message(decoder: &MessageDecoder, payload: &[u8]) -> Result<BGPMessage, DecodeError> {
    let (input, version) = be_u8::<_, nom::error::Error<&[u8]>>(payload)?;
    let (input, autonomous_system) = be_u16::<_, nom::error::Error<&[u8]>>(input)?;
    let (input, hold_time) = be_u16::<_, nom::error::Error<&[u8]>>(input)?;
    let (input, bgp_identifier) = be_u32::<_, nom::error::Error<&[u8]>>(input)?;
    let (input, optional_parameters_length) = be_u8::<_, nom::error::Error<&[u8]>>(input)?;
    let (_, mut input) = take::<_, _, nom::error::Error<&[u8]>>(optional_parameters_length as usize)(input)?;

    let mut optional_parameters = Vec::new();
    while !input.is_empty() {
        let (rest, kind) = be_u8::<_, nom::error::Error<&[u8]>>(input)?;
        let (rest, length) = be_u8::<_, nom::error::Error<&[u8]>>(rest)?;
        let (rest, data) = take::<_, _, nom::error::Error<&[u8]>>(length as usize)(rest)?;
        optional_parameters.push(decoder.decode_parameter(kind, data)?);
        input = rest;
    }

    Ok(BGPMessage::Open(OpenMessage {
        version,
        autonomous_system,
        hold_time,
        bgp_identifier,
        optional_parameters,
    }))
}

fn update_message(decoder: &MessageDecoder, payload: &[u8]) -> Result<BGPMessage, DecodeError> {
    let (input, withdrawn_length) = be_u16::<_, nom::error::Error<&[u8]>>(payload)?;
    let (input, withdrawn) = take::<_, _, nom::error::Error<&[u8]>>(withdrawn_length as usize)(input)?;
    let (input, path_attributes_length) = be_u16::<_, nom::error::Error<&[u8]>>(input)?;
    let (nlri, mut attributes_input) = take::<_, _, nom::error::Error<&[u8]>>(path_attributes_length as usize)(input)?;

    let mut path_attributes = Vec::new();
    while !attributes_input.is_empty() {
        let (rest, (flags, kind, data)) = PathAttribute::unpack_generic(attributes_input)?;
        path_attributes.push(decoder.decode_path_attribute(flags, kind, data)?);
        attributes_input = rest;
    }

    let mut message = UpdateMessage {
        withdrawn: NlriBlock::Raw(withdrawn.to_vec()),
        path_attributes,
        nlri: NlriBlock::Raw(nlri.to_vec()),
    };
    decoder.resolve_update(&mut message)?;
    Ok(BGPMessage::Update(message))
}

fn notification_message(_decoder: &MessageDecoder, payload: &[u8]) -> Result<BGPMessage, DecodeError> {
    Ok(BGPMessage::Notification(NotificationMessage::unpack_payload(payload)?.1))
}

fn keepalive_message(_decoder: &MessageDecoder, _payload: &[u8]) -> Result<BGPMessage, DecodeError> {
    Ok(BGPMessage::KeepAlive)
}

fn route_refresh_message(_decoder: &MessageDecoder, payload: &[u8]) -> Result<BGPMessage, DecodeError> {
    Ok(BGPMessage::RouteRefresh(RouteRefreshMessage::unpack_payload(payload)?.1))
}

fn capability_parameter(decoder: &MessageDecoder, _kind: u8, payload: &[u8]) -> Result<OptionalParameter, DecodeError> {
    let mut input = payload;
    let mut capabilities = Vec::new();
    while !input.is_empty() {
        let (rest, code) = be_u8::<_, nom::error::Error<&[u8]>>(input)?;
        let (rest, length) = be_u8::<_, nom::error::Error<&[u8]>>(rest)?;
        let (rest, data) = take::<_, _, nom::error::Error<&[u8]>>(length as usize)(rest)?;
        capabilities.push(decoder.decode_capability(code, data)?);
        input = rest;
    }
    Ok(OptionalParameter::Capabilities(capabilities))
}

fn multiprotocol_capability(_code: u8, payload: &[u8]) -> Result<Capability, DecodeError> {
    Ok(Capability::Multiprotocol(MultiprotocolCapability::unpack_payload(payload)?.1))
}

fn route_refresh_capability(_code: u8, _payload: &[u8]) -> Result<Capability, DecodeError> {
    Ok(Capability::RouteRefresh)
}

fn graceful_restart_capability(_code: u8, payload: &[u8]) -> Result<Capability, DecodeError> {
    Ok(Capability::GracefulRestart(GracefulRestartCapability::unpack_payload(payload)?.1))
}

fn four_octet_asn_capability(_code: u8, payload: &[u8]) -> Result<Capability, DecodeError> {
    let (_, asn) = be_u32::<_, nom::error::Error<&[u8]>>(payload)?;
    Ok(Capability::FourOctetASN(asn))
}

fn add_path_capability(_code: u8, payload: &[u8]) -> Result<Capability, DecodeError> {
    Ok(Capability::AddPath(AddPathCapability::unpack_payload(payload)?.1))
}

fn origin_attribute(flags: PathAttributeFlags, _kind: u8, payload: &[u8]) -> Result<PathAttribute, DecodeError> {
    let (_, origin) = be_u8::<_, nom::error::Error<&[u8]>>(payload)?;
    Ok(PathAttribute::with_flags(flags, PathAttributeValue::Origin(origin.into())))
}

fn unpack_segments(payload: &[u8], asn_length: AsnLength) -> Result<Vec<ASPathSegment>, DecodeError> {
    let mut segments = Vec::new();
    let mut input = payload;
    while !input.is_empty() {
        let (rest, segment) = ASPathSegment::unpack(input, asn_length)?;
        segments.push(segment);
        input = rest;
    }
    Ok(segments)
}

fn as_path_attribute(flags: PathAttributeFlags, _kind: u8, payload: &[u8]) -> Result<PathAttribute, DecodeError> {
    Ok(PathAttribute::with_flags(flags, PathAttributeValue::ASPath(unpack_segments(payload, AsnLength::TwoOctet)?)))
}

fn as4_path_attribute(flags: PathAttributeFlags, kind: u8, payload: &[u8]) -> Result<PathAttribute, DecodeError> {
    Ok(PathAttribute::with_flags(flags, PathAttributeValue::AS4Path {
        kind,
        segments: unpack_segments(payload, AsnLength::FourOctet)?,
    }))
}

fn next_hop_attribute(flags: PathAttributeFlags, _kind: u8, payload: &[u8]) -> Result<PathAttribute, DecodeError> {
    let (_, next_hop) = crate::rfc4271::unpack_next_hop(payload)?;
    Ok(PathAttribute::with_flags(flags, PathAttributeValue::NextHop(next_hop)))
}

fn multi_exit_disc_attribute(flags: PathAttributeFlags, _kind: u8, payload: &[u8]) -> Result<PathAttribute, DecodeError> {
    let (_, med) = be_u32::<_, nom::error::Error<&[u8]>>(payload)?;
    Ok(PathAttribute::with_flags(flags, PathAttributeValue::MultiExitDisc(med)))
}

fn local_pref_attribute(flags: PathAttributeFlags, _kind: u8, payload: &[u8]) -> Result<PathAttribute, DecodeError> {
    let (_, local_pref) = be_u32::<_, nom::error::Error<&[u8]>>(payload)?;
    Ok(PathAttribute::with_flags(flags, PathAttributeValue::LocalPref(local_pref)))
}

fn atomic_aggregate_attribute(flags: PathAttributeFlags, _kind: u8, _payload: &[u8]) -> Result<PathAttribute, DecodeError> {
    Ok(PathAttribute::with_flags(flags, PathAttributeValue::AtomicAggregate))
}

fn aggregator_attribute(flags: PathAttributeFlags, _kind: u8, payload: &[u8]) -> Result<PathAttribute, DecodeError> {
    let (input, asn) = be_u16::<_, nom::error::Error<&[u8]>>(payload)?;
    let (_, address) = be_u32::<_, nom::error::Error<&[u8]>>(input)?;
    Ok(PathAttribute::with_flags(flags, PathAttributeValue::Aggregator {
        asn,
        address: address.into(),
    }))
}

fn aggregator4_attribute(flags: PathAttributeFlags, kind: u8, payload: &[u8]) -> Result<PathAttribute, DecodeError> {
    let (input, asn) = be_u32::<_, nom::error::Error<&[u8]>>(payload)?;
    let (_, address) = be_u32::<_, nom::error::Error<&[u8]>>(input)?;
    Ok(PathAttribute::with_flags(flags, PathAttributeValue::Aggregator4 {
        kind,
        asn,
        address: address.into(),
    }))
}

fn communities_attribute(flags: PathAttributeFlags, _kind: u8, payload: &[u8]) -> Result<PathAttribute, DecodeError> {
    let mut communities = Vec::new();
    let mut input = payload;
    while !input.is_empty() {
        let (rest, community) = be_u32::<_, nom::error::Error<&[u8]>>(input)?;
        communities.push(Community::from(community));
        input = rest;
    }
    Ok(PathAttribute::with_flags(flags, PathAttributeValue::Communities(communities)))
}

fn large_communities_attribute(flags: PathAttributeFlags, _kind: u8, payload: &[u8]) -> Result<PathAttribute, DecodeError> {
    let mut communities = Vec::new();
    let mut input = payload;
    while input.len() >= 12 {
        let (rest, community) = LargeCommunity::unpack(input)?;
        communities.push(community);
        input = rest;
    }
    Ok(PathAttribute::with_flags(flags, PathAttributeValue::LargeCommunities(communities)))
}

fn mp_reach_attribute(flags: PathAttributeFlags, _kind: u8, payload: &[u8]) -> Result<PathAttribute, DecodeError> {
    Ok(PathAttribute::with_flags(
        flags,
        PathAttributeValue::MpReachNlri(MultiprotocolReachNLRI::unpack_payload(payload)?.1),
    ))
}

fn mp_unreach_attribute(flags: PathAttributeFlags, _kind: u8, payload: &[u8]) -> Result<PathAttribute, DecodeError> {
    Ok(PathAttribute::with_flags(
        flags,
        PathAttributeValue::MpUnreachNlri(MultiprotocolUnreachNLRI::unpack_payload(payload)?.1),
    ))
}
