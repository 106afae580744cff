//! The route model: the canonical in-memory unit flowing between update messages and the RIBs. A [`Route`] binds one NLRI to the
//! attribute set it was announced with and remembers which peer it was learned from, so a session teardown can withdraw everything that
//! peer contributed.

use aurelius_bgp::{
    prefix::{
        Afi,
        Nlri,
        ProtoTuple,
        Safi,
    },
    rfc4271::{
        NlriBlock,
        Origin,
        PathAttribute,
        PathAttributeValue,
        UpdateMessage,
    },
    rfc4760::{
        MultiprotocolReachNLRI,
        MultiprotocolUnreachNLRI,
    },
};
use aurelius_common::Prefix;
use core::{
    fmt::{
        Display,
        Formatter,
    },
    net::{
        IpAddr,
        Ipv4Addr,
    },
};
use std::{
    collections::BTreeSet,
    sync::Arc,
};
use thiserror::Error;

#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum RouteError {
    #[error("The update message still carries unresolved NLRI bytes")]
    UnresolvedNlri,
}

/// The pair identifying a neighbor: its AS number and its BGP identifier.
#[derive(Ord, PartialOrd, Eq, PartialEq, Debug, Hash, Clone, Copy)]
pub struct PeerId {
    pub asn: u32,
    pub router_id: u32,
}

impl Display for PeerId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> core::fmt::Result {
        write!(formatter, "AS{} ({})", self.asn, Ipv4Addr::from_bits(self.router_id))
    }
}

/// What an update message asks the receiver to do with one route.
#[derive(Ord, PartialOrd, Eq, PartialEq, Debug, Hash, Clone, Copy)]
pub enum RouteAction {
    Announce,
    Withdraw,
}

/// One route: an NLRI of some address family context together with the path attributes it was announced with. Routes compare equal on
/// all fields, so the same announcement received twice from the same peer produces the same route.
#[derive(Ord, PartialOrd, Eq, PartialEq, Debug, Hash, Clone)]
pub struct Route {
    pub afi: Afi,
    pub safi: Safi,
    pub nlri: Nlri,
    pub attributes: BTreeSet<PathAttribute>,
    pub source_router: Option<PeerId>,
}

impl Route {
    pub fn new(afi: Afi, safi: Safi, nlri: Nlri, attributes: BTreeSet<PathAttribute>) -> Self {
        Self {
            afi,
            safi,
            nlri,
            attributes,
            source_router: None,
        }
    }

    pub fn proto(&self) -> ProtoTuple {
        (self.afi, self.safi)
    }

    /// The prefix of this route, when its NLRI has an IP interpretation.
    pub fn ip_prefix(&self) -> Option<&Prefix> {
        self.nlri.net()
    }

    fn attribute_value<'a, V>(&'a self, extract: impl Fn(&'a PathAttributeValue) -> Option<V>) -> Option<V> {
        self.attributes.iter().find_map(|attribute| extract(&attribute.value))
    }

    pub fn origin(&self) -> Option<Origin> {
        self.attribute_value(|value| match value {
            PathAttributeValue::Origin(origin) => Some(*origin),
            _ => None,
        })
    }

    pub fn next_hop(&self) -> Option<IpAddr> {
        self.attribute_value(|value| match value {
            PathAttributeValue::NextHop(next_hop) => Some(*next_hop),
            _ => None,
        })
    }

    pub fn med(&self) -> Option<u32> {
        self.attribute_value(|value| match value {
            PathAttributeValue::MultiExitDisc(med) => Some(*med),
            _ => None,
        })
    }

    pub fn local_pref(&self) -> Option<u32> {
        self.attribute_value(|value| match value {
            PathAttributeValue::LocalPref(local_pref) => Some(*local_pref),
            _ => None,
        })
    }

    pub fn aggregator(&self) -> Option<(u32, Ipv4Addr)> {
        self.attribute_value(|value| match value {
            PathAttributeValue::Aggregator { asn, address } => Some((*asn as u32, *address)),
            PathAttributeValue::Aggregator4 { asn, address, .. } => Some((*asn, *address)),
            _ => None,
        })
    }

    pub fn atomic_aggregate(&self) -> bool {
        self.attribute_value(|value| match value {
            PathAttributeValue::AtomicAggregate => Some(()),
            _ => None,
        })
        .is_some()
    }

    /// Expands a (resolved) update message into the sequence of route actions it encodes: announcements for the top-level NLRIs (implied
    /// IPv4 unicast), withdrawals for the top-level withdrawn prefixes, and announcements/withdrawals for the NLRIs of every
    /// multiprotocol attribute under that attribute's own address family context. Multiprotocol routes keep their carrying attribute in
    /// the attribute set.
    pub fn from_update(update: &UpdateMessage) -> Result<Vec<(RouteAction, Route)>, RouteError> {
        let mut shared_attributes = BTreeSet::new();
        let mut reach_attributes = Vec::new();
        let mut unreach_attributes = Vec::new();
        for attribute in &update.path_attributes {
            match &attribute.value {
                PathAttributeValue::MpReachNlri(reach) => reach_attributes.push((attribute, reach)),
                PathAttributeValue::MpUnreachNlri(unreach) => unreach_attributes.push((attribute, unreach)),
                _ => {
                    shared_attributes.insert(attribute.clone());
                }
            }
        }

        let mut routes = Vec::new();
        for nlri in update.nlri.nlris().ok_or(RouteError::UnresolvedNlri)? {
            routes.push((
                RouteAction::Announce,
                Route::new(Afi::IPv4, Safi::Unicast, nlri.clone(), shared_attributes.clone()),
            ));
        }
        for withdrawn in update.withdrawn.nlris().ok_or(RouteError::UnresolvedNlri)? {
            routes.push((
                RouteAction::Withdraw,
                Route::new(Afi::IPv4, Safi::Unicast, withdrawn.clone(), shared_attributes.clone()),
            ));
        }
        for (attribute, reach) in reach_attributes {
            let mut attributes = shared_attributes.clone();
            attributes.insert(attribute.clone());
            for nlri in reach.nlri.nlris().ok_or(RouteError::UnresolvedNlri)? {
                routes.push((
                    RouteAction::Announce,
                    Route::new(reach.afi, reach.safi, nlri.clone(), attributes.clone()),
                ));
            }
        }
        for (attribute, unreach) in unreach_attributes {
            let mut attributes = shared_attributes.clone();
            attributes.insert(attribute.clone());
            for nlri in unreach.nlri.nlris().ok_or(RouteError::UnresolvedNlri)? {
                routes.push((
                    RouteAction::Withdraw,
                    Route::new(unreach.afi, unreach.safi, nlri.clone(), attributes.clone()),
                ));
            }
        }
        Ok(routes)
    }

    /// Whether the route travels in the top-level NLRI fields of an update message rather than inside a multiprotocol attribute.
    fn is_plain_ipv4(&self) -> bool {
        self.proto() == (Afi::IPv4, Safi::Unicast) && matches!(self.nlri, Nlri::Ip(_))
    }

    /// The attributes of this route without the multiprotocol reachability attributes, which describe the carrying update message rather
    /// than the path itself.
    fn plain_attributes(&self) -> Vec<PathAttribute> {
        self.attributes
            .iter()
            .filter(|attribute| {
                !matches!(
                    attribute.value,
                    PathAttributeValue::MpReachNlri(_) | PathAttributeValue::MpUnreachNlri(_)
                )
            })
            .cloned()
            .collect()
    }

    /// Builds the update message announcing this route. IPv4 unicast routes travel in the top-level NLRI field, every other address
    /// family context travels in an MP_REACH_NLRI attribute (reusing the one stored on the route when present, so the next hop
    /// survives).
    pub fn to_update_message(&self) -> UpdateMessage {
        if self.is_plain_ipv4() {
            return UpdateMessage {
                withdrawn: NlriBlock::empty(),
                path_attributes: self.plain_attributes(),
                nlri: vec![self.nlri.clone()].into(),
            };
        }

        let mut path_attributes = self.plain_attributes();
        let next_hop = self
            .attribute_value(|value| match value {
                PathAttributeValue::MpReachNlri(reach) => Some(reach.next_hop.clone()),
                _ => None,
            })
            .unwrap_or_default();
        path_attributes.push(PathAttribute::new(PathAttributeValue::MpReachNlri(MultiprotocolReachNLRI {
            afi: self.afi,
            safi: self.safi,
            next_hop,
            nlri: vec![self.nlri.clone()].into(),
        })));
        UpdateMessage {
            withdrawn: NlriBlock::empty(),
            path_attributes,
            nlri: NlriBlock::empty(),
        }
    }

    /// Builds the update message withdrawing this route.
    pub fn to_withdraw_message(&self) -> UpdateMessage {
        if self.is_plain_ipv4() {
            return UpdateMessage {
                withdrawn: vec![self.nlri.clone()].into(),
                path_attributes: Vec::new(),
                nlri: NlriBlock::empty(),
            };
        }

        UpdateMessage {
            withdrawn: NlriBlock::empty(),
            path_attributes: vec![PathAttribute::new(PathAttributeValue::MpUnreachNlri(MultiprotocolUnreachNLRI {
                afi: self.afi,
                safi: self.safi,
                nlri: vec![self.nlri.clone()].into(),
            }))],
            nlri: NlriBlock::empty(),
        }
    }
}

/// A pure predicate deciding whether a route passes a policy boundary.
pub type Filter = Arc<dyn Fn(&Route) -> bool + Send + Sync>;

pub fn accept_all_filter() -> Filter {
    Arc::new(|_| true)
}

pub fn reject_all_filter() -> Filter {
    Arc::new(|_| false)
}
