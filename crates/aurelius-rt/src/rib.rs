//! The RIB (Routing Information Base) groups one routing table per registered (AFI, SAFI) pair. The per-peer Adj-RIB-In and Adj-RIB-Out
//! databases store one route per prefix, the server-wide Loc-RIB stores the set of competing paths per prefix through the set-valued
//! operations.

use crate::{
    route::Route,
    RoutingTable,
    TableError,
};
use aurelius_bgp::prefix::{
    Afi,
    ProtoTuple,
    Safi,
};
use aurelius_common::Prefix;
use std::collections::{
    BTreeMap,
    BTreeSet,
};
use thiserror::Error;

#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum RibError {
    #[error("Protocol {0:?}/{1:?} is not registered in this RIB")]
    UnsupportedProtocol(Afi, Safi),
    #[error("Route's NLRI has no IP interpretation")]
    NotIpRoute,
    #[error(transparent)]
    Table(#[from] TableError),
}

/// The key addressing one entry across the RIB's routing tables.
pub type RibKey = (Afi, Safi, Prefix);

/// A mapping from (AFI, SAFI) pairs to independent routing tables. Routes can only be stored for registered protocols; registering twice
/// is a no-op.
#[derive(Default)]
pub struct Rib<T> {
    tables: BTreeMap<ProtoTuple, RoutingTable<T>>,
}

impl<T> Rib<T> {
    pub fn new() -> Self {
        Self { tables: BTreeMap::new() }
    }

    pub fn register_proto(&mut self, proto: ProtoTuple) {
        self.tables.entry(proto).or_insert_with(|| match proto.0 {
            Afi::IPv4 => RoutingTable::new_ipv4(),
            _ => RoutingTable::new(),
        });
    }

    pub fn register_protos(&mut self, protos: impl IntoIterator<Item = ProtoTuple>) {
        for proto in protos {
            self.register_proto(proto);
        }
    }

    pub fn unregister_proto(&mut self, proto: &ProtoTuple) {
        self.tables.remove(proto);
    }

    pub fn supports_proto(&self, proto: &ProtoTuple) -> bool {
        self.tables.contains_key(proto)
    }

    pub fn protos(&self) -> impl Iterator<Item = ProtoTuple> + '_ {
        self.tables.keys().copied()
    }

    pub fn insert(&mut self, (afi, safi, net): RibKey, value: T) -> Result<(), RibError> {
        let table = self.tables.get_mut(&(afi, safi)).ok_or(RibError::UnsupportedProtocol(afi, safi))?;
        table.insert(net, value)?;
        Ok(())
    }

    pub fn get(&self, (afi, safi, net): &RibKey) -> Option<&T> {
        self.tables.get(&(*afi, *safi))?.get(net)
    }

    pub fn get_mut(&mut self, (afi, safi, net): &RibKey) -> Option<&mut T> {
        self.tables.get_mut(&(*afi, *safi))?.exact_mut(net).ok()
    }

    pub fn remove(&mut self, (afi, safi, net): &RibKey) -> Result<T, RibError> {
        let table = self.tables.get_mut(&(*afi, *safi)).ok_or(RibError::UnsupportedProtocol(*afi, *safi))?;
        Ok(table.remove(net)?)
    }

    pub fn contains_key(&self, key: &RibKey) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.tables.values().map(RoutingTable::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.values().all(RoutingTable::is_empty)
    }

    pub fn clear(&mut self) {
        for table in self.tables.values_mut() {
            table.clear();
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Afi, Safi, Prefix, &T)> {
        self.tables
            .iter()
            .flat_map(|((afi, safi), table)| table.iter().map(move |(net, value)| (*afi, *safi, net, value)))
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.iter().map(|(_, _, _, value)| value)
    }

    fn route_key(route: &Route) -> Result<RibKey, RibError> {
        let net = route.nlri.net().ok_or(RibError::NotIpRoute)?;
        Ok((route.afi, route.safi, *net))
    }
}

impl Rib<Route> {
    /// Stores the route under its own (AFI, SAFI, prefix) key.
    pub fn add(&mut self, route: Route) -> Result<(), RibError> {
        let key = Self::route_key(&route)?;
        if !self.supports_proto(&(key.0, key.1)) {
            return Err(RibError::UnsupportedProtocol(key.0, key.1));
        }
        self.insert(key, route)
    }

    /// Removes the entry stored under the route's key. Removing a route that was never added is not an error.
    pub fn remove_route(&mut self, route: &Route) -> Result<(), RibError> {
        let key = Self::route_key(route)?;
        if !self.contains_key(&key) {
            return Ok(());
        }
        self.remove(&key)?;
        Ok(())
    }
}

impl Rib<BTreeSet<Route>> {
    /// Inserts the route into the path set of its prefix, creating the set when the prefix is new. Used by the Loc-RIB where one prefix
    /// may carry one path per peer.
    pub fn add_set(&mut self, route: Route) -> Result<(), RibError> {
        let key = Self::route_key(&route)?;
        if !self.supports_proto(&(key.0, key.1)) {
            return Err(RibError::UnsupportedProtocol(key.0, key.1));
        }
        match self.get_mut(&key) {
            Some(set) => {
                set.insert(route);
            }
            None => {
                self.insert(key, BTreeSet::from([route]))?;
            }
        }
        Ok(())
    }

    /// Removes the route from the path set of its prefix and drops the prefix entry once the set runs empty.
    pub fn remove_set(&mut self, route: &Route) -> Result<(), RibError> {
        let key = Self::route_key(route)?;
        let Some(set) = self.get_mut(&key) else {
            return Ok(());
        };
        set.remove(route);
        if set.is_empty() {
            self.remove(&key)?;
        }
        Ok(())
    }
}
