//! This crate (Aurelius project module) provides the route storage of the routing daemon: a generic longest-prefix-match routing table
//! over IP prefixes, the protocol-partitioned RIB (Routing Information Base) built from those tables, and the [`route::Route`] model
//! that carries announcements between the wire format and the RIBs.

pub mod rib;
pub mod route;

#[cfg(test)]
pub mod test;

use aurelius_common::Prefix;
use core::net::IpAddr;
use thiserror::Error;

#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum TableError {
    #[error("No entry for {0} in the table")]
    NotFound(Prefix),
    #[error("Prefix {0} does not fit the table's address family")]
    FamilyMismatch(Prefix),
}

/// The preferred prefix lengths intermediate nodes are created at. These bound the number of children per node on real-world BGP prefix
/// distributions, they do not affect the lookup results. The upper entries cover the IPv4-mapped part of the IPv6 space.
const SPLITS: &[u8] = &[8, 16, 24, 40, 48, 56, 64, 96, 104, 112, 120];
const SPLITS_IPV4: &[u8] = &[8, 16, 24];

/// A node only gets split through an intermediate node once it accumulated this many children.
const SPLIT_CHILD_LIMIT: usize = 64;

struct Node<T> {
    net: Prefix,
    children: Vec<Node<T>>,
    data: Option<T>,
}

impl<T> Node<T> {
    fn new(net: Prefix) -> Self {
        Self {
            net,
            children: Vec::new(),
            data: None,
        }
    }
}

/// A generic longest-prefix-match routing table. It behaves like a map from IP prefixes to arbitrary values but additionally answers
/// most-specific prefix matches through [`RoutingTable::lookup`]. The table is rooted at the default network of one address family and
/// coerces every key to that family (IPv4 keys of an IPv6-rooted table land in the IPv4-mapped space).
///
/// The tree maintains three invariants: a parent node's network strictly contains every child's network, sibling networks are disjoint,
/// and there is at most one node per network.
pub struct RoutingTable<T> {
    root: Node<T>,
    splits: &'static [u8],
}

impl<T> Default for RoutingTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RoutingTable<T> {
    /// Creates a table rooted at `::/0`.
    pub fn new() -> Self {
        Self {
            root: Node::new(Prefix::ANY_IPV6),
            splits: SPLITS,
        }
    }

    /// Creates a table rooted at `0.0.0.0/0` with split lengths tightened for IPv4 prefix distributions.
    pub fn new_ipv4() -> Self {
        Self {
            root: Node::new(Prefix::ANY_IPV4),
            splits: SPLITS_IPV4,
        }
    }

    fn coerce(&self, net: &Prefix) -> Result<Prefix, TableError> {
        if self.root.net.is_ipv4() {
            Ok(net.mapped_ipv4().ok_or(TableError::FamilyMismatch(*net))?.network())
        } else {
            Ok(net.mapped_ipv6().network())
        }
    }

    /// Walks from the root towards `net` and returns the child indices of the deepest node whose network contains `net`. An empty path
    /// means the root itself is the deepest match.
    fn descend_path(&self, net: &Prefix) -> Vec<usize> {
        let mut path = Vec::new();
        let mut node = &self.root;
        while node.net != *net {
            match node.children.iter().position(|child| child.net.contains(net)) {
                Some(index) => {
                    path.push(index);
                    node = &node.children[index];
                }
                None => break,
            }
        }
        path
    }

    fn node_at_mut(&mut self, path: &[usize]) -> &mut Node<T> {
        let mut node = &mut self.root;
        for index in path {
            node = &mut node.children[*index];
        }
        node
    }

    /// Inserts a value for the network, replacing a previous value of the same network while keeping its subtree intact. New nodes are
    /// grouped below intermediate nodes at the preferred split lengths once a node's child list grows too large.
    pub fn insert(&mut self, net: Prefix, value: T) -> Result<(), TableError> {
        let net = self.coerce(&net)?;
        if net == self.root.net {
            self.root.data = Some(value);
            return Ok(());
        }

        let splits = self.splits;
        let path = self.descend_path(&net);
        let node = self.node_at_mut(&path);
        if node.net == net {
            node.data = Some(value);
            return Ok(());
        }

        let mut ins_node = Node::new(net);
        ins_node.data = Some(value);

        // The smallest preferred split length strictly between the parent's and the new network's prefix length, when one exists.
        let split_len = splits.iter().copied().filter(|split| *split > node.net.mask && *split <= net.mask).min();
        match split_len {
            Some(split_len) if node.children.len() >= SPLIT_CHILD_LIMIT && split_len != net.mask => {
                // Group the new node and every covered sibling below a fresh intermediate node at the split length.
                let mut split_node = Node::new(net.supernet(split_len));
                let mut kept = Vec::with_capacity(node.children.len() + 1);
                for child in node.children.drain(..) {
                    if ins_node.net.contains(&child.net) {
                        ins_node.children.push(child);
                    } else if split_node.net.contains(&child.net) {
                        split_node.children.push(child);
                    } else {
                        kept.push(child);
                    }
                }
                split_node.children.push(ins_node);
                kept.push(split_node);
                node.children = kept;
            }
            _ => {
                let mut kept = Vec::with_capacity(node.children.len() + 1);
                for child in node.children.drain(..) {
                    if ins_node.net.contains(&child.net) {
                        ins_node.children.push(child);
                    } else {
                        kept.push(child);
                    }
                }
                kept.push(ins_node);
                node.children = kept;
            }
        }
        Ok(())
    }

    /// Removes the value stored for exactly this network. A node that still has children stays in the tree as a plain grouping node so
    /// the more specific routes below it remain reachable, a leaf is unlinked from its parent.
    pub fn remove(&mut self, net: &Prefix) -> Result<T, TableError> {
        let net = self.coerce(net)?;
        if net == self.root.net {
            return self.root.data.take().ok_or(TableError::NotFound(net));
        }

        let path = self.descend_path(&net);
        let value;
        let unlink;
        {
            let node = self.node_at_mut(&path);
            if node.net != net {
                return Err(TableError::NotFound(net));
            }
            value = node.data.take().ok_or(TableError::NotFound(net))?;
            unlink = node.children.is_empty();
        }
        if unlink {
            let (last, parent_path) = path.split_last().expect("non-root node has a parent");
            self.node_at_mut(parent_path).children.remove(*last);
        }
        Ok(value)
    }

    /// Returns the most specific entry covering the given network, that is the deepest data node on the descent path.
    pub fn lookup(&self, net: &Prefix) -> Result<(Prefix, &T), TableError> {
        let net = self.coerce(net)?;
        let mut node = &self.root;
        let mut best = node.data.as_ref().map(|data| (node.net, data));
        while node.net != net {
            match node.children.iter().find(|child| child.net.contains(&net)) {
                Some(child) => {
                    node = child;
                    if let Some(data) = &node.data {
                        best = Some((node.net, data));
                    }
                }
                None => break,
            }
        }
        best.ok_or(TableError::NotFound(net))
    }

    /// Returns the most specific entry covering the given address.
    pub fn lookup_address(&self, address: &IpAddr) -> Result<(Prefix, &T), TableError> {
        self.lookup(&Prefix::from(*address))
    }

    fn exact_node(&self, net: &Prefix) -> Option<&Node<T>> {
        let mut node = &self.root;
        while node.net != *net {
            node = node.children.iter().find(|child| child.net.contains(net))?;
        }
        Some(node)
    }

    /// Returns the value stored for exactly this network.
    pub fn exact(&self, net: &Prefix) -> Result<&T, TableError> {
        let net = self.coerce(net)?;
        self.exact_node(&net)
            .and_then(|node| node.data.as_ref())
            .ok_or(TableError::NotFound(net))
    }

    pub fn exact_mut(&mut self, net: &Prefix) -> Result<&mut T, TableError> {
        let net = self.coerce(net)?;
        let path = self.descend_path(&net);
        let node = self.node_at_mut(&path);
        if node.net != net {
            return Err(TableError::NotFound(net));
        }
        node.data.as_mut().ok_or(TableError::NotFound(net))
    }

    pub fn get(&self, net: &Prefix) -> Option<&T> {
        self.exact(net).ok()
    }

    pub fn contains(&self, net: &Prefix) -> bool {
        self.exact(net).is_ok()
    }

    /// Iterates over all entries in depth-first pre-order.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            stack: vec![&self.root],
        }
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.iter().map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    pub fn clear(&mut self) {
        self.root = Node::new(self.root.net);
    }
}

pub struct Iter<'a, T> {
    stack: Vec<&'a Node<T>>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = (Prefix, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(node) = self.stack.pop() {
            for child in node.children.iter().rev() {
                self.stack.push(child);
            }
            if let Some(data) = &node.data {
                return Some((node.net, data));
            }
        }
        None
    }
}

impl<'a, T> IntoIterator for &'a RoutingTable<T> {
    type Item = (Prefix, &'a T);
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T> FromIterator<(Prefix, T)> for RoutingTable<T> {
    fn from_iter<I: IntoIterator<Item = (Prefix, T)>>(iter: I) -> Self {
        let mut table = Self::new();
        for (net, value) in iter {
            // Coercion into the IPv6-rooted table cannot fail.
            let _ = table.insert(net, value);
        }
        table
    }
}
