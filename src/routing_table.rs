use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{Cost, NodeName};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub distance: Cost,
    pub next_hop: NodeName,
}

/// Per-destination best distance and next hop. Only reachable destinations
/// have an entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouteTable {
    entries: BTreeMap<NodeName, Route>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    pub fn add_route(&mut self, destination: NodeName, distance: Cost, next_hop: NodeName) {
        self.entries.insert(destination, Route { distance, next_hop });
    }

    pub fn get_route(&self, destination: &str) -> Option<&Route> {
        self.entries.get(destination)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeName, &Route)> {
        self.entries.iter()
    }

    pub fn destinations(&self) -> impl Iterator<Item = &NodeName> {
        self.entries.keys()
    }

    /// Drop every route going through `next_hop`.
    pub fn remove_routes_via(&mut self, next_hop: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, route| route.next_hop != next_hop);
        before - self.entries.len()
    }

    /// First next hop rejected by `is_live`, if any.
    pub fn find_invalid_next_hop(&self, is_live: impl Fn(&str) -> bool) -> Option<&NodeName> {
        self.entries
            .values()
            .map(|route| &route.next_hop)
            .find(|hop| !is_live(hop))
    }
}

impl FromIterator<(NodeName, Route)> for RouteTable {
    fn from_iter<T: IntoIterator<Item = (NodeName, Route)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl From<BTreeMap<NodeName, Route>> for RouteTable {
    fn from(entries: BTreeMap<NodeName, Route>) -> Self {
        Self { entries }
    }
}

impl From<&RouteTable> for BTreeMap<NodeName, Route> {
    fn from(table: &RouteTable) -> Self {
        table.entries.clone()
    }
}
