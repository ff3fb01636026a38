//! Explicit person-to-person networks.
//!
//! A network is a mixing group whose contact structure is a directed
//! graph instead of shared presence: each enrolled person carries a
//! pair of adjacency vectors (out-links, in-links) for the network.
//! Links are created and destroyed symmetrically — `q` appears in `p`'s
//! out-list exactly when `p` appears in `q`'s in-list — and both-side
//! insertion is idempotent. When a person leaves a network (or dies),
//! every neighbour's opposite-direction list is cleaned before the
//! membership itself is dropped.

use std::path::Path;

use crate::condition::ConditionId;
use crate::context::Context;
use crate::error::ContagionError;
use crate::groups::{GroupId, GroupTypeId, MixingGroup};
use crate::hash::HashMap;
use crate::people::PersonId;
use crate::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub struct NetworkId(pub usize);

impl std::fmt::Display for NetworkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One person's view of one network: their membership position plus
/// the directed adjacency.
#[derive(Debug, Default, Clone)]
pub struct PersonNetworkLink {
    pub enrollee_index: usize,
    pub links_to: Vec<PersonId>,
    pub links_from: Vec<PersonId>,
}

impl PersonNetworkLink {
    #[must_use]
    pub fn out_degree(&self) -> usize {
        self.links_to.len()
    }

    #[must_use]
    pub fn in_degree(&self) -> usize {
        self.links_from.len()
    }

    #[must_use]
    pub fn is_connected_to(&self, person: PersonId) -> bool {
        self.links_to.contains(&person)
    }

    #[must_use]
    pub fn is_connected_from(&self, person: PersonId) -> bool {
        self.links_from.contains(&person)
    }

    fn add_link_to(&mut self, person: PersonId) {
        if !self.links_to.contains(&person) {
            self.links_to.push(person);
        }
    }

    fn add_link_from(&mut self, person: PersonId) {
        if !self.links_from.contains(&person) {
            self.links_from.push(person);
        }
    }

    fn delete_link_to(&mut self, person: PersonId) {
        if let Some(pos) = self.links_to.iter().position(|p| *p == person) {
            self.links_to.swap_remove(pos);
        }
    }

    fn delete_link_from(&mut self, person: PersonId) {
        if let Some(pos) = self.links_from.iter().position(|p| *p == person) {
            self.links_from.swap_remove(pos);
        }
    }
}

#[derive(Debug)]
pub struct Network {
    pub id: NetworkId,
    pub name: String,
    /// Membership and per-condition infectious lists, shared with the
    /// place implementation.
    pub group: MixingGroup,
}

#[derive(Debug, Default)]
pub struct NetworkList {
    networks: Vec<Network>,
    names: HashMap<String, NetworkId>,
}

impl NetworkList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_network(&mut self, name: &str, conditions: usize) -> NetworkId {
        let id = NetworkId(self.networks.len());
        self.networks.push(Network {
            id,
            name: name.to_string(),
            group: MixingGroup::new(GroupId(usize::MAX), name, GroupTypeId(usize::MAX), conditions),
        });
        self.names.insert(name.to_string(), id);
        id
    }

    #[must_use]
    pub fn get(&self, id: NetworkId) -> &Network {
        &self.networks[id.0]
    }

    pub fn get_mut(&mut self, id: NetworkId) -> &mut Network {
        &mut self.networks[id.0]
    }

    pub fn find(&self, name: &str) -> Option<NetworkId> {
        self.names.get(name).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.networks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }
}

pub trait ContextNetworkExt {
    /// Enrolls `person` in the network. Idempotent.
    fn join_network(&mut self, person: PersonId, network: NetworkId);
    /// Removes `person` from the network, unwinding every link first.
    fn leave_network(&mut self, person: PersonId, network: NetworkId);
    fn is_enrolled_in_network(&self, person: PersonId, network: NetworkId) -> bool;
    /// Creates the directed link `person → neighbor` on both sides.
    fn create_link_to(&mut self, person: PersonId, neighbor: PersonId, network: NetworkId);
    /// Creates the directed link `neighbor → person` on both sides.
    fn create_link_from(&mut self, person: PersonId, neighbor: PersonId, network: NetworkId);
    fn destroy_link_to(&mut self, person: PersonId, neighbor: PersonId, network: NetworkId);
    fn destroy_link_from(&mut self, person: PersonId, neighbor: PersonId, network: NetworkId);
    fn is_connected_to(&self, person: PersonId, neighbor: PersonId, network: NetworkId) -> bool;
    fn is_connected_from(&self, person: PersonId, neighbor: PersonId, network: NetworkId) -> bool;
    fn out_degree(&self, person: PersonId, network: NetworkId) -> usize;
    fn in_degree(&self, person: PersonId, network: NetworkId) -> usize;
    /// Adds infectious marking for the transmission loop.
    fn add_network_infectious(
        &mut self,
        network: NetworkId,
        condition_id: ConditionId,
        person: PersonId,
    );
    /// Loads an explicit `id1 id2` whitespace edge list, creating the
    /// link `id1 → id2` for each line.
    fn load_edge_list(&mut self, network: NetworkId, path: &Path) -> Result<usize, ContagionError>;
}

impl ContextNetworkExt for Context {
    fn join_network(&mut self, person: PersonId, network: NetworkId) {
        if self.is_enrolled_in_network(person, network) {
            return;
        }
        trace!("person {person} joining network {network}");
        let index = self.networks.get_mut(network).group.enroll(person);
        self.population.get_mut(person).network_links.insert(
            network.0,
            PersonNetworkLink {
                enrollee_index: index,
                ..PersonNetworkLink::default()
            },
        );
    }

    fn leave_network(&mut self, person: PersonId, network: NetworkId) {
        let Some(link) = self.population.get_mut(person).network_links.remove(&network.0) else {
            return;
        };
        // Symmetric unwind: this person disappears from every
        // neighbour's opposite-direction list.
        for neighbor in &link.links_to {
            if let Some(nl) = self
                .population
                .get_mut(*neighbor)
                .network_links
                .get_mut(&network.0)
            {
                nl.delete_link_from(person);
            }
        }
        for neighbor in &link.links_from {
            if let Some(nl) = self
                .population
                .get_mut(*neighbor)
                .network_links
                .get_mut(&network.0)
            {
                nl.delete_link_to(person);
            }
        }
        let moved = self
            .networks
            .get_mut(network)
            .group
            .unenroll(link.enrollee_index);
        if let Some((moved_person, new_index)) = moved {
            self.population
                .get_mut(moved_person)
                .network_links
                .get_mut(&network.0)
                .expect("enrolled member must hold a link record")
                .enrollee_index = new_index;
        }
    }

    fn is_enrolled_in_network(&self, person: PersonId, network: NetworkId) -> bool {
        self.population
            .get(person)
            .network_links
            .contains_key(&network.0)
    }

    fn create_link_to(&mut self, person: PersonId, neighbor: PersonId, network: NetworkId) {
        assert_ne!(person, neighbor, "cannot make edge to self");
        let (p, q) = self.population.pair_mut(person, neighbor);
        p.network_links
            .get_mut(&network.0)
            .expect("link endpoints must be enrolled")
            .add_link_to(neighbor);
        q.network_links
            .get_mut(&network.0)
            .expect("link endpoints must be enrolled")
            .add_link_from(person);
    }

    fn create_link_from(&mut self, person: PersonId, neighbor: PersonId, network: NetworkId) {
        self.create_link_to(neighbor, person, network);
    }

    fn destroy_link_to(&mut self, person: PersonId, neighbor: PersonId, network: NetworkId) {
        let (p, q) = self.population.pair_mut(person, neighbor);
        if let Some(link) = p.network_links.get_mut(&network.0) {
            link.delete_link_to(neighbor);
        }
        if let Some(link) = q.network_links.get_mut(&network.0) {
            link.delete_link_from(person);
        }
    }

    fn destroy_link_from(&mut self, person: PersonId, neighbor: PersonId, network: NetworkId) {
        self.destroy_link_to(neighbor, person, network);
    }

    fn is_connected_to(&self, person: PersonId, neighbor: PersonId, network: NetworkId) -> bool {
        self.population
            .get(person)
            .network_links
            .get(&network.0)
            .is_some_and(|l| l.is_connected_to(neighbor))
    }

    fn is_connected_from(&self, person: PersonId, neighbor: PersonId, network: NetworkId) -> bool {
        self.population
            .get(person)
            .network_links
            .get(&network.0)
            .is_some_and(|l| l.is_connected_from(neighbor))
    }

    fn out_degree(&self, person: PersonId, network: NetworkId) -> usize {
        self.population
            .get(person)
            .network_links
            .get(&network.0)
            .map_or(0, PersonNetworkLink::out_degree)
    }

    fn in_degree(&self, person: PersonId, network: NetworkId) -> usize {
        self.population
            .get(person)
            .network_links
            .get(&network.0)
            .map_or(0, PersonNetworkLink::in_degree)
    }

    fn add_network_infectious(
        &mut self,
        network: NetworkId,
        condition_id: ConditionId,
        person: PersonId,
    ) {
        self.networks
            .get_mut(network)
            .group
            .add_infectious(condition_id, person);
    }

    fn load_edge_list(&mut self, network: NetworkId, path: &Path) -> Result<usize, ContagionError> {
        let text = std::fs::read_to_string(path)?;
        let mut edges = 0;
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut tokens = line.split_whitespace();
            let (Some(a), Some(b)) = (tokens.next(), tokens.next()) else {
                return Err(ContagionError::ContagionError(format!(
                    "malformed edge list line: {line}"
                )));
            };
            let a = PersonId(a.parse::<usize>()?);
            let b = PersonId(b.parse::<usize>()?);
            self.join_network(a, network);
            self.join_network(b, network);
            self.create_link_to(a, b, network);
            edges += 1;
        }
        Ok(edges)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::people::PersonSpec;
    use std::io::Write;

    fn context_with(n: usize) -> (Context, Vec<PersonId>, NetworkId) {
        let mut ctx = Context::empty();
        let people: Vec<PersonId> = (0..n)
            .map(|_| ctx.population.add_person(PersonSpec::default(), 1))
            .collect();
        let net = ctx.networks.add_network("test", 1);
        (ctx, people, net)
    }

    #[test]
    fn create_destroy_round_trip() {
        let (mut ctx, p, net) = context_with(2);
        ctx.join_network(p[0], net);
        ctx.join_network(p[1], net);

        ctx.create_link_to(p[0], p[1], net);
        assert!(ctx.is_connected_to(p[0], p[1], net));
        assert!(ctx.is_connected_from(p[1], p[0], net));

        ctx.destroy_link_to(p[0], p[1], net);
        assert!(!ctx.is_connected_to(p[0], p[1], net));
        assert!(!ctx.is_connected_from(p[1], p[0], net));
        assert_eq!(ctx.out_degree(p[0], net), 0);
        assert_eq!(ctx.in_degree(p[1], net), 0);
    }

    #[test]
    fn link_creation_is_idempotent() {
        let (mut ctx, p, net) = context_with(2);
        ctx.join_network(p[0], net);
        ctx.join_network(p[1], net);
        ctx.create_link_to(p[0], p[1], net);
        ctx.create_link_to(p[0], p[1], net);
        assert_eq!(ctx.out_degree(p[0], net), 1);
        assert_eq!(ctx.in_degree(p[1], net), 1);
    }

    #[test]
    fn symmetry_invariant_over_random_churn() {
        let (mut ctx, p, net) = context_with(5);
        for person in &p {
            ctx.join_network(*person, net);
        }
        ctx.create_link_to(p[0], p[1], net);
        ctx.create_link_to(p[0], p[2], net);
        ctx.create_link_to(p[3], p[0], net);
        ctx.destroy_link_to(p[0], p[2], net);

        for a in &p {
            for b in &p {
                if a == b {
                    continue;
                }
                assert_eq!(
                    ctx.is_connected_to(*a, *b, net),
                    ctx.is_connected_from(*b, *a, net)
                );
            }
        }
    }

    #[test]
    fn leave_network_unwinds_links() {
        let (mut ctx, p, net) = context_with(3);
        for person in &p {
            ctx.join_network(*person, net);
        }
        ctx.create_link_to(p[0], p[1], net);
        ctx.create_link_to(p[2], p[0], net);

        ctx.leave_network(p[0], net);
        assert!(!ctx.is_enrolled_in_network(p[0], net));
        assert_eq!(ctx.in_degree(p[1], net), 0);
        assert_eq!(ctx.out_degree(p[2], net), 0);
        assert_eq!(ctx.networks.get(net).group.size(), 2);
    }

    #[test]
    fn leave_network_fixes_displaced_index() {
        let (mut ctx, p, net) = context_with(3);
        for person in &p {
            ctx.join_network(*person, net);
        }
        // p[0] holds position 0; removing it moves p[2] there.
        ctx.leave_network(p[0], net);
        let moved = ctx.population.get(p[2]).network_links[&net.0].enrollee_index;
        assert_eq!(ctx.networks.get(net).group.member(moved), p[2]);
    }

    #[test]
    fn join_is_idempotent() {
        let (mut ctx, p, net) = context_with(1);
        ctx.join_network(p[0], net);
        ctx.join_network(p[0], net);
        assert_eq!(ctx.networks.get(net).group.size(), 1);
    }

    #[test]
    #[should_panic(expected = "edge to self")]
    fn self_edge_panics() {
        let (mut ctx, p, net) = context_with(1);
        ctx.join_network(p[0], net);
        ctx.create_link_to(p[0], p[0], net);
    }

    #[test]
    fn edge_list_loading() {
        let (mut ctx, p, net) = context_with(3);
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "0 1").unwrap();
        writeln!(file, "# comment").unwrap();
        writeln!(file, "1 2").unwrap();
        let edges = ctx.load_edge_list(net, file.path()).unwrap();
        assert_eq!(edges, 2);
        assert!(ctx.is_connected_to(p[0], p[1], net));
        assert!(ctx.is_connected_to(p[1], p[2], net));
    }
}
