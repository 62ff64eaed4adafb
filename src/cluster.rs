// Cluster descriptor parsing and deterministic peer-ID derivation.
//
// Grounded on `original_source/raftInit.go`: a `name=url,name=url` string is
// turned into a membership map, and each peer's numeric ID is derived from a
// SHA-1 digest of the sorted URL list concatenated with its own name, so
// every node in the cluster computes the same IDs without a central
// allocator.

use crate::error::{NodeError, Result};
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub id: u64,
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct Cluster {
    /// Keyed by name, in the order the descriptor listed them.
    members: BTreeMap<String, Member>,
}

impl Cluster {
    /// Parse `name1=url1,name2=url2,...`.
    pub fn parse(descriptor: &str) -> Result<Self> {
        let mut names = Vec::new();
        let mut urls = Vec::new();
        for pair in descriptor.split(',') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            let (name, url) = pair.split_once('=').ok_or_else(|| {
                NodeError::InvalidClusterDescriptor(format!("missing '=' in {pair:?}"))
            })?;
            let (name, url) = (name.trim(), url.trim());
            if name.is_empty() || url.is_empty() {
                return Err(NodeError::InvalidClusterDescriptor(format!(
                    "empty name or url in {pair:?}"
                )));
            }
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(NodeError::InvalidClusterDescriptor(format!(
                    "url must be http(s): {url:?}"
                )));
            }
            if names.contains(&name.to_string()) {
                return Err(NodeError::InvalidClusterDescriptor(format!(
                    "duplicate peer name: {name:?}"
                )));
            }
            names.push(name.to_string());
            urls.push(url.to_string());
        }
        if names.is_empty() {
            return Err(NodeError::InvalidClusterDescriptor(
                "cluster descriptor is empty".to_string(),
            ));
        }

        let mut sorted_urls = urls.clone();
        sorted_urls.sort();

        let mut members = BTreeMap::new();
        for (name, url) in names.into_iter().zip(urls.into_iter()) {
            let id = derive_peer_id(&sorted_urls, &name);
            members.insert(name.clone(), Member { id, name, url });
        }

        Ok(Self { members })
    }

    pub fn members(&self) -> impl Iterator<Item = &Member> {
        self.members.values()
    }

    pub fn get(&self, name: &str) -> Option<&Member> {
        self.members.get(name)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn peers_other_than<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Member> {
        self.members.values().filter(move |m| m.name != name)
    }

    /// A cluster-wide ID every member derives identically, so a node
    /// started against the wrong descriptor fails the `X-Etcd-Cluster-ID`
    /// check rather than silently joining. Same construction as a peer
    /// ID (SHA-1 of the sorted URL list, high 8 bytes), just without a
    /// per-member name mixed in.
    pub fn id(&self) -> u64 {
        let mut urls: Vec<&str> = self.members.values().map(|m| m.url.as_str()).collect();
        urls.sort_unstable();
        let mut hasher = Sha1::new();
        hasher.update(urls.join(",").as_bytes());
        let digest = hasher.finalize();
        u64::from_be_bytes(digest[0..8].try_into().expect("sha1 digest is 20 bytes"))
    }
}

/// SHA-1(sorted_url_list joined by ',' || name), high 8 bytes, big-endian, as u64.
fn derive_peer_id(sorted_urls: &[String], name: &str) -> u64 {
    let mut hasher = Sha1::new();
    hasher.update(sorted_urls.join(",").as_bytes());
    hasher.update(name.as_bytes());
    let digest = hasher.finalize();
    u64::from_be_bytes(digest[0..8].try_into().expect("sha1 digest is 20 bytes"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_member() {
        let c = Cluster::parse("n1=http://127.0.0.1:12379").unwrap();
        assert_eq!(c.len(), 1);
        assert_eq!(c.get("n1").unwrap().url, "http://127.0.0.1:12379");
    }

    #[test]
    fn parses_three_members_and_excludes_self() {
        let c = Cluster::parse(
            "n1=http://127.0.0.1:1,n2=http://127.0.0.1:2,n3=http://127.0.0.1:3",
        )
        .unwrap();
        assert_eq!(c.len(), 3);
        let others: Vec<_> = c.peers_other_than("n1").map(|m| m.name.clone()).collect();
        assert_eq!(others.len(), 2);
        assert!(!others.contains(&"n1".to_string()));
    }

    #[test]
    fn peer_ids_are_deterministic_and_independent_of_listing_order() {
        let a = Cluster::parse("n1=http://a,n2=http://b").unwrap();
        let b = Cluster::parse("n2=http://b,n1=http://a").unwrap();
        assert_eq!(a.get("n1").unwrap().id, b.get("n1").unwrap().id);
        assert_eq!(a.get("n2").unwrap().id, b.get("n2").unwrap().id);
        assert_ne!(a.get("n1").unwrap().id, a.get("n2").unwrap().id);
    }

    #[test]
    fn cluster_id_is_independent_of_listing_order_but_sensitive_to_membership() {
        let a = Cluster::parse("n1=http://a,n2=http://b").unwrap();
        let b = Cluster::parse("n2=http://b,n1=http://a").unwrap();
        assert_eq!(a.id(), b.id());

        let c = Cluster::parse("n1=http://a,n2=http://b,n3=http://c").unwrap();
        assert_ne!(a.id(), c.id());
    }

    #[test]
    fn rejects_malformed_descriptors() {
        assert!(Cluster::parse("").is_err());
        assert!(Cluster::parse("n1").is_err());
        assert!(Cluster::parse("n1=ftp://x").is_err());
        assert!(Cluster::parse("n1=http://a,n1=http://b").is_err());
    }
}
