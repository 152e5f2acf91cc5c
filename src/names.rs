//! Derivation of the names a resolver override is installed for.

use std::collections::HashSet;

/// Fully-qualified names to redirect.
///
/// `zones` are the requested domains and apply to everything below them;
/// `hosts` are peer names qualified with the internal zone and each search
/// domain. Empty inputs are skipped and duplicates collapse to their first
/// occurrence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverrideNameSet {
    zones: Vec<String>,
    hosts: Vec<String>,
}

impl OverrideNameSet {
    /// Computes `domains ∪ {peer.internal} ∪ {peer.search}` for non-empty
    /// peers and search domains.
    #[must_use]
    pub fn compute(
        domains: &[String],
        peers: &[String],
        internal: &str,
        search_domains: &[String],
    ) -> Self {
        let mut seen = HashSet::new();
        let mut set = Self::default();

        for domain in domains {
            let domain = normalize(domain);
            if !domain.is_empty() && seen.insert(domain.to_string()) {
                set.zones.push(domain.to_string());
            }
        }

        let internal = normalize(internal);
        for peer in peers.iter().map(|p| normalize(p)).filter(|p| !p.is_empty()) {
            let suffixes = std::iter::once(internal)
                .chain(search_domains.iter().map(|s| normalize(s)))
                .filter(|s| !s.is_empty());
            for suffix in suffixes {
                let name = format!("{peer}.{suffix}");
                if seen.insert(name.clone()) {
                    set.hosts.push(name);
                }
            }
        }

        set
    }

    /// Requested zones.
    #[must_use]
    pub fn zones(&self) -> &[String] {
        &self.zones
    }

    /// Peer-derived host names.
    #[must_use]
    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    /// Iterates zones then hosts.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.zones.iter().chain(&self.hosts).map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.zones.len() + self.hosts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.zones.is_empty() && self.hosts.is_empty()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.iter().any(|n| n == name)
    }
}

fn normalize(name: &str) -> &str {
    name.trim().trim_end_matches('.')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| (*s).to_string()).collect()
    }

    fn sorted(set: &OverrideNameSet) -> Vec<&str> {
        let mut v: Vec<_> = set.iter().collect();
        v.sort_unstable();
        v
    }

    #[test]
    fn union_of_domains_internal_and_search_domains() {
        let set = OverrideNameSet::compute(
            &strings(&["corp.example"]),
            &strings(&["host1", "host2"]),
            "internal.example",
            &strings(&["lan", "office.example"]),
        );
        assert_eq!(
            sorted(&set),
            vec![
                "corp.example",
                "host1.internal.example",
                "host1.lan",
                "host1.office.example",
                "host2.internal.example",
                "host2.lan",
                "host2.office.example",
            ]
        );
        assert_eq!(set.zones(), ["corp.example"]);
        assert_eq!(set.hosts().len(), 6);
    }

    #[test]
    fn empty_peers_yield_only_domains() {
        let set = OverrideNameSet::compute(
            &strings(&["a.example", "b.example"]),
            &[],
            "internal.example",
            &strings(&["lan"]),
        );
        assert_eq!(sorted(&set), vec!["a.example", "b.example"]);
    }

    #[test]
    fn empty_string_peers_and_search_domains_are_excluded() {
        let set = OverrideNameSet::compute(
            &[],
            &strings(&["", "host1"]),
            "internal.example",
            &strings(&["", "lan"]),
        );
        assert_eq!(sorted(&set), vec!["host1.internal.example", "host1.lan"]);
    }

    #[test]
    fn empty_internal_is_not_qualified() {
        let set = OverrideNameSet::compute(&[], &strings(&["host1"]), "", &[]);
        assert!(set.is_empty());
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn duplicates_collapse() {
        let set = OverrideNameSet::compute(
            &strings(&["corp.example", "corp.example."]),
            &strings(&["host1"]),
            "lan",
            &strings(&["lan"]),
        );
        assert_eq!(sorted(&set), vec!["corp.example", "host1.lan"]);
        assert!(set.contains("host1.lan"));
    }

    #[test]
    fn search_domain_order_is_kept() {
        let set = OverrideNameSet::compute(
            &[],
            &strings(&["h"]),
            "",
            &strings(&["z.example", "a.example"]),
        );
        assert_eq!(set.hosts(), ["h.z.example", "h.a.example"]);
    }
}
