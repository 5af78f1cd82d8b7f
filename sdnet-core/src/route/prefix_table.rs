//! Binary radix trie for longest-prefix match
//!
//! One trie per address family. Addresses are left-aligned in a `u128` so
//! IPv4 and IPv6 share the same bit walk; node `i`'s children are indexed
//! by the next address bit.

use ipnet::IpNet;
use std::net::IpAddr;

struct TrieNode<V> {
    children: [Option<usize>; 2],
    entry: Option<(IpNet, V)>,
}

impl<V> TrieNode<V> {
    fn empty() -> Self {
        Self {
            children: [None, None],
            entry: None,
        }
    }
}

struct BitTrie<V> {
    nodes: Vec<TrieNode<V>>,
}

impl<V> BitTrie<V> {
    fn new() -> Self {
        Self {
            nodes: vec![TrieNode::empty()],
        }
    }

    fn bit(bits: u128, i: u8) -> usize {
        ((bits >> (127 - i as u32)) & 1) as usize
    }

    fn find(&self, bits: u128, len: u8) -> Option<usize> {
        let mut node = 0;
        for i in 0..len {
            node = self.nodes[node].children[Self::bit(bits, i)]?;
        }
        Some(node)
    }

    fn insert(&mut self, bits: u128, len: u8, prefix: IpNet, value: V) -> Option<V> {
        let mut node = 0;
        for i in 0..len {
            let b = Self::bit(bits, i);
            node = match self.nodes[node].children[b] {
                Some(child) => child,
                None => {
                    self.nodes.push(TrieNode::empty());
                    let child = self.nodes.len() - 1;
                    self.nodes[node].children[b] = Some(child);
                    child
                }
            };
        }
        self.nodes[node]
            .entry
            .replace((prefix, value))
            .map(|(_, old)| old)
    }

    /// Removes the entry; interior nodes are kept for reuse
    fn remove(&mut self, bits: u128, len: u8) -> Option<V> {
        let node = self.find(bits, len)?;
        self.nodes[node].entry.take().map(|(_, v)| v)
    }

    /// Entries on the path to `bits`, most specific first
    fn matches(&self, bits: u128, max_len: u8) -> Vec<&(IpNet, V)> {
        let mut found = Vec::new();
        let mut node = 0;
        let mut depth = 0;
        loop {
            if let Some(entry) = &self.nodes[node].entry {
                found.push(entry);
            }
            if depth == max_len {
                break;
            }
            match self.nodes[node].children[Self::bit(bits, depth)] {
                Some(child) => node = child,
                None => break,
            }
            depth += 1;
        }
        found.reverse();
        found
    }
}

/// Prefix-keyed table with longest-prefix-match lookup
pub struct PrefixTable<V> {
    v4: BitTrie<V>,
    v6: BitTrie<V>,
    len: usize,
}

fn addr_bits(addr: IpAddr) -> (u128, u8) {
    match addr {
        IpAddr::V4(v4) => ((u32::from(v4) as u128) << 96, 32),
        IpAddr::V6(v6) => (u128::from(v6), 128),
    }
}

impl<V> PrefixTable<V> {
    pub fn new() -> Self {
        Self {
            v4: BitTrie::new(),
            v6: BitTrie::new(),
            len: 0,
        }
    }

    fn trie(&self, addr: &IpAddr) -> &BitTrie<V> {
        match addr {
            IpAddr::V4(_) => &self.v4,
            IpAddr::V6(_) => &self.v6,
        }
    }

    fn trie_mut(&mut self, addr: &IpAddr) -> &mut BitTrie<V> {
        match addr {
            IpAddr::V4(_) => &mut self.v4,
            IpAddr::V6(_) => &mut self.v6,
        }
    }

    /// Insert or replace; host bits of `prefix` are ignored
    pub fn insert(&mut self, prefix: IpNet, value: V) -> Option<V> {
        let prefix = prefix.trunc();
        let (bits, _) = addr_bits(prefix.network());
        let len = prefix.prefix_len();
        let old = self
            .trie_mut(&prefix.network())
            .insert(bits, len, prefix, value);
        if old.is_none() {
            self.len += 1;
        }
        old
    }

    pub fn remove(&mut self, prefix: &IpNet) -> Option<V> {
        let prefix = prefix.trunc();
        let (bits, _) = addr_bits(prefix.network());
        let old = self
            .trie_mut(&prefix.network())
            .remove(bits, prefix.prefix_len());
        if old.is_some() {
            self.len -= 1;
        }
        old
    }

    /// Exact-match lookup
    pub fn get(&self, prefix: &IpNet) -> Option<&V> {
        let prefix = prefix.trunc();
        let (bits, _) = addr_bits(prefix.network());
        let trie = self.trie(&prefix.network());
        let node = trie.find(bits, prefix.prefix_len())?;
        trie.nodes[node].entry.as_ref().map(|(_, v)| v)
    }

    /// Most specific prefix containing `addr`
    pub fn longest_match(&self, addr: IpAddr) -> Option<(IpNet, &V)> {
        self.matching(addr).into_iter().next()
    }

    /// Every prefix containing `addr`, most specific first
    pub fn matching(&self, addr: IpAddr) -> Vec<(IpNet, &V)> {
        let (bits, max_len) = addr_bits(addr);
        self.trie(&addr)
            .matches(bits, max_len)
            .into_iter()
            .map(|(prefix, value)| (*prefix, value))
            .collect()
    }

    /// All entries in ascending prefix order
    pub fn entries(&self) -> Vec<(IpNet, &V)> {
        let mut entries: Vec<(IpNet, &V)> = self
            .v4
            .nodes
            .iter()
            .chain(self.v6.nodes.iter())
            .filter_map(|node| node.entry.as_ref().map(|(p, v)| (*p, v)))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<V> Default for PrefixTable<V> {
    fn default() -> Self {
        Self::new()
    }
}
