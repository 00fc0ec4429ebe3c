//! Provenance lineage
//!
//! Parameter citations are interned once per module; a node's lineage is the
//! sorted set of citation indices reachable through its operands. Sets are
//! immutable after construction and shared through `Arc`, so nodes that
//! inherit an operand's lineage unchanged do not copy it.

use super::{IrNode, NodeKind};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::sync::Arc;
use string_interner::{DefaultStringInterner, Symbol};

/// Sorted set of citation indices
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Lineage(Arc<[u32]>);

impl Lineage {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn single(citation: u32) -> Self {
        Self(Arc::from(vec![citation]))
    }

    pub fn from_vec(mut ids: Vec<u32>) -> Self {
        ids.sort_unstable();
        ids.dedup();
        Self(Arc::from(ids))
    }

    pub fn ids(&self) -> &[u32] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, citation: u32) -> bool {
        self.0.binary_search(&citation).is_ok()
    }

    /// Whether both share the same allocation
    pub fn ptr_eq(&self, other: &Lineage) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Set union. Returns a clone of `self` or `other` when one already
    /// contains the other.
    pub fn union(&self, other: &Lineage) -> Lineage {
        if other.0.iter().all(|c| self.contains(*c)) {
            return self.clone();
        }
        if self.0.iter().all(|c| other.contains(*c)) {
            return other.clone();
        }
        let mut merged = Vec::with_capacity(self.0.len() + other.0.len());
        let (mut i, mut j) = (0, 0);
        let (a, b) = (&self.0, &other.0);
        while i < a.len() && j < b.len() {
            match a[i].cmp(&b[j]) {
                std::cmp::Ordering::Less => {
                    merged.push(a[i]);
                    i += 1;
                }
                std::cmp::Ordering::Greater => {
                    merged.push(b[j]);
                    j += 1;
                }
                std::cmp::Ordering::Equal => {
                    merged.push(a[i]);
                    i += 1;
                    j += 1;
                }
            }
        }
        merged.extend_from_slice(&a[i..]);
        merged.extend_from_slice(&b[j..]);
        Lineage(Arc::from(merged))
    }
}

impl Serialize for Lineage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.ids().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Lineage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Vec::<u32>::deserialize(deserializer).map(Lineage::from_vec)
    }
}

/// Interns citation strings in first-use order
#[derive(Debug, Default)]
pub struct CitationTable {
    interner: DefaultStringInterner,
}

impl CitationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, citation: &str) -> u32 {
        let symbol = self.interner.get_or_intern(citation);
        symbol.to_usize() as u32
    }

    pub fn len(&self) -> usize {
        self.interner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interner.is_empty()
    }

    /// Citations indexed by their interned id
    pub fn into_strings(self) -> Vec<String> {
        let mut strings: Vec<(usize, String)> = (&self.interner)
            .into_iter()
            .map(|(sym, s)| (sym.to_usize(), s.to_string()))
            .collect();
        strings.sort_by_key(|(i, _)| *i);
        strings.into_iter().map(|(_, s)| s).collect()
    }
}

/// Compute every node's lineage.
///
/// `own` holds the citation each node contributes itself (parameter nodes).
/// `entity_nodes` maps entity index to its node, for `prev` reads. A `prev`
/// read may refer to an entity defined later, so this iterates to a fixpoint.
pub fn propagate(nodes: &mut [IrNode], own: &[Option<u32>], entity_nodes: &[u32]) {
    loop {
        let mut changed = false;
        for i in 0..nodes.len() {
            let mut lineage = match own.get(i).copied().flatten() {
                Some(c) => Lineage::single(c),
                None => Lineage::empty(),
            };
            for &op in &nodes[i].operands {
                lineage = lineage.union(&nodes[op as usize].lineage);
            }
            if let NodeKind::Prev { entity } = nodes[i].kind {
                if let Some(&source) = entity_nodes.get(entity) {
                    lineage = lineage.union(&nodes[source as usize].lineage);
                }
            }
            if lineage != nodes[i].lineage {
                nodes[i].lineage = lineage;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
}
