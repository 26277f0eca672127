use std::collections::BTreeSet;
use std::fmt;

/// An ordered set of logical CPU indices.
///
/// A `CpuSet` is immutable once built and is used as an opaque affinity
/// key: task queues, host partitions and thread-local initializers are all
/// keyed by the set of CPUs they are bound to. Ordering is guaranteed by
/// the underlying `BTreeSet`, so [`CpuSet::first`] is deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct CpuSet {
    cpus: BTreeSet<usize>,
}

impl CpuSet {
    /// Builds a set from any iterator of logical CPU indices.
    ///
    /// Duplicate indices are collapsed.
    pub fn from_indices<I: IntoIterator<Item = usize>>(indices: I) -> Self {
        Self {
            cpus: indices.into_iter().collect(),
        }
    }

    /// Builds a set containing a single CPU.
    pub fn single(cpu: usize) -> Self {
        Self::from_indices([cpu])
    }

    /// The lowest CPU index in the set, if any.
    pub fn first(&self) -> Option<usize> {
        self.cpus.iter().next().copied()
    }

    pub fn contains(&self, cpu: usize) -> bool {
        self.cpus.contains(&cpu)
    }

    /// True if every CPU of `other` is also in `self`.
    pub fn contains_set(&self, other: &CpuSet) -> bool {
        other.cpus.is_subset(&self.cpus)
    }

    /// True if the two sets share at least one CPU.
    pub fn intersects(&self, other: &CpuSet) -> bool {
        !self.cpus.is_disjoint(&other.cpus)
    }

    pub fn len(&self) -> usize {
        self.cpus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cpus.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.cpus.iter().copied()
    }
}

impl fmt::Display for CpuSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, cpu) in self.cpus.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{cpu}")?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordered_and_deduplicated() {
        let set = CpuSet::from_indices([3, 1, 2, 1]);
        assert_eq!(set.len(), 3);
        assert_eq!(set.first(), Some(1));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn subset_and_intersection() {
        let host = CpuSet::from_indices(0..8);
        let network = CpuSet::single(0);
        let other_host = CpuSet::from_indices(8..16);

        assert!(host.contains_set(&network));
        assert!(host.intersects(&network));
        assert!(!host.intersects(&other_host));
        assert!(!network.contains_set(&host));
    }

    #[test]
    fn display_is_brace_delimited() {
        let set = CpuSet::from_indices([0, 2]);
        assert_eq!(set.to_string(), "{0,2}");
        assert_eq!(CpuSet::default().to_string(), "{}");
    }
}
