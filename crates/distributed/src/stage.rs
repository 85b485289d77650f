use bsj_common::{PartitionId, WorkerId};
use serde::{Deserialize, Serialize};

/// Partitions owned by one worker, run in ascending order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionAssignment {
    pub worker: WorkerId,
    pub partitions: Vec<PartitionId>,
}

/// Static round-robin assignment of `partition_count` partitions over at
/// most `worker_count` workers. Workers that would receive nothing are not
/// created.
pub fn assign_partitions(partition_count: u32, worker_count: usize) -> Vec<PartitionAssignment> {
    let workers = worker_count
        .max(1)
        .min(usize::try_from(partition_count).unwrap_or(usize::MAX));
    let mut assignments = (0..workers)
        .map(|w| PartitionAssignment {
            worker: WorkerId(w),
            partitions: Vec::new(),
        })
        .collect::<Vec<_>>();
    for p in 0..partition_count {
        let slot = p as usize % workers;
        assignments[slot].partitions.push(PartitionId(p));
    }
    assignments
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_robin_covers_every_partition_once() {
        let assignments = assign_partitions(10, 3);
        assert_eq!(assignments.len(), 3);
        assert_eq!(
            assignments[0].partitions,
            vec![PartitionId(0), PartitionId(3), PartitionId(6), PartitionId(9)]
        );
        assert_eq!(assignments[2].partitions, vec![PartitionId(2), PartitionId(5), PartitionId(8)]);
        let mut all = assignments
            .iter()
            .flat_map(|a| a.partitions.iter().map(|p| p.0))
            .collect::<Vec<_>>();
        all.sort_unstable();
        assert_eq!(all, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn never_creates_idle_workers() {
        let assignments = assign_partitions(2, 8);
        assert_eq!(assignments.len(), 2);
        assert_eq!(assign_partitions(0, 4).len(), 0);
        assert_eq!(assign_partitions(5, 0).len(), 1);
    }
}
