/// EIP-2124 fork identifiers.
///
/// A node summarises the protocol upgrades it has passed as a CRC32 checksum over
/// the genesis hash and every passed fork block, plus the number of the next
/// fork it expects. Comparing two of these at handshake time rejects peers on an
/// incompatible chain before any data is requested from them.
use alloy_primitives::B256;
use containers::ForkId;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ForkIdError {
    #[error("remote needs update (fork id {0})")]
    RemoteStale(ForkId),
    #[error("local incompatible or needs update (remote fork id {0})")]
    LocalIncompatibleOrStale(ForkId),
}

/// Precomputed checksums of the local fork schedule.
#[derive(Debug, Clone)]
pub struct ForkFilter {
    /// sums[0] = CRC32(genesis), sums[i] = CRC32(genesis || forks[0] || .. || forks[i-1])
    sums: Vec<[u8; 4]>,
    /// Sorted, deduplicated, without block 0.
    forks: Vec<u64>,
}

impl ForkFilter {
    pub fn new(genesis_hash: &B256, fork_blocks: &[u64]) -> Self {
        let mut forks = fork_blocks.to_vec();
        forks.sort_unstable();
        forks.dedup();
        forks.retain(|&block| block != 0);

        let mut hash = crc32fast::hash(genesis_hash.as_slice());
        let mut sums = Vec::with_capacity(forks.len() + 1);
        sums.push(hash.to_be_bytes());

        for &fork in &forks {
            let mut hasher = crc32fast::Hasher::new_with_initial(hash);
            hasher.update(&fork.to_be_bytes());
            hash = hasher.finalize();
            sums.push(hash.to_be_bytes());
        }

        Self { sums, forks }
    }

    /// Index of the first fork not yet reached at `head`, or `forks.len()` when all passed.
    fn position(&self, head: u64) -> usize {
        self.forks
            .iter()
            .position(|&fork| head < fork)
            .unwrap_or(self.forks.len())
    }

    /// Fork id to advertise while the local head is at `head`.
    pub fn fork_id(&self, head: u64) -> ForkId {
        let index = self.position(head);
        let next = self.forks.get(index).copied().unwrap_or(0);
        ForkId::new(self.sums[index], next)
    }

    /// Checks a remote fork id against the local schedule at local head `head`.
    pub fn validate(&self, remote: &ForkId, head: u64) -> Result<(), ForkIdError> {
        let index = self.position(head);
        let remote_hash = remote.hash.0;

        // Same set of passed forks.
        if self.sums[index] == remote_hash {
            if remote.next > 0 && head >= remote.next {
                return Err(ForkIdError::LocalIncompatibleOrStale(*remote));
            }
            return Ok(());
        }

        // Remote is behind us: it must at least know the fork that follows its state.
        for j in 0..index {
            if self.sums[j] == remote_hash {
                if self.forks[j] != remote.next {
                    return Err(ForkIdError::RemoteStale(*remote));
                }
                return Ok(());
            }
        }

        // Remote is ahead of us but on a schedule we know.
        if self.sums[index + 1..].contains(&remote_hash) {
            return Ok(());
        }

        Err(ForkIdError::LocalIncompatibleOrStale(*remote))
    }

    pub fn forks(&self) -> &[u64] {
        &self.forks
    }
}
