//! Write-ahead log, content-addressed Merkle digest, the seven-step atomic
//! commit protocol, crash recovery, and the recovery audit trail (§3.4-3.5,
//! §4.9-§4.10, §6.3).

pub mod audit;
pub mod commit;
pub mod merkle;
pub mod recovery;
pub mod wal;

pub use commit::{AtomicCommitLayer, BatchResult, StagedTransaction};
pub use merkle::{digest_state, Sha256MerkleTree};
pub use recovery::{recover_from_crash, RecoveryReport};
pub use wal::{compact_wal, ChangeSet, WalReader, WalRecord, WalWriter};
