//! Quiet-plan persistence in retention memory.
//!
//! The record is the only state that survives deep sleep. It is written as a
//! whole and protected by a magic sentinel plus a CRC-32, so cold memory, a
//! layout change, or a write torn by a brownout all read back as "no record".
//!
//! Binary format (little-endian, 20 bytes):
//! - magic: 4 bytes (u32), low byte is the layout version
//! - crc: 4 bytes (u32), CRC-32 over every other byte of the record
//! - remaining_chunks: 4 bytes (u32)
//! - wake_target_epoch: 4 bytes (u32)
//! - final_sync_attempts: 4 bytes (u32)

use crc::{CRC_32_ISO_HDLC, Crc};
use log::{debug, warn};

/// Size of the persisted record in bytes.
pub const RECORD_LEN: usize = 20;

/// Sentinel marking a record written by this firmware. Bump the low byte when
/// the layout changes.
pub const RECORD_MAGIC: u32 = 0xAE60_5C01;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

const MAGIC: core::ops::Range<usize> = 0..4;
const CHECKSUM: core::ops::Range<usize> = 4..8;
const REMAINING: core::ops::Range<usize> = 8..12;
const TARGET: core::ops::Range<usize> = 12..16;
const ATTEMPTS: core::ops::Range<usize> = 16..20;

/// Byte range that survives deep sleep and brief power loss.
///
/// A single `load` or `store` is assumed atomic from the caller's point of
/// view; the store only ever writes complete records.
pub trait RetentionMemory {
    fn load(&mut self) -> [u8; RECORD_LEN];
    fn store(&mut self, bytes: &[u8; RECORD_LEN]);
}

/// In-progress quiet plan as seen by the lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PersistentRecord {
    /// Full-length sleeps left before the quiet window ends. Zero means no
    /// plan is in progress.
    pub remaining_chunks: u32,
    /// Unix time at which the window ends.
    pub wake_target_epoch: u32,
    /// Final-sync wakes that failed to reach the network so far.
    pub final_sync_attempts: u32,
}

impl PersistentRecord {
    /// Record meaning "no plan in progress".
    pub const fn idle() -> Self {
        Self {
            remaining_chunks: 0,
            wake_target_epoch: 0,
            final_sync_attempts: 0,
        }
    }

    pub const fn plan(remaining_chunks: u32, wake_target_epoch: u32) -> Self {
        Self {
            remaining_chunks,
            wake_target_epoch,
            final_sync_attempts: 0,
        }
    }

    /// Serializes the record, stamping magic and checksum.
    pub fn to_bytes(&self) -> [u8; RECORD_LEN] {
        let mut bytes = [0u8; RECORD_LEN];
        bytes[MAGIC].copy_from_slice(&RECORD_MAGIC.to_le_bytes());
        bytes[REMAINING].copy_from_slice(&self.remaining_chunks.to_le_bytes());
        bytes[TARGET].copy_from_slice(&self.wake_target_epoch.to_le_bytes());
        bytes[ATTEMPTS].copy_from_slice(&self.final_sync_attempts.to_le_bytes());

        let checksum = checksum(&bytes);
        bytes[CHECKSUM].copy_from_slice(&checksum.to_le_bytes());
        bytes
    }

    /// Parses a record, returning `None` on a magic or checksum mismatch.
    pub fn from_bytes(bytes: &[u8; RECORD_LEN]) -> Option<Self> {
        let magic = read_u32(bytes, MAGIC);
        let stored = read_u32(bytes, CHECKSUM);
        let expected = checksum(bytes);

        if magic != RECORD_MAGIC || stored != expected {
            debug!(
                "Retention record rejected: magic={:#010x}/{:#010x} crc={:#010x}/{:#010x}",
                magic, RECORD_MAGIC, stored, expected
            );
            return None;
        }

        Some(Self {
            remaining_chunks: read_u32(bytes, REMAINING),
            wake_target_epoch: read_u32(bytes, TARGET),
            final_sync_attempts: read_u32(bytes, ATTEMPTS),
        })
    }
}

fn read_u32(bytes: &[u8; RECORD_LEN], range: core::ops::Range<usize>) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[range]);
    u32::from_le_bytes(word)
}

fn checksum(bytes: &[u8; RECORD_LEN]) -> u32 {
    let mut digest = CRC32.digest();
    digest.update(&bytes[MAGIC]);
    digest.update(&bytes[CHECKSUM.end..]);
    digest.finalize()
}

/// CRC-protected view over a [`RetentionMemory`].
pub struct ScheduleStore<M> {
    memory: M,
}

impl<M: RetentionMemory> ScheduleStore<M> {
    pub const fn new(memory: M) -> Self {
        Self { memory }
    }

    /// Loads and verifies the record. `None` covers both never-written and
    /// corrupted memory; callers treat it as "no plan".
    pub fn read(&mut self) -> Option<PersistentRecord> {
        let record = PersistentRecord::from_bytes(&self.memory.load());
        match record {
            Some(r) => debug!(
                "Retention OK: chunks={} target={} sync_attempts={}",
                r.remaining_chunks, r.wake_target_epoch, r.final_sync_attempts
            ),
            None => warn!("Retention record missing or corrupt, assuming no quiet plan"),
        }
        record
    }

    /// Writes the complete record in one store.
    pub fn write(&mut self, record: &PersistentRecord) {
        self.memory.store(&record.to_bytes());
        debug!(
            "Retention written: chunks={} target={} sync_attempts={}",
            record.remaining_chunks, record.wake_target_epoch, record.final_sync_attempts
        );
    }

    /// Writes the idle record so the next boot takes the normal path.
    pub fn clear(&mut self) {
        self.write(&PersistentRecord::idle());
    }

    pub fn memory(&self) -> &M {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut M {
        &mut self.memory
    }

    pub fn into_inner(self) -> M {
        self.memory
    }
}
