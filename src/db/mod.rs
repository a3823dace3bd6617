//! Persistence for the address book: a versioned snapshot of every record and
//! its bucket placement, plus the backends that store it between sessions.

use bitcoin::consensus::encode::VarInt;
use bitcoin::consensus::{deserialize_partial, serialize};
use bitcoin::p2p::address::AddrV2;
use bitcoin::p2p::ServiceFlags;
use tracing::warn;

use crate::book::record::AddressRecord;
use error::SnapshotDecodeError;

/// Errors a persistence backend may produce.
pub mod error;
/// Snapshot storage on the local filesystem.
pub mod file;
/// In-memory snapshot storage for sessions that should leave no trace.
pub mod memory;
/// Snapshot storage in a SQLite database.
#[cfg(feature = "database")]
pub mod sqlite;
/// The trait a snapshot backend implements.
pub mod traits;

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u8 = 1;

/// Leading bytes identifying a serialized snapshot.
const SNAPSHOT_MAGIC: [u8; 4] = *b"PBK1";

/// Geometry fields beyond this are corrupt, not just unusual.
const MAX_GEOMETRY: u32 = 1 << 20;

/// One address record as written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedAddress {
    /// Canonical address of this peer.
    pub addr: AddrV2,
    /// The port believed to be listening for connections.
    pub port: u16,
    /// The services this peer claims to offer.
    pub services: ServiceFlags,
    /// The address of whoever gossiped this peer to us.
    pub source: AddrV2,
    /// When this address was last reported alive, unix seconds.
    pub last_seen: u64,
    /// When we last completed a connection to it, zero if never.
    pub last_success: u64,
    /// When we last dialed it, zero if never.
    pub last_attempt: u64,
    /// Failed attempts since the last success.
    pub attempts: u32,
}

impl From<&AddressRecord> for PersistedAddress {
    fn from(value: &AddressRecord) -> Self {
        Self {
            addr: value.addr.clone(),
            port: value.port,
            services: value.services,
            source: value.source.clone(),
            last_seen: value.last_seen,
            last_success: value.last_success,
            last_attempt: value.last_attempt,
            attempts: value.attempts,
        }
    }
}

impl From<PersistedAddress> for AddressRecord {
    fn from(value: PersistedAddress) -> Self {
        let mut record = AddressRecord::new(
            value.addr,
            value.port,
            value.services,
            value.source,
            value.last_seen,
        );
        record.last_success = value.last_success;
        record.last_attempt = value.last_attempt;
        record.attempts = value.attempts;
        record
    }
}

/// A record occupying one tried-table slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriedEntry {
    /// The stored record.
    pub record: PersistedAddress,
    /// Tried-table bucket the record was saved in.
    pub bucket: u32,
    /// Slot within that bucket.
    pub slot: u32,
}

/// A record referenced from one or more new-table slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    /// The stored record.
    pub record: PersistedAddress,
    /// Every (bucket, slot) position referencing the record.
    pub positions: Vec<(u32, u32)>,
}

/// A complete, self-describing copy of an address book's state.
///
/// The placement salt is deliberately absent: stored positions are replayed
/// verbatim on restore, and the live book re-randomizes its salt for anything
/// it learns afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookSnapshot {
    /// Format version this snapshot was produced with.
    pub version: u8,
    /// New-table bucket count at save time.
    pub new_bucket_count: u32,
    /// Tried-table bucket count at save time.
    pub tried_bucket_count: u32,
    /// Slots per bucket at save time.
    pub bucket_size: u32,
    /// All tried-table occupants.
    pub tried: Vec<TriedEntry>,
    /// All new-table records with their slot references.
    pub new: Vec<NewEntry>,
}

impl BookSnapshot {
    /// Total number of records carried by this snapshot.
    pub fn len(&self) -> usize {
        self.tried.len() + self.new.len()
    }

    /// Whether the snapshot carries no records.
    pub fn is_empty(&self) -> bool {
        self.tried.is_empty() && self.new.is_empty()
    }
}

fn put<T: bitcoin::consensus::Encodable>(buf: &mut Vec<u8>, value: &T) {
    buf.extend(serialize(value));
}

fn put_record(buf: &mut Vec<u8>, record: &PersistedAddress) {
    put(buf, &record.addr);
    put(buf, &record.port);
    put(buf, &record.services.to_u64());
    put(buf, &record.source);
    put(buf, &record.last_seen);
    put(buf, &record.last_success);
    put(buf, &record.last_attempt);
    put(buf, &record.attempts);
}

/// Serialize a snapshot into its byte-stream form.
pub fn encode_snapshot(snapshot: &BookSnapshot) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend(SNAPSHOT_MAGIC);
    put(&mut buf, &snapshot.version);
    put(&mut buf, &snapshot.new_bucket_count);
    put(&mut buf, &snapshot.tried_bucket_count);
    put(&mut buf, &snapshot.bucket_size);

    put(&mut buf, &VarInt(snapshot.tried.len() as u64));
    for entry in &snapshot.tried {
        put_record(&mut buf, &entry.record);
        put(&mut buf, &entry.bucket);
        put(&mut buf, &entry.slot);
    }

    put(&mut buf, &VarInt(snapshot.new.len() as u64));
    for entry in &snapshot.new {
        put_record(&mut buf, &entry.record);
        put(&mut buf, &VarInt(entry.positions.len() as u64));
        for (bucket, slot) in &entry.positions {
            put(&mut buf, bucket);
            put(&mut buf, slot);
        }
    }
    buf
}

struct Decoder<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take<T: bitcoin::consensus::Decodable>(&mut self) -> Result<T, SnapshotDecodeError> {
        let (value, consumed) = deserialize_partial(&self.bytes[self.pos..])?;
        self.pos += consumed;
        Ok(value)
    }

    fn take_record(&mut self) -> Result<PersistedAddress, SnapshotDecodeError> {
        Ok(PersistedAddress {
            addr: self.take()?,
            port: self.take()?,
            services: ServiceFlags::from(self.take::<u64>()?),
            source: self.take()?,
            last_seen: self.take()?,
            last_success: self.take()?,
            last_attempt: self.take()?,
            attempts: self.take()?,
        })
    }
}

/// Parse a serialized snapshot.
///
/// A wrong magic, unknown version or absurd geometry fails the whole parse.
/// A stream that turns bad partway through a record list does not: everything
/// decoded up to that point is returned and the damaged tail is dropped, so a
/// truncated file still yields a usable (if smaller) address book.
pub fn decode_snapshot(bytes: &[u8]) -> Result<BookSnapshot, SnapshotDecodeError> {
    if bytes.len() < SNAPSHOT_MAGIC.len() || bytes[..SNAPSHOT_MAGIC.len()] != SNAPSHOT_MAGIC {
        return Err(SnapshotDecodeError::BadMagic);
    }
    let mut decoder = Decoder::new(bytes);
    decoder.pos = SNAPSHOT_MAGIC.len();

    let version: u8 = decoder.take()?;
    if version != SNAPSHOT_VERSION {
        return Err(SnapshotDecodeError::UnsupportedVersion(version));
    }
    let new_bucket_count: u32 = decoder.take()?;
    let tried_bucket_count: u32 = decoder.take()?;
    let bucket_size: u32 = decoder.take()?;
    if new_bucket_count == 0
        || tried_bucket_count == 0
        || bucket_size == 0
        || new_bucket_count > MAX_GEOMETRY
        || tried_bucket_count > MAX_GEOMETRY
        || bucket_size > MAX_GEOMETRY
    {
        return Err(SnapshotDecodeError::BadGeometry);
    }

    let mut snapshot = BookSnapshot {
        version,
        new_bucket_count,
        tried_bucket_count,
        bucket_size,
        tried: Vec::new(),
        new: Vec::new(),
    };

    let mut damaged = false;
    'tried: {
        let Ok(VarInt(count)) = decoder.take::<VarInt>() else {
            damaged = true;
            break 'tried;
        };
        for _ in 0..count {
            let entry = (|| -> Result<TriedEntry, SnapshotDecodeError> {
                Ok(TriedEntry {
                    record: decoder.take_record()?,
                    bucket: decoder.take()?,
                    slot: decoder.take()?,
                })
            })();
            match entry {
                Ok(entry) => snapshot.tried.push(entry),
                Err(_) => {
                    damaged = true;
                    break 'tried;
                }
            }
        }
    }

    if !damaged {
        'new: {
            let Ok(VarInt(count)) = decoder.take::<VarInt>() else {
                damaged = true;
                break 'new;
            };
            for _ in 0..count {
                let entry = (|| -> Result<NewEntry, SnapshotDecodeError> {
                    let record = decoder.take_record()?;
                    let VarInt(positions) = decoder.take::<VarInt>()?;
                    let mut out = Vec::with_capacity(positions.min(64) as usize);
                    for _ in 0..positions {
                        out.push((decoder.take()?, decoder.take()?));
                    }
                    Ok(NewEntry {
                        record,
                        positions: out,
                    })
                })();
                match entry {
                    Ok(entry) => snapshot.new.push(entry),
                    Err(_) => {
                        damaged = true;
                        break 'new;
                    }
                }
            }
        }
    }

    if damaged {
        warn!(
            "snapshot stream damaged, keeping the {} records decoded so far",
            snapshot.len()
        );
    }
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record(last_octet: u8) -> PersistedAddress {
        PersistedAddress {
            addr: AddrV2::Ipv4(std::net::Ipv4Addr::new(45, 33, 2, last_octet)),
            port: 8333,
            services: ServiceFlags::NETWORK | ServiceFlags::WITNESS,
            source: AddrV2::Ipv6("2a01:4f8::1".parse().unwrap()),
            last_seen: 1_700_000_000,
            last_success: 1_699_999_000,
            last_attempt: 1_699_999_500,
            attempts: 2,
        }
    }

    fn sample_snapshot() -> BookSnapshot {
        BookSnapshot {
            version: SNAPSHOT_VERSION,
            new_bucket_count: 1024,
            tried_bucket_count: 256,
            bucket_size: 64,
            tried: vec![TriedEntry {
                record: sample_record(1),
                bucket: 17,
                slot: 60,
            }],
            new: vec![
                NewEntry {
                    record: sample_record(2),
                    positions: vec![(3, 4), (900, 63)],
                },
                NewEntry {
                    record: sample_record(3),
                    positions: vec![(512, 0)],
                },
            ],
        }
    }

    #[test]
    fn test_round_trip() {
        let snapshot = sample_snapshot();
        let bytes = encode_snapshot(&snapshot);
        let decoded = decode_snapshot(&bytes).unwrap();
        assert_eq!(snapshot, decoded);
    }

    #[test]
    fn test_bad_magic_is_rejected() {
        let mut bytes = encode_snapshot(&sample_snapshot());
        bytes[0] ^= 0xFF;
        assert!(matches!(
            decode_snapshot(&bytes),
            Err(SnapshotDecodeError::BadMagic)
        ));
        assert!(matches!(
            decode_snapshot(&[]),
            Err(SnapshotDecodeError::BadMagic)
        ));
    }

    #[test]
    fn test_unknown_version_is_rejected() {
        let mut bytes = encode_snapshot(&sample_snapshot());
        bytes[4] = 99;
        assert!(matches!(
            decode_snapshot(&bytes),
            Err(SnapshotDecodeError::UnsupportedVersion(99))
        ));
    }

    #[test]
    fn test_zero_geometry_is_rejected() {
        let mut snapshot = sample_snapshot();
        snapshot.bucket_size = 0;
        let bytes = encode_snapshot(&snapshot);
        assert!(matches!(
            decode_snapshot(&bytes),
            Err(SnapshotDecodeError::BadGeometry)
        ));
    }

    #[test]
    fn test_truncated_stream_keeps_decoded_prefix() {
        let snapshot = sample_snapshot();
        let bytes = encode_snapshot(&snapshot);
        // cut into the middle of the new-entry list
        let cut = bytes.len() - 20;
        let decoded = decode_snapshot(&bytes[..cut]).unwrap();
        assert_eq!(decoded.tried, snapshot.tried);
        assert!(decoded.new.len() < snapshot.new.len());
    }

    #[test]
    fn test_empty_snapshot_round_trip() {
        let snapshot = BookSnapshot {
            version: SNAPSHOT_VERSION,
            new_bucket_count: 8,
            tried_bucket_count: 8,
            bucket_size: 2,
            tried: Vec::new(),
            new: Vec::new(),
        };
        let decoded = decode_snapshot(&encode_snapshot(&snapshot)).unwrap();
        assert!(decoded.is_empty());
        assert_eq!(decoded, snapshot);
    }
}
