//! Reader for the record area the bootloader leaves in RAM.
//!
//! Layout, little-endian:
//!
//! ```text
//! +-------+-----------+------+------+---------+------+-----
//! | magic | total_len | type | len  | payload | type | ...
//! | u16   | u16       | u16  | u16  | len     | u16  |
//! +-------+-----------+------+------+---------+------+-----
//! ```
//!
//! `total_len` counts the header. A record type keeps its major id in the
//! top four bits and the minor id in the rest.

use ufmt::{uDisplay, uWrite, Formatter};

pub const SHARED_DATA_MAGIC: u16 = 0x2016;
pub const HEADER_LEN: usize = 4;
pub const RECORD_HEADER_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SharedDataStatus {
    Ok,
    Eof,
    BufferTooSmall,
    Corrupt,
}

impl SharedDataStatus {
    pub fn name(self) -> &'static str {
        match self {
            SharedDataStatus::Ok => "ok",
            SharedDataStatus::Eof => "eof",
            SharedDataStatus::BufferTooSmall => "buffer too small",
            SharedDataStatus::Corrupt => "corrupt",
        }
    }
}

impl uDisplay for SharedDataStatus {
    fn fmt<W>(&self, f: &mut Formatter<'_, W>) -> Result<(), W::Error>
    where
        W: uWrite + ?Sized,
    {
        f.write_str(self.name())
    }
}

/// Result of one [`SharedDataReader::next`] step.
///
/// `tlv_type` and `length` are filled in for `Ok`, `BufferTooSmall` and
/// `Corrupt`; they are zero for `Eof`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Entry {
    pub status: SharedDataStatus,
    pub tlv_type: u16,
    pub length: u16,
}

impl Entry {
    const EOF: Entry = Entry {
        status: SharedDataStatus::Eof,
        tlv_type: 0,
        length: 0,
    };

    /// The record copied into `buffer`, for `Ok` entries.
    pub fn record<'b>(&self, buffer: &'b [u8]) -> Option<SharedRecord<'b>> {
        if self.status != SharedDataStatus::Ok {
            return None;
        }
        buffer.get(..self.length as usize).map(|payload| SharedRecord {
            tlv_type: self.tlv_type,
            payload,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharedRecord<'b> {
    pub tlv_type: u16,
    pub payload: &'b [u8],
}

impl SharedRecord<'_> {
    pub fn major(&self) -> u8 {
        (self.tlv_type >> 12) as u8
    }

    pub fn minor(&self) -> u16 {
        self.tlv_type & 0x0FFF
    }

    pub fn length(&self) -> u16 {
        self.payload.len() as u16
    }
}

/// Forward-only walk over the shared records.
///
/// Once `Eof`, `Corrupt` or `BufferTooSmall` has been returned every further
/// call returns `Eof`. Build a new reader to scan again.
pub struct SharedDataReader<'a> {
    region: &'a [u8],
    total_len: usize,
    valid: bool,
    cursor: usize,
    done: bool,
}

impl<'a> SharedDataReader<'a> {
    pub fn new(region: &'a [u8]) -> Self {
        let (valid, total_len) = match (read_u16(region, 0), read_u16(region, 2)) {
            (Some(SHARED_DATA_MAGIC), Some(total)) => {
                let total = total as usize;
                (
                    (HEADER_LEN..=region.len()).contains(&total),
                    total,
                )
            }
            (_, total) => (false, total.unwrap_or(0) as usize),
        };

        Self {
            region,
            total_len,
            valid,
            cursor: HEADER_LEN,
            done: !valid,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Size declared by the header, or 0 when the header is unusable.
    pub fn total_size(&self) -> u32 {
        if self.valid {
            self.total_len as u32
        } else {
            0
        }
    }

    /// Copies the next record payload into `buffer`.
    pub fn next(&mut self, buffer: &mut [u8]) -> Entry {
        if self.done {
            return Entry::EOF;
        }

        let remaining = self.total_len.saturating_sub(self.cursor);
        if remaining < RECORD_HEADER_LEN {
            return self.finish(Entry::EOF);
        }

        let (tlv_type, length) = match (
            read_u16(self.region, self.cursor),
            read_u16(self.region, self.cursor + 2),
        ) {
            (Some(t), Some(l)) => (t, l),
            _ => return self.finish(Entry::EOF),
        };
        let entry = |status| Entry {
            status,
            tlv_type,
            length,
        };

        let len = length as usize;
        if len > buffer.len() {
            return self.finish(entry(SharedDataStatus::BufferTooSmall));
        }
        if len > remaining - RECORD_HEADER_LEN {
            return self.finish(entry(SharedDataStatus::Corrupt));
        }

        let start = self.cursor + RECORD_HEADER_LEN;
        buffer[..len].copy_from_slice(&self.region[start..start + len]);
        self.cursor = start + len;
        entry(SharedDataStatus::Ok)
    }

    fn finish(&mut self, entry: Entry) -> Entry {
        self.done = true;
        entry
    }
}

fn read_u16(bytes: &[u8], at: usize) -> Option<u16> {
    let raw = bytes.get(at..at + 2)?;
    Some(u16::from_le_bytes([raw[0], raw[1]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(records: &[(u16, &[u8])], tail: &[u8]) -> Vec<u8> {
        let mut out = vec![0u8; HEADER_LEN];
        for (tlv_type, payload) in records {
            out.extend_from_slice(&tlv_type.to_le_bytes());
            out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
            out.extend_from_slice(payload);
        }
        out.extend_from_slice(tail);
        let total = out.len() as u16;
        out[0..2].copy_from_slice(&SHARED_DATA_MAGIC.to_le_bytes());
        out[2..4].copy_from_slice(&total.to_le_bytes());
        out
    }

    #[test]
    fn yields_records_in_order_then_eof() {
        let records: [(u16, &[u8]); 3] = [
            (0x1001, b"abc"),
            (0x1002, b""),
            (0x2FFF, &[7u8; 128]),
        ];
        let data = region(&records, &[]);
        let mut reader = SharedDataReader::new(&data);
        assert!(reader.is_valid());
        assert_eq!(reader.total_size(), data.len() as u32);

        let mut buf = [0u8; 128];
        for (tlv_type, payload) in records {
            let entry = reader.next(&mut buf);
            assert_eq!(entry.status, SharedDataStatus::Ok);
            assert_eq!(entry.tlv_type, tlv_type);
            assert_eq!(entry.record(&buf).map(|r| r.payload), Some(payload));
        }
        assert_eq!(reader.next(&mut buf).status, SharedDataStatus::Eof);
        assert_eq!(reader.next(&mut buf).status, SharedDataStatus::Eof);
    }

    #[test]
    fn bad_magic_reads_nothing() {
        let mut data = region(&[(1, b"TEST")], &[]);
        data[0] ^= 0xFF;
        let mut reader = SharedDataReader::new(&data);
        assert!(!reader.is_valid());
        assert_eq!(reader.total_size(), 0);

        let mut buf = [0xEEu8; 8];
        assert_eq!(reader.next(&mut buf), Entry::EOF);
        assert_eq!(buf, [0xEE; 8]);
    }

    #[test]
    fn declared_size_must_fit_region() {
        let mut data = region(&[(1, b"TEST")], &[]);
        data[2..4].copy_from_slice(&100u16.to_le_bytes());
        assert!(!SharedDataReader::new(&data).is_valid());

        data[2..4].copy_from_slice(&3u16.to_le_bytes());
        assert!(!SharedDataReader::new(&data).is_valid());

        assert!(!SharedDataReader::new(&[0x16, 0x20]).is_valid());
    }

    #[test]
    fn oversized_record_ends_the_stream() {
        let data = region(&[(1, &[1u8; 16]), (2, b"ok")], &[]);
        let mut reader = SharedDataReader::new(&data);
        let mut buf = [0u8; 8];

        assert_eq!(
            reader.next(&mut buf),
            Entry {
                status: SharedDataStatus::BufferTooSmall,
                tlv_type: 1,
                length: 16
            }
        );
        assert_eq!(reader.next(&mut buf).status, SharedDataStatus::Eof);
    }

    #[test]
    fn length_past_declared_size_is_corrupt() {
        let mut data = region(&[(1, b"TEST")], &[]);
        data[6..8].copy_from_slice(&5u16.to_le_bytes());
        let mut reader = SharedDataReader::new(&data);
        let mut buf = [0u8; 16];

        assert_eq!(reader.next(&mut buf).status, SharedDataStatus::Corrupt);
        assert_eq!(reader.next(&mut buf).status, SharedDataStatus::Eof);
    }

    #[test]
    fn truncated_record_header_is_eof() {
        let data = region(&[(1, b"TEST")], &[0x02, 0x00]);
        let mut reader = SharedDataReader::new(&data);
        let mut buf = [0u8; 128];

        let entry = reader.next(&mut buf);
        assert_eq!(entry.status, SharedDataStatus::Ok);
        assert_eq!(entry.length, 4);
        assert_eq!(&buf[..4], b"TEST");
        assert_eq!(reader.next(&mut buf).status, SharedDataStatus::Eof);
    }

    #[test]
    fn record_type_fields() {
        let record = SharedRecord {
            tlv_type: 0x1A05,
            payload: b"xy",
        };
        assert_eq!(record.major(), 0x1);
        assert_eq!(record.minor(), 0xA05);
        assert_eq!(record.length(), 2);
    }
}
