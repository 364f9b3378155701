// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Directory-entry wire encoding (9P2000 stat records)
//!
//! Layout, little-endian:
//! `size[2] type[2] dev[4] qid.type[1] qid.vers[4] qid.path[8] mode[4]
//! atime[4] mtime[4] length[8] name[s] uid[s] gid[s] muid[s]`
//! where `s` is `len[2]` followed by UTF-8 bytes and `size` counts the bytes
//! that follow it.

use std::io::{self, Cursor, Read, Write};

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{FsError, FsResult};
use crate::types::{Qid, QidKind};

/// Bytes taken by the record size prefix
pub const BIT16SZ: usize = 2;

/// Fixed part of a stat record, size prefix and four empty strings included
pub const STAT_FIXED_LEN: usize = BIT16SZ + 2 + 4 + 13 + 4 + 4 + 4 + 8 + 4 * BIT16SZ;

/// Decoded directory entry
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dir {
    pub dev_type: u16,
    pub dev: u32,
    pub qid: Qid,
    pub mode: u32,
    pub atime: u32,
    pub mtime: u32,
    pub length: u64,
    pub name: String,
    pub uid: String,
    pub gid: String,
    pub muid: String,
}

impl Dir {
    /// A record whose every field means "don't touch" to wstat
    pub fn null() -> Self {
        Self {
            dev_type: u16::MAX,
            dev: u32::MAX,
            qid: Qid {
                kind: QidKind::from_bits(u8::MAX),
                version: u32::MAX,
                path: u64::MAX,
            },
            mode: u32::MAX,
            atime: u32::MAX,
            mtime: u32::MAX,
            length: u64::MAX,
            name: String::new(),
            uid: String::new(),
            gid: String::new(),
            muid: String::new(),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.qid.is_dir()
    }

    /// Total encoded size, size prefix included
    pub fn encoded_len(&self) -> usize {
        STAT_FIXED_LEN + self.name.len() + self.uid.len() + self.gid.len() + self.muid.len()
    }

    pub fn encode(&self) -> FsResult<Vec<u8>> {
        let len = self.encoded_len();
        if len - BIT16SZ > u16::MAX as usize {
            return Err(FsError::BadCharacter);
        }
        let mut buf = Vec::with_capacity(len);
        self.write_to(&mut buf, (len - BIT16SZ) as u16)
            .map_err(stat_error)?;
        debug_assert_eq!(buf.len(), len);
        Ok(buf)
    }

    fn write_to<W: Write>(&self, mut w: W, size: u16) -> io::Result<()> {
        w.write_u16::<LittleEndian>(size)?;
        w.write_u16::<LittleEndian>(self.dev_type)?;
        w.write_u32::<LittleEndian>(self.dev)?;
        w.write_u8(self.qid.kind.bits())?;
        w.write_u32::<LittleEndian>(self.qid.version)?;
        w.write_u64::<LittleEndian>(self.qid.path)?;
        w.write_u32::<LittleEndian>(self.mode)?;
        w.write_u32::<LittleEndian>(self.atime)?;
        w.write_u32::<LittleEndian>(self.mtime)?;
        w.write_u64::<LittleEndian>(self.length)?;
        for s in [&self.name, &self.uid, &self.gid, &self.muid] {
            w.write_u16::<LittleEndian>(s.len() as u16)?;
            w.write_all(s.as_bytes())?;
        }
        Ok(())
    }

    /// Decode one record from the front of `buf`, returning it with the number
    /// of bytes it occupied.
    pub fn decode(buf: &[u8]) -> FsResult<(Dir, usize)> {
        if buf.len() < STAT_FIXED_LEN {
            return Err(FsError::ShortStat);
        }
        let size = LittleEndian::read_u16(buf) as usize + BIT16SZ;
        if size < STAT_FIXED_LEN || size > buf.len() {
            return Err(FsError::ShortStat);
        }
        let mut r = Cursor::new(&buf[BIT16SZ..size]);
        let dir = Self::read_from(&mut r).map_err(stat_error)?;
        if r.position() as usize != size - BIT16SZ {
            return Err(FsError::ShortStat);
        }
        Ok((dir, size))
    }

    fn read_from<R: Read>(mut r: R) -> io::Result<Self> {
        Ok(Self {
            dev_type: r.read_u16::<LittleEndian>()?,
            dev: r.read_u32::<LittleEndian>()?,
            qid: Qid {
                kind: QidKind::from_bits(r.read_u8()?),
                version: r.read_u32::<LittleEndian>()?,
                path: r.read_u64::<LittleEndian>()?,
            },
            mode: r.read_u32::<LittleEndian>()?,
            atime: r.read_u32::<LittleEndian>()?,
            mtime: r.read_u32::<LittleEndian>()?,
            length: r.read_u64::<LittleEndian>()?,
            name: read_string(&mut r)?,
            uid: read_string(&mut r)?,
            gid: read_string(&mut r)?,
            muid: read_string(&mut r)?,
        })
    }
}

/// Longest entry name whose stat record still fits the 16-bit size prefix
/// when uid, gid and muid all carry `owner`.
pub fn max_name_len(owner: &str) -> usize {
    (u16::MAX as usize + BIT16SZ).saturating_sub(STAT_FIXED_LEN + 3 * owner.len())
}

fn read_string<R: Read>(mut r: R) -> io::Result<String> {
    let len = r.read_u16::<LittleEndian>()? as usize;
    let mut bytes = vec![0u8; len];
    r.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Truncation is a short stat; anything undecodable is a bad name
fn stat_error(err: io::Error) -> FsError {
    match err.kind() {
        io::ErrorKind::InvalidData => FsError::BadCharacter,
        _ => FsError::ShortStat,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Dir {
        Dir {
            dev_type: '@' as u16,
            dev: 0,
            qid: Qid {
                kind: QidKind::File,
                version: 3,
                path: 42,
            },
            mode: 0o644,
            atime: 0,
            mtime: 0,
            length: 5,
            name: "b.txt".to_string(),
            uid: "system".to_string(),
            gid: "system".to_string(),
            muid: "system".to_string(),
        }
    }

    #[test]
    fn fixed_part_is_49_bytes() {
        assert_eq!(STAT_FIXED_LEN, 49);
        assert_eq!(Dir::null().encoded_len(), 49);
    }

    #[test]
    fn encode_lays_out_fields_little_endian() {
        let dir = sample();
        let buf = dir.encode().unwrap();
        assert_eq!(buf.len(), 49 + 5 + 3 * 6);
        assert_eq!(LittleEndian::read_u16(&buf[0..2]) as usize, buf.len() - 2);
        assert_eq!(LittleEndian::read_u16(&buf[2..4]), '@' as u16);
        assert_eq!(buf[8], 0);
        assert_eq!(LittleEndian::read_u32(&buf[9..13]), 3);
        assert_eq!(LittleEndian::read_u64(&buf[13..21]), 42);
        assert_eq!(LittleEndian::read_u32(&buf[21..25]), 0o644);
        assert_eq!(LittleEndian::read_u64(&buf[33..41]), 5);
        assert_eq!(LittleEndian::read_u16(&buf[41..43]), 5);
        assert_eq!(&buf[43..48], b"b.txt");

        let (decoded, used) = Dir::decode(&buf).unwrap();
        assert_eq!(used, buf.len());
        assert_eq!(decoded, dir);
    }

    #[test]
    fn decode_consumes_only_first_record() {
        let mut buf = sample().encode().unwrap();
        let first = buf.len();
        buf.extend(Dir::null().encode().unwrap());
        let (_, used) = Dir::decode(&buf).unwrap();
        assert_eq!(used, first);
        let (null, _) = Dir::decode(&buf[used..]).unwrap();
        assert_eq!(null.mode, u32::MAX);
        assert!(null.name.is_empty());
    }

    #[test]
    fn truncated_record_is_short_stat() {
        let buf = sample().encode().unwrap();
        assert_eq!(Dir::decode(&buf[..20]), Err(FsError::ShortStat));
        assert_eq!(Dir::decode(&buf[..buf.len() - 1]), Err(FsError::ShortStat));
    }

    #[test]
    fn inconsistent_string_length_is_short_stat() {
        let mut buf = sample().encode().unwrap();
        // name length claims more bytes than the record holds
        LittleEndian::write_u16(&mut buf[41..43], 200);
        assert_eq!(Dir::decode(&buf), Err(FsError::ShortStat));
    }

    #[test]
    fn non_utf8_name_is_bad_character() {
        let mut buf = sample().encode().unwrap();
        buf[43] = 0xff;
        assert_eq!(Dir::decode(&buf), Err(FsError::BadCharacter));
    }

    #[test]
    fn longest_name_fills_size_prefix() {
        let mut dir = sample();
        dir.name = "n".repeat(max_name_len("system"));
        let buf = dir.encode().unwrap();
        assert_eq!(LittleEndian::read_u16(&buf[0..2]), u16::MAX);
        assert_eq!(Dir::decode(&buf).unwrap().0, dir);

        dir.name.push('n');
        assert_eq!(dir.encode(), Err(FsError::BadCharacter));
    }
}
