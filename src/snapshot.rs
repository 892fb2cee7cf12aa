//! Binary full-state snapshots.
//!
//! A snapshot is a little-endian image of the whole table at one instant:
//! `capacity: u64`, live count as `u64`, then one state tag byte per slot
//! with `u64`-length-prefixed key and value bytes for occupied slots. The
//! image is written to a sibling temp file and renamed into place, so a
//! reader only ever sees a complete snapshot.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::error::{KvError, Result};
use crate::table::{Slot, Table};

const STATE_EMPTY: u8 = 0;
const STATE_OCCUPIED: u8 = 1;
const STATE_DELETED: u8 = 2;

/// a length or capacity beyond this is garbage, not data
const MAX_FRAME_LEN: u64 = 1 << 32;

/// writes a binary image of `table` to `path` atomically: the bytes go to
/// `tmp_path` first and are renamed into place once fully on disk
pub(crate) fn write(table: &Table, path: &Path, tmp_path: &Path) -> Result<()> {
    let file = File::create(tmp_path)?;
    let mut writer = BufWriter::new(file);

    writer.write_all(&(table.capacity() as u64).to_le_bytes())?;
    writer.write_all(&(table.len() as u64).to_le_bytes())?;

    for slot in table.slots() {
        match slot {
            Slot::Empty => writer.write_all(&[STATE_EMPTY])?,
            Slot::Deleted => writer.write_all(&[STATE_DELETED])?,
            Slot::Occupied { key, value } => {
                writer.write_all(&[STATE_OCCUPIED])?;
                write_bytes(&mut writer, key.as_bytes())?;
                write_bytes(&mut writer, value.as_bytes())?;
            }
        }
    }

    let file = writer.into_inner().map_err(io::IntoInnerError::into_error)?;
    file.sync_all()?;
    drop(file);

    // the rename is the commit point; a crash before it leaves the previous
    // snapshot untouched
    if path.exists() {
        fs::remove_file(path)?;
    }
    fs::rename(tmp_path, path)?;
    Ok(())
}

/// decodes the snapshot at `path`, or `None` when no snapshot exists.
/// a snapshot that cannot be decoded in full is corruption: the image is
/// all-or-nothing.
pub(crate) fn read(path: &Path) -> Result<Option<Table>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut reader = BufReader::new(file);

    let capacity = read_u64(&mut reader)?;
    if capacity < 2 || capacity > MAX_FRAME_LEN {
        return Err(KvError::Corruption(format!(
            "snapshot header capacity {} is not a valid table capacity",
            capacity
        )));
    }
    let capacity = capacity as usize;

    let live = read_u64(&mut reader)? as usize;
    if live > capacity {
        return Err(KvError::Corruption(format!(
            "snapshot header claims {} live entries in {} slots",
            live, capacity
        )));
    }

    let mut slots = Vec::with_capacity(capacity);
    for _ in 0..capacity {
        match read_u8(&mut reader)? {
            STATE_EMPTY => slots.push(Slot::Empty),
            STATE_DELETED => slots.push(Slot::Deleted),
            STATE_OCCUPIED => {
                let key = read_string(&mut reader)?;
                let value = read_string(&mut reader)?;
                slots.push(Slot::Occupied { key, value });
            }
            tag => {
                return Err(KvError::Corruption(format!(
                    "unknown slot state tag {}",
                    tag
                )))
            }
        }
    }
    Ok(Some(Table::from_parts(slots, live)))
}

fn write_bytes(writer: &mut impl Write, bytes: &[u8]) -> Result<()> {
    writer.write_all(&(bytes.len() as u64).to_le_bytes())?;
    writer.write_all(bytes)?;
    Ok(())
}

fn read_u8(reader: &mut impl Read) -> Result<u8> {
    let mut buf = [0u8; 1];
    reader.read_exact(&mut buf).map_err(truncated)?;
    Ok(buf[0])
}

fn read_u64(reader: &mut impl Read) -> Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf).map_err(truncated)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_string(reader: &mut impl Read) -> Result<String> {
    let len = read_u64(reader)?;
    if len > MAX_FRAME_LEN {
        return Err(KvError::Corruption(format!(
            "snapshot frame length {} is not plausible",
            len
        )));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).map_err(truncated)?;
    String::from_utf8(buf)
        .map_err(|_| KvError::Corruption("snapshot contains non-UTF-8 key or value".to_string()))
}

/// a short read inside the image means the snapshot was cut off
fn truncated(e: io::Error) -> KvError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        KvError::Corruption("snapshot image is truncated".to_string())
    } else {
        KvError::Io { source: e }
    }
}
