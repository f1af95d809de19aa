use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::Result;
use crate::Error;

pub const HEADER_SIZE: usize = 26;
pub const SYNC_MARKER_SIZE: usize = 16;
pub const DEFAULT_SYNC_INTERVAL: u32 = 2000;

const MAGIC: u32 = 0x5349_4654; // ASCII "SIFT"
const VERSION: u16 = 1;

/// Fixed preamble of a record file. The sync marker is random per file, so
/// a marker read mid-stream can be checked against the one declared here.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Header {
    pub version: u16,
    /// Target byte spacing between sync markers, as written.
    pub sync_interval: u32,
    pub sync_marker: [u8; SYNC_MARKER_SIZE],
}

impl Header {
    pub fn new(sync_interval: u32) -> Self {
        Header {
            version: VERSION,
            sync_interval,
            sync_marker: rand::random(),
        }
    }

    pub fn encode<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer
            .write_u32::<BigEndian>(MAGIC)
            .map_err(|e| Error::Encode("magic", e))?;

        writer
            .write_u16::<BigEndian>(self.version)
            .map_err(|e| Error::Encode("version", e))?;

        writer
            .write_u32::<BigEndian>(self.sync_interval)
            .map_err(|e| Error::Encode("sync interval", e))?;

        writer
            .write_all(&self.sync_marker)
            .map_err(|e| Error::Encode("sync marker", e))?;

        Ok(())
    }

    pub fn decode<R: Read>(reader: &mut R) -> Result<Self> {
        let magic = reader
            .read_u32::<BigEndian>()
            .map_err(|e| Error::Decode("magic", e))?;
        if magic != MAGIC {
            return Err(Error::InvalidHeader(format!(
                "unexpected magic {magic:#010x}"
            )));
        }

        let version = reader
            .read_u16::<BigEndian>()
            .map_err(|e| Error::Decode("version", e))?;
        if version != VERSION {
            return Err(Error::InvalidHeader(format!(
                "unsupported version {version}"
            )));
        }

        let sync_interval = reader
            .read_u32::<BigEndian>()
            .map_err(|e| Error::Decode("sync interval", e))?;

        let mut sync_marker = [0u8; SYNC_MARKER_SIZE];
        reader
            .read_exact(&mut sync_marker)
            .map_err(|e| Error::Decode("sync marker", e))?;

        Ok(Header {
            version,
            sync_interval,
            sync_marker,
        })
    }
}
