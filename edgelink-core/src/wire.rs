//! On-wire layout of the TCP command frame.
//!
//! Fields are written field-by-field in little-endian order rather than
//! as a single `memcpy` of a C struct, so the layout is stable across
//! compilers and target endianness; a receiver on a different
//! architecture than the sender can still parse it correctly as long as
//! both sides speak this module (see `DESIGN.md` for the departure from
//! the host-endian source behavior).

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::{Error, ErrorKind};

/// Magic value stamped at the front of every command header.
pub const COMMAND_MAGIC: u32 = 0xFEED_FEED;

/// Format version written immediately after the magic. Bumped whenever
/// the header layout changes; a receiver rejects any other value.
pub const WIRE_VERSION: u8 = 1;

/// Maximum number of raw data slots an edge-data frame may carry.
pub const DATA_LIMIT: usize = 16;

/// Command codes exchanged during the handshake and steady-state
/// transfer.
#[derive(Debug, Copy, Clone, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum CommandCode {
    Error = 0,
    TransferData = 1,
    HostInfo = 2,
    Capability = 3,
}

/// Fixed-size header preceding every frame on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandHeader {
    pub cmd: CommandCode,
    pub client_id: i64,
    pub num: u32,
    pub mem_size: [u64; DATA_LIMIT],
    pub meta_size: u64,
}

impl CommandHeader {
    pub fn new(cmd: CommandCode, client_id: i64) -> Self {
        CommandHeader {
            cmd,
            client_id,
            num: 0,
            mem_size: [0; DATA_LIMIT],
            meta_size: 0,
        }
    }

    /// Writes this header to `w` as magic, version, cmd, client_id, num,
    /// sixteen per-slot sizes, then the metadata size — each field its
    /// own little-endian write, per the REDESIGN FLAGS guidance against
    /// struct-`memcpy` serialization.
    pub fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LittleEndian>(COMMAND_MAGIC)?;
        w.write_u8(WIRE_VERSION)?;
        w.write_u32::<LittleEndian>(self.cmd.into())?;
        w.write_i64::<LittleEndian>(self.client_id)?;
        w.write_u32::<LittleEndian>(self.num)?;
        for size in &self.mem_size {
            w.write_u64::<LittleEndian>(*size)?;
        }
        w.write_u64::<LittleEndian>(self.meta_size)?;
        Ok(())
    }

    pub fn decode<R: Read>(r: &mut R) -> Result<Self, Error> {
        let magic = r.read_u32::<LittleEndian>()?;
        if magic != COMMAND_MAGIC {
            return Err(ErrorKind::invalid_parameter(format!(
                "bad command magic: {:#x}",
                magic
            )));
        }
        let version = r.read_u8()?;
        if version != WIRE_VERSION {
            return Err(ErrorKind::invalid_parameter(format!(
                "unsupported wire version: {}",
                version
            )));
        }
        let cmd_raw = r.read_u32::<LittleEndian>()?;
        let cmd = CommandCode::try_from(cmd_raw)
            .map_err(|_| ErrorKind::invalid_parameter(format!("bad command code: {}", cmd_raw)))?;
        let client_id = r.read_i64::<LittleEndian>()?;
        let num = r.read_u32::<LittleEndian>()?;
        if num as usize > DATA_LIMIT {
            return Err(ErrorKind::invalid_parameter(format!(
                "num {} exceeds DATA_LIMIT {}",
                num, DATA_LIMIT
            )));
        }
        let mut mem_size = [0u64; DATA_LIMIT];
        for size in mem_size.iter_mut() {
            *size = r.read_u64::<LittleEndian>()?;
        }
        let meta_size = r.read_u64::<LittleEndian>()?;
        Ok(CommandHeader {
            cmd,
            client_id,
            num,
            mem_size,
            meta_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let mut header = CommandHeader::new(CommandCode::TransferData, 42);
        header.num = 2;
        header.mem_size[0] = 40;
        header.mem_size[1] = 80;
        header.meta_size = 16;

        let mut buf = Vec::new();
        header.encode(&mut buf).unwrap();

        let decoded = CommandHeader::decode(&mut &buf[..]).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn rejects_bad_magic() {
        let buf = vec![0u8; 4];
        assert!(CommandHeader::decode(&mut &buf[..]).is_err());
    }

    #[test]
    fn rejects_oversize_num() {
        let mut header = CommandHeader::new(CommandCode::TransferData, 1);
        header.num = DATA_LIMIT as u32 + 1;
        let mut buf = Vec::new();
        header.encode(&mut buf).unwrap();
        assert!(CommandHeader::decode(&mut &buf[..]).is_err());
    }
}
