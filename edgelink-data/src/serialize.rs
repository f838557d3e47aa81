use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use bytes::{BufMut, BytesMut};
use edgelink_core::{ErrorKind, Result, DATA_LIMIT};

use crate::data::EdgeData;
use crate::metadata::Metadata;

/// Sentinel stamped at the front of every serialized edge-data blob so a
/// receiver can recognize one with a single check.
pub const EDGE_DATA_KEY: u32 = 0xEDDA_EDDA;

/// Format version, bumped whenever this layout changes.
pub const EDGE_DATA_VERSION: u8 = 1;

const HEADER_LEN: usize = 4 + 1 + 4 + 8 * DATA_LIMIT + 8;

/// Encodes a metadata list as a `u32` entry count followed by that many
/// NUL-delimited `key\0value\0` pairs, in no guaranteed order. Shared by
/// the full edge-data blob layout below and by the transport crate's
/// command-frame metadata block, which reuses this exact encoding.
pub fn encode_metadata(metadata: &Metadata) -> Vec<u8> {
    let mut meta_block = Vec::new();
    meta_block
        .write_u32::<LittleEndian>(metadata.len() as u32)
        .expect("writing to a Vec never fails");
    for (k, v) in metadata.iter() {
        meta_block.extend_from_slice(k.as_bytes());
        meta_block.push(0);
        meta_block.extend_from_slice(v.as_bytes());
        meta_block.push(0);
    }
    meta_block
}

/// Serializes `data` into a single self-describing byte blob: header,
/// concatenated raw slots, then a serialized metadata block.
pub fn serialize(data: &EdgeData) -> Vec<u8> {
    let meta_block = encode_metadata(data.metadata());

    let mut data_len = [0u64; DATA_LIMIT];
    let mut total_data_len = 0usize;
    for i in 0..data.num() {
        let slot = data.get(i).expect("index within num()");
        data_len[i] = slot.len() as u64;
        total_data_len += slot.len();
    }

    let mut buf = BytesMut::with_capacity(HEADER_LEN + total_data_len + meta_block.len());
    buf.put_u32_le(EDGE_DATA_KEY);
    buf.put_u8(EDGE_DATA_VERSION);
    buf.put_u32_le(data.num() as u32);
    for len in &data_len {
        buf.put_u64_le(*len);
    }
    buf.put_u64_le(meta_block.len() as u64);

    for i in 0..data.num() {
        buf.extend_from_slice(data.get(i).expect("index within num()"));
    }
    buf.extend_from_slice(&meta_block);

    buf.to_vec()
}

/// Validates that `buf` is a well-formed serialized edge-data blob:
/// the sentinel and version match, and the header's declared lengths
/// sum exactly to the buffer length.
pub fn is_valid(buf: &[u8]) -> bool {
    parse_header(buf).is_ok()
}

struct ParsedHeader {
    num_mem: u32,
    data_len: [u64; DATA_LIMIT],
    meta_len: u64,
}

fn parse_header(buf: &[u8]) -> Result<ParsedHeader> {
    if buf.len() < HEADER_LEN {
        return Err(ErrorKind::invalid_parameter("buffer shorter than edge-data header"));
    }
    let mut r = buf;
    let key = r.read_u32::<LittleEndian>()?;
    if key != EDGE_DATA_KEY {
        return Err(ErrorKind::invalid_parameter(format!("bad edge-data sentinel: {:#x}", key)));
    }
    let version = r.read_u8()?;
    if version != EDGE_DATA_VERSION {
        return Err(ErrorKind::invalid_parameter(format!(
            "unsupported edge-data version: {}",
            version
        )));
    }
    let num_mem = r.read_u32::<LittleEndian>()?;
    if num_mem as usize > DATA_LIMIT {
        return Err(ErrorKind::invalid_parameter(format!(
            "num_mem {} exceeds DATA_LIMIT {}",
            num_mem, DATA_LIMIT
        )));
    }
    let mut data_len = [0u64; DATA_LIMIT];
    for len in data_len.iter_mut() {
        *len = r.read_u64::<LittleEndian>()?;
    }
    let meta_len = r.read_u64::<LittleEndian>()?;

    let total_data_len: u64 = data_len.iter().sum();
    let expected_len = HEADER_LEN as u64 + total_data_len + meta_len;
    if expected_len != buf.len() as u64 {
        return Err(ErrorKind::invalid_parameter(format!(
            "declared length {} does not match buffer length {}",
            expected_len,
            buf.len()
        )));
    }

    Ok(ParsedHeader {
        num_mem,
        data_len,
        meta_len,
    })
}

/// Reconstructs an [`EdgeData`] from a blob produced by [`serialize`].
pub fn deserialize(buf: &[u8]) -> Result<EdgeData> {
    let header = parse_header(buf)?;

    let mut offset = HEADER_LEN;
    let mut data = EdgeData::new();
    for i in 0..header.num_mem as usize {
        let len = header.data_len[i] as usize;
        let slot = &buf[offset..offset + len];
        data.add(slot)?;
        offset += len;
    }

    let meta_block = &buf[offset..offset + header.meta_len as usize];
    data.metadata_mut().clear();
    *data.metadata_mut() = decode_metadata_block(meta_block)?;

    Ok(data)
}

/// Inverse of [`encode_metadata`].
pub fn decode_metadata_block(mut block: &[u8]) -> Result<Metadata> {
    let mut metadata = Metadata::new();
    let count = block.read_u32::<LittleEndian>()?;
    for _ in 0..count {
        let key = read_nul_terminated(&mut block)?;
        let value = read_nul_terminated(&mut block)?;
        metadata.set(&key, value);
    }
    Ok(metadata)
}

fn read_nul_terminated(block: &mut &[u8]) -> Result<String> {
    let nul_at = block
        .iter()
        .position(|b| *b == 0)
        .ok_or_else(|| ErrorKind::invalid_parameter("metadata entry missing NUL terminator"))?;
    let s = String::from_utf8_lossy(&block[..nul_at]).into_owned();
    *block = &block[nul_at + 1..];
    Ok(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_with_data_and_metadata() {
        let mut data = EdgeData::new();
        data.add(&[1, 2, 3, 4]).unwrap();
        data.add(&[9, 8, 7]).unwrap();
        data.set_info("client_id", "42");
        data.set_info("topic", "frame");

        let blob = serialize(&data);
        assert!(is_valid(&blob));

        let restored = deserialize(&blob).unwrap();
        assert_eq!(restored.num(), data.num());
        for i in 0..data.num() {
            assert_eq!(restored.get(i), data.get(i));
        }
        assert!(restored.metadata().same_contents_as(data.metadata()));
    }

    #[test]
    fn empty_frame_serializes_to_a_minimal_blob() {
        let data = EdgeData::new();
        let blob = serialize(&data);
        assert!(is_valid(&blob));
        let restored = deserialize(&blob).unwrap();
        assert_eq!(restored.num(), 0);
        assert!(restored.metadata().is_empty());
    }

    #[test]
    fn boundary_at_data_limit() {
        let mut data = EdgeData::new();
        for i in 0..DATA_LIMIT {
            data.add(&[i as u8]).unwrap();
        }
        let blob = serialize(&data);
        let restored = deserialize(&blob).unwrap();
        assert_eq!(restored.num(), DATA_LIMIT);
    }

    #[test]
    fn rejects_truncated_buffer() {
        let mut data = EdgeData::new();
        data.add(&[1, 2, 3]).unwrap();
        let mut blob = serialize(&data);
        blob.truncate(blob.len() - 1);
        assert!(deserialize(&blob).is_err());
    }

    #[test]
    fn rejects_bad_sentinel() {
        let blob = vec![0u8; HEADER_LEN];
        assert!(deserialize(&blob).is_err());
    }
}
