use std::io::{Read, Write};

use edgelink_core::{CommandCode, CommandHeader, Result};
use edgelink_data::EdgeData;

/// Writes a single-payload frame (`capability`, `host-info`, or a
/// zero-length `error`) to `w`.
pub fn write_simple_frame<W: Write>(
    w: &mut W,
    cmd: CommandCode,
    client_id: i64,
    payload: &[u8],
) -> Result<()> {
    let mut header = CommandHeader::new(cmd, client_id);
    if !payload.is_empty() {
        header.num = 1;
        header.mem_size[0] = payload.len() as u64;
    }
    header.encode(w)?;
    w.write_all(payload)?;
    Ok(())
}

/// Reads the single payload declared by `header.mem_size[0]`. Used for
/// `capability`/`host-info` frames, which always carry exactly one slot.
pub fn read_simple_payload<R: Read>(r: &mut R, header: &CommandHeader) -> Result<Vec<u8>> {
    let len = header.mem_size[0] as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

/// Writes a `transfer-data` frame: header, slots, then the metadata
/// block (reusing the edge-data metadata encoding, per `DESIGN.md`).
pub fn write_transfer_frame<W: Write>(w: &mut W, client_id: i64, data: &EdgeData) -> Result<()> {
    let meta_block = edgelink_data::encode_metadata(data.metadata());

    let mut header = CommandHeader::new(CommandCode::TransferData, client_id);
    header.num = data.num() as u32;
    for i in 0..data.num() {
        header.mem_size[i] = data.get(i).expect("index within num()").len() as u64;
    }
    header.meta_size = meta_block.len() as u64;
    header.encode(w)?;

    for i in 0..data.num() {
        w.write_all(data.get(i).expect("index within num()"))?;
    }
    w.write_all(&meta_block)?;
    Ok(())
}

/// Reads the slots and metadata block declared by a `transfer-data`
/// header into a fresh [`EdgeData`].
pub fn read_transfer_payload<R: Read>(r: &mut R, header: &CommandHeader) -> Result<EdgeData> {
    let mut data = EdgeData::new();
    for i in 0..header.num as usize {
        let len = header.mem_size[i] as usize;
        let mut buf = vec![0u8; len];
        r.read_exact(&mut buf)?;
        data.add(&buf)?;
    }
    let mut meta_buf = vec![0u8; header.meta_size as usize];
    r.read_exact(&mut meta_buf)?;
    *data.metadata_mut() = edgelink_data::decode_metadata_block(&meta_buf)?;
    Ok(data)
}

/// Discards the payload of a frame whose command this message thread
/// does not (yet) act on, keeping the stream aligned on the next header.
pub fn drain_unknown<R: Read>(r: &mut R, header: &CommandHeader) -> Result<()> {
    let total: u64 = header.mem_size.iter().sum::<u64>() + header.meta_size;
    std::io::copy(&mut r.take(total), &mut std::io::sink())?;
    Ok(())
}
