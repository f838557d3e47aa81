use edgelink_core::{DATA_LIMIT, ErrorKind, Result};

use crate::metadata::Metadata;

/// A single logical frame crossing the network: up to `DATA_LIMIT` raw
/// data slots plus a metadata list.
///
/// Slots are owned `Box<[u8]>` buffers — there is no destroy-callback
/// field in this realization, since Rust's `Drop` already frees owned
/// memory; `add`/`copy` here play the role the source's
/// `(ptr, len, destroy_cb)` triple played.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EdgeData {
    slots: Vec<Box<[u8]>>,
    metadata: Metadata,
}

impl EdgeData {
    pub fn new() -> Self {
        EdgeData::default()
    }

    /// Appends one raw data slot. Fails with `invalid-parameter` if the
    /// frame already holds `DATA_LIMIT` slots or the slice is empty.
    pub fn add(&mut self, data: &[u8]) -> Result<()> {
        if self.slots.len() == DATA_LIMIT {
            return Err(ErrorKind::invalid_parameter(format!(
                "edge-data already holds DATA_LIMIT ({}) slots",
                DATA_LIMIT
            )));
        }
        if data.is_empty() {
            return Err(ErrorKind::invalid_parameter("slot must be non-empty"));
        }
        self.slots.push(Box::from(data));
        Ok(())
    }

    pub fn num(&self) -> usize {
        self.slots.len()
    }

    /// Returns a non-owning view of slot `i`.
    pub fn get(&self, i: usize) -> Option<&[u8]> {
        self.slots.get(i).map(|b| b.as_ref())
    }

    pub fn set_info(&mut self, key: &str, value: impl Into<String>) {
        self.metadata.set(key, value);
    }

    pub fn get_info(&self, key: &str) -> Option<&str> {
        self.metadata.get(key)
    }

    pub fn clear_info(&mut self) {
        self.metadata.clear();
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    /// Deep-copies every slot and the metadata list; mutating the copy
    /// never affects the original.
    pub fn copy(&self) -> EdgeData {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_rejects_beyond_data_limit() {
        let mut data = EdgeData::new();
        for _ in 0..DATA_LIMIT {
            data.add(&[1u8]).unwrap();
        }
        assert!(data.add(&[1u8]).is_err());
    }

    #[test]
    fn add_rejects_empty_slot() {
        let mut data = EdgeData::new();
        assert!(data.add(&[]).is_err());
    }

    #[test]
    fn copy_is_independent() {
        let mut data = EdgeData::new();
        data.add(&[1, 2, 3]).unwrap();
        data.set_info("k", "v");

        let mut copied = data.copy();
        copied.set_info("k", "changed");

        assert_eq!(data.get_info("k"), Some("v"));
        assert_eq!(copied.get_info("k"), Some("changed"));
    }
}
