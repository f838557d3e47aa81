//! `set_info`/`get_info` key canonicalization.

use edgelink_core::{ErrorKind, Result};
use edgelink_queue::LeakPolicy;

/// The canonical key a case-insensitive `set_info`/`get_info` key maps
/// to, or `Other` for anything stored verbatim in the node's free-form
/// metadata map.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ConfigKey {
    Caps,
    Host,
    Port,
    DestHost,
    DestPort,
    Topic,
    QueueSize,
    Id,
    ClientId,
    Other,
}

impl ConfigKey {
    pub fn canonicalize(key: &str) -> ConfigKey {
        match key.to_ascii_uppercase().as_str() {
            "CAPS" | "CAPABILITY" => ConfigKey::Caps,
            "IP" | "HOST" => ConfigKey::Host,
            "PORT" => ConfigKey::Port,
            "DEST_IP" | "DEST_HOST" => ConfigKey::DestHost,
            "DEST_PORT" => ConfigKey::DestPort,
            "TOPIC" => ConfigKey::Topic,
            "QUEUE_SIZE" => ConfigKey::QueueSize,
            "ID" => ConfigKey::Id,
            "CLIENT_ID" => ConfigKey::ClientId,
            _ => ConfigKey::Other,
        }
    }

    pub fn is_read_only(self) -> bool {
        matches!(self, ConfigKey::Id | ConfigKey::ClientId)
    }
}

/// Per-node destination/topic state the transport multiplexer reads on
/// every `connect`/`start`, set via `set_info`.
#[derive(Debug, Clone, Default)]
pub struct NodeConfig {
    pub dest_host: String,
    pub dest_port: u16,
    pub topic: String,
}

/// Parses the `QUEUE_SIZE` value syntax: `N` or `N:OLD` / `N:NEW`.
pub fn parse_queue_size(value: &str) -> Result<(usize, LeakPolicy)> {
    let (count, policy) = match value.split_once(':') {
        Some((n, tag)) => (n, tag),
        None => (value, "NEW"),
    };
    let count: usize = count
        .trim()
        .parse()
        .map_err(|_| ErrorKind::invalid_parameter(format!("QUEUE_SIZE count is not a number: {}", value)))?;
    let policy = match policy.trim().to_ascii_uppercase().as_str() {
        "OLD" => LeakPolicy::LeakOld,
        "NEW" => LeakPolicy::LeakNew,
        other => {
            return Err(ErrorKind::invalid_parameter(format!(
                "QUEUE_SIZE leak policy must be OLD or NEW, got {}",
                other
            )))
        }
    };
    Ok((count, policy))
}

/// Parses a destination port, rejecting values outside `1-65535`.
pub fn parse_dest_port(value: &str) -> Result<u16> {
    let port: u32 = value
        .parse()
        .map_err(|_| ErrorKind::invalid_parameter(format!("DEST_PORT is not a number: {}", value)))?;
    if port == 0 || port > u16::MAX as u32 {
        return Err(ErrorKind::invalid_parameter("DEST_PORT must be in 1-65535"));
    }
    Ok(port as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalizes_case_insensitively() {
        assert_eq!(ConfigKey::canonicalize("caps"), ConfigKey::Caps);
        assert_eq!(ConfigKey::canonicalize("Dest_Host"), ConfigKey::DestHost);
        assert_eq!(ConfigKey::canonicalize("random"), ConfigKey::Other);
    }

    #[test]
    fn id_and_client_id_are_read_only() {
        assert!(ConfigKey::Id.is_read_only());
        assert!(ConfigKey::ClientId.is_read_only());
        assert!(!ConfigKey::Topic.is_read_only());
    }

    #[test]
    fn queue_size_defaults_to_leak_new() {
        let (n, policy) = parse_queue_size("10").unwrap();
        assert_eq!(n, 10);
        assert_eq!(policy, LeakPolicy::LeakNew);
    }

    #[test]
    fn queue_size_parses_explicit_policy() {
        let (n, policy) = parse_queue_size("5:OLD").unwrap();
        assert_eq!(n, 5);
        assert_eq!(policy, LeakPolicy::LeakOld);
    }

    #[test]
    fn dest_port_rejects_zero() {
        assert!(parse_dest_port("0").is_err());
    }
}
