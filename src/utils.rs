use crate::peer::types::{IceServerConfig, ServerKind};
use rand::Rng;

pub fn random_id() -> String {
    hex::encode(rand::rng().random::<[u8; 8]>())
}

/// Prefixes the ICE server URL with `stun:`/`turn:` when the scheme is missing
pub fn add_ice_url_scheme(config: &IceServerConfig) -> String {
    if config.url.starts_with("turn:")
        || config.url.starts_with("turns:")
        || config.url.starts_with("stun:")
        || config.url.starts_with("stuns:")
    {
        config.url.clone()
    } else {
        // В зависимости от типа сервера добавляем нужную схему
        let scheme = match config.kind {
            ServerKind::Turn => "turn:",
            ServerKind::Stun => "stun:",
        };
        format!("{}{}", scheme, config.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_ids_are_hex() {
        let id = random_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, random_id());
    }

    #[test]
    fn scheme_added_only_when_missing() {
        let stun = IceServerConfig::stun("stun.l.google.com:19302");
        assert_eq!(add_ice_url_scheme(&stun), "stun:stun.l.google.com:19302");

        let turn = IceServerConfig::turn("relay.example.org:3478", "u", "p");
        assert_eq!(add_ice_url_scheme(&turn), "turn:relay.example.org:3478");

        let explicit = IceServerConfig::turn("turns:relay.example.org:5349", "u", "p");
        assert_eq!(add_ice_url_scheme(&explicit), "turns:relay.example.org:5349");
    }
}
