//! Local peer identity.
//!
//! Every peer introduces itself with a display name and a device class.
//! When not configured, the display name is derived deterministically from
//! the local peer id (so the same id always reads the same on every screen)
//! and the device class is detected from the running platform.

use crate::config::GeneralConfig;
use crate::protocol::{PeerId, PeerInfo, UNKNOWN};

const ADJECTIVES: &[&str] = &[
    "Amber", "Brave", "Calm", "Clever", "Cosmic", "Daring", "Eager", "Fancy", "Gentle", "Happy",
    "Jolly", "Kind", "Lively", "Lucky", "Mellow", "Nimble", "Polite", "Quick", "Quiet", "Rapid",
    "Shiny", "Silly", "Sunny", "Swift", "Tidy", "Witty", "Zesty", "Bold",
];

const ANIMALS: &[&str] = &[
    "Badger", "Beaver", "Bison", "Camel", "Cheetah", "Crane", "Dolphin", "Falcon", "Ferret",
    "Gecko", "Heron", "Ibis", "Jaguar", "Koala", "Lemur", "Llama", "Lynx", "Marmot", "Narwhal",
    "Ocelot", "Otter", "Panda", "Puffin", "Quokka", "Raven", "Salmon", "Tapir", "Walrus", "Yak",
];

/// Derive a stable, human-friendly name from a seed such as a peer id.
#[must_use]
pub fn display_name_for(seed: &str) -> String {
    let hash = xxhash_rust::xxh3::xxh3_64(seed.as_bytes());
    #[allow(clippy::cast_possible_truncation)]
    let adjective = ADJECTIVES[(hash % ADJECTIVES.len() as u64) as usize];
    #[allow(clippy::cast_possible_truncation)]
    let animal = ANIMALS[((hash >> 32) % ANIMALS.len() as u64) as usize];
    format!("{adjective} {animal}")
}

/// Detect the device class of the running platform.
#[must_use]
pub const fn detect_device_name() -> &'static str {
    if cfg!(target_os = "android") {
        "Android"
    } else if cfg!(target_os = "ios") {
        "IPhone"
    } else if cfg!(target_os = "macos") {
        "MacOS"
    } else if cfg!(target_os = "windows") {
        "Windows"
    } else if cfg!(target_os = "linux") {
        "Generic Linux"
    } else {
        UNKNOWN
    }
}

/// The identity this process presents to peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalIdentity {
    /// Id assigned by the transport
    pub peer_id: PeerId,
    /// Display metadata sent in introductions
    pub info: PeerInfo,
}

impl LocalIdentity {
    /// Build the local identity, generating missing values.
    #[must_use]
    pub fn new(peer_id: PeerId, general: &GeneralConfig) -> Self {
        let display_name = general
            .display_name
            .clone()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| display_name_for(peer_id.as_str()));
        let device_name = general
            .device_name
            .clone()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| detect_device_name().to_string());

        Self {
            peer_id,
            info: PeerInfo::new(display_name, device_name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name_is_deterministic() {
        let a = display_name_for("peer-123");
        let b = display_name_for("peer-123");
        assert_eq!(a, b);
        assert_eq!(a.split(' ').count(), 2);
    }

    #[test]
    fn test_display_names_vary() {
        let names: std::collections::HashSet<String> =
            (0..50).map(|i| display_name_for(&format!("peer-{i}"))).collect();
        assert!(names.len() > 10, "expected varied names, got {}", names.len());
    }

    #[test]
    fn test_local_identity_uses_config_overrides() {
        let general = GeneralConfig {
            display_name: Some("Kitchen Laptop".to_string()),
            device_name: Some("Chrome OS".to_string()),
        };
        let identity = LocalIdentity::new(PeerId::new("abc"), &general);
        assert_eq!(identity.info.display_name, "Kitchen Laptop");
        assert_eq!(identity.info.device_name, "Chrome OS");
    }

    #[test]
    fn test_local_identity_generates_defaults() {
        let general = GeneralConfig {
            display_name: Some("   ".to_string()),
            device_name: None,
        };
        let identity = LocalIdentity::new(PeerId::new("abc"), &general);
        assert_eq!(identity.info.display_name, display_name_for("abc"));
        assert_eq!(identity.info.device_name, detect_device_name());
    }
}
