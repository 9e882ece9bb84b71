//! Domain value types shared by the inventory graph, templates and device ports.
//!
//! Enumerations that arrive from the request layer (processor models, memory
//! types, drive types, ...) keep unrecognized strings instead of failing to
//! deserialize, so that template validation can report every bad field at once.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// =============================================================================
// String-backed enumerations
// =============================================================================

macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(from = "String", into = "String")]
        pub enum $name {
            $($(#[$vmeta])* $variant,)+
            /// A value this engine does not know about
            Unrecognized(String),
        }

        impl $name {
            /// Canonical textual form
            pub fn as_str(&self) -> &str {
                match self {
                    $($name::$variant => $text,)+
                    $name::Unrecognized(text) => text,
                }
            }

            /// Whether the value is one of the known variants
            pub fn is_recognized(&self) -> bool {
                !matches!(self, $name::Unrecognized(_))
            }
        }

        impl From<String> for $name {
            fn from(text: String) -> Self {
                $(
                    if text.eq_ignore_ascii_case($text) {
                        return $name::$variant;
                    }
                )+
                $name::Unrecognized(text)
            }
        }

        impl From<&str> for $name {
            fn from(text: &str) -> Self {
                Self::from(text.to_string())
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.as_str().to_string()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum! {
    /// Processor model family
    ProcessorModel {
        E3 => "E3",
        E5 => "E5",
        E7 => "E7",
        X3 => "X3",
        X5 => "X5",
        X7 => "X7",
        I3 => "I3",
        I5 => "I5",
        I7 => "I7",
    }
}

string_enum! {
    /// Processor instruction set architecture
    InstructionSet {
        X86 => "x86",
        X86_64 => "x86-64",
        Ia64 => "IA-64",
        ArmA32 => "ARM-A32",
        ArmA64 => "ARM-A64",
        Mips32 => "MIPS32",
        Mips64 => "MIPS64",
        Oem => "OEM",
    }
}

string_enum! {
    /// Processor instruction set extension
    InstructionSetExtension {
        Sse => "SSE",
        Sse2 => "SSE2",
        Sse3 => "SSE3",
        Sse41 => "SSE4.1",
        Sse42 => "SSE4.2",
        Avx => "AVX",
        Avx2 => "AVX2",
        Avx512 => "AVX512",
        Aes => "AES",
        VtX => "VT-x",
        VtD => "VT-d",
    }
}

string_enum! {
    /// Memory module technology
    MemoryType {
        Ddr => "DDR",
        Ddr2 => "DDR2",
        Ddr3 => "DDR3",
        Ddr4 => "DDR4",
        Lpddr3 => "LPDDR3",
        Lpddr4 => "LPDDR4",
    }
}

string_enum! {
    /// Local drive media type
    DriveType {
        Hdd => "HDD",
        Ssd => "SSD",
        Nvme => "NVMe",
    }
}

string_enum! {
    /// Addressing scheme of a remote drive
    RemoteStorageType {
        Iscsi => "iSCSI",
    }
}

string_enum! {
    /// Storage service technology behind a remote drive
    StorageBackend {
        Iscsi => "iSCSI",
    }
}

string_enum! {
    /// How a remote drive is derived from its master
    ReplicationMethod {
        Clone => "Clone",
        Snapshot => "Snapshot",
    }
}

string_enum! {
    /// Power action requested for a compute system
    ResetType {
        On => "On",
        ForceOff => "ForceOff",
        GracefulShutdown => "GracefulShutdown",
        GracefulRestart => "GracefulRestart",
        ForceRestart => "ForceRestart",
        ForceOn => "ForceOn",
        Nmi => "Nmi",
        PushPowerButton => "PushPowerButton",
    }
}

// =============================================================================
// Status
// =============================================================================

/// Health reported by discovery for an asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Health {
    #[default]
    Ok,
    Warning,
    Critical,
}

/// Operational state reported by discovery for an asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum State {
    #[default]
    Enabled,
    Disabled,
    Absent,
    Offline,
}

// =============================================================================
// Network and boot
// =============================================================================

/// A VLAN to program on a network interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vlan {
    pub id: u16,
    pub tagged: bool,
}

impl Vlan {
    pub fn tagged(id: u16) -> Self {
        Self { id, tagged: true }
    }

    pub fn untagged(id: u16) -> Self {
        Self { id, tagged: false }
    }
}

/// Boot source override target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BootSource {
    None,
    Pxe,
    Hdd,
    RemoteDrive,
}

/// Boot source override persistence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BootOverrideMode {
    Disabled,
    Once,
    Continuous,
}

// =============================================================================
// Location
// =============================================================================

/// Topological location of an asset, as ordered coordinates
/// (`Pod=1,Rack=2,Drawer=1,Module=3,Blade=7`).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Location(IndexMap<String, u32>);

impl Location {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a coordinate
    pub fn with(mut self, key: impl Into<String>, value: u32) -> Self {
        self.0.insert(key.into(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<u32> {
        self.0.get(key).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when every coordinate of `requested` is present here with the same
    /// value. A partial location therefore selects everything beneath it.
    pub fn satisfies(&self, requested: &Location) -> bool {
        requested
            .0
            .iter()
            .all(|(key, value)| self.0.get(key) == Some(value))
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (key, value) in &self.0 {
            if !first {
                f.write_str(",")?;
            }
            write!(f, "{}={}", key, value)?;
            first = false;
        }
        Ok(())
    }
}

impl FromStr for Location {
    type Err = String;

    fn from_str(text: &str) -> std::result::Result<Self, Self::Err> {
        let mut location = Location::new();
        for pair in text.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| format!("coordinate '{}' is not key=value", pair))?;
            let value = value
                .trim()
                .parse::<u32>()
                .map_err(|e| format!("coordinate '{}': {}", pair, e))?;
            location.0.insert(key.trim().to_string(), value);
        }
        Ok(location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_enum_keeps_unknown_values() {
        assert_eq!(ProcessorModel::from("e5"), ProcessorModel::E5);
        assert_eq!(
            ProcessorModel::from("Z9"),
            ProcessorModel::Unrecognized("Z9".to_string())
        );
        assert!(!ProcessorModel::from("Z9").is_recognized());

        let parsed: DriveType = serde_json::from_str("\"nvme\"").unwrap();
        assert_eq!(parsed, DriveType::Nvme);
        assert_eq!(serde_json::to_string(&DriveType::Nvme).unwrap(), "\"NVMe\"");
    }

    #[test]
    fn test_location_partial_match() {
        let blade = Location::new()
            .with("Pod", 1)
            .with("Rack", 2)
            .with("Drawer", 1)
            .with("Blade", 7);

        assert!(blade.satisfies(&Location::new().with("Rack", 2)));
        assert!(blade.satisfies(&Location::new()));
        assert!(!blade.satisfies(&Location::new().with("Rack", 3)));
        assert!(!blade.satisfies(&Location::new().with("Module", 1)));
    }

    #[test]
    fn test_location_text_form() {
        let location: Location = "Pod=1, Rack=2,Blade=7".parse().unwrap();
        assert_eq!(location.to_string(), "Pod=1,Rack=2,Blade=7");
        assert!("Pod".parse::<Location>().is_err());
        assert!("Pod=x".parse::<Location>().is_err());
    }
}
