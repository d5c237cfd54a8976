//! Quirks resolution: per-device tuning keyed by (VID,PID,bcdDevice,ifaceClass)
//! (spec §4.3). Loaded from JSON at startup into strongly-typed values; the
//! runtime never re-parses or hot-reloads this table.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Floor for `maxChunkBytes` at USB Hi-Speed, per spec §4.3.
pub const MIN_CHUNK_BYTES_HI_SPEED: u32 = 4 * 1024 * 1024;
/// Floor for `maxChunkBytes` at USB SuperSpeed, per spec §4.3.
pub const MIN_CHUNK_BYTES_SUPER_SPEED: u32 = 8 * 1024 * 1024;

/// One rung of the `openSessionResetLadder` (spec §4.3/§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OpenSessionRetryStep {
    Reopen,
    ClearHalts,
    Reset,
    ReEnumerate,
}

/// Governance status of a quirks entry. The runtime ignores this field
/// entirely — it exists for the contribution workflow that curates entries,
/// not for resolution (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GovernanceStatus {
    Proposed,
    Verified,
    Promoted,
}

/// Per-device tuning and behavior flags, resolved once per device open and
/// possibly downgraded further by the probe (spec §3 `DevicePolicy`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DevicePolicy {
    pub max_chunk_bytes: u32,
    pub io_timeout_ms: u32,
    pub handshake_timeout_ms: u32,
    pub inactivity_timeout_ms: u32,
    pub stabilize_ms: u32,
    pub skip_get_object_prop_list: bool,
    pub require_kernel_detach: bool,
    pub open_session_reset_ladder: Vec<OpenSessionRetryStep>,
    /// Ordered fallback parent folder names for best-effort uploads. Opaque
    /// policy data — the transfer engine walks it in declared order and
    /// never hardcodes an ordering (spec §9 Open Questions).
    pub write_target_ladder: Vec<String>,
    /// Whether `GetPartialObject64` is usable against this device. When
    /// `false`, a ranged read request must fail with `Unsupported` rather
    /// than attempt a partial transfer (spec §4.6 Read contract).
    #[serde(default = "DevicePolicy::default_supports_partial_read")]
    pub supports_partial_read: bool,
    #[serde(default = "GovernanceStatus::default_status")]
    pub governance_status: GovernanceStatus,
}

impl GovernanceStatus {
    fn default_status() -> Self {
        Self::Proposed
    }
}

impl DevicePolicy {
    fn default_supports_partial_read() -> bool {
        true
    }

    /// Raises `max_chunk_bytes` to the floor appropriate for the negotiated
    /// USB speed, never lowering it below what the policy already declares
    /// (spec §4.3, §4.5 step 3).
    pub fn raise_chunk_floor(&mut self, floor: u32) {
        if self.max_chunk_bytes < floor {
            self.max_chunk_bytes = floor;
        }
    }

    /// Conservative defaults applied when no quirks entry matches at all.
    pub fn conservative_default() -> Self {
        Self {
            max_chunk_bytes: MIN_CHUNK_BYTES_HI_SPEED,
            io_timeout_ms: 10_000,
            handshake_timeout_ms: 15_000,
            inactivity_timeout_ms: 30_000,
            stabilize_ms: 0,
            skip_get_object_prop_list: true,
            require_kernel_detach: false,
            open_session_reset_ladder: vec![OpenSessionRetryStep::Reopen, OpenSessionRetryStep::ClearHalts],
            write_target_ladder: vec!["SwiftMTP".to_string()],
            supports_partial_read: true,
            governance_status: GovernanceStatus::Proposed,
        }
    }

    /// The PTP-class heuristic fallback: still-image interface class (0x06)
    /// gets a default camera policy with PropList enabled (spec §4.3).
    pub fn ptp_class_heuristic() -> Self {
        Self {
            skip_get_object_prop_list: false,
            ..Self::conservative_default()
        }
    }
}

/// Lookup key for a quirks entry: exact VID/PID plus optional interface
/// specifics used to break ties between multiple entries for the same device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub vid: u16,
    pub pid: u16,
    pub bcd_device: Option<u16>,
    pub iface_class: Option<u8>,
    pub iface_subclass: Option<u8>,
    pub iface_protocol: Option<u8>,
}

impl DeviceIdentity {
    pub fn new(vid: u16, pid: u16) -> Self {
        Self { vid, pid, bcd_device: None, iface_class: None, iface_subclass: None, iface_protocol: None }
    }

    /// How specific an identity is, used to break exact-(vid,pid) ties by
    /// "most-specific interface match wins" (spec §4.3).
    fn specificity(&self) -> u8 {
        [self.bcd_device.is_some(), self.iface_class.is_some(), self.iface_subclass.is_some(), self.iface_protocol.is_some()]
            .iter()
            .filter(|b| **b)
            .count() as u8
    }

    fn matches(&self, query: &DeviceIdentity) -> bool {
        if self.vid != query.vid || self.pid != query.pid {
            return false;
        }
        field_matches(self.bcd_device, query.bcd_device)
            && field_matches(self.iface_class, query.iface_class)
            && field_matches(self.iface_subclass, query.iface_subclass)
            && field_matches(self.iface_protocol, query.iface_protocol)
    }
}

fn field_matches<T: PartialEq>(entry: Option<T>, query: Option<T>) -> bool {
    match entry {
        None => true,
        Some(v) => query.as_ref() == Some(&v),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct QuirksEntry {
    identity: DeviceIdentity,
    policy: DevicePolicy,
}

/// Read-only keyed lookup from device identity to `DevicePolicy` (spec §4.3).
/// Parsed once at startup; the runtime never mutates or reloads it.
#[derive(Debug, Clone, Default)]
pub struct QuirksDb {
    entries: Vec<QuirksEntry>,
}

impl QuirksDb {
    pub fn empty() -> Self {
        Self { entries: Vec::new() }
    }

    /// Loads the quirks table from a JSON file. The on-disk schema is the
    /// serialized form of `QuirksEntry`; kept stable and versioned per
    /// spec §9's re-architecture note on "dynamic JSON-typed quirks loading".
    pub fn load(path: impl AsRef<Path>) -> Result<Self, crate::error::MtpError> {
        let text = fs::read_to_string(path).map_err(|e| crate::error::MtpError::Internal {
            reason: format!("failed to read quirks file: {e}"),
        })?;
        let entries: Vec<QuirksEntry> = serde_json::from_str(&text).map_err(|e| crate::error::MtpError::Internal {
            reason: format!("failed to parse quirks file: {e}"),
        })?;
        Ok(Self { entries })
    }

    /// The built-in default quirks table, covering a handful of well-known
    /// vendor identities plus the canonical write-target ladder ordering
    /// from spec §9's Open Questions pinned reference.
    pub fn built_in() -> Self {
        let canonical_ladder = vec![
            "Download".to_string(),
            "Downloads".to_string(),
            "DCIM".to_string(),
            "Camera".to_string(),
            "Pictures".to_string(),
            "Documents".to_string(),
            "SwiftMTP".to_string(),
        ];
        Self {
            entries: vec![QuirksEntry {
                identity: DeviceIdentity { vid: 0x18d1, pid: 0x4ee1, bcd_device: None, iface_class: Some(0x06), iface_subclass: None, iface_protocol: None },
                policy: DevicePolicy {
                    max_chunk_bytes: MIN_CHUNK_BYTES_HI_SPEED,
                    io_timeout_ms: 15_000,
                    handshake_timeout_ms: 20_000,
                    inactivity_timeout_ms: 30_000,
                    stabilize_ms: 800,
                    skip_get_object_prop_list: true,
                    require_kernel_detach: true,
                    open_session_reset_ladder: vec![
                        OpenSessionRetryStep::Reopen,
                        OpenSessionRetryStep::ClearHalts,
                        OpenSessionRetryStep::Reset,
                    ],
                    write_target_ladder: canonical_ladder,
                    supports_partial_read: true,
                    governance_status: GovernanceStatus::Promoted,
                },
            }],
        }
    }

    /// Resolves a policy for the given identity, per spec §4.3's lookup
    /// order: exact match wins, ties broken by most-specific interface
    /// match, otherwise the PTP-class heuristic, otherwise conservative
    /// defaults.
    pub fn resolve(&self, query: &DeviceIdentity) -> DevicePolicy {
        let best = self
            .entries
            .iter()
            .filter(|e| e.identity.matches(query))
            .max_by_key(|e| e.identity.specificity());
        if let Some(entry) = best {
            return entry.policy.clone();
        }
        if query.iface_class == Some(0x06) {
            return DevicePolicy::ptp_class_heuristic();
        }
        DevicePolicy::conservative_default()
    }
}

impl DeviceIdentity {
    /// Builder helper used by tests to add an interface class to a query.
    pub fn with_iface_class(mut self, class: u8) -> Self {
        self.iface_class = Some(class);
        self
    }
}
