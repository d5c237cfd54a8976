//! PTP/MTP container framing and dataset marshalling (spec §4.2).

mod container;
mod dataset;
mod datetime;

pub use container::{Container, ContainerAssembler, ContainerType};
pub use dataset::{
    AccessCapability, AssociationType, DataTypeCode, DeviceInfo, ObjectFormat, ObjectInfo,
    ObjectPropDesc, ObjectPropList, ObjectPropValue, StorageInfo, StorageType,
    OBJECT_FORMAT_ASSOCIATION, OBJECT_FORMAT_UNDEFINED, OBJECT_PROP_OBJECT_SIZE, UNDEFINED_U16,
    UNKNOWN_SIZE_U32,
};
pub use datetime::PtpDateTime;

/// PTP operation codes referenced by the device actor, probe, and transfer
/// engine. Not exhaustive — only the subset this crate issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum OperationCode {
    GetDeviceInfo = 0x1001,
    OpenSession = 0x1002,
    CloseSession = 0x1003,
    GetStorageIDs = 0x1004,
    GetStorageInfo = 0x1005,
    GetObjectHandles = 0x1007,
    GetObjectInfo = 0x1008,
    GetObject = 0x1009,
    DeleteObject = 0x100B,
    SendObjectInfo = 0x100C,
    SendObject = 0x100D,
    GetPartialObject = 0x101B,
    GetObjectPropsSupported = 0x9801,
    GetObjectPropValue = 0x9802,
    GetObjectPropList = 0x9805,
    GetPartialObject64 = 0x95C1,
}

/// PTP/MTP event codes (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum EventCode {
    ObjectAdded = 0x4002,
    ObjectRemoved = 0x4003,
    StoreAdded = 0x4004,
    StoreRemoved = 0x4005,
    DeviceInfoChanged = 0x4008,
    ObjectInfoChanged = 0x4009,
    StorageInfoChanged = 0x400C,
}

impl EventCode {
    pub fn from_code(code: u16) -> Option<Self> {
        Some(match code {
            0x4002 => Self::ObjectAdded,
            0x4003 => Self::ObjectRemoved,
            0x4004 => Self::StoreAdded,
            0x4005 => Self::StoreRemoved,
            0x4008 => Self::DeviceInfoChanged,
            0x4009 => Self::ObjectInfoChanged,
            0x400C => Self::StorageInfoChanged,
            _ => return None,
        })
    }
}

/// A decoded interrupt-endpoint event (spec §4.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    ObjectAdded(u32),
    ObjectRemoved(u32),
    ObjectInfoChanged(u32),
    StoreAdded(u32),
    StoreRemoved(u32),
    StorageInfoChanged(u32),
    DeviceInfoChanged,
    Unknown { code: u16, params: Vec<u32> },
}

impl DeviceEvent {
    /// Decodes an event container's (code, params) pair into a typed event.
    pub fn decode(code: u16, params: &[u32]) -> Self {
        match EventCode::from_code(code) {
            Some(EventCode::ObjectAdded) => Self::ObjectAdded(params.first().copied().unwrap_or(0)),
            Some(EventCode::ObjectRemoved) => Self::ObjectRemoved(params.first().copied().unwrap_or(0)),
            Some(EventCode::ObjectInfoChanged) => Self::ObjectInfoChanged(params.first().copied().unwrap_or(0)),
            Some(EventCode::StoreAdded) => Self::StoreAdded(params.first().copied().unwrap_or(0)),
            Some(EventCode::StoreRemoved) => Self::StoreRemoved(params.first().copied().unwrap_or(0)),
            Some(EventCode::StorageInfoChanged) => Self::StorageInfoChanged(params.first().copied().unwrap_or(0)),
            Some(EventCode::DeviceInfoChanged) => Self::DeviceInfoChanged,
            None => Self::Unknown { code, params: params.to_vec() },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_known_event_codes() {
        assert_eq!(DeviceEvent::decode(0x4002, &[42]), DeviceEvent::ObjectAdded(42));
        assert_eq!(DeviceEvent::decode(0x4008, &[]), DeviceEvent::DeviceInfoChanged);
    }

    #[test]
    fn unknown_event_code_round_trips_params() {
        assert_eq!(
            DeviceEvent::decode(0x9999, &[1, 2]),
            DeviceEvent::Unknown { code: 0x9999, params: vec![1, 2] }
        );
    }
}
