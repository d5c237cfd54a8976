//! PTP dataset marshalling: DeviceInfo, StorageInfo, ObjectInfo,
//! ObjectPropList/ObjectPropDesc (spec §4.2).
//!
//! Decoders are total functions: a malformed field fails with a typed
//! error carrying a byte offset, and never panics, because unknown-vendor
//! devices routinely emit short or malformed datasets.

use crate::codec::{Decode, Encode, Reader, Writer};
use crate::error::MtpError;

/// The PTP `0xFFFF` "undefined type/code" sentinel. Must never be conflated
/// with any defined property or format code, including ones that happen to
/// set the same low bits as 0xFFFF (spec §4.2, regression-critical).
pub const UNDEFINED_U16: u16 = 0xFFFF;

/// Sentinel for an unknown/overflowed 32-bit object size in ObjectInfo; the
/// true size must then be fetched via `GetObjectPropValue(ObjectSize)`.
pub const UNKNOWN_SIZE_U32: u32 = 0xFFFF_FFFF;

fn read_u16_array(r: &mut Reader<'_>) -> Result<Vec<u16>, MtpError> {
    r.read_array(|r| r.read_u16())
}

fn write_u16_array(w: &mut Writer, items: &[u16]) {
    w.write_array(items, |w, v| w.write_u16(*v));
}

/// Device-reported capabilities and identity (spec §3 `DeviceInfo`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub standard_version: u16,
    pub vendor_extension_id: u32,
    pub vendor_extension_version: u16,
    pub functional_mode: u16,
    pub operations_supported: Vec<u16>,
    pub events_supported: Vec<u16>,
    pub device_properties_supported: Vec<u16>,
    pub manufacturer: String,
    pub model: String,
    pub device_version: String,
    pub serial_number: String,
}

impl DeviceInfo {
    pub fn supports_operation(&self, opcode: u16) -> bool {
        self.operations_supported.contains(&opcode)
    }

    pub fn supports_event(&self, code: u16) -> bool {
        self.events_supported.contains(&code)
    }
}

impl Decode for DeviceInfo {
    fn decode(r: &mut Reader<'_>) -> Result<Self, MtpError> {
        let standard_version = r.read_u16()?;
        let vendor_extension_id = r.read_u32()?;
        let vendor_extension_version = r.read_u16()?;
        let _vendor_extension_desc = r.read_wide_string()?;
        let functional_mode = r.read_u16()?;
        let operations_supported = read_u16_array(r)?;
        let events_supported = read_u16_array(r)?;
        let device_properties_supported = read_u16_array(r)?;
        let _capture_formats = read_u16_array(r)?;
        let _image_formats = read_u16_array(r)?;
        let manufacturer = r.read_wide_string()?;
        let model = r.read_wide_string()?;
        let device_version = r.read_wide_string()?;
        let serial_number = r.read_wide_string()?;
        Ok(Self {
            standard_version,
            vendor_extension_id,
            vendor_extension_version,
            functional_mode,
            operations_supported,
            events_supported,
            device_properties_supported,
            manufacturer,
            model,
            device_version,
            serial_number,
        })
    }
}

impl Encode for DeviceInfo {
    fn encode(&self, w: &mut Writer) {
        w.write_u16(self.standard_version);
        w.write_u32(self.vendor_extension_id);
        w.write_u16(self.vendor_extension_version);
        w.write_wide_string("");
        w.write_u16(self.functional_mode);
        write_u16_array(w, &self.operations_supported);
        write_u16_array(w, &self.events_supported);
        write_u16_array(w, &self.device_properties_supported);
        write_u16_array(w, &[]); // capture formats
        write_u16_array(w, &[]); // image formats
        w.write_wide_string(&self.manufacturer);
        w.write_wide_string(&self.model);
        w.write_wide_string(&self.device_version);
        w.write_wide_string(&self.serial_number);
    }
}

/// Storage access rights (spec §3 `StorageInfo.accessRights`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessCapability {
    ReadWrite,
    ReadOnlyWithoutDelete,
    ReadOnlyWithDelete,
}

impl AccessCapability {
    fn from_wire(v: u16) -> Self {
        match v {
            1 => Self::ReadOnlyWithoutDelete,
            2 => Self::ReadOnlyWithDelete,
            _ => Self::ReadWrite,
        }
    }

    fn wire_value(self) -> u16 {
        match self {
            Self::ReadWrite => 0,
            Self::ReadOnlyWithoutDelete => 1,
            Self::ReadOnlyWithDelete => 2,
        }
    }

    pub fn is_read_only(self) -> bool {
        !matches!(self, Self::ReadWrite)
    }
}

/// Physical storage media type (informational).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    FixedRom,
    RemovableRom,
    FixedRam,
    RemovableRam,
    Undefined,
}

impl StorageType {
    fn from_wire(v: u16) -> Self {
        match v {
            1 => Self::FixedRom,
            2 => Self::RemovableRom,
            3 => Self::FixedRam,
            4 => Self::RemovableRam,
            _ => Self::Undefined,
        }
    }

    fn wire_value(self) -> u16 {
        match self {
            Self::Undefined => 0,
            Self::FixedRom => 1,
            Self::RemovableRom => 2,
            Self::FixedRam => 3,
            Self::RemovableRam => 4,
        }
    }
}

/// A storage area on the device (spec §3 `StorageInfo`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageInfo {
    pub storage_type: StorageType,
    pub filesystem_type: u16,
    pub access_capability: AccessCapability,
    pub max_capacity: u64,
    pub free_space_bytes: u64,
    pub storage_description: String,
    pub volume_label: String,
}

impl StorageInfo {
    /// Invariant from the data model: `free <= capacity`.
    pub fn is_consistent(&self) -> bool {
        self.free_space_bytes <= self.max_capacity
    }

    pub fn is_read_only(&self) -> bool {
        self.access_capability.is_read_only()
    }
}

impl Decode for StorageInfo {
    fn decode(r: &mut Reader<'_>) -> Result<Self, MtpError> {
        let storage_type = StorageType::from_wire(r.read_u16()?);
        let filesystem_type = r.read_u16()?;
        let access_capability = AccessCapability::from_wire(r.read_u16()?);
        let max_capacity = r.read_u64()?;
        let free_space_bytes = r.read_u64()?;
        let _free_space_in_images = r.read_u32()?;
        let storage_description = r.read_wide_string()?;
        let volume_label = r.read_wide_string()?;
        Ok(Self {
            storage_type,
            filesystem_type,
            access_capability,
            max_capacity,
            free_space_bytes,
            storage_description,
            volume_label,
        })
    }
}

impl Encode for StorageInfo {
    fn encode(&self, w: &mut Writer) {
        w.write_u16(self.storage_type.wire_value());
        w.write_u16(self.filesystem_type);
        w.write_u16(self.access_capability.wire_value());
        w.write_u64(self.max_capacity);
        w.write_u64(self.free_space_bytes);
        w.write_u32(0); // free space in images, unused
        w.write_wide_string(&self.storage_description);
        w.write_wide_string(&self.volume_label);
    }
}

/// Whether an object is a plain file or a folder/association (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationType {
    Undefined,
    GenericFolder,
    Other(u16),
}

impl AssociationType {
    fn from_wire(v: u16) -> Self {
        match v {
            0x0000 => Self::Undefined,
            0x0001 => Self::GenericFolder,
            other => Self::Other(other),
        }
    }

    fn wire_value(self) -> u16 {
        match self {
            Self::Undefined => 0x0000,
            Self::GenericFolder => 0x0001,
            Self::Other(v) => v,
        }
    }
}

/// The well-known "association" (folder) object format code.
pub const OBJECT_FORMAT_ASSOCIATION: u16 = 0x3001;
/// The "undefined" object format code, used by the PropList-support probe.
pub const OBJECT_FORMAT_UNDEFINED: u16 = 0x3000;

/// Thin wrapper distinguishing a format code that is a folder association.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectFormat(pub u16);

impl ObjectFormat {
    pub fn is_association(self) -> bool {
        self.0 == OBJECT_FORMAT_ASSOCIATION
    }
}

/// Object metadata as returned by `GetObjectInfo` (spec §3 `ObjectInfo`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub storage_id: u32,
    pub format: ObjectFormat,
    pub parent_object: u32,
    pub association_type: AssociationType,
    /// Size as reported by the 32-bit ObjectInfo field; `None` if the device
    /// sent the `0xFFFFFFFF` sentinel (true size must come from
    /// `GetObjectPropValue(ObjectSize)` instead, see [`Self::effective_size`]).
    pub size32: Option<u32>,
    /// 64-bit size from `GetObjectPropValue(ObjectSize /* 0xDC04 */)`, when
    /// fetched. The decoder prefers this over `size32` when both are present.
    pub size64: Option<u64>,
    pub filename: String,
    pub capture_date: Option<String>,
    pub modification_date: Option<String>,
}

impl ObjectInfo {
    /// `handle > 0` is an invariant enforced by the caller (handles are
    /// returned out-of-band, as a response parameter, not part of this
    /// dataset's wire encoding).
    pub fn effective_size(&self) -> Option<u64> {
        self.size64.or(self.size32.map(u64::from))
    }

    pub fn is_association(&self) -> bool {
        self.format.is_association()
    }
}

impl Decode for ObjectInfo {
    fn decode(r: &mut Reader<'_>) -> Result<Self, MtpError> {
        let storage_id = r.read_u32()?;
        let format = ObjectFormat(r.read_u16()?);
        let _protection_status = r.read_u16()?;
        let size_raw = r.read_u32()?;
        let _thumb_format = r.read_u16()?;
        let _thumb_compressed_size = r.read_u32()?;
        let _thumb_pix_width = r.read_u32()?;
        let _thumb_pix_height = r.read_u32()?;
        let _image_pix_width = r.read_u32()?;
        let _image_pix_height = r.read_u32()?;
        let _image_bit_depth = r.read_u32()?;
        let parent_object = r.read_u32()?;
        let association_type = AssociationType::from_wire(r.read_u16()?);
        let _association_desc = r.read_u32()?;
        let _sequence_number = r.read_u32()?;
        let filename = r.read_wide_string()?;
        let capture_date = r.read_wide_string()?;
        let modification_date = r.read_wide_string()?;
        let _keywords = r.read_wide_string()?;

        let size32 = if size_raw == UNKNOWN_SIZE_U32 { None } else { Some(size_raw) };

        Ok(Self {
            storage_id,
            format,
            parent_object,
            association_type,
            size32,
            size64: None,
            filename,
            capture_date: none_if_empty(capture_date),
            modification_date: none_if_empty(modification_date),
        })
    }
}

fn none_if_empty(s: String) -> Option<String> {
    if s.is_empty() { None } else { Some(s) }
}

impl Encode for ObjectInfo {
    fn encode(&self, w: &mut Writer) {
        w.write_u32(self.storage_id);
        w.write_u16(self.format.0);
        w.write_u16(0); // protection status
        w.write_u32(self.size32.unwrap_or(UNKNOWN_SIZE_U32));
        w.write_u16(0); // thumb format
        w.write_u32(0); // thumb compressed size
        w.write_u32(0); // thumb pix width
        w.write_u32(0); // thumb pix height
        w.write_u32(0); // image pix width
        w.write_u32(0); // image pix height
        w.write_u32(0); // image bit depth
        w.write_u32(self.parent_object);
        w.write_u16(self.association_type.wire_value());
        w.write_u32(0); // association desc
        w.write_u32(0); // sequence number
        w.write_wide_string(&self.filename);
        w.write_wide_string(self.capture_date.as_deref().unwrap_or(""));
        w.write_wide_string(self.modification_date.as_deref().unwrap_or(""));
        w.write_wide_string(""); // keywords
    }
}

/// A single property value from `GetObjectPropValue`/`GetObjectPropList`.
/// Only the variants this crate's callers need are modelled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectPropValue {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    Str(String),
}

impl ObjectPropValue {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::U8(v) => Some(*v as u64),
            Self::U16(v) => Some(*v as u64),
            Self::U32(v) => Some(*v as u64),
            Self::U64(v) => Some(*v),
            Self::Str(_) => None,
        }
    }
}

/// The well-known ObjectSize property code used for the 64-bit size fallback.
pub const OBJECT_PROP_OBJECT_SIZE: u32 = 0xDC04;

/// A PTP datatype code, as found in an `ObjectPropDesc`. `0xFFFF` means
/// "undefined type" and must never be treated as a defined numeric width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataTypeCode(pub u16);

impl DataTypeCode {
    pub fn is_undefined(self) -> bool {
        self.0 == UNDEFINED_U16
    }
}

/// One row of an `ObjectPropDesc` list (property metadata, not value).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectPropDesc {
    pub property_code: u32,
    pub data_type: DataTypeCode,
    pub get_set: bool,
}

/// One entry of a `GetObjectPropList` response: which object, which
/// property, what value (spec §4.2, §4.6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectPropListEntry {
    pub object_handle: u32,
    pub property_code: u32,
    pub value: ObjectPropValue,
}

/// The decoded result of `GetObjectPropList`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ObjectPropList {
    pub entries: Vec<ObjectPropListEntry>,
}

impl ObjectPropList {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn object_size(&self, handle: u32) -> Option<u64> {
        self.entries
            .iter()
            .find(|e| e.object_handle == handle && e.property_code == OBJECT_PROP_OBJECT_SIZE)
            .and_then(|e| e.value.as_u64())
    }
}

/// Decodes a `GetObjectPropList` response body. Each element is:
/// ObjectHandle(u32), PropertyCode(u32), Datatype(u16), Value(tagged by datatype).
///
/// This mirrors the real wire quad but only supports the datatype codes this
/// crate's ObjectSize/format lookups actually need; any other datatype code
/// decodes its value as a `U32` best-effort rather than failing the whole
/// list, since the list may carry many unrelated vendor properties.
impl Decode for ObjectPropList {
    fn decode(r: &mut Reader<'_>) -> Result<Self, MtpError> {
        let count = r.read_u32()? as usize;
        let mut entries = Vec::with_capacity(count.min(1 << 16));
        for _ in 0..count {
            let object_handle = r.read_u32()?;
            let property_code = r.read_u32()?;
            let datatype = DataTypeCode(r.read_u16()?);
            let value = if datatype.is_undefined() {
                ObjectPropValue::U32(r.read_u32()?)
            } else {
                match datatype.0 {
                    0x0002 => ObjectPropValue::U8(r.read_u8()?),
                    0x0004 => ObjectPropValue::U16(r.read_u16()?),
                    0x0006 => ObjectPropValue::U32(r.read_u32()?),
                    0x0008 => ObjectPropValue::U64(r.read_u64()?),
                    0xFFFF => unreachable!("handled by is_undefined() above"),
                    _ => ObjectPropValue::U32(r.read_u32()?),
                }
            };
            entries.push(ObjectPropListEntry { object_handle, property_code, value });
        }
        Ok(Self { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_device_info() -> DeviceInfo {
        DeviceInfo {
            standard_version: 100,
            vendor_extension_id: 6,
            vendor_extension_version: 100,
            functional_mode: 0,
            operations_supported: vec![0x1001, 0x1002, 0x9805],
            events_supported: vec![0x4002],
            device_properties_supported: vec![],
            manufacturer: "Acme".to_string(),
            model: "Widget".to_string(),
            device_version: "1.0".to_string(),
            serial_number: "SN123".to_string(),
        }
    }

    #[test]
    fn device_info_round_trips() {
        let info = sample_device_info();
        let mut w = Writer::new();
        info.encode(&mut w);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        let decoded = DeviceInfo::decode(&mut r).unwrap();
        assert_eq!(info, decoded);
        assert!(decoded.supports_operation(0x9805));
        assert!(!decoded.supports_operation(0x9999));
    }

    #[test]
    fn storage_info_round_trips_and_checks_invariant() {
        let info = StorageInfo {
            storage_type: StorageType::FixedRam,
            filesystem_type: 3,
            access_capability: AccessCapability::ReadWrite,
            max_capacity: 1_000_000,
            free_space_bytes: 500_000,
            storage_description: "Internal".to_string(),
            volume_label: "".to_string(),
        };
        let mut w = Writer::new();
        info.encode(&mut w);
        let bytes = w.into_bytes();
        let decoded = StorageInfo::decode(&mut Reader::new(&bytes)).unwrap();
        assert_eq!(info, decoded);
        assert!(decoded.is_consistent());
        assert!(!decoded.is_read_only());
    }

    #[test]
    fn object_info_round_trips_with_known_size() {
        let info = ObjectInfo {
            storage_id: 0x10001,
            format: ObjectFormat(0x3801),
            parent_object: 0,
            association_type: AssociationType::Undefined,
            size32: Some(1024),
            size64: None,
            filename: "photo.jpg".to_string(),
            capture_date: None,
            modification_date: None,
        };
        let mut w = Writer::new();
        info.encode(&mut w);
        let bytes = w.into_bytes();
        let decoded = ObjectInfo::decode(&mut Reader::new(&bytes)).unwrap();
        assert_eq!(decoded.effective_size(), Some(1024));
        assert!(!decoded.is_association());
    }

    #[test]
    fn object_info_unknown_size_sentinel_decodes_to_none() {
        let info = ObjectInfo {
            storage_id: 1,
            format: ObjectFormat(OBJECT_FORMAT_UNDEFINED),
            parent_object: 0,
            association_type: AssociationType::Undefined,
            size32: None,
            size64: None,
            filename: "huge.bin".to_string(),
            capture_date: None,
            modification_date: None,
        };
        let mut w = Writer::new();
        info.encode(&mut w);
        let bytes = w.into_bytes();
        let decoded = ObjectInfo::decode(&mut Reader::new(&bytes)).unwrap();
        assert_eq!(decoded.size32, None);
        assert_eq!(decoded.effective_size(), None);
    }

    #[test]
    fn association_folder_has_zero_size_allowed() {
        let info = ObjectInfo {
            storage_id: 1,
            format: ObjectFormat(OBJECT_FORMAT_ASSOCIATION),
            parent_object: 0,
            association_type: AssociationType::GenericFolder,
            size32: Some(0),
            size64: None,
            filename: "DCIM".to_string(),
            capture_date: None,
            modification_date: None,
        };
        assert!(info.is_association());
        assert_eq!(info.effective_size(), Some(0));
    }

    #[test]
    fn undefined_u16_sentinel_never_aliases_a_defined_code() {
        // Regression-critical per spec: 0xFFFF must decode as "undefined",
        // not be confused with any real property/format code that happens
        // to share low bits with 0xFFFF.
        let dt = DataTypeCode(UNDEFINED_U16);
        assert!(dt.is_undefined());
        let defined = DataTypeCode(0x7FFF);
        assert!(!defined.is_undefined());
    }

    #[test]
    fn prop_list_decodes_mixed_datatypes() {
        let mut w = Writer::new();
        w.write_u32(2); // count
        // Entry 1: handle=1, ObjectSize (u64)
        w.write_u32(1);
        w.write_u32(OBJECT_PROP_OBJECT_SIZE);
        w.write_u16(0x0008);
        w.write_u64(123456);
        // Entry 2: handle=1, undefined-type prop decoded as u32 fallback
        w.write_u32(1);
        w.write_u32(0xDC01);
        w.write_u16(UNDEFINED_U16);
        w.write_u32(7);
        let bytes = w.into_bytes();
        let list = ObjectPropList::decode(&mut Reader::new(&bytes)).unwrap();
        assert_eq!(list.entries.len(), 2);
        assert_eq!(list.object_size(1), Some(123456));
    }

    #[test]
    fn prop_list_empty_is_empty() {
        let mut w = Writer::new();
        w.write_u32(0);
        let bytes = w.into_bytes();
        let list = ObjectPropList::decode(&mut Reader::new(&bytes)).unwrap();
        assert!(list.is_empty());
    }

    #[test]
    fn truncated_device_info_fails_typed_not_panicked() {
        let info = sample_device_info();
        let mut w = Writer::new();
        info.encode(&mut w);
        let mut bytes = w.into_bytes();
        bytes.truncate(bytes.len() - 3);
        let result = DeviceInfo::decode(&mut Reader::new(&bytes));
        assert!(result.is_err());
    }
}
