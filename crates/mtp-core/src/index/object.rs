//! The local catalog's object model (spec §3 `IndexedObject`) and `pathKey`
//! construction rules (spec §6).

use unicode_normalization::UnicodeNormalization;

/// A device object mirrored into the local catalog by the crawl scheduler or
/// an event handler (spec §3).
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedObject {
    pub device_id: String,
    pub storage_id: u32,
    pub handle: u32,
    pub parent_handle: Option<u32>,
    pub name: String,
    pub path_key: String,
    pub size_bytes: Option<u64>,
    pub mtime: Option<String>,
    pub format_code: u16,
    pub is_directory: bool,
    pub generation: u64,
    pub change_counter: u64,
    pub tombstone: bool,
}

/// Builds a `pathKey` by NFC-normalizing `name`, stripping control
/// characters and path separators, lower-casing it for case-insensitive
/// comparison, and slash-joining it onto the parent's path key — or onto
/// the hex storage id, if this object is a storage root (spec §6).
pub fn build_path_key(parent_path_key: Option<&str>, storage_id: u32, name: &str) -> String {
    let cleaned: String = name.chars().filter(|c| !c.is_control() && *c != '/' && *c != '\\').collect();
    let normalized: String = cleaned.nfc().collect::<String>().to_lowercase();
    match parent_path_key {
        Some(parent) => format!("{parent}/{normalized}"),
        None => format!("{storage_id:08x}/{normalized}"),
    }
}
