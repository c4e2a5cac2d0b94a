//! Typed file metadata decoded from helper output.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileType {
    File,
    Directory,
    Link,
}

impl FileType {
    /// Parse the single-letter wire form (`F`, `D`, `L`).
    pub fn from_wire(token: &str) -> Option<Self> {
        match token {
            "F" => Some(FileType::File),
            "D" => Some(FileType::Directory),
            "L" => Some(FileType::Link),
            _ => None,
        }
    }
}

/// Sensitivity classification stored with a file, least restrictive first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SensitivityLevel {
    Private,
    Confidential,
    Sensitive,
}

impl SensitivityLevel {
    pub const MOST_RESTRICTIVE: SensitivityLevel = SensitivityLevel::Sensitive;

    /// Unknown values fall back to [`SensitivityLevel::MOST_RESTRICTIVE`].
    pub fn from_wire(token: &str) -> Self {
        match token {
            "PRIVATE" => SensitivityLevel::Private,
            "CONFIDENTIAL" => SensitivityLevel::Confidential,
            "SENSITIVE" => SensitivityLevel::Sensitive,
            _ => Self::MOST_RESTRICTIVE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessRight {
    Read,
    Write,
    Execute,
}

/// Bits of the share mode mask.
pub mod share_bits {
    pub const GROUP: u32 = 1;
    pub const READ: u32 = 2;
    pub const WRITE: u32 = 4;
    pub const EXECUTE: u32 = 8;
}

/// One ACL entry of a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessEntry {
    pub entity: String,
    pub is_group: bool,
    pub rights: BTreeSet<AccessRight>,
}

impl AccessEntry {
    pub fn from_mask(entity: impl Into<String>, mask: u32) -> Self {
        let mut rights = BTreeSet::new();
        if mask & share_bits::READ != 0 {
            rights.insert(AccessRight::Read);
        }
        if mask & share_bits::WRITE != 0 {
            rights.insert(AccessRight::Write);
        }
        if mask & share_bits::EXECUTE != 0 {
            rights.insert(AccessRight::Execute);
        }
        Self {
            entity: entity.into(),
            is_group: mask & share_bits::GROUP != 0,
            rights,
        }
    }
}

/// Access, creation and modification times, as emitted by the helper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamps {
    pub accessed: i64,
    pub created: i64,
    pub modified: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChecksum {
    pub checksum: String,
    pub algorithm: String,
}

/// Decoded metadata for one item. Only requested attributes are populated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_type: Option<FileType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_link: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_target: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unix_mode: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamps: Option<Timestamps>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shares: Option<Vec<AccessEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeSet<char>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<FileChecksum>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sensitivity: Option<SensitivityLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_inode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xowner: Option<String>,
}

/// Result of decoding one item of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    /// The helper replaced the item (or the remainder of the response) with
    /// an `EXIT:<code>` line.
    Exit(i32),
    Record(FileRecord),
}
