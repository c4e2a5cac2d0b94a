//! File attributes that can be requested from the helper.
//!
//! The helper always writes attributes in ordinal order, whatever order the
//! caller listed them in. [`AttributeSet`] is a bitset, so iterating it yields
//! attributes in exactly that order.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A single metadata field, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileAttribute {
    FileType,
    IsLink,
    LinkTarget,
    UnixMode,
    Owner,
    Group,
    Timestamps,
    Path,
    RawPath,
    Inode,
    Size,
    Shares,
    Annotations,
    Checksum,
    Sensitivity,
    LinkInode,
    #[serde(rename = "XOWNER")]
    XOwner,
}

impl FileAttribute {
    pub const ALL: [FileAttribute; 17] = [
        FileAttribute::FileType,
        FileAttribute::IsLink,
        FileAttribute::LinkTarget,
        FileAttribute::UnixMode,
        FileAttribute::Owner,
        FileAttribute::Group,
        FileAttribute::Timestamps,
        FileAttribute::Path,
        FileAttribute::RawPath,
        FileAttribute::Inode,
        FileAttribute::Size,
        FileAttribute::Shares,
        FileAttribute::Annotations,
        FileAttribute::Checksum,
        FileAttribute::Sensitivity,
        FileAttribute::LinkInode,
        FileAttribute::XOwner,
    ];

    pub fn ordinal(self) -> u32 {
        self as u32
    }

    pub fn from_ordinal(ordinal: u32) -> Option<Self> {
        Self::ALL.get(ordinal as usize).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            FileAttribute::FileType => "FILE_TYPE",
            FileAttribute::IsLink => "IS_LINK",
            FileAttribute::LinkTarget => "LINK_TARGET",
            FileAttribute::UnixMode => "UNIX_MODE",
            FileAttribute::Owner => "OWNER",
            FileAttribute::Group => "GROUP",
            FileAttribute::Timestamps => "TIMESTAMPS",
            FileAttribute::Path => "PATH",
            FileAttribute::RawPath => "RAW_PATH",
            FileAttribute::Inode => "INODE",
            FileAttribute::Size => "SIZE",
            FileAttribute::Shares => "SHARES",
            FileAttribute::Annotations => "ANNOTATIONS",
            FileAttribute::Checksum => "CHECKSUM",
            FileAttribute::Sensitivity => "SENSITIVITY",
            FileAttribute::LinkInode => "LINK_INODE",
            FileAttribute::XOwner => "XOWNER",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|a| a.name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for FileAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A set of attributes, iterated in ordinal order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct AttributeSet(u32);

impl AttributeSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn all() -> Self {
        FileAttribute::ALL.into_iter().collect()
    }

    pub fn with(mut self, attribute: FileAttribute) -> Self {
        self.insert(attribute);
        self
    }

    pub fn insert(&mut self, attribute: FileAttribute) {
        self.0 |= 1 << attribute.ordinal();
    }

    pub fn remove(&mut self, attribute: FileAttribute) {
        self.0 &= !(1 << attribute.ordinal());
    }

    pub fn contains(&self, attribute: FileAttribute) -> bool {
        self.0 & (1 << attribute.ordinal()) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Decimal rendering of the bitset, as passed to `stat`, `list-directory`
    /// and `tree`.
    pub fn to_wire(&self) -> String {
        self.0.to_string()
    }

    pub fn iter(&self) -> impl Iterator<Item = FileAttribute> + '_ {
        FileAttribute::ALL
            .into_iter()
            .filter(move |a| self.contains(*a))
    }
}

impl FromIterator<FileAttribute> for AttributeSet {
    fn from_iter<T: IntoIterator<Item = FileAttribute>>(iter: T) -> Self {
        let mut set = AttributeSet::empty();
        for attribute in iter {
            set.insert(attribute);
        }
        set
    }
}

impl<const N: usize> From<[FileAttribute; N]> for AttributeSet {
    fn from(attributes: [FileAttribute; N]) -> Self {
        attributes.into_iter().collect()
    }
}
