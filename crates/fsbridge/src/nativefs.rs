//! Filesystem operations expressed as helper commands.
//!
//! Every operation translates its cloud paths, runs one command on the
//! session and decodes the response into an [`FsResult`] whose status is the
//! helper's final `EXIT:` code. Paths in returned records are cloud paths.

use std::collections::BTreeSet;
use std::io::{self, Read};
use std::ops::RangeInclusive;

use fsbridge_protocol::{
    AccessRight, AttributeDecoder, AttributeSet, Command, DecodeError, FileAttribute, FileRecord,
    FileType, RecordListing, collect_listing, parse_exit_line, read_status_response,
};
use serde::Serialize;
use tracing::debug;

use crate::error::{BridgeError, FsResult, Result};
use crate::identity::UserTable;
use crate::ownership::CreatorSource;
use crate::paths::{PathTranslator, join_path};
use crate::session::{CacheKey, Session};

/// Prefix the helper requires for extended attribute names.
pub const XATTR_PREFIX: &str = "user.";

/// Status reported when an entity cannot be mapped to a unix identity.
const NOT_FOUND: i32 = -2;

const NO_ARGS: [&str; 0] = [];

const WRITE_HANDLE: CacheKey<String> = CacheKey::new("write-handle");
const READ_HANDLE: CacheKey<String> = CacheKey::new("read-handle");

/// Attributes reported for created or modified items.
pub fn created_attributes() -> AttributeSet {
    AttributeSet::from([
        FileAttribute::FileType,
        FileAttribute::IsLink,
        FileAttribute::LinkTarget,
        FileAttribute::Owner,
        FileAttribute::Timestamps,
        FileAttribute::Path,
        FileAttribute::Inode,
        FileAttribute::Size,
        FileAttribute::Annotations,
        FileAttribute::Checksum,
        FileAttribute::Sensitivity,
        FileAttribute::LinkInode,
    ])
}

pub fn moved_attributes() -> AttributeSet {
    AttributeSet::from([
        FileAttribute::FileType,
        FileAttribute::Owner,
        FileAttribute::Path,
        FileAttribute::Inode,
    ])
}

pub fn deleted_attributes() -> AttributeSet {
    AttributeSet::from([
        FileAttribute::FileType,
        FileAttribute::Owner,
        FileAttribute::Group,
        FileAttribute::Path,
        FileAttribute::Inode,
    ])
}

/// An item reported by `move`, with the path it had before.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MovedItem {
    pub old_path: String,
    #[serde(flatten)]
    pub record: FileRecord,
}

/// Subject of an ACL entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AclEntity {
    /// A cloud user, mapped to its unix account.
    User(String),
    /// A unix group, passed through as is.
    Group(String),
}

/// Filesystem view of one session.
pub struct NativeFs<'a> {
    session: &'a mut Session,
    paths: &'a PathTranslator,
    users: &'a UserTable,
}

impl<'a> NativeFs<'a> {
    pub fn new(session: &'a mut Session, paths: &'a PathTranslator, users: &'a UserTable) -> Self {
        Self {
            session,
            paths,
            users,
        }
    }

    pub fn session(&mut self) -> &mut Session {
        &mut *self.session
    }

    pub fn list_directory(
        &mut self,
        path: &str,
        attributes: AttributeSet,
    ) -> Result<FsResult<Vec<FileRecord>>> {
        let path = self.paths.translate(path)?;
        self.records(
            Command::ListDirectory,
            &[path, attributes.to_wire()],
            attributes,
        )
    }

    /// Every item below `path`, recursively.
    pub fn tree(&mut self, path: &str, attributes: AttributeSet) -> Result<FsResult<Vec<FileRecord>>> {
        let path = self.paths.translate(path)?;
        self.records(Command::Tree, &[path, attributes.to_wire()], attributes)
    }

    pub fn stat(&mut self, path: &str, attributes: AttributeSet) -> Result<FsResult<Option<FileRecord>>> {
        let path = self.paths.translate(path)?;
        let result = self.records(Command::Stat, &[path, attributes.to_wire()], attributes)?;
        Ok(result.map(|mut records| {
            if records.len() == 1 {
                records.pop()
            } else {
                None
            }
        }))
    }

    pub fn make_directory(&mut self, path: &str) -> Result<FsResult<Vec<FileRecord>>> {
        let path = self.paths.translate(path)?;
        self.records(Command::MakeDir, &[path], created_attributes())
    }

    pub fn delete(&mut self, path: &str) -> Result<FsResult<Vec<FileRecord>>> {
        let path = self.paths.translate(path)?;
        self.records(Command::Delete, &[path], deleted_attributes())
    }

    pub fn copy(
        &mut self,
        from: &str,
        to: &str,
        allow_overwrite: bool,
    ) -> Result<FsResult<Vec<FileRecord>>> {
        let from = self.paths.translate(from)?;
        let to = self.paths.translate(to)?;
        self.records(
            Command::Copy,
            &[from, to, flag(allow_overwrite)],
            created_attributes(),
        )
    }

    /// Move `from` to `to`. Each reported item carries its old path; for a
    /// directory that is its position relative to the old directory.
    pub fn move_item(
        &mut self,
        from: &str,
        to: &str,
        allow_overwrite: bool,
    ) -> Result<FsResult<Vec<MovedItem>>> {
        let from_path = self.paths.translate(from)?;
        let to_path = self.paths.translate(to)?;

        let from_stat = self.stat(from, AttributeSet::from([FileAttribute::FileType]))?;
        if !from_stat.is_ok() {
            return Ok(FsResult::new(from_stat.status, Vec::new()));
        }
        let is_directory =
            from_stat.value.and_then(|record| record.file_type) == Some(FileType::Directory);

        let paths = self.paths;
        let users = self.users;
        self.session.run_command(
            Command::Move,
            &[from_path, to_path, flag(allow_overwrite)],
            |streams| {
                let mut lines = streams.stdout_lines();
                let real_from = required_line(&mut lines, 1)?;
                if let Some(code) = parse_exit_line(&real_from, 1)? {
                    return Ok(FsResult::new(code, Vec::new()));
                }
                let real_to = required_line(&mut lines, 2)?;
                let real_from = paths.to_cloud_path(&real_from);
                let real_to = paths.to_cloud_path(&real_to);

                let decoder =
                    AttributeDecoder::new(lines, moved_attributes(), users).with_line_offset(2);
                let listing = collect_listing(decoder)?;
                log_item_failures(Command::Move, &listing);

                let items = listing
                    .records
                    .into_iter()
                    .map(|record| {
                        let record = paths.record_to_cloud(record);
                        let old_path = if is_directory {
                            let new_path = record.path.as_deref().unwrap_or_default();
                            let base = new_path
                                .strip_prefix(real_to.as_str())
                                .unwrap_or(new_path)
                                .trim_start_matches('/');
                            join_path(&real_from, base)
                        } else {
                            real_from.clone()
                        };
                        MovedItem { old_path, record }
                    })
                    .collect();
                Ok(FsResult::new(listing.status, items))
            },
        )
    }

    pub fn create_symbolic_link(
        &mut self,
        target: &str,
        link: &str,
    ) -> Result<FsResult<Vec<FileRecord>>> {
        let target = self.paths.translate(target)?;
        let link = self.paths.translate(link)?;
        self.records(Command::Symlink, &[target, link], created_attributes())
    }

    pub fn chmod(
        &mut self,
        path: &str,
        owner: &BTreeSet<AccessRight>,
        group: &BTreeSet<AccessRight>,
        other: &BTreeSet<AccessRight>,
    ) -> Result<FsResult<Vec<FileRecord>>> {
        let path = self.paths.translate(path)?;
        let mode = unix_mode(owner, group, other);
        self.records(Command::Chmod, &[path, mode.to_string()], created_attributes())
    }

    /// Open `path` for a following [`NativeFs::write`].
    pub fn open_for_writing(
        &mut self,
        path: &str,
        allow_overwrite: bool,
    ) -> Result<FsResult<Vec<FileRecord>>> {
        let real_path = self.paths.translate(path)?;
        let result = self.records(
            Command::WriteOpen,
            &[real_path, flag(allow_overwrite)],
            created_attributes(),
        )?;
        if result.is_ok() {
            self.session.store(WRITE_HANDLE, path.to_string());
        }
        Ok(result)
    }

    /// Stream `data` into the file opened by [`NativeFs::open_for_writing`].
    /// The open handle is used up either way.
    pub fn write<R: Read>(&mut self, mut data: R) -> Result<FsResult<Vec<FileRecord>>> {
        let Some(handle) = self.session.invalidate(WRITE_HANDLE) else {
            return Err(BridgeError::MissingCacheEntry(WRITE_HANDLE.name().to_string()));
        };
        debug!("Writing to {}", handle);

        let paths = self.paths;
        let users = self.users;
        let attributes = created_attributes();
        self.session.run_command_with_payload(
            Command::Write,
            &NO_ARGS,
            |out| io::copy(&mut data, out).map(|_| ()),
            |streams| {
                let decoder = AttributeDecoder::new(streams.stdout_lines(), attributes, users);
                Ok(listing_result(Command::Write, collect_listing(decoder)?, paths))
            },
        )
    }

    pub fn open_for_reading(&mut self, path: &str) -> Result<FsResult<()>> {
        let real_path = self.paths.translate(path)?;
        let result = self.status(Command::ReadOpen, &[real_path])?;
        if result.is_ok() {
            self.session.store(READ_HANDLE, path.to_string());
        }
        Ok(result)
    }

    /// Read the file opened by [`NativeFs::open_for_reading`], optionally
    /// limited to an inclusive byte range. `consumer` sees exactly the bytes
    /// the helper announced.
    pub fn read<F, T>(&mut self, range: Option<RangeInclusive<u64>>, consumer: F) -> Result<T>
    where
        F: FnOnce(&mut dyn Read) -> Result<T>,
    {
        let handle = self.session.retrieve(READ_HANDLE)?;
        debug!("Reading {} ({:?})", handle, range);

        let (start, end) = match &range {
            Some(range) => (range.start().to_string(), range.end().to_string()),
            None => ("-1".to_string(), "-1".to_string()),
        };
        self.session.run_command(Command::Read, &[start, end], |streams| {
            let mut stdout = streams.stdout();
            let Some(line) = stdout.read_frame_line()? else {
                return Err(DecodeError::Incomplete {
                    line: 1,
                    attribute: FileAttribute::Size,
                }
                .into());
            };
            if let Some(code) = parse_exit_line(&line, 1)? {
                return Err(BridgeError::HelperExitStatus(code));
            }
            let size: u64 = line.trim().parse().map_err(|_| DecodeError::InvalidValue {
                line: 1,
                attribute: FileAttribute::Size,
                value: line.clone(),
            })?;
            stdout.clear_next_bytes(size);
            consumer(&mut (&mut stdout).take(size))
        })
    }

    pub fn get_extended_attribute(
        &mut self,
        path: &str,
        name: &str,
    ) -> Result<FsResult<Option<String>>> {
        let path = self.paths.translate(path)?;
        let response = self.status_lines(Command::GetXattr, &[path, name.to_string()])?;
        Ok(response.map(|mut lines| lines.pop()))
    }

    pub fn set_extended_attribute(
        &mut self,
        path: &str,
        name: &str,
        value: &str,
    ) -> Result<FsResult<()>> {
        let path = self.paths.translate(path)?;
        self.status(
            Command::SetXattr,
            &[path, xattr_name(name), value.to_string()],
        )
    }

    pub fn list_extended_attributes(&mut self, path: &str) -> Result<FsResult<Vec<String>>> {
        let path = self.paths.translate(path)?;
        self.status_lines(Command::ListXattr, &[path])
    }

    pub fn delete_extended_attribute(&mut self, path: &str, name: &str) -> Result<FsResult<()>> {
        let path = self.paths.translate(path)?;
        self.status(Command::DeleteXattr, &[path, xattr_name(name)])
    }

    /// Grant `rights` to `entity` with `setfacl -m`.
    pub fn create_acl_entry(
        &mut self,
        path: &str,
        entity: &AclEntity,
        rights: &BTreeSet<AccessRight>,
        default_list: bool,
        recursive: bool,
    ) -> Result<FsResult<()>> {
        let path = self.paths.translate(path)?;
        let Some(entity) = self.unix_entity(entity) else {
            return Ok(FsResult::new(NOT_FOUND, ()));
        };

        let mut command = acl_flags(default_list, recursive);
        command.push("-m".to_string());
        command.push(shell_escape(&format!(
            "{}:{}",
            entity,
            acl_permissions(rights)
        )));
        command.push(shell_escape(&path));
        self.status(Command::Setfacl, &[command.join(" ")])
    }

    /// Remove the entry of `entity` with `setfacl -x`.
    pub fn remove_acl_entry(
        &mut self,
        path: &str,
        entity: &AclEntity,
        default_list: bool,
        recursive: bool,
    ) -> Result<FsResult<()>> {
        let path = self.paths.translate(path)?;
        let Some(entity) = self.unix_entity(entity) else {
            return Ok(FsResult::new(NOT_FOUND, ()));
        };

        let mut command = acl_flags(default_list, recursive);
        command.push("-x".to_string());
        command.push(shell_escape(&entity));
        command.push(shell_escape(&path));
        self.status(Command::Setfacl, &[command.join(" ")])
    }

    fn unix_entity(&self, entity: &AclEntity) -> Option<String> {
        match entity {
            AclEntity::User(cloud_user) => self
                .users
                .identity(cloud_user)
                .ok()
                .map(|identity| format!("u:{}", identity.unix_user)),
            AclEntity::Group(group) => Some(format!("g:{}", group)),
        }
    }

    fn records<S: AsRef<str>>(
        &mut self,
        command: Command,
        args: &[S],
        attributes: AttributeSet,
    ) -> Result<FsResult<Vec<FileRecord>>> {
        let paths = self.paths;
        let users = self.users;
        self.session.run_command(command, args, |streams| {
            let decoder = AttributeDecoder::new(streams.stdout_lines(), attributes, users);
            Ok(listing_result(command, collect_listing(decoder)?, paths))
        })
    }

    fn status<S: AsRef<str>>(&mut self, command: Command, args: &[S]) -> Result<FsResult<()>> {
        Ok(self.status_lines(command, args)?.map(|_| ()))
    }

    fn status_lines<S: AsRef<str>>(
        &mut self,
        command: Command,
        args: &[S],
    ) -> Result<FsResult<Vec<String>>> {
        self.session.run_command(command, args, |streams| {
            let response = read_status_response(streams.stdout_lines())?;
            Ok(FsResult::new(response.status, response.lines))
        })
    }
}

impl CreatorSource for NativeFs<'_> {
    fn creator(&mut self, path: &str) -> Result<Option<String>> {
        let result = self.stat(path, AttributeSet::from([FileAttribute::XOwner]))?;
        Ok(result.value.and_then(|record| record.xowner))
    }
}

fn listing_result(
    command: Command,
    listing: RecordListing,
    paths: &PathTranslator,
) -> FsResult<Vec<FileRecord>> {
    log_item_failures(command, &listing);
    let records = listing
        .records
        .into_iter()
        .map(|record| paths.record_to_cloud(record))
        .collect();
    FsResult::new(listing.status, records)
}

fn log_item_failures(command: Command, listing: &RecordListing) {
    if !listing.item_failures.is_empty() {
        debug!(
            "{}: {} item(s) skipped with status {:?}",
            command,
            listing.item_failures.len(),
            listing.item_failures
        );
    }
}

fn required_line<L>(lines: &mut L, line: usize) -> Result<String>
where
    L: Iterator<Item = io::Result<String>>,
{
    match lines.next() {
        Some(value) => Ok(value?),
        None => Err(DecodeError::Incomplete {
            line,
            attribute: FileAttribute::Path,
        }
        .into()),
    }
}

fn flag(value: bool) -> String {
    let flag = if value { "1" } else { "0" };
    flag.to_string()
}

fn xattr_name(name: &str) -> String {
    format!(
        "{}{}",
        XATTR_PREFIX,
        name.strip_prefix(XATTR_PREFIX).unwrap_or(name)
    )
}

/// Unix permission bits (`rwx` = 4/2/1) of a set of rights.
pub fn mode_bits(rights: &BTreeSet<AccessRight>) -> u32 {
    rights
        .iter()
        .map(|right| match right {
            AccessRight::Read => 4,
            AccessRight::Write => 2,
            AccessRight::Execute => 1,
        })
        .sum()
}

pub fn unix_mode(
    owner: &BTreeSet<AccessRight>,
    group: &BTreeSet<AccessRight>,
    other: &BTreeSet<AccessRight>,
) -> u32 {
    (mode_bits(owner) << 6) | (mode_bits(group) << 3) | mode_bits(other)
}

/// `setfacl` permission string. Without explicit execute, `X` keeps
/// directories traversable.
pub fn acl_permissions(rights: &BTreeSet<AccessRight>) -> String {
    let read = if rights.contains(&AccessRight::Read) { 'r' } else { '-' };
    let write = if rights.contains(&AccessRight::Write) { 'w' } else { '-' };
    let execute = if rights.contains(&AccessRight::Execute) { 'x' } else { 'X' };
    [read, write, execute].iter().collect()
}

fn acl_flags(default_list: bool, recursive: bool) -> Vec<String> {
    let mut flags = Vec::new();
    if default_list {
        flags.push("-d".to_string());
    }
    if recursive {
        flags.push("-R".to_string());
    }
    flags
}

/// Quote a string for the helper's shell-style `setfacl` argument line.
fn shell_escape(s: &str) -> String {
    if !s.is_empty()
        && s.chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == '.' || c == '/')
    {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\\''"))
    }
}
