//! Line-oriented decoding of helper responses into [`FileRecord`]s.
//!
//! Each item of a response is a run of value lines, one run per requested
//! attribute in ordinal order. Most attributes take one line; `TIMESTAMPS`
//! takes three, `CHECKSUM` two, and `SHARES` a count line followed by two lines
//! per entry. An `EXIT:<code>` line in place of any value line, including the
//! continuation lines of those attributes, ends the item early.

use std::io::{self, BufRead};

use crate::attribute::{AttributeSet, FileAttribute};
use crate::error::DecodeError;
use crate::record::{
    AccessEntry, FileChecksum, FileRecord, FileType, ParseOutcome, SensitivityLevel, Timestamps,
};

pub const EXIT_PREFIX: &str = "EXIT:";

/// Reverse lookup from numeric ids to the names callers should see.
pub trait IdentityLookup {
    /// Name for a numeric user id, `None` if the id is unknown.
    fn user_name(&self, uid: u32) -> Option<String>;

    /// Name for a numeric group id. Defaults to the number itself.
    fn group_name(&self, gid: u32) -> Option<String> {
        Some(gid.to_string())
    }
}

impl<T: IdentityLookup + ?Sized> IdentityLookup for std::sync::Arc<T> {
    fn user_name(&self, uid: u32) -> Option<String> {
        (**self).user_name(uid)
    }

    fn group_name(&self, gid: u32) -> Option<String> {
        (**self).group_name(gid)
    }
}

/// Leaves ids numeric.
#[derive(Debug, Clone, Copy, Default)]
pub struct NumericIdentities;

impl IdentityLookup for NumericIdentities {
    fn user_name(&self, uid: u32) -> Option<String> {
        Some(uid.to_string())
    }
}

/// Parse `EXIT:<code>`. Returns `Ok(None)` for any other line.
pub fn parse_exit_line(value: &str, line: usize) -> Result<Option<i32>, DecodeError> {
    let Some(code) = value.strip_prefix(EXIT_PREFIX) else {
        return Ok(None);
    };
    code.trim()
        .parse()
        .map(Some)
        .map_err(|_| DecodeError::InvalidExit {
            line,
            value: value.to_string(),
        })
}

/// Why decoding of the current item stopped.
enum Interrupt {
    Exit(i32),
    Error(DecodeError),
}

impl From<DecodeError> for Interrupt {
    fn from(e: DecodeError) -> Self {
        Interrupt::Error(e)
    }
}

/// Lazy, single-use decoder over one response.
///
/// Yields one [`ParseOutcome`] per item. The sequence ends when the line
/// source runs out between items; running out in the middle of an item is a
/// [`DecodeError::Incomplete`]. After an error the decoder yields nothing more.
pub struct AttributeDecoder<'a, L, I: ?Sized> {
    lines: L,
    attributes: AttributeSet,
    identities: &'a I,
    line: usize,
    finished: bool,
}

impl<'a, R, I> AttributeDecoder<'a, io::Lines<R>, I>
where
    R: BufRead,
    I: IdentityLookup + ?Sized,
{
    pub fn from_reader(reader: R, attributes: AttributeSet, identities: &'a I) -> Self {
        Self::new(reader.lines(), attributes, identities)
    }
}

impl<'a, L, I> AttributeDecoder<'a, L, I>
where
    L: Iterator<Item = io::Result<String>>,
    I: IdentityLookup + ?Sized,
{
    pub fn new(lines: L, attributes: AttributeSet, identities: &'a I) -> Self {
        Self {
            lines,
            attributes,
            identities,
            line: 0,
            finished: false,
        }
    }

    /// Count line numbers as if `consumed` lines of the response had already
    /// been read by someone else.
    pub fn with_line_offset(mut self, consumed: usize) -> Self {
        self.line = consumed;
        self
    }

    /// Number of physical lines consumed so far.
    pub fn line_number(&self) -> usize {
        self.line
    }

    fn next_line(&mut self) -> Result<Option<String>, DecodeError> {
        match self.lines.next() {
            Some(Ok(value)) => {
                self.line += 1;
                Ok(Some(value))
            }
            Some(Err(e)) => Err(DecodeError::Io(e)),
            None => Ok(None),
        }
    }

    /// Continuation line of a multi-line attribute.
    fn require_line(&mut self, attribute: FileAttribute) -> Result<String, Interrupt> {
        let value = self.next_line()?.ok_or(DecodeError::Incomplete {
            line: self.line + 1,
            attribute,
        })?;
        match parse_exit_line(&value, self.line)? {
            Some(code) => Err(Interrupt::Exit(code)),
            None => Ok(value),
        }
    }

    fn decode_item(&mut self) -> Result<Option<ParseOutcome>, DecodeError> {
        if self.attributes.is_empty() {
            return self.decode_exit_only();
        }

        let mut record = FileRecord::default();
        let mut consumed = 0;
        let attributes = self.attributes;
        for attribute in attributes.iter() {
            let Some(value) = self.next_line()? else {
                if consumed == 0 {
                    return Ok(None);
                }
                return Err(DecodeError::Incomplete {
                    line: self.line + 1,
                    attribute,
                });
            };

            if let Some(code) = parse_exit_line(&value, self.line)? {
                return Ok(Some(ParseOutcome::Exit(code)));
            }

            match self.decode_attribute(attribute, value, &mut record) {
                Ok(()) => consumed += 1,
                Err(Interrupt::Exit(code)) => return Ok(Some(ParseOutcome::Exit(code))),
                Err(Interrupt::Error(e)) => return Err(e),
            }
        }

        Ok(Some(ParseOutcome::Record(record)))
    }

    // With nothing requested every item is just a status line.
    fn decode_exit_only(&mut self) -> Result<Option<ParseOutcome>, DecodeError> {
        let Some(value) = self.next_line()? else {
            return Ok(None);
        };
        match parse_exit_line(&value, self.line)? {
            Some(code) => Ok(Some(ParseOutcome::Exit(code))),
            None => Err(DecodeError::UnexpectedLine {
                line: self.line,
                value,
            }),
        }
    }

    fn decode_attribute(
        &mut self,
        attribute: FileAttribute,
        value: String,
        record: &mut FileRecord,
    ) -> Result<(), Interrupt> {
        match attribute {
            FileAttribute::FileType => {
                let file_type = FileType::from_wire(&value);
                record.file_type = Some(self.valid(attribute, value, file_type)?);
            }
            FileAttribute::IsLink => {
                let flag = match value.as_str() {
                    "1" => Some(true),
                    "0" => Some(false),
                    _ => None,
                };
                record.is_link = Some(self.valid(attribute, value, flag)?);
            }
            FileAttribute::LinkTarget => record.link_target = Some(value),
            FileAttribute::UnixMode => record.unix_mode = Some(self.number(attribute, value)?),
            FileAttribute::Owner => {
                let uid = self.number(attribute, value)?;
                let name = self.identities.user_name(uid);
                record.owner = Some(self.resolved(uid, name)?);
            }
            FileAttribute::Group => {
                let gid = self.number(attribute, value)?;
                let name = self.identities.group_name(gid);
                record.group = Some(self.resolved(gid, name)?);
            }
            FileAttribute::Timestamps => {
                let accessed = self.number(attribute, value)?;
                let created = self.require_line(attribute)?;
                let created = self.number(attribute, created)?;
                let modified = self.require_line(attribute)?;
                let modified = self.number(attribute, modified)?;
                record.timestamps = Some(Timestamps {
                    accessed,
                    created,
                    modified,
                });
            }
            FileAttribute::Path => record.path = Some(value),
            FileAttribute::RawPath => record.raw_path = Some(value),
            FileAttribute::Inode => record.inode = Some(value),
            FileAttribute::Size => record.size = Some(self.number(attribute, value)?),
            FileAttribute::Shares => {
                let count: usize = self.number(attribute, value)?;
                let mut shares = Vec::with_capacity(count.min(64));
                for _ in 0..count {
                    let entity = self.require_line(attribute)?;
                    let mask = self.require_line(attribute)?;
                    let mask: u32 = self.number(attribute, mask)?;
                    shares.push(AccessEntry::from_mask(entity, mask));
                }
                record.shares = Some(shares);
            }
            FileAttribute::Annotations => record.annotations = Some(value.chars().collect()),
            FileAttribute::Checksum => {
                let algorithm = self.require_line(attribute)?;
                record.checksum = Some(FileChecksum {
                    checksum: value,
                    algorithm,
                });
            }
            FileAttribute::Sensitivity => {
                record.sensitivity = Some(SensitivityLevel::from_wire(&value));
            }
            FileAttribute::LinkInode => record.link_inode = Some(value),
            FileAttribute::XOwner => record.xowner = Some(value),
        }
        Ok(())
    }

    fn valid<T>(
        &self,
        attribute: FileAttribute,
        value: String,
        parsed: Option<T>,
    ) -> Result<T, DecodeError> {
        parsed.ok_or(DecodeError::InvalidValue {
            line: self.line,
            attribute,
            value,
        })
    }

    fn number<T: std::str::FromStr>(
        &self,
        attribute: FileAttribute,
        value: String,
    ) -> Result<T, DecodeError> {
        let parsed = value.parse().ok();
        self.valid(attribute, value, parsed)
    }

    fn resolved(&self, id: u32, name: Option<String>) -> Result<String, DecodeError> {
        name.ok_or(DecodeError::UnresolvedIdentity {
            line: self.line,
            id,
        })
    }
}

impl<L, I> Iterator for AttributeDecoder<'_, L, I>
where
    L: Iterator<Item = io::Result<String>>,
    I: IdentityLookup + ?Sized,
{
    type Item = Result<ParseOutcome, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.decode_item() {
            Ok(Some(outcome)) => Some(Ok(outcome)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                tracing::debug!("attribute decoding failed: {}", e);
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

/// Records of a response followed by its final status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordListing {
    pub records: Vec<FileRecord>,
    /// Per-item `EXIT:` codes that were not the last outcome.
    pub item_failures: Vec<i32>,
    pub status: i32,
}

/// Drain a decoder into a [`RecordListing`].
///
/// The last outcome must be an `EXIT:` line; it becomes the status.
pub fn collect_listing<L, I>(decoder: AttributeDecoder<'_, L, I>) -> Result<RecordListing, DecodeError>
where
    L: Iterator<Item = io::Result<String>>,
    I: IdentityLookup + ?Sized,
{
    let mut listing = RecordListing::default();
    let mut last_exit = None;
    let mut decoder = decoder;
    for outcome in decoder.by_ref() {
        match outcome? {
            ParseOutcome::Record(record) => {
                if let Some(code) = last_exit.take() {
                    listing.item_failures.push(code);
                }
                listing.records.push(record);
            }
            ParseOutcome::Exit(code) => {
                if let Some(previous) = last_exit.replace(code) {
                    listing.item_failures.push(previous);
                }
            }
        }
    }
    let line = decoder.line_number() + 1;
    listing.status = last_exit.ok_or(DecodeError::MissingExit { line })?;
    Ok(listing)
}

/// A response made of free-form lines and a trailing `EXIT:` line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusResponse {
    pub lines: Vec<String>,
    pub status: i32,
}

/// Read a status-terminated response. The last `EXIT:` line wins.
pub fn read_status_response<L>(lines: L) -> Result<StatusResponse, DecodeError>
where
    L: Iterator<Item = io::Result<String>>,
{
    let mut response = StatusResponse::default();
    let mut status = None;
    let mut count = 0;
    for value in lines {
        let value = value?;
        count += 1;
        match parse_exit_line(&value, count)? {
            Some(code) => status = Some(code),
            None => response.lines.push(value),
        }
    }
    response.status = status.ok_or(DecodeError::MissingExit { line: count + 1 })?;
    Ok(response)
}
