//! Wire protocol of the privileged filesystem helper.
//!
//! The helper speaks a half-duplex line protocol over its standard streams.
//! Requests are framed by a client boundary token, responses by a server
//! boundary token. This crate covers the byte level ([`kmp`], [`boundary`])
//! and the line level ([`decoder`], [`request`]); process handling lives in
//! the `fsbridge` crate.

pub mod attribute;
pub mod boundary;
pub mod decoder;
pub mod error;
pub mod kmp;
pub mod record;
pub mod request;

pub use attribute::{AttributeSet, FileAttribute};
pub use boundary::BoundaryReader;
pub use decoder::{
    AttributeDecoder, IdentityLookup, NumericIdentities, RecordListing, StatusResponse,
    collect_listing, parse_exit_line, read_status_response,
};
pub use error::{DecodeError, RequestError};
pub use kmp::Pattern;
pub use record::{
    AccessEntry, AccessRight, FileChecksum, FileRecord, FileType, ParseOutcome, SensitivityLevel,
    Timestamps,
};
pub use request::{Command, boundary_pattern, encode_header, encode_request};
