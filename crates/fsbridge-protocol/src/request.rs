//! Command vocabulary and request framing.
//!
//! A request is the command name and each argument on its own line, an
//! optional raw payload, then the client boundary. The helper splits the
//! header on `\n`, so an argument carrying a newline would shift every frame
//! after it. Encoding refuses such arguments.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RequestError;
use crate::kmp::Pattern;

/// Commands understood by the helper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Command {
    ListDirectory,
    Read,
    ReadOpen,
    Stat,
    MakeDir,
    Delete,
    Move,
    Tree,
    Symlink,
    Setfacl,
    Copy,
    Write,
    WriteOpen,
    GetXattr,
    SetXattr,
    ListXattr,
    DeleteXattr,
    Chmod,
}

impl Command {
    pub const ALL: [Command; 18] = [
        Command::ListDirectory,
        Command::Read,
        Command::ReadOpen,
        Command::Stat,
        Command::MakeDir,
        Command::Delete,
        Command::Move,
        Command::Tree,
        Command::Symlink,
        Command::Setfacl,
        Command::Copy,
        Command::Write,
        Command::WriteOpen,
        Command::GetXattr,
        Command::SetXattr,
        Command::ListXattr,
        Command::DeleteXattr,
        Command::Chmod,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Command::ListDirectory => "list-directory",
            Command::Read => "read",
            Command::ReadOpen => "read-open",
            Command::Stat => "stat",
            Command::MakeDir => "make-dir",
            Command::Delete => "delete",
            Command::Move => "move",
            Command::Tree => "tree",
            Command::Symlink => "symlink",
            Command::Setfacl => "setfacl",
            Command::Copy => "copy",
            Command::Write => "write",
            Command::WriteOpen => "write-open",
            Command::GetXattr => "get-xattr",
            Command::SetXattr => "set-xattr",
            Command::ListXattr => "list-xattr",
            Command::DeleteXattr => "delete-xattr",
            Command::Chmod => "chmod",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| RequestError::InvalidCommand(s.to_string()))
    }
}

/// Encode the `<command>\n<arg>\n...` header of a request.
pub fn encode_header<S: AsRef<str>>(command: Command, args: &[S]) -> Result<Vec<u8>, RequestError> {
    let mut out = Vec::with_capacity(
        command.as_str().len() + 1 + args.iter().map(|a| a.as_ref().len() + 1).sum::<usize>(),
    );
    out.extend_from_slice(command.as_str().as_bytes());
    out.push(b'\n');
    for (index, arg) in args.iter().enumerate() {
        let arg = arg.as_ref();
        if arg.contains('\n') {
            return Err(RequestError::NewlineInArgument {
                command: command.as_str().to_string(),
                index,
            });
        }
        out.extend_from_slice(arg.as_bytes());
        out.push(b'\n');
    }
    tracing::trace!(command = %command, args = args.len(), "encoded request header");
    Ok(out)
}

/// Encode a complete request without payload, terminated by `boundary`.
pub fn encode_request<S: AsRef<str>>(
    command: Command,
    args: &[S],
    boundary: &[u8],
) -> Result<Vec<u8>, RequestError> {
    if boundary.is_empty() {
        return Err(RequestError::EmptyBoundary);
    }
    let mut out = encode_header(command, args)?;
    out.extend_from_slice(boundary);
    Ok(out)
}

/// Build the matcher for a boundary token.
pub fn boundary_pattern(token: &str) -> Result<Pattern, RequestError> {
    Pattern::new(token.as_bytes()).ok_or(RequestError::EmptyBoundary)
}
