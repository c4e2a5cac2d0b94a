use std::collections::BTreeSet;
use std::io::{Cursor, Write};
use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use fsbridge::protocol::{AccessRight, AttributeSet, FileAttribute};
use fsbridge::{AclEntity, BridgeConfig, FsResult, SessionManager};
use serde::Serialize;
use tokio::io::AsyncReadExt;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "fsbridge")]
#[command(about = "Run filesystem operations through the privileged storage helper")]
#[command(version)]
struct Cli {
    /// Config file path (optional)
    #[arg(short, long, env = "FSBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Cloud user to act as
    #[arg(short, long, env = "FSBRIDGE_USER")]
    user: String,

    /// Enable verbose logging
    #[arg(short, long, env = "FSBRIDGE_VERBOSE")]
    verbose: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// List a directory
    Ls {
        path: String,
        #[command(flatten)]
        attrs: AttrArgs,
    },
    /// List everything below a directory
    Tree {
        path: String,
        #[command(flatten)]
        attrs: AttrArgs,
    },
    /// Show metadata of one item
    Stat {
        path: String,
        #[command(flatten)]
        attrs: AttrArgs,
    },
    /// Create a directory
    Mkdir { path: String },
    /// Delete a file or directory tree
    Rm { path: String },
    /// Move or rename
    Mv {
        from: String,
        to: String,
        #[arg(long)]
        overwrite: bool,
    },
    /// Copy a file
    Cp {
        from: String,
        to: String,
        #[arg(long)]
        overwrite: bool,
    },
    /// Create a symbolic link at LINK pointing to TARGET
    Ln { target: String, link: String },
    /// Change permissions, MODE in octal (e.g. 750)
    Chmod { path: String, mode: String },
    /// Write a file's contents to stdout
    Cat {
        path: String,
        /// Inclusive byte range, START-END
        #[arg(long, value_parser = parse_range)]
        range: Option<(u64, u64)>,
    },
    /// Write stdin into a file
    Put {
        path: String,
        #[arg(long)]
        overwrite: bool,
    },
    /// Extended attributes
    Xattr {
        #[command(subcommand)]
        action: XattrCmd,
    },
    /// ACL entries
    Acl {
        #[command(subcommand)]
        action: AclCmd,
    },
    /// Show the owner of the home directory containing a path
    Owner { path: String },
}

#[derive(Subcommand, Debug)]
enum XattrCmd {
    Get { path: String, name: String },
    Set { path: String, name: String, value: String },
    List { path: String },
    Rm { path: String, name: String },
}

#[derive(Subcommand, Debug)]
enum AclCmd {
    /// Grant rights with setfacl -m
    Grant {
        path: String,
        #[command(flatten)]
        entity: EntityArgs,
        /// Any of r, w, x
        #[arg(long, default_value = "r")]
        rights: String,
        /// Edit the default ACL
        #[arg(long)]
        default: bool,
        /// Apply recursively
        #[arg(long)]
        recursive: bool,
    },
    /// Remove an entry with setfacl -x
    Revoke {
        path: String,
        #[command(flatten)]
        entity: EntityArgs,
        #[arg(long)]
        default: bool,
        #[arg(long)]
        recursive: bool,
    },
}

#[derive(Args, Debug)]
struct AttrArgs {
    /// Attributes to request, comma separated (e.g. FILE_TYPE,SIZE)
    #[arg(long, value_delimiter = ',', value_parser = parse_attribute)]
    attrs: Vec<FileAttribute>,
}

impl AttrArgs {
    fn set(&self) -> AttributeSet {
        if self.attrs.is_empty() {
            AttributeSet::from([
                FileAttribute::FileType,
                FileAttribute::UnixMode,
                FileAttribute::Owner,
                FileAttribute::Timestamps,
                FileAttribute::Path,
                FileAttribute::Size,
            ])
        } else {
            self.attrs.iter().copied().collect()
        }
    }
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct EntityArgs {
    /// Cloud user the entry is for
    #[arg(long = "for-user")]
    for_user: Option<String>,

    /// Unix group the entry is for
    #[arg(long = "for-group")]
    for_group: Option<String>,
}

impl EntityArgs {
    fn entity(&self) -> anyhow::Result<AclEntity> {
        match (&self.for_user, &self.for_group) {
            (Some(user), None) => Ok(AclEntity::User(user.clone())),
            (None, Some(group)) => Ok(AclEntity::Group(group.clone())),
            _ => bail!("exactly one of --for-user and --for-group is required"),
        }
    }
}

fn parse_attribute(s: &str) -> Result<FileAttribute, String> {
    FileAttribute::from_name(s.trim()).ok_or_else(|| format!("unknown attribute {s:?}"))
}

fn parse_range(s: &str) -> Result<(u64, u64), String> {
    let (start, end) = s
        .split_once('-')
        .ok_or_else(|| "expected START-END".to_string())?;
    let start = start.parse().map_err(|_| format!("invalid start {start:?}"))?;
    let end = end.parse().map_err(|_| format!("invalid end {end:?}"))?;
    if start > end {
        return Err("START must not exceed END".to_string());
    }
    Ok((start, end))
}

fn parse_rights(s: &str) -> anyhow::Result<BTreeSet<AccessRight>> {
    s.chars()
        .map(|c| match c {
            'r' => Ok(AccessRight::Read),
            'w' => Ok(AccessRight::Write),
            'x' => Ok(AccessRight::Execute),
            other => bail!("unknown right {other:?}"),
        })
        .collect()
}

fn rights_from_bits(bits: u32) -> BTreeSet<AccessRight> {
    let mut rights = BTreeSet::new();
    if bits & 4 != 0 {
        rights.insert(AccessRight::Read);
    }
    if bits & 2 != 0 {
        rights.insert(AccessRight::Write);
    }
    if bits & 1 != 0 {
        rights.insert(AccessRight::Execute);
    }
    rights
}

fn emit<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn checked<T>(result: FsResult<T>, what: &str) -> anyhow::Result<T> {
    result
        .into_result()
        .with_context(|| format!("{what} failed"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries command output
    let filter = if cli.verbose {
        "fsbridge=debug,fsbridge_protocol=debug"
    } else {
        "fsbridge=info,fsbridge_protocol=info"
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = if let Some(config_path) = &cli.config {
        BridgeConfig::from_file(config_path)
            .with_context(|| format!("loading config {}", config_path.display()))?
    } else {
        BridgeConfig::default()
    };
    debug!("Using helper {}", config.helper.program);

    let manager = SessionManager::new(config);
    let result = run(&manager, &cli.user, cli.command).await;
    manager.shutdown().await;
    result
}

async fn run(manager: &SessionManager, user: &str, command: Cmd) -> anyhow::Result<()> {
    match command {
        Cmd::Ls { path, attrs } => {
            let attributes = attrs.set();
            let result = manager
                .with_fs(user, move |fs| fs.list_directory(&path, attributes))
                .await?;
            emit(&checked(result, "ls")?)
        }
        Cmd::Tree { path, attrs } => {
            let attributes = attrs.set();
            let result = manager
                .with_fs(user, move |fs| fs.tree(&path, attributes))
                .await?;
            emit(&checked(result, "tree")?)
        }
        Cmd::Stat { path, attrs } => {
            let attributes = attrs.set();
            let result = manager
                .with_fs(user, move |fs| fs.stat(&path, attributes))
                .await?;
            if !result.is_ok() {
                return checked(result, "stat").map(|_| ());
            }
            emit(&result.into_item()?)
        }
        Cmd::Mkdir { path } => {
            let result = manager
                .with_fs(user, move |fs| fs.make_directory(&path))
                .await?;
            emit(&checked(result, "mkdir")?)
        }
        Cmd::Rm { path } => {
            let result = manager.with_fs(user, move |fs| fs.delete(&path)).await?;
            emit(&checked(result, "rm")?)
        }
        Cmd::Mv {
            from,
            to,
            overwrite,
        } => {
            let result = manager
                .with_fs(user, move |fs| fs.move_item(&from, &to, overwrite))
                .await?;
            emit(&checked(result, "mv")?)
        }
        Cmd::Cp {
            from,
            to,
            overwrite,
        } => {
            let result = manager
                .with_fs(user, move |fs| fs.copy(&from, &to, overwrite))
                .await?;
            emit(&checked(result, "cp")?)
        }
        Cmd::Ln { target, link } => {
            let result = manager
                .with_fs(user, move |fs| fs.create_symbolic_link(&target, &link))
                .await?;
            emit(&checked(result, "ln")?)
        }
        Cmd::Chmod { path, mode } => {
            let mode = u32::from_str_radix(&mode, 8)
                .ok()
                .filter(|m| *m <= 0o777)
                .with_context(|| format!("invalid mode {mode:?}"))?;
            let owner = rights_from_bits(mode >> 6);
            let group = rights_from_bits(mode >> 3);
            let other = rights_from_bits(mode);
            let result = manager
                .with_fs(user, move |fs| fs.chmod(&path, &owner, &group, &other))
                .await?;
            emit(&checked(result, "chmod")?)
        }
        Cmd::Cat { path, range } => {
            let range = range.map(|(start, end)| start..=end);
            let result = manager
                .with_fs(user, move |fs| {
                    let opened = fs.open_for_reading(&path)?;
                    if !opened.is_ok() {
                        return Ok(opened.map(|()| 0));
                    }
                    fs.read(range, |data| {
                        let mut out = std::io::stdout().lock();
                        let copied = std::io::copy(data, &mut out)?;
                        out.flush()?;
                        Ok(FsResult::new(0, copied))
                    })
                })
                .await?;
            checked(result, "cat")?;
            Ok(())
        }
        Cmd::Put { path, overwrite } => {
            let mut data = Vec::new();
            tokio::io::stdin()
                .read_to_end(&mut data)
                .await
                .context("reading stdin")?;
            let result = manager
                .with_fs(user, move |fs| {
                    let opened = fs.open_for_writing(&path, overwrite)?;
                    if !opened.is_ok() {
                        return Ok(opened);
                    }
                    fs.write(Cursor::new(data))
                })
                .await?;
            emit(&checked(result, "put")?)
        }
        Cmd::Xattr { action } => run_xattr(manager, user, action).await,
        Cmd::Acl { action } => run_acl(manager, user, action).await,
        Cmd::Owner { path } => {
            let owner = manager.owner_of(user, &path).await?;
            emit(&serde_json::json!({ "path": path, "owner": owner }))
        }
    }
}

async fn run_xattr(manager: &SessionManager, user: &str, action: XattrCmd) -> anyhow::Result<()> {
    match action {
        XattrCmd::Get { path, name } => {
            let result = manager
                .with_fs(user, move |fs| fs.get_extended_attribute(&path, &name))
                .await?;
            emit(&checked(result, "xattr get")?)
        }
        XattrCmd::Set { path, name, value } => {
            let result = manager
                .with_fs(user, move |fs| fs.set_extended_attribute(&path, &name, &value))
                .await?;
            checked(result, "xattr set")
        }
        XattrCmd::List { path } => {
            let result = manager
                .with_fs(user, move |fs| fs.list_extended_attributes(&path))
                .await?;
            emit(&checked(result, "xattr list")?)
        }
        XattrCmd::Rm { path, name } => {
            let result = manager
                .with_fs(user, move |fs| fs.delete_extended_attribute(&path, &name))
                .await?;
            checked(result, "xattr rm")
        }
    }
}

async fn run_acl(manager: &SessionManager, user: &str, action: AclCmd) -> anyhow::Result<()> {
    match action {
        AclCmd::Grant {
            path,
            entity,
            rights,
            default,
            recursive,
        } => {
            let rights = parse_rights(&rights)?;
            let target = entity.entity()?;
            let result = manager
                .with_fs(user, move |fs| {
                    fs.create_acl_entry(&path, &target, &rights, default, recursive)
                })
                .await?;
            checked(result, "acl grant")
        }
        AclCmd::Revoke {
            path,
            entity,
            default,
            recursive,
        } => {
            let target = entity.entity()?;
            let result = manager
                .with_fs(user, move |fs| fs.remove_acl_entry(&path, &target, default, recursive))
                .await?;
            checked(result, "acl revoke")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parses() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_range() {
        assert_eq!(parse_range("0-99"), Ok((0, 99)));
        assert!(parse_range("10-2").is_err());
        assert!(parse_range("10").is_err());
    }

    #[test]
    fn test_rights_from_mode_bits() {
        assert_eq!(
            rights_from_bits(0o7),
            BTreeSet::from([AccessRight::Read, AccessRight::Write, AccessRight::Execute])
        );
        assert_eq!(rights_from_bits(0o750 >> 3), BTreeSet::from([AccessRight::Read, AccessRight::Execute]));
        assert!(rights_from_bits(0).is_empty());
    }

    #[test]
    fn test_attr_args() {
        let cli = Cli::try_parse_from([
            "fsbridge", "--user", "alice", "ls", "/home/alice", "--attrs", "file_type,SIZE",
        ])
        .unwrap();
        let Cmd::Ls { attrs, .. } = cli.command else {
            panic!("expected ls");
        };
        assert_eq!(attrs.set().to_wire(), "1025");
    }

    #[test]
    fn test_acl_entity_is_required() {
        let parsed = Cli::try_parse_from(["fsbridge", "-u", "alice", "acl", "revoke", "/home/alice/x"]);
        assert!(parsed.is_err());
    }
}
