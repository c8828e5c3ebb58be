//! The identity database capability: lookups and creation of user and group entries.
//!
//! [`SystemIdentityDatabase`] reads through NSS (`getpwuid_r` and friends, via nix) and
//! creates entries with the shadow-utils `groupadd`/`useradd` tools. Tests use
//! [`MemoryIdentityDatabase`](crate::memory_db::MemoryIdentityDatabase) instead.

use crate::error::Error;
use nix::unistd::{Gid, Group, Uid, User};
use std::{
    ffi::OsStr,
    io,
    path::{Path, PathBuf},
    process::{Command, Output},
};
use tracing::{debug, trace};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupEntry {
    pub gid: Gid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserEntry {
    pub uid: Uid,
    pub name: String,
    /// Primary group
    pub gid: Gid,
    pub home: Option<PathBuf>,
}

impl From<Group> for GroupEntry {
    fn from(group: Group) -> Self {
        Self {
            gid: group.gid,
            name: group.name,
        }
    }
}

impl From<User> for UserEntry {
    fn from(user: User) -> Self {
        let home = (!user.dir.as_os_str().is_empty()).then_some(user.dir);
        Self {
            uid: user.uid,
            name: user.name,
            gid: user.gid,
            home,
        }
    }
}

/// Users and groups live in separate namespaces, each keyed by numeric id.
///
/// Lookups must not cache: the resolver re-queries after creating an entry and expects
/// to see it.
pub trait IdentityDatabase {
    fn group_by_gid(&self, gid: Gid) -> Result<Option<GroupEntry>, Error>;

    fn group_by_name(&self, name: &str) -> Result<Option<GroupEntry>, Error>;

    fn create_group(&mut self, name: &str, gid: Gid) -> Result<(), Error>;

    fn user_by_uid(&self, uid: Uid) -> Result<Option<UserEntry>, Error>;

    fn user_by_name(&self, name: &str) -> Result<Option<UserEntry>, Error>;

    /// Creates the user along with its home directory.
    fn create_user(&mut self, name: &str, uid: Uid, gid: Gid, home: &Path) -> Result<(), Error>;
}

#[derive(Debug, Clone)]
pub struct SystemIdentityDatabase {
    groupadd: PathBuf,
    useradd: PathBuf,
}

impl Default for SystemIdentityDatabase {
    fn default() -> Self {
        Self {
            groupadd: PathBuf::from("groupadd"),
            useradd: PathBuf::from("useradd"),
        }
    }
}

// Exit codes shared by groupadd(8) and useradd(8).
const EXIT_CANT_UPDATE_PASSWD: i32 = 1;
const EXIT_ID_IN_USE: i32 = 4;
const EXIT_NAME_IN_USE: i32 = 9;
const EXIT_CANT_UPDATE_GROUP: i32 = 10;

impl SystemIdentityDatabase {
    pub fn with_tools(groupadd: impl Into<PathBuf>, useradd: impl Into<PathBuf>) -> Self {
        Self {
            groupadd: groupadd.into(),
            useradd: useradd.into(),
        }
    }

    fn run_tool<I, S>(tool: &Path, args: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = Command::new(tool);
        command.args(args);
        debug!("Running {command:?}");

        let output = command.output().map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => Error::configuration(format!(
                "{} is not installed in this image",
                tool.display()
            )),
            _ => Error::io(format!("failed to spawn {}", tool.display()), err),
        })?;

        if output.status.success() {
            return Ok(());
        }
        Err(tool_failure(tool, &output))
    }
}

fn tool_failure(tool: &Path, output: &Output) -> Error {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    trace!("{} stderr: {stderr}", tool.display());

    let context = format!("{} exited with {}", tool.display(), output.status);
    match output.status.code() {
        Some(EXIT_ID_IN_USE | EXIT_NAME_IN_USE) => {
            Error::configuration(format!("{context}: {stderr}"))
        }
        Some(EXIT_CANT_UPDATE_PASSWD | EXIT_CANT_UPDATE_GROUP) => Error::permission(
            context,
            io::Error::new(io::ErrorKind::PermissionDenied, stderr.to_owned()),
        ),
        _ => Error::permission(context, io::Error::new(io::ErrorKind::Other, stderr.to_owned())),
    }
}

fn lookup_failed(what: String) -> impl FnOnce(nix::Error) -> Error {
    move |errno| Error::io(format!("failed to look up {what}"), errno.into())
}

impl IdentityDatabase for SystemIdentityDatabase {
    fn group_by_gid(&self, gid: Gid) -> Result<Option<GroupEntry>, Error> {
        let group = Group::from_gid(gid).map_err(lookup_failed(format!("GID {gid}")))?;
        Ok(group.map(GroupEntry::from))
    }

    fn group_by_name(&self, name: &str) -> Result<Option<GroupEntry>, Error> {
        let group = Group::from_name(name).map_err(lookup_failed(format!("group {name}")))?;
        Ok(group.map(GroupEntry::from))
    }

    fn create_group(&mut self, name: &str, gid: Gid) -> Result<(), Error> {
        let gid = gid.to_string();
        Self::run_tool(&self.groupadd, ["--gid", gid.as_str(), name])
    }

    fn user_by_uid(&self, uid: Uid) -> Result<Option<UserEntry>, Error> {
        let user = User::from_uid(uid).map_err(lookup_failed(format!("UID {uid}")))?;
        Ok(user.map(UserEntry::from))
    }

    fn user_by_name(&self, name: &str) -> Result<Option<UserEntry>, Error> {
        let user = User::from_name(name).map_err(lookup_failed(format!("user {name}")))?;
        Ok(user.map(UserEntry::from))
    }

    fn create_user(&mut self, name: &str, uid: Uid, gid: Gid, home: &Path) -> Result<(), Error> {
        let uid = uid.to_string();
        let gid = gid.to_string();
        Self::run_tool(
            &self.useradd,
            [
                OsStr::new("--uid"),
                OsStr::new(&uid),
                OsStr::new("--gid"),
                OsStr::new(&gid),
                OsStr::new("--no-user-group"),
                OsStr::new("--create-home"),
                OsStr::new("--home-dir"),
                home.as_os_str(),
                OsStr::new(name),
            ],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use nix::unistd::{getgid, getuid};
    use std::{os::unix::process::ExitStatusExt, process::ExitStatus};

    #[test]
    fn root_entries_resolve_through_nss() {
        let db = SystemIdentityDatabase::default();
        let root = db.user_by_uid(Uid::from_raw(0)).unwrap().unwrap();
        assert_eq!(root.uid, Uid::from_raw(0));
        assert_eq!(
            db.user_by_name(&root.name).unwrap().map(|user| user.uid),
            Some(root.uid)
        );

        let root_group = db.group_by_gid(Gid::from_raw(0)).unwrap().unwrap();
        assert_eq!(root_group.gid, Gid::from_raw(0));
    }

    #[test]
    fn unknown_names_are_absent() {
        let db = SystemIdentityDatabase::default();
        assert_eq!(db.user_by_name("dropin-no-such-user").unwrap(), None);
        assert_eq!(db.group_by_name("dropin-no-such-group").unwrap(), None);
    }

    fn output(code: i32) -> Output {
        Output {
            status: ExitStatus::from_raw(code << 8),
            stdout: Vec::new(),
            stderr: b"groupadd: group 'appgrp' already exists\n".to_vec(),
        }
    }

    #[test]
    fn tool_exit_codes_map_to_error_kinds() {
        let tool = Path::new("groupadd");
        assert_eq!(
            tool_failure(tool, &output(EXIT_NAME_IN_USE)).kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            tool_failure(tool, &output(EXIT_ID_IN_USE)).kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            tool_failure(tool, &output(EXIT_CANT_UPDATE_GROUP)).kind(),
            ErrorKind::Permission
        );
    }

    #[test]
    fn failing_tool_is_reported() {
        let mut db = SystemIdentityDatabase::with_tools("false", "false");
        let err = db
            .create_user("appuser", getuid(), getgid(), Path::new("/home/appuser"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Permission);
    }

    #[test]
    fn missing_tool_is_a_configuration_error() {
        let mut db = SystemIdentityDatabase::with_tools(
            "/nonexistent/groupadd",
            "/nonexistent/useradd",
        );
        let err = db.create_group("appgrp", Gid::from_raw(4242)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
