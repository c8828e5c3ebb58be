use crate::{
    error::Error,
    identity_db::{GroupEntry, IdentityDatabase, UserEntry},
};
use nix::{
    errno::Errno,
    unistd::{Gid, Uid},
};
use std::{
    collections::BTreeMap,
    io,
    path::{Path, PathBuf},
};

/// An identity database held in memory. Behaves like `groupadd`/`useradd` against
/// `/etc/group` and `/etc/passwd`: creating an entry whose id or name is taken fails.
#[derive(Debug, Default, Clone)]
pub struct MemoryIdentityDatabase {
    groups: BTreeMap<u32, GroupEntry>,
    users: BTreeMap<u32, UserEntry>,
    read_only: bool,
    unreadable: bool,
}

impl MemoryIdentityDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// A database seeded with the `root` user and group, like a fresh base image.
    pub fn with_root() -> Self {
        Self::new()
            .with_group("root", 0)
            .with_user("root", 0, 0, Some("/root"))
    }

    /// Creation fails with a permission error, as it would for a non-root process.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Every lookup fails with an I/O error, like an NSS backend that cannot be read.
    pub fn unreadable(mut self) -> Self {
        self.unreadable = true;
        self
    }

    pub fn with_group(mut self, name: &str, gid: u32) -> Self {
        self.groups.insert(
            gid,
            GroupEntry {
                gid: Gid::from_raw(gid),
                name: name.to_owned(),
            },
        );
        self
    }

    pub fn with_user(mut self, name: &str, uid: u32, gid: u32, home: Option<&str>) -> Self {
        self.users.insert(
            uid,
            UserEntry {
                uid: Uid::from_raw(uid),
                name: name.to_owned(),
                gid: Gid::from_raw(gid),
                home: home.map(PathBuf::from),
            },
        );
        self
    }

    pub fn groups(&self) -> impl Iterator<Item = &GroupEntry> {
        self.groups.values()
    }

    pub fn users(&self) -> impl Iterator<Item = &UserEntry> {
        self.users.values()
    }

    fn check_readable(&self, what: String) -> Result<(), Error> {
        if self.unreadable {
            return Err(Error::io(
                format!("failed to look up {what}"),
                io::Error::from(Errno::EIO),
            ));
        }
        Ok(())
    }

    fn check_writable(&self, what: &str) -> Result<(), Error> {
        if self.read_only {
            return Err(Error::permission(
                format!("cannot create {what}"),
                io::Error::from(io::ErrorKind::PermissionDenied),
            ));
        }
        Ok(())
    }
}

impl IdentityDatabase for MemoryIdentityDatabase {
    fn group_by_gid(&self, gid: Gid) -> Result<Option<GroupEntry>, Error> {
        self.check_readable(format!("GID {gid}"))?;
        Ok(self.groups.get(&gid.as_raw()).cloned())
    }

    fn group_by_name(&self, name: &str) -> Result<Option<GroupEntry>, Error> {
        self.check_readable(format!("group {name}"))?;
        Ok(self.groups.values().find(|group| group.name == name).cloned())
    }

    fn create_group(&mut self, name: &str, gid: Gid) -> Result<(), Error> {
        self.check_writable(&format!("group {name}"))?;
        if self.groups.contains_key(&gid.as_raw()) {
            return Err(Error::configuration(format!("GID {gid} is not unique")));
        }
        if self.group_by_name(name)?.is_some() {
            return Err(Error::configuration(format!("group '{name}' already exists")));
        }

        self.groups.insert(
            gid.as_raw(),
            GroupEntry {
                gid,
                name: name.to_owned(),
            },
        );
        Ok(())
    }

    fn user_by_uid(&self, uid: Uid) -> Result<Option<UserEntry>, Error> {
        self.check_readable(format!("UID {uid}"))?;
        Ok(self.users.get(&uid.as_raw()).cloned())
    }

    fn user_by_name(&self, name: &str) -> Result<Option<UserEntry>, Error> {
        self.check_readable(format!("user {name}"))?;
        Ok(self.users.values().find(|user| user.name == name).cloned())
    }

    fn create_user(&mut self, name: &str, uid: Uid, gid: Gid, home: &Path) -> Result<(), Error> {
        self.check_writable(&format!("user {name}"))?;
        if self.users.contains_key(&uid.as_raw()) {
            return Err(Error::configuration(format!("UID {uid} is not unique")));
        }
        if self.user_by_name(name)?.is_some() {
            return Err(Error::configuration(format!("user '{name}' already exists")));
        }
        if !self.groups.contains_key(&gid.as_raw()) {
            return Err(Error::configuration(format!("group {gid} does not exist")));
        }

        self.users.insert(
            uid.as_raw(),
            UserEntry {
                uid,
                name: name.to_owned(),
                gid,
                home: Some(home.to_owned()),
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn duplicate_ids_and_names_are_rejected() {
        let mut db = MemoryIdentityDatabase::with_root();

        let err = db.create_group("appgrp", Gid::from_raw(0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        let err = db.create_group("root", Gid::from_raw(100)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);

        let err = db
            .create_user("root", Uid::from_raw(1036), Gid::from_raw(0), Path::new("/home/root"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn user_requires_existing_primary_group() {
        let mut db = MemoryIdentityDatabase::new();
        let err = db
            .create_user(
                "appuser",
                Uid::from_raw(1036),
                Gid::from_raw(100),
                Path::new("/home/appuser"),
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn read_only_database_refuses_creation() {
        let mut db = MemoryIdentityDatabase::new().read_only();
        let err = db.create_group("appgrp", Gid::from_raw(100)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Permission);
        assert_eq!(db.groups().count(), 0);
    }
}
