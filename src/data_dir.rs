use crate::error::Error;
use nix::unistd::{Gid, Uid};
use std::{
    fs, io,
    os::unix::fs::{chown, lchown},
    path::Path,
};
use tracing::{debug, info, trace};
use walkdir::{DirEntry, WalkDir};

/// Creates `path` if needed and makes `uid:gid` own it and everything beneath it.
///
/// Ownership is rewritten on every call, not just on creation. If `path` itself is a
/// symlink (e.g. to a mounted volume) it is followed; symlinks beneath it are re-owned
/// themselves and never followed. Returns the number of entries visited.
pub fn provision_data_dir(path: &Path, uid: Uid, gid: Gid) -> Result<usize, Error> {
    debug!("Ensuring data directory {} exists", path.display());
    fs::create_dir_all(path)
        .map_err(|err| Error::io(format!("failed to create {}", path.display()), err))?;

    let metadata = fs::metadata(path)
        .map_err(|err| Error::io(format!("failed to stat {}", path.display()), err))?;
    if !metadata.is_dir() {
        return Err(Error::Filesystem {
            context: format!("{} exists but is not a directory", path.display()),
            source: io::Error::from(io::ErrorKind::AlreadyExists),
        });
    }

    let mut count = 0;
    for entry in WalkDir::new(path).follow_links(false) {
        let entry = entry.map_err(|err| {
            let context = format!("failed to read {}", err.path().unwrap_or(path).display());
            Error::io(context, err.into())
        })?;
        chown_entry(&entry, uid, gid)?;
        count += 1;
    }

    info!("Data directory {} owned by {uid}:{gid} ({count} entries)", path.display());
    Ok(count)
}

fn chown_entry(entry: &DirEntry, uid: Uid, gid: Gid) -> Result<(), Error> {
    let path = entry.path();
    let (owner, group) = (Some(uid.as_raw()), Some(gid.as_raw()));
    let failed = |err: io::Error| Error::io(format!("failed to chown {}", path.display()), err);

    trace!("chown {uid}:{gid} {}", path.display());
    if entry.depth() == 0 && entry.path_is_symlink() {
        chown(path, owner, group).map_err(failed)?;
    }
    lchown(path, owner, group).map_err(failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use nix::unistd::{getegid, geteuid};
    use std::os::unix::fs::{symlink, MetadataExt};

    fn assert_owned(path: &Path, uid: Uid, gid: Gid) {
        let metadata = fs::symlink_metadata(path).unwrap();
        assert_eq!(metadata.uid(), uid.as_raw(), "{}", path.display());
        assert_eq!(metadata.gid(), gid.as_raw(), "{}", path.display());
    }

    #[test]
    fn creates_missing_parents_and_owns_contents() {
        let root = tempfile::tempdir().unwrap();
        let data = root.path().join("app").join("data");
        let (uid, gid) = (geteuid(), getegid());

        assert_eq!(provision_data_dir(&data, uid, gid).unwrap(), 1);
        assert!(data.is_dir());

        fs::create_dir(data.join("backups")).unwrap();
        fs::write(data.join("zodiac.db"), b"").unwrap();
        fs::write(data.join("backups").join("zodiac.db.1"), b"").unwrap();
        symlink("/nonexistent", data.join("dangling")).unwrap();

        let count = provision_data_dir(&data, uid, gid).unwrap();

        assert_eq!(count, 5);
        for path in [
            data.clone(),
            data.join("backups"),
            data.join("zodiac.db"),
            data.join("backups").join("zodiac.db.1"),
            data.join("dangling"),
        ] {
            assert_owned(&path, uid, gid);
        }
    }

    #[test]
    fn symlinked_data_dir_is_followed_at_the_root_only() {
        let root = tempfile::tempdir().unwrap();
        let volume = root.path().join("volume");
        let outside = root.path().join("outside");
        fs::create_dir(&volume).unwrap();
        fs::create_dir(&outside).unwrap();
        fs::write(volume.join("zodiac.db"), b"").unwrap();
        fs::write(outside.join("untouched"), b"").unwrap();
        symlink(&outside, volume.join("elsewhere")).unwrap();
        let data = root.path().join("data");
        symlink(&volume, &data).unwrap();

        let (uid, gid) = if geteuid().is_root() {
            (Uid::from_raw(1036), Gid::from_raw(100))
        } else {
            (geteuid(), getegid())
        };
        let before = fs::metadata(outside.join("untouched")).unwrap();

        let count = provision_data_dir(&data, uid, gid).unwrap();

        assert_eq!(count, 3);
        assert_owned(&volume, uid, gid);
        assert_owned(&volume.join("zodiac.db"), uid, gid);
        assert_owned(&volume.join("elsewhere"), uid, gid);
        let after = fs::metadata(outside.join("untouched")).unwrap();
        assert_eq!((after.uid(), after.gid()), (before.uid(), before.gid()));
    }

    #[test]
    fn regular_file_in_place_of_directory_is_fatal() {
        let root = tempfile::tempdir().unwrap();
        let data = root.path().join("data");
        fs::write(&data, b"not a directory").unwrap();

        let err = provision_data_dir(&data, geteuid(), getegid()).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Filesystem);
    }

    #[test]
    fn chown_to_foreign_owner_without_root_is_a_permission_error() {
        if geteuid().is_root() {
            return;
        }
        let root = tempfile::tempdir().unwrap();

        let err = provision_data_dir(root.path(), Uid::from_raw(0), Gid::from_raw(0)).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Permission);
    }
}
