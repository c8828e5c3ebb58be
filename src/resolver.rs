//! Binds the desired numeric uid/gid to entries in the identity database, creating
//! them on first run and reusing them on every run after.

use crate::{
    entrypoint_config::DesiredIdentity,
    error::{AtStep, Error, Step, StepError},
    identity_db::{GroupEntry, IdentityDatabase, UserEntry},
};
use nix::unistd::{Gid, Uid};
use std::path::PathBuf;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub desired: DesiredIdentity,
    /// Name given to the group if none is bound to the desired gid yet
    pub group_name: String,
    /// Name given to the user if none is bound to the desired uid yet
    pub user_name: String,
    pub home_root: PathBuf,
    /// Existing accounts with a uid in `1..=reserved_uid_max` are refused. 0 disables the check.
    pub reserved_uid_max: u32,
}

/// The identity the server will run as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub uid: Uid,
    pub gid: Gid,
    pub user_name: String,
    pub group_name: String,
    pub home: Option<PathBuf>,
}

pub fn resolve_identity<D>(db: &mut D, config: &ResolverConfig) -> Result<ResolvedIdentity, StepError>
where
    D: IdentityDatabase + ?Sized,
{
    let DesiredIdentity { uid, gid } = config.desired;

    info!("Resolving group for GID {gid}");
    let group = resolve_group(db, gid, &config.group_name).at(Step::ResolveGroup)?;

    info!("Resolving user for UID {uid}");
    let user = resolve_user(db, config).at(Step::ResolveUser)?;

    Ok(ResolvedIdentity {
        uid,
        gid,
        user_name: user.name,
        group_name: group.name,
        home: user.home,
    })
}

/// Binds the desired ids to entries that must already exist. Nothing is created.
pub fn lookup_identity<D>(db: &D, config: &ResolverConfig) -> Result<ResolvedIdentity, StepError>
where
    D: IdentityDatabase + ?Sized,
{
    let DesiredIdentity { uid, gid } = config.desired;

    let group = db
        .group_by_gid(gid)
        .and_then(|group| {
            group.ok_or_else(|| {
                Error::configuration(format!("no group is bound to GID {gid} in this image"))
            })
        })
        .at(Step::ResolveGroup)?;

    let user = db
        .user_by_uid(uid)
        .and_then(|user| {
            user.ok_or_else(|| {
                Error::configuration(format!("no user is bound to UID {uid} in this image"))
            })
        })
        .and_then(|user| check_not_reserved(&user, config.reserved_uid_max).map(|()| user))
        .at(Step::ResolveUser)?;
    debug!("UID {uid} is bound to {}, GID {gid} to {}", user.name, group.name);

    Ok(ResolvedIdentity {
        uid,
        gid,
        user_name: user.name,
        group_name: group.name,
        home: user.home,
    })
}

pub fn resolve_group<D>(db: &mut D, gid: Gid, name: &str) -> Result<GroupEntry, Error>
where
    D: IdentityDatabase + ?Sized,
{
    match db.group_by_gid(gid)? {
        Some(existing) => debug!("GID {gid} is already bound to group {}", existing.name),
        None => {
            if let Some(other) = db.group_by_name(name)? {
                return Err(Error::configuration(format!(
                    "group name '{name}' is already bound to GID {}, cannot bind it to GID {gid}",
                    other.gid
                )));
            }
            info!("Creating group {name} with GID {gid}");
            db.create_group(name, gid)?;
        }
    }

    // Re-query so both paths report whatever the database actually holds now.
    db.group_by_gid(gid)?.ok_or_else(|| {
        Error::configuration(format!("GID {gid} is still unbound after creating group '{name}'"))
    })
}

pub fn resolve_user<D>(db: &mut D, config: &ResolverConfig) -> Result<UserEntry, Error>
where
    D: IdentityDatabase + ?Sized,
{
    let DesiredIdentity { uid, gid } = config.desired;
    let name = config.user_name.as_str();

    match db.user_by_uid(uid)? {
        Some(existing) => {
            check_not_reserved(&existing, config.reserved_uid_max)?;
            debug!("UID {uid} is already bound to user {}", existing.name);
            if existing.gid != gid {
                warn!(
                    "User {} has primary GID {}, not {gid}; leaving its groups unchanged",
                    existing.name, existing.gid
                );
            }
        }
        None => {
            if let Some(other) = db.user_by_name(name)? {
                return Err(Error::configuration(format!(
                    "user name '{name}' is already bound to UID {}, cannot bind it to UID {uid}",
                    other.uid
                )));
            }
            let home = config.home_root.join(name);
            info!(
                "Creating user {name} with UID {uid}, GID {gid} and home {}",
                home.display()
            );
            db.create_user(name, uid, gid, &home)?;
        }
    }

    db.user_by_uid(uid)?.ok_or_else(|| {
        Error::configuration(format!("UID {uid} is still unbound after creating user '{name}'"))
    })
}

fn check_not_reserved(user: &UserEntry, reserved_uid_max: u32) -> Result<(), Error> {
    let uid = user.uid.as_raw();
    if uid != 0 && uid <= reserved_uid_max {
        return Err(Error::configuration(format!(
            "UID {uid} belongs to system account '{}'; pick a UID above {reserved_uid_max}, \
             or 0 to run as root explicitly",
            user.name
        )));
    }
    Ok(())
}
