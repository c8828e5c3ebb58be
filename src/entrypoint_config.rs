use crate::{
    cli::Args,
    error::{AtStep, Error, Step, StepError},
    launcher::LaunchCommand,
    resolver::ResolverConfig,
};
use nix::unistd::{Gid, Uid};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DesiredIdentity {
    pub uid: Uid,
    pub gid: Gid,
}

impl DesiredIdentity {
    pub fn new(uid: u32, gid: u32) -> Self {
        Self {
            uid: Uid::from_raw(uid),
            gid: Gid::from_raw(gid),
        }
    }

    pub fn parse(uid: &str, gid: &str) -> Result<Self, Error> {
        Ok(Self::new(parse_id("UID", uid)?, parse_id("GID", gid)?))
    }
}

fn parse_id(what: &str, value: &str) -> Result<u32, Error> {
    value.trim().parse().map_err(|_| {
        Error::configuration(format!("{what} {value:?} is not a non-negative integer"))
    })
}

#[derive(Debug, Clone)]
pub struct EntrypointConfig {
    pub resolver: ResolverConfig,
    pub data_dir: PathBuf,
    pub command: LaunchCommand,
    /// When false the image is assumed to ship its runtime user already.
    pub provision: bool,
}

impl EntrypointConfig {
    pub fn new(args: Args) -> Result<Self, StepError> {
        Self::from_args(args).at(Step::Configure)
    }

    fn from_args(
        Args {
            uid,
            gid,
            data_dir,
            user_name,
            group_name,
            home_root,
            reserved_uid_max,
            no_provision,
            command,
        }: Args,
    ) -> Result<Self, Error> {
        let desired = DesiredIdentity::parse(&uid, &gid)?;
        if user_name.is_empty() || group_name.is_empty() {
            return Err(Error::configuration("user and group names must not be empty"));
        }

        Ok(Self {
            resolver: ResolverConfig {
                desired,
                group_name,
                user_name,
                home_root,
                reserved_uid_max,
            },
            data_dir,
            command: LaunchCommand::new(command)?,
            provision: !no_provision,
        })
    }
}
