use clap::Parser;
use std::{ffi::OsString, path::PathBuf};

/// Provision the runtime user, own the data directory, then exec COMMAND as that user.
#[derive(Debug, Parser)]
#[clap(version, about)]
pub struct Args {
    /// Numeric user ID to run the command as
    #[clap(long, env = "PUID", default_value = "1036")]
    pub(super) uid: String,

    /// Numeric group ID to run the command as
    #[clap(long, env = "PGID", default_value = "100")]
    pub(super) gid: String,

    /// Persistent data directory, created and owned by UID:GID
    #[clap(long, env = "DATA_DIR", default_value = "/app/data")]
    pub(super) data_dir: PathBuf,

    /// Name for the user if UID is not bound yet
    #[clap(long, env = "APP_USER", default_value = "appuser")]
    pub(super) user_name: String,

    /// Name for the group if GID is not bound yet
    #[clap(long, env = "APP_GROUP", default_value = "appgrp")]
    pub(super) group_name: String,

    /// Directory under which a created user's home directory is placed
    #[clap(long, env = "HOME_ROOT", default_value = "/home")]
    pub(super) home_root: PathBuf,

    /// Refuse to reuse existing accounts with a UID from 1 up to this value
    #[clap(long, env = "RESERVED_UID_MAX", default_value_t = 999)]
    pub(super) reserved_uid_max: u32,

    /// Skip account creation and data directory provisioning; the desired ids must already exist
    #[clap(long, env = "SKIP_PROVISIONING")]
    pub(super) no_provision: bool,

    /// Command to execute, with its arguments
    #[clap(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub(super) command: Vec<OsString>,
}
