//! Replaces the current process with the server command, running as the resolved identity.
//!
//! The strategy is process replacement (`execve`), never spawn-and-wait: on success
//! nothing of this process survives, and the server keeps our pid and standard streams.

use crate::{error::Error, resolver::ResolvedIdentity};
use nix::{
    errno::Errno,
    unistd::{
        execve, getegid, geteuid, getgid, getresgid, getresuid, getuid, setgroups, setresgid,
        setresuid, setuid, Gid, Uid,
    },
};
use std::{
    convert::Infallible,
    env,
    ffi::{CString, OsStr, OsString},
    fmt, fs, io,
    os::unix::{
        ffi::{OsStrExt, OsStringExt},
        fs::PermissionsExt,
    },
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};

const DEFAULT_SEARCH_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// The server invocation, `argv[0]` first.
#[derive(Debug, Clone)]
pub struct LaunchCommand {
    program: OsString,
    argv: Vec<CString>,
}

impl LaunchCommand {
    pub fn new(command: Vec<OsString>) -> Result<Self, Error> {
        let argv = command
            .iter()
            .map(|arg| CString::new(arg.as_bytes()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| Error::configuration("command arguments must not contain NUL bytes"))?;
        let program = command
            .into_iter()
            .next()
            .ok_or_else(|| Error::configuration("no command given"))?;

        Ok(Self { program, argv })
    }

    pub fn program(&self) -> &OsStr {
        &self.program
    }

    pub fn argv(&self) -> &[CString] {
        &self.argv
    }
}

impl fmt::Display for LaunchCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, arg) in self.argv.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            f.write_str(&arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// `launch` only returns on failure.
pub trait Launcher {
    fn launch(
        &self,
        identity: &ResolvedIdentity,
        command: &LaunchCommand,
    ) -> Result<Infallible, Error>;
}

#[derive(Debug, Default, Clone)]
pub struct ExecLauncher {
    search_path: Option<OsString>,
}

impl ExecLauncher {
    /// Look programs up in `search_path` instead of `$PATH`.
    pub fn with_search_path(search_path: impl Into<OsString>) -> Self {
        Self {
            search_path: Some(search_path.into()),
        }
    }
}

impl Launcher for ExecLauncher {
    fn launch(
        &self,
        identity: &ResolvedIdentity,
        command: &LaunchCommand,
    ) -> Result<Infallible, Error> {
        let search_path = self.search_path.clone().or_else(|| env::var_os("PATH"));
        // Resolve before dropping privileges, so a missing command never gets as far as
        // an identity change.
        let program = find_program(command.program(), search_path.as_deref())?;
        let path = CString::new(program.as_os_str().as_bytes()).map_err(|_| {
            Error::configuration(format!("{} contains a NUL byte", program.display()))
        })?;

        drop_privileges(identity)?;

        let env = target_environment(identity, env::vars_os());
        info!(
            "Running {command} as {}:{} ({}:{})",
            identity.user_name, identity.group_name, identity.uid, identity.gid
        );

        execve(&path, command.argv(), &env).map_err(|errno| {
            Error::exec(format!("failed to exec {}", program.display()), errno.into())
        })
    }
}

/// Finds `program` the way `execvp` would: names containing a slash are used as-is,
/// anything else is searched for in `search_path`.
pub fn find_program(program: &OsStr, search_path: Option<&OsStr>) -> Result<PathBuf, Error> {
    let shown = Path::new(program).display();
    if program.is_empty() {
        return Err(Error::exec(
            "empty command name",
            io::Error::from(io::ErrorKind::NotFound),
        ));
    }

    if program.as_bytes().contains(&b'/') {
        let path = PathBuf::from(program);
        return match is_executable(&path) {
            Some(true) => Ok(path),
            Some(false) => Err(Error::exec(
                format!("{shown} is not executable"),
                io::Error::from(io::ErrorKind::PermissionDenied),
            )),
            None => Err(Error::exec(
                format!("{shown} does not exist"),
                io::Error::from(io::ErrorKind::NotFound),
            )),
        };
    }

    let search_path = search_path.unwrap_or(OsStr::new(DEFAULT_SEARCH_PATH));
    let mut saw_non_executable = false;
    for dir in env::split_paths(search_path) {
        let dir = if dir.as_os_str().is_empty() {
            PathBuf::from(".")
        } else {
            dir
        };
        let candidate = dir.join(program);
        match is_executable(&candidate) {
            Some(true) => {
                debug!("Resolved {shown} to {}", candidate.display());
                return Ok(candidate);
            }
            Some(false) => saw_non_executable = true,
            None => {}
        }
    }

    if saw_non_executable {
        Err(Error::exec(
            format!("{shown} was found in PATH but is not executable"),
            io::Error::from(io::ErrorKind::PermissionDenied),
        ))
    } else {
        Err(Error::exec(
            format!("{shown} not found in PATH"),
            io::Error::from(io::ErrorKind::NotFound),
        ))
    }
}

/// `None` if nothing is there.
fn is_executable(path: &Path) -> Option<bool> {
    let metadata = fs::metadata(path).ok()?;
    Some(metadata.is_file() && metadata.permissions().mode() & 0o111 != 0)
}

/// Switches real, effective and saved ids to the target identity, with the target group
/// as the only supplementary group. Fails unless the switch is verified to be permanent.
pub fn drop_privileges(identity: &ResolvedIdentity) -> Result<(), Error> {
    let (uid, gid) = (identity.uid, identity.gid);

    if !geteuid().is_root() {
        if (getuid(), geteuid(), getgid(), getegid()) == (uid, uid, gid, gid) {
            debug!("Already running as {uid}:{gid}, no privileges to drop");
            return Ok(());
        }
        return Err(Error::permission(
            format!(
                "running as {}:{} without root, cannot switch to {uid}:{gid}",
                geteuid(),
                getegid()
            ),
            Errno::EPERM.into(),
        ));
    }

    clear_ambient_capabilities()?;

    debug!("Setting supplementary groups to [{gid}]");
    setgroups(&[gid]).map_err(switch_failed(format!("set supplementary groups to [{gid}]")))?;
    setresgid(gid, gid, gid).map_err(switch_failed(format!("set GID to {gid}")))?;
    setresuid(uid, uid, uid).map_err(switch_failed(format!("set UID to {uid}")))?;

    verify_dropped(uid, gid)
}

fn switch_failed(what: String) -> impl FnOnce(Errno) -> Error {
    move |errno| Error::permission(format!("failed to {what}"), errno.into())
}

fn clear_ambient_capabilities() -> Result<(), Error> {
    match capctl::ambient::clear() {
        Ok(()) => Ok(()),
        Err(err) if err.code() == Errno::EINVAL as i32 => {
            warn!("Ambient capabilities not supported: {err}");
            Ok(())
        }
        Err(err) => Err(Error::permission(
            "failed to clear ambient capabilities",
            io::Error::from_raw_os_error(err.code()),
        )),
    }
}

fn verify_dropped(uid: Uid, gid: Gid) -> Result<(), Error> {
    let still_privileged = |what: String| {
        Error::permission(
            format!("privileges were not dropped: {what}"),
            Errno::EPERM.into(),
        )
    };

    let uids = getresuid().map_err(switch_failed("read back UIDs".to_owned()))?;
    let gids = getresgid().map_err(switch_failed("read back GIDs".to_owned()))?;
    if (uids.real, uids.effective, uids.saved) != (uid, uid, uid) {
        return Err(still_privileged(format!(
            "UIDs are {}/{}/{}",
            uids.real, uids.effective, uids.saved
        )));
    }
    if (gids.real, gids.effective, gids.saved) != (gid, gid, gid) {
        return Err(still_privileged(format!(
            "GIDs are {}/{}/{}",
            gids.real, gids.effective, gids.saved
        )));
    }

    if uid.is_root() {
        debug!("Target is root, keeping capabilities");
        return Ok(());
    }

    let caps = capctl::CapState::get_current().map_err(|err| {
        Error::permission(
            "failed to read capabilities",
            io::Error::from_raw_os_error(err.code()),
        )
    })?;
    if !caps.permitted.is_empty() || !caps.effective.is_empty() {
        return Err(still_privileged(format!(
            "capabilities {:?} are still permitted",
            caps.permitted
        )));
    }
    if setuid(Uid::from_raw(0)).is_ok() {
        return Err(still_privileged("able to regain UID 0".to_owned()));
    }

    debug!("Dropped to {uid}:{gid}");
    Ok(())
}

/// The inherited environment, with `HOME`, `USER` and `LOGNAME` describing the target account.
pub fn target_environment<I>(identity: &ResolvedIdentity, vars: I) -> Vec<CString>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    let home = identity
        .home
        .clone()
        .unwrap_or_else(|| PathBuf::from("/"))
        .into_os_string();
    let user = OsString::from(&identity.user_name);
    let overrides = [
        (OsString::from("HOME"), home),
        (OsString::from("USER"), user.clone()),
        (OsString::from("LOGNAME"), user),
    ];

    vars.into_iter()
        .filter(|(key, _)| !overrides.iter().any(|(name, _)| name == key))
        .chain(overrides.iter().cloned())
        .filter_map(|(key, value)| {
            let mut entry = key.into_vec();
            entry.push(b'=');
            entry.extend(value.into_vec());
            CString::new(entry).ok()
        })
        .collect()
}
