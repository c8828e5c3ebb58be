use crate::{
    data_dir::provision_data_dir,
    entrypoint_config::EntrypointConfig,
    error::{AtStep, Step, StepError},
    identity_db::IdentityDatabase,
    launcher::Launcher,
    resolver::{lookup_identity, resolve_identity, ResolvedIdentity},
};
use std::convert::Infallible;
use tracing::{debug, info};

/// Prepares the identity the command will run as. Chosen once at startup.
pub trait Provisioner {
    fn provision(&mut self, config: &EntrypointConfig) -> Result<ResolvedIdentity, StepError>;
}

/// Resolves (creating if needed) the desired user and group, then provisions the data
/// directory for them.
#[derive(Debug)]
pub struct FullProvisioner<D> {
    db: D,
}

impl<D: IdentityDatabase> FullProvisioner<D> {
    pub fn new(db: D) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &D {
        &self.db
    }
}

impl<D: IdentityDatabase> Provisioner for FullProvisioner<D> {
    fn provision(&mut self, config: &EntrypointConfig) -> Result<ResolvedIdentity, StepError> {
        let identity = resolve_identity(&mut self.db, &config.resolver)?;
        debug!("Resolved {identity:?}");

        info!("Provisioning data directory {}", config.data_dir.display());
        provision_data_dir(&config.data_dir, identity.uid, identity.gid).at(Step::ProvisionDir)?;

        Ok(identity)
    }
}

/// For images built with their runtime user baked in: binds the desired ids to the
/// accounts already present and leaves the data directory untouched.
#[derive(Debug)]
pub struct NoopProvisioner<D> {
    db: D,
}

impl<D: IdentityDatabase> NoopProvisioner<D> {
    pub fn new(db: D) -> Self {
        Self { db }
    }
}

impl<D: IdentityDatabase> Provisioner for NoopProvisioner<D> {
    fn provision(&mut self, config: &EntrypointConfig) -> Result<ResolvedIdentity, StepError> {
        let identity = lookup_identity(&self.db, &config.resolver)?;
        debug!("Resolved {identity:?} without provisioning");
        Ok(identity)
    }
}

/// Runs the whole startup procedure. Only returns if a step failed.
pub fn run(
    config: &EntrypointConfig,
    provisioner: &mut dyn Provisioner,
    launcher: &dyn Launcher,
) -> Result<Infallible, StepError> {
    let identity = provisioner.provision(config)?;

    info!("Launching {}", config.command);
    launcher.launch(&identity, &config.command).at(Step::Exec)
}
