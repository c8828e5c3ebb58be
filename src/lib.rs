cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod cli;
        pub mod data_dir;
        pub mod entrypoint;
        pub mod entrypoint_config;
        mod error;
        pub mod identity_db;
        pub mod launcher;
        pub mod memory_db;
        pub mod resolver;
    } else {
        compile_error!("dropin only runs inside Linux containers");
    }
}

pub use cli::Args;
pub use error::{Error, ErrorKind, Step, StepError};

use entrypoint::{FullProvisioner, NoopProvisioner, Provisioner};
use entrypoint_config::EntrypointConfig;
use identity_db::SystemIdentityDatabase;
use launcher::ExecLauncher;
use tracing::{debug, info};

/// Provisions as configured and execs the command. Only returns on failure.
pub fn start(args: Args) -> eyre::Result<()> {
    let config = EntrypointConfig::new(args)?;
    debug!("{config:?}");

    let mut provisioner: Box<dyn Provisioner> = if config.provision {
        Box::new(FullProvisioner::new(SystemIdentityDatabase::default()))
    } else {
        info!("Provisioning disabled, using the accounts already in the image");
        Box::new(NoopProvisioner::new(SystemIdentityDatabase::default()))
    };

    match entrypoint::run(&config, provisioner.as_mut(), &ExecLauncher::default())? {}
}
