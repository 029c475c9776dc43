use std::env;
use std::process::ExitCode;

use contentgrid_server::config::loader::load_config;
use contentgrid_server::{ServerBuilder, init_tracing, shutdown_tracing};

const DEFAULT_CONFIG_PATH: &str = "contentgrid.toml";
const CONFIG_ENV: &str = "CONTENTGRID_CONFIG";

/// Where the configuration path came from, for the startup log.
#[derive(Debug, Clone, Copy)]
enum ConfigOrigin {
    Flag,
    Env,
    Default,
}

impl ConfigOrigin {
    fn describe(self) -> &'static str {
        match self {
            Self::Flag => "--config",
            Self::Env => CONFIG_ENV,
            Self::Default => "default",
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env is fine; a broken one is worth a warning.
    match dotenvy::dotenv() {
        Err(dotenvy::Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => eprintln!("Warning: ignoring .env file: {e}"),
        Ok(_) => {}
    }

    let (path, origin) = config_path(env::args().skip(1));
    let cfg = match load_config(Some(&path)) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error ({path}): {e}");
            return ExitCode::from(2);
        }
    };

    init_tracing(&cfg.logging, &cfg.otel);
    tracing::info!(path = %path, origin = origin.describe(), "Configuration loaded");

    let code = match ServerBuilder::new().with_config(cfg).build().await {
        Ok(server) => match server.run().await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                tracing::error!(error = %e, "Server stopped with an error");
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            tracing::error!(error = %e, "Server initialization failed");
            ExitCode::from(2)
        }
    };

    shutdown_tracing();
    code
}

/// `--config <path>` wins over `CONTENTGRID_CONFIG`, which wins over
/// `contentgrid.toml` in the working directory.
fn config_path(mut args: impl Iterator<Item = String>) -> (String, ConfigOrigin) {
    while let Some(arg) = args.next() {
        if arg == "--config"
            && let Some(path) = args.next()
        {
            return (path, ConfigOrigin::Flag);
        }
    }

    match env::var(CONFIG_ENV) {
        Ok(path) if !path.is_empty() => (path, ConfigOrigin::Env),
        _ => (DEFAULT_CONFIG_PATH.to_string(), ConfigOrigin::Default),
    }
}
