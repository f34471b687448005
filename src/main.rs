//! shell-bridge binary entry point.

use std::process::ExitCode;

use shell_bridge::api::serve_with_state;
use shell_bridge::cli::{parse_args, print_help, print_version};
use shell_bridge::config::Config;
use shell_bridge::logging;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("error: {}", e);
            eprintln!("Try 'shell-bridge --help' for more information.");
            return ExitCode::from(2);
        }
    };

    if args.help {
        print_help();
        return ExitCode::SUCCESS;
    }
    if args.version {
        print_version();
        return ExitCode::SUCCESS;
    }

    let config = match Config::load(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = logging::init_with_filter(config.log_filter()) {
        eprintln!("warning: logging already initialized: {}", e);
    }

    let server_config = match config.to_server_config() {
        Ok(server_config) => server_config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    info!("shell-bridge v{}", env!("CARGO_PKG_VERSION"));
    if !config.bridge.multiplexer {
        info!("multiplexer disabled, sessions will not survive disconnects");
    }

    match serve_with_state(server_config, config.to_app_state()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("server error: {}", e);
            ExitCode::FAILURE
        }
    }
}
