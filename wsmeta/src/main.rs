//! Entrypoint of the wsmeta binary

use dotenvy::dotenv;
use wsmeta_clap_blocks::logging::LoggingConfig;

mod commands {
    pub mod apply;
}

enum ReturnCode {
    Failure = 1,
}

#[derive(Debug, clap::Parser)]
#[clap(
    name = "wsmeta",
    version,
    about = "Workspace object metadata tools",
    long_about = r#"Workspace object metadata tools

Examples:
    # Run a mutation script against an in-memory catalog and schema
    wsmeta apply --script mutations.json

    # The same, with debug logging
    wsmeta -vv apply --script mutations.json

    # Log as JSON, filtered with LOG_FILTER
    LOG_FILTER=wsmeta_service=debug wsmeta --log-format json apply --script mutations.json
"#
)]
struct Config {
    #[clap(flatten)]
    logging_config: LoggingConfig,

    #[clap(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, clap::Parser)]
enum Command {
    /// Apply a script of object mutations and print the resulting catalog and schema
    Apply(commands::apply::Config),
}

fn main() -> Result<(), std::io::Error> {
    // load all environment variables from .env before doing anything
    load_dotenv();

    let config: Config = clap::Parser::parse();

    if let Err(e) = config.logging_config.install_global_subscriber() {
        eprintln!("Initializing logs failed: {e}");
        std::process::exit(ReturnCode::Failure as _);
    }

    let tokio_runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    tokio_runtime.block_on(async move {
        match config.command {
            None => println!("command required, -h/--help for help"),
            Some(Command::Apply(config)) => {
                if let Err(e) = commands::apply::command(config).await {
                    eprintln!("Apply command failed: {e}");
                    std::process::exit(ReturnCode::Failure as _)
                }
            }
        }
    });

    Ok(())
}

/// Source the .env file before initialising the Config struct. Existing environment variables
/// take precedence.
fn load_dotenv() {
    match dotenv() {
        Ok(_) => {}
        Err(dotenvy::Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            eprintln!("FATAL Error loading config from: {e}");
            eprintln!("Aborting");
            std::process::exit(ReturnCode::Failure as _);
        }
    };
}
