pub mod annot;
pub mod parse;
pub mod signature;
pub mod schema;
pub mod docs;
pub mod diff;
pub mod manifest;
pub mod resolver;
pub mod error;
pub mod cli;

use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let command_line_interface = cli::CommandLineInterface::load();
    command_line_interface.run()
}
