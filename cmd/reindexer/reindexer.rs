use std::time::Instant;

use clap::Parser;
use reindexer::{
    cli::CLI,
    initializers::init_tracing,
    report::{emit_error_report, error_exit_code},
};

#[tokio::main]
async fn main() {
    let started_at = Instant::now();
    let CLI { opts, command } = CLI::parse();

    init_tracing(&opts);

    match command.run(&opts, started_at).await {
        Ok(status) => std::process::exit(status.code()),
        Err(error) => {
            emit_error_report(
                opts.json,
                command.name(),
                started_at,
                &error,
                opts.report_file.as_deref(),
            );
            std::process::exit(error_exit_code(&error));
        }
    }
}
