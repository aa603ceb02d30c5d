use clap::Parser;
use std::process::ExitCode;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use vhostmux::cli::Cli;
use vhostmux::{Config, Multiplexer};

fn main() -> anyhow::Result<ExitCode> {
    // stdout is reserved for the suggested port and the printed command lines
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("vhostmux=info".parse().expect("valid log directive")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.mux_config.as_deref())?;
    let multiplexer = Multiplexer::new(&config);

    if cli.is_suggest() {
        let port = multiplexer.suggest()?;
        println!("{}", port);
        return Ok(ExitCode::SUCCESS);
    }

    let report = multiplexer.run(&cli.server_args)?;
    for failure in &report.failures {
        warn!(error = %failure, "Run completed with a failed instance");
    }
    info!(
        started = report.spawned.len(),
        failed = report.failures.len(),
        terminated = report.cleanup.terminated(),
        base_exit_code = report.base_exit_code,
        "Run complete"
    );

    Ok(ExitCode::from(
        u8::try_from(report.base_exit_code).unwrap_or(1),
    ))
}
