use std::process;

use agentflow_cli::cli::{Cli, Commands};
use agentflow_cli::compile::run_compile_command;
use agentflow_cli::error::handle_cli_result;
use agentflow_cli::exit_codes::{EXIT_SUCCESS, EXIT_FAILURE};
use agentflow_cli::run::{run_workflow_command, RunArgs};
use agentflow_cli::visualize::{run_visualize_command, VisualizeArgs};
use clap::CommandFactory;
use tracing::Level;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();

    let Some(command) = cli.command else {
        let code = match Cli::command().print_help() {
            Ok(()) => EXIT_SUCCESS,
            Err(_) => EXIT_FAILURE,
        };
        process::exit(code);
    };

    let log_level = if cli.quiet {
        Level::ERROR
    } else if cli.debug {
        Level::DEBUG
    } else if cli.verbose {
        Level::TRACE
    } else {
        Level::INFO
    };
    let filter = EnvFilter::try_from_env("AGENTFLOW_LOG")
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str()));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();

    let exit_code = match command {
        Commands::Compile { file, format } => {
            tracing::info!("Running compile command");
            handle_cli_result(run_compile_command(&file, format))
        }
        Commands::Run {
            file,
            input,
            vars,
            events,
            responses,
            timeout,
            stream,
            record,
        } => {
            tracing::info!("Running run command");
            handle_cli_result(
                run_workflow_command(RunArgs {
                    file,
                    input,
                    vars,
                    events,
                    responses,
                    timeout,
                    stream,
                    record,
                    config: cli.config,
                })
                .await,
            )
        }
        Commands::Visualize {
            file,
            format,
            trace,
            input,
            minimal,
        } => {
            tracing::info!("Running visualize command");
            handle_cli_result(
                run_visualize_command(VisualizeArgs {
                    file,
                    format,
                    trace,
                    input,
                    minimal,
                    config: cli.config,
                })
                .await,
            )
        }
    };

    process::exit(exit_code);
}
