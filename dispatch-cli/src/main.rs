// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use clap::{Parser, Subcommand};
use std::process;

mod commands;
mod error;
mod output;

use commands::{config, coordinator, processor, rc, status};

/// dispatchctl - run and administer dispatch resource controllers,
/// coordinators and processors
#[derive(Parser)]
#[command(name = "dispatchctl")]
#[command(author = "Dispatch Contributors")]
#[command(version)]
#[command(about = "CLI for the dispatch distributed task-dispatch system", long_about = None)]
#[command(propagate_version = true)]
#[command(arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Resource Controller commands: serve, or administer a running one
    #[command(subcommand)]
    Rc(rc::RcCommands),

    /// Coordinator commands: serve a job's task source, or query status
    #[command(subcommand)]
    Coordinator(coordinator::CoordinatorCommands),

    /// Processor commands: pull and execute tasks from a coordinator
    #[command(subcommand)]
    Processor(processor::ProcessorCommands),

    /// Query the status of a resource controller and/or coordinator
    Status(status::StatusArgs),

    /// Configuration management commands
    #[command(subcommand)]
    Config(config::ConfigCommands),

    /// Generate shell completions
    Completions {
        /// The shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Rc(cmd) => rc::execute(cmd, cli.verbose).await,
        Commands::Coordinator(cmd) => coordinator::execute(cmd, cli.verbose).await,
        Commands::Processor(cmd) => processor::execute(cmd, cli.verbose).await,
        Commands::Status(args) => status::execute(args, cli.verbose).await,
        Commands::Config(cmd) => config::execute(cmd, cli.verbose).await,
        Commands::Completions { shell } => {
            generate_completions(shell);
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        if cli.verbose {
            eprintln!("\nCaused by:");
            for cause in e.chain().skip(1) {
                eprintln!("  {cause}");
            }
        }
        process::exit(1);
    }
}

fn generate_completions(shell: clap_complete::Shell) {
    use clap::CommandFactory;
    use clap_complete::generate;
    use std::io;

    let mut cmd = Cli::command();
    let bin_name = cmd.get_name().to_string();
    generate(shell, &mut cmd, bin_name, &mut io::stdout());
}
