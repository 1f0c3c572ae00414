use clap::Parser;
use tracing_subscriber::EnvFilter;
use waypoint::cli::{self, Cli, Commands};
use waypoint::errors::WaypointError;

fn init_logging(cli: &Cli) {
    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if cli.log_json {
        builder.json().init();
    } else {
        builder.with_ansi(!cli.no_color).init();
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(&cli);
    if cli.no_color {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let result = match cli.command {
        Commands::Run(args) => cli::run::handle_run(args).await,
        Commands::RunAgent(args) => cli::run::handle_run_agent(args).await,
        Commands::Status(args) => cli::session::handle_status(args).await,
        Commands::RollbackTo(args) => cli::session::handle_rollback(args, false).await,
        Commands::RollbackAfter(args) => cli::session::handle_rollback(args, true).await,
        Commands::ListAgents => cli::session::handle_list_agents(),
        Commands::Sessions(args) => cli::session::handle_sessions(args).await,
        Commands::Discard(args) => cli::session::handle_discard(args).await,
        Commands::Validate(args) => handle_validate(args).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn handle_validate(args: cli::commands::ValidateArgs) -> Result<(), WaypointError> {
    let (config, _) = waypoint::config::parse_config(&args.config).await?;
    println!("Configuration is valid: {}", args.config.display());
    if let Some(rules) = &config.rules {
        let described = rules.describe();
        if !described.is_empty() {
            println!("{}", described);
        }
    }
    Ok(())
}
