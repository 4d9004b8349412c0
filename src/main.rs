use std::process::exit;

use system_deploy::cli::{self, Commands};

fn main() {
    let cli = cli::parse_args();

    if let Err(e) = system_deploy::init_logging(cli.log) {
        eprintln!("failed to initialize logging: {e:#}");
        exit(1);
    }

    let result = match &cli.command {
        Commands::Deploy(args) => run_deploy(args),
        Commands::Describe(args) => run_describe(args),
        Commands::Run(args) => run_run(args),
    };

    match result {
        Ok(true) => {}
        Ok(false) => exit(1),
        Err(e) => {
            tracing::error!("{e:#}");
            exit(1);
        }
    }
}

fn run_deploy(args: &cli::DeployArgs) -> anyhow::Result<bool> {
    let report = system_deploy::run_deploy(&args.directories, &args.search_paths)?;
    Ok(!report.has_failures())
}

fn run_describe(args: &cli::DescribeArgs) -> anyhow::Result<bool> {
    let text = system_deploy::run_describe(args.action.as_deref(), args.markdown)?;
    print!("{text}");
    Ok(true)
}

fn run_run(args: &cli::RunArgs) -> anyhow::Result<bool> {
    let options = args
        .options
        .iter()
        .map(|entry| {
            entry
                .split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .ok_or_else(|| anyhow::anyhow!("invalid -o value {entry:?}, expected key=value"))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let changed = system_deploy::run_run_action(&args.action, options)?;
    tracing::info!(changed, "{}", args.action);
    Ok(true)
}
