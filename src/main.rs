//! querystage - run query scripts with session recovery and staged exports.

use querystage::cli::{Cli, OutputFormat};
use querystage::config::Config;
use querystage::error::{Result, StageError};
use querystage::interpreter::Interpreter;
use querystage::logging;
use querystage::output::QueryOutput;
use querystage::session::{self, MockQueryService};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse_args();

    if cli.log_file {
        logging::init_file_logging();
    } else {
        logging::init_stderr_logging();
    }

    match run(&cli).await {
        Ok(output) if output.is_success() => {}
        Ok(_) => std::process::exit(1),
        Err(e) => {
            error!("{}: {}", e.category(), e);
            std::process::exit(2);
        }
    }
}

async fn run(cli: &Cli) -> Result<QueryOutput> {
    let format = cli.parse_output_format().map_err(StageError::config)?;

    let config_path = cli.config_path();
    info!("Loading config from: {}", config_path.display());
    let mut config = Config::load_from_file(&config_path)?;
    cli.apply_to(&mut config)?;

    let script = cli.read_script()?;

    let service = if cli.mock {
        info!("Using mock query service");
        Box::new(MockQueryService::new()) as Box<dyn session::QueryService>
    } else {
        info!("Connecting to {}", config.session.display_string());
        session::service_for(&config.session)
    };
    let interpreter = Interpreter::open(&config, service).await?;

    let handle = interpreter.submit(cli.job_id.clone(), &script);
    let wait = handle.wait();
    tokio::pin!(wait);

    let outcome = tokio::select! {
        outcome = &mut wait => outcome,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, cancelling job {}", cli.job_id);
            interpreter.cancel(&cli.job_id).await;
            wait.await
        }
    };
    let output = outcome.unwrap_or_else(|e| QueryOutput::error(e.to_string()));

    if let Err(e) = interpreter.close().await {
        warn!("Failed to close session: {}", e);
    }

    print_output(&output, format)?;
    Ok(output)
}

fn print_output(output: &QueryOutput, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => println!("{}", output.to_plain_text()),
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(output)
                .map_err(|e| StageError::internal(format!("Cannot encode output: {e}")))?;
            println!("{json}");
        }
    }
    Ok(())
}
