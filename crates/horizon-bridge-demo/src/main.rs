use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use horizon_bridge::logging;
use horizon_bridge::sink::{DocumentSink, LogSink};
use horizon_bridge_demo::{DemoConfig, DemoError, Driver, Result};

/// Run the bridge demo against a backend and render the results as HTML.
#[derive(Parser, Debug)]
#[command(name = "horizon-bridge-demo", version, about)]
struct Cli {
    /// TOML configuration file. Defaults apply when absent.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Write the HTML page here instead of stdout.
    #[arg(long, value_name = "PATH")]
    html: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let (sink, outcome) = match DemoConfig::load(cli.config.as_deref()) {
        Ok(config) => {
            let sink = Arc::new(DocumentSink::new(config.container_id.clone()));
            let outcome = run(&config, sink.clone()).await;
            (sink, outcome)
        }
        Err(e) => {
            let sink = Arc::new(DocumentSink::new(DemoConfig::default().container_id));
            sink.emit(&e.to_string());
            (sink, Err(e))
        }
    };

    // The page is written even for a failed run; it shows the error.
    let written = write_html(cli.html, &sink.document().render());

    let mut code = ExitCode::SUCCESS;
    for result in [outcome, written] {
        if let Err(e) = result {
            eprintln!("error: {}", e);
            code = ExitCode::FAILURE;
        }
    }
    code
}

async fn run(config: &DemoConfig, sink: Arc<DocumentSink>) -> Result<()> {
    // Library diagnostics land in the same document as call outcomes.
    logging::install_sink_subscriber(sink.clone(), &config.log_filter);

    let driver = Driver::from_config(sink, config);
    let summary = driver.run_configured(config).await?;
    tracing::debug!(
        "Run finished: {} call(s), {} failure(s), {} streamed",
        summary.calls,
        summary.failures,
        summary.streamed
    );
    Ok(())
}

fn write_html(path: Option<PathBuf>, html: &str) -> Result<()> {
    match path {
        Some(path) => fs::write(&path, html).map_err(|source| DemoError::Io { path, source }),
        None => io::stdout()
            .write_all(html.as_bytes())
            .map_err(|source| DemoError::Io {
                path: PathBuf::from("<stdout>"),
                source,
            }),
    }
}
