use anyhow::Result;
use clap::Parser;
use gmail_labeler::cli::{self, Cli, Commands};
use gmail_labeler::config::Config;
use std::fs::File;
use std::process;
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() {
    // Exit with proper code on error
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        eprintln!("\nFor help, run: gmail-labeler --help");
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Install default crypto provider for rustls
    // On non-Windows platforms, use aws-lc-rs; on Windows, use ring
    #[cfg(not(windows))]
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    #[cfg(windows)]
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();
    let log_file = cli.log_file.as_deref().map(cli::open_log_file).transpose()?;
    init_tracing(cli.verbose, cli.log_json, log_file);

    match cli.command {
        Commands::Serve { no_autostart } => {
            let config = Config::load(&cli.config).await?;
            tracing::info!(
                "Gmail labeler starting on {}:{}",
                config.server.host,
                config.server.port
            );
            cli::run_serve(config, !no_autostart).await?;
            Ok(())
        }

        Commands::Auth { force } => {
            let config = Config::load(&cli.config).await?;
            tracing::info!("Authenticating with Gmail API...");

            let email = cli::run_auth(&config, force).await?;

            println!("Successfully authenticated with Gmail API");
            println!("Token cached at: {:?}", config.gmail.token_path);
            println!("Connected to account: {}", email);
            Ok(())
        }

        Commands::InitConfig { output, force } => {
            tracing::info!("Generating example configuration file");
            cli::run_init_config(&output, force).await?;

            println!("Created example configuration file at: {:?}", output);
            println!("\nKey settings to review:");
            println!("  - classifier.url: Endpoint that answers {{\"text\"}} with {{\"prediction\"}}");
            println!("  - monitor.poll_interval_secs: Seconds between history polls");
            println!("  - gmail.token_path: Token written by `gmail-labeler auth`");
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool, json: bool, log_file: Option<File>) {
    let filter = if verbose {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("gmail_labeler=debug,info"))
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("gmail_labeler=info,warn"))
    };

    let plain = (!json).then(|| {
        fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
    });
    let json_lines = json.then(|| {
        fmt::layer()
            .json()
            .with_target(false)
            .with_file(false)
            .with_line_number(false)
    });
    // The log file always gets plain text without colour codes
    let file = log_file.map(|file| {
        fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .with_writer(Mutex::new(file))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(plain)
        .with(json_lines)
        .with(file)
        .init();
}
