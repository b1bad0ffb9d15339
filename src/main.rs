use anyhow::Context;
use clap::{Parser, Subcommand};
use tfmongodb::config::{ClientConfig, ProviderSettings};
use tfmongodb::mongo::{ConnectionUri, MongoConnection};
use tfmongodb::shared::logging;

const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(
    name = "terraform-provider-mongodb",
    about = "Terraform provider managing MongoDB users and roles.",
    version = APP_VERSION,
    disable_version_flag(true)
)]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[arg(
        long,
        short = 'c',
        value_name = "PATH",
        global = true,
        help = "JSON file with provider settings (same keys as the provider block)"
    )]
    pub config: Option<String>,

    #[arg(long, short = 'V', help = "Print version")]
    pub version: bool,
}

#[derive(Subcommand, Clone, Copy)]
enum Commands {
    #[command(name = "serve", about = "Run the Terraform plugin server (default)")]
    Serve,

    #[command(name = "ping", about = "Connect with the given settings and ping the server")]
    Ping,

    #[command(name = "uri", about = "Print the connection URI built from the settings")]
    Uri,
}

#[tokio::main]
async fn main() {
    logging::init();

    let cli = Cli::parse();

    if cli.version {
        println!("{}", APP_VERSION);
        std::process::exit(0);
    }

    // Terraform starts plugins without arguments.
    let result = match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve().await,
        Commands::Ping => ping(&cli).await,
        Commands::Uri => print_uri(&cli),
    };

    if let Err(err) = result {
        tracing::error!("{:#}", err);
        std::process::exit(1);
    }
}

fn load_settings(cli: &Cli) -> anyhow::Result<ProviderSettings> {
    match &cli.config {
        Some(path) => Ok(ProviderSettings::from_path(path)?),
        None => Ok(ProviderSettings::default()),
    }
}

#[cfg(feature = "terraform")]
async fn serve() -> anyhow::Result<()> {
    tracing::info!("Starting terraform-provider-mongodb {}", APP_VERSION);
    tf_provider::serve(tfmongodb::PROVIDER_NAME, tfmongodb::MongoProvider::new()).await
}

#[cfg(not(feature = "terraform"))]
async fn serve() -> anyhow::Result<()> {
    anyhow::bail!(
        "this binary was built without the `terraform` feature; rebuild with `--features terraform` to serve the plugin"
    )
}

async fn ping(cli: &Cli) -> anyhow::Result<()> {
    let config = load_settings(cli)?
        .resolve()
        .context("Invalid provider settings")?;
    log_warnings(&config);
    let connection = MongoConnection::connect(&config)
        .await
        .context("Failed to initialize MongoDB client")?;
    println!("ok {}", connection.uri());
    Ok(())
}

fn print_uri(cli: &Cli) -> anyhow::Result<()> {
    let config = load_settings(cli)?
        .resolve()
        .context("Invalid provider settings")?;
    log_warnings(&config);
    println!("{}", ConnectionUri::from_config(&config));
    Ok(())
}

fn log_warnings(config: &ClientConfig) {
    for warning in config.warnings() {
        tracing::warn!("{}", warning);
    }
}
