use clap::{Args, Parser, Subcommand};
use chrono::NaiveDate;
use ebics_client::EbicsClient;
use ebics_client::config::EbicsConfig;
use ebics_client::domain::keyring::Keyring;
use ebics_client::domain::order::{BusinessService, DateRange, OrderOutcome, OrderRequest, OrderType};
use ebics_client::domain::protocol::ConnectionProfile;
use ebics_client::infrastructure::http::ReqwestTransport;
use ebics_client::interfaces::record::KeyringRecord;
use miette::{IntoDiagnostic, Result, miette};
use std::io::{self, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Connection configuration (JSON)
    #[arg(long, env = "EBICS_CONFIG")]
    config: PathBuf,

    /// Keyring record (JSON) as printed by `keygen` or `hpb`
    #[arg(long, env = "EBICS_KEYRING")]
    keyring: Option<PathBuf>,

    /// Password protecting the user's private keys
    #[arg(long, env = "EBICS_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate new user keys and print the keyring record
    Keygen,
    /// Ask the bank which protocol versions it supports
    Hev,
    /// Send the signature public key
    Ini,
    /// Send the authentication and encryption public keys
    Hia,
    /// Download the bank keys and print the updated keyring record
    Hpb,
    /// Run a download order and write its payload
    Download(DownloadArgs),
    /// Upload a file
    Upload(UploadArgs),
}

#[derive(Args)]
struct ServiceArgs {
    /// Business service name (BTD/BTU), e.g. SCT or STM
    #[arg(long)]
    service: Option<String>,
    /// Message name of the business service, e.g. pain.001 or camt.053
    #[arg(long, requires = "service")]
    message: Option<String>,
    #[arg(long, requires = "service")]
    scope: Option<String>,
    #[arg(long, requires = "service")]
    service_option: Option<String>,
    #[arg(long, requires = "service")]
    container: Option<String>,
    #[arg(long, requires = "service")]
    message_version: Option<String>,
}

impl ServiceArgs {
    fn business_service(&self) -> Result<Option<BusinessService>> {
        let Some(service_name) = &self.service else {
            return Ok(None);
        };
        let message = self
            .message
            .as_ref()
            .ok_or_else(|| miette!("--service needs --message"))?;
        let mut service = BusinessService::new(service_name, message);
        if let Some(scope) = &self.scope {
            service = service.with_scope(scope);
        }
        if let Some(option) = &self.service_option {
            service = service.with_service_option(option);
        }
        if let Some(container) = &self.container {
            service = service.with_container(container);
        }
        if let Some(version) = &self.message_version {
            service = service.with_message_version(version);
        }
        Ok(Some(service))
    }
}

#[derive(Args)]
struct DownloadArgs {
    /// Order type, e.g. HTD, HAC, FDL or BTD
    order: OrderType,
    #[arg(long, requires = "end")]
    start: Option<NaiveDate>,
    #[arg(long, requires = "start")]
    end: Option<NaiveDate>,
    /// File format of FDL orders
    #[arg(long)]
    file_format: Option<String>,
    #[command(flatten)]
    service: ServiceArgs,
    /// Where to write the payload (stdout if omitted)
    #[arg(long, short)]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct UploadArgs {
    /// Order type, e.g. FUL or BTU
    order: OrderType,
    /// File holding the order data
    input: PathBuf,
    /// File format of FUL orders
    #[arg(long)]
    file_format: Option<String>,
    #[command(flatten)]
    service: ServiceArgs,
    /// File name announced with BTU orders
    #[arg(long)]
    file_name: Option<String>,
}

fn password(cli: &Cli) -> Result<&str> {
    cli.password
        .as_deref()
        .ok_or_else(|| miette!("a password is required (--password or EBICS_PASSWORD)"))
}

fn load_keyring(cli: &Cli, profile: ConnectionProfile) -> Result<Keyring> {
    let path = cli
        .keyring
        .as_ref()
        .ok_or_else(|| miette!("a keyring record is required (--keyring or EBICS_KEYRING)"))?;
    let content = std::fs::read(path).into_diagnostic()?;
    let record: KeyringRecord = serde_json::from_slice(&content).into_diagnostic()?;
    Ok(record.into_keyring(profile, password(cli)?)?)
}

fn print_record(keyring: &Keyring) -> Result<()> {
    let record = KeyringRecord::from_keyring(keyring);
    let json = serde_json::to_string_pretty(&record).into_diagnostic()?;
    println!("{json}");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ebics_client=info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = EbicsConfig::load(&cli.config)?;
    let transport = ReqwestTransport::new(config.timeout())?;
    let client = EbicsClient::new(
        config.bank.clone(),
        config.user.clone(),
        Box::new(transport),
        config.client.clone(),
    );

    match &cli.command {
        Command::Keygen => {
            let keyring = client.create_keyring(config.profile, password(&cli)?)?;
            print_record(&keyring)?;
        }
        Command::Hev => {
            for version in client.hev().await? {
                println!("{} {}", version.protocol_name, version.version);
            }
        }
        Command::Ini | Command::Hia => {
            let keyring = load_keyring(&cli, config.profile)?;
            let result = match cli.command {
                Command::Ini => client.ini(&keyring).await?,
                _ => client.hia(&keyring).await?,
            };
            println!(
                "{} accepted: {} {}",
                result.order_type, result.return_code, result.report_text
            );
        }
        Command::Hpb => {
            let mut keyring = load_keyring(&cli, config.profile)?;
            client.hpb(&mut keyring).await?;
            print_record(&keyring)?;
        }
        Command::Download(args) => {
            let keyring = load_keyring(&cli, config.profile)?;
            let mut request = OrderRequest::new(args.order);
            if let (Some(start), Some(end)) = (args.start, args.end) {
                request = request.with_date_range(DateRange::new(start, end)?);
            }
            if let Some(format) = &args.file_format {
                request = request.with_file_format(format);
            }
            if let Some(service) = args.service.business_service()? {
                request = request.with_service(service);
            }

            let result = client.execute(&keyring, request).await?;
            if result.outcome == OrderOutcome::NoData {
                eprintln!("{}: no data available ({})", result.order_type, result.return_code);
                return Ok(());
            }
            match &args.output {
                Some(path) => std::fs::write(path, &result.payload).into_diagnostic()?,
                None => io::stdout().write_all(&result.payload).into_diagnostic()?,
            }
        }
        Command::Upload(args) => {
            let keyring = load_keyring(&cli, config.profile)?;
            let order_data = std::fs::read(&args.input).into_diagnostic()?;
            let mut request = OrderRequest::new(args.order).with_payload(order_data);
            if let Some(format) = &args.file_format {
                request = request.with_file_format(format);
            }
            if let Some(service) = args.service.business_service()? {
                request = request.with_service(service);
            }
            if let Some(name) = &args.file_name {
                request = request.with_file_name(name);
            }

            let result = client.execute(&keyring, request).await?;
            println!(
                "{} uploaded: transaction {} order {}",
                result.order_type,
                result
                    .transaction_id
                    .as_ref()
                    .map(|id| id.as_str())
                    .unwrap_or("-"),
                result.order_id.as_deref().unwrap_or("-")
            );
        }
    }

    Ok(())
}
