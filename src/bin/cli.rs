use clap::{ArgAction, Parser, Subcommand};
use log::{LevelFilter, info};
use ts_b25::card::pcsc::PcscBackend;
use ts_b25::card::{CardBackend, SessionManager};
use ts_b25::{Options, Reporter, logger};

#[derive(Parser)]
#[clap(version, about = "ARIB STD-B25 smartcard tools")]
struct Opt {
    /// More logging (-v debug, -vv trace)
    #[clap(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[clap(short, long, default_value_t = false, global = true)]
    quiet: bool,

    /// Decoder options as JSON (reader_name, process_emm, output_scrambled)
    #[clap(long, global = true)]
    config: Option<std::path::PathBuf>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List PC/SC readers
    Readers,

    /// Run the initial setting exchange and print the card identity as JSON
    CardInfo {
        /// Substring of the reader name; overrides the config file
        #[clap(long)]
        reader: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opt = Opt::parse();

    let level = match (opt.quiet, opt.verbose) {
        (true, _) => LevelFilter::Error,
        (false, 0) => LevelFilter::Info,
        (false, 1) => LevelFilter::Debug,
        (false, _) => LevelFilter::Trace,
    };
    logger::init(level).map_err(|e| anyhow::anyhow!("{e}"))?;

    let options = match &opt.config {
        Some(path) => Options::from_json(&tokio::fs::read_to_string(path).await?)?,
        None => Options::default(),
    };

    let backend = PcscBackend::establish().map_err(|e| anyhow::anyhow!(e))?;

    match opt.command {
        Command::Readers => {
            let readers = backend.list_readers().map_err(|e| anyhow::anyhow!(e))?;
            if readers.is_empty() {
                info!("no readers attached");
            }
            for name in readers {
                println!("{name}");
            }
        }
        Command::CardInfo { reader } => {
            let reader = reader.unwrap_or(options.reader_name);
            let manager = SessionManager::new(backend);
            let card = manager.open(&reader).await?;
            let setting = card.request_initial_setting().await?;
            let report = Reporter::card_report(card.reader(), &setting);
            println!("{}", Reporter::card_json(&report)?);
        }
    }
    Ok(())
}
