use anyhow::{bail, Context};
use clap::Parser;
use log::{info, warn};
use patent_enricher_lib::config::{Cli, LoaderKind, SeedKind};
use patent_enricher_lib::http_loader::HttpLoader;
use patent_enricher_lib::seed_source::{BrowserDownloadSource, ExportUrlSource, FileSource, SeedSource};
use patent_enricher_lib::{logger, ChromeSession, CsvDirStore, GoogleSheetsClient, Locator, Pipeline, RunSummary, SheetStore};
use std::sync::atomic::Ordering;
use std::time::Duration;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logger::init(cli.log_level);
    cli.validate()?;
    info!("Starting patent enricher...");

    let summary = match &cli.local_store {
        Some(dir) => run(CsvDirStore::new(dir)?, &cli)?,
        None => {
            let token = cli.access_token.as_deref().unwrap_or_default();
            let store = match &cli.spreadsheet_id {
                Some(id) => GoogleSheetsClient::new(token, id, cli.store_timeout())?,
                None => GoogleSheetsClient::open_by_name(token, &cli.spreadsheet_name, cli.store_timeout())?,
            };
            run(store, &cli)?
        }
    };

    println!("{}", summary);
    if summary.unsynced {
        bail!("results worksheet is behind the last processed row");
    }
    Ok(())
}

fn seed_source(cli: &Cli) -> anyhow::Result<Box<dyn SeedSource>> {
    let source: Box<dyn SeedSource> = match cli.seed {
        SeedKind::Export => Box::new(ExportUrlSource::new(Duration::from_secs(cli.nav_timeout_secs))?),
        SeedKind::Download => Box::new(
            BrowserDownloadSource::new(cli.browser_options(), &cli.download_dir, cli.download_wait())
                .with_button(Locator::Xpath(cli.download_button.clone())),
        ),
        SeedKind::File => {
            let path = cli.seed_file.as_ref().context("--seed-file is required with --seed file")?;
            Box::new(FileSource::new(path))
        }
    };
    Ok(source)
}

fn run<S: SheetStore>(store: S, cli: &Cli) -> anyhow::Result<RunSummary> {
    let config = cli.pipeline_config()?;
    let ready_locator = config.rules.ready.clone();
    let mut seed = seed_source(cli)?;
    let mut pipeline = Pipeline::new(store, config);

    let cancel = pipeline.cancel_flag();
    ctrlc::set_handler(move || {
        warn!("Interrupt received; finishing the current row before stopping.");
        cancel.store(true, Ordering::SeqCst);
    })
    .context("installing Ctrl-C handler")?;

    let summary = match cli.loader {
        LoaderKind::Browser => {
            let mut options = cli.browser_options();
            options.ready_locator = ready_locator;
            pipeline.run(seed.as_mut(), move || ChromeSession::open(options.clone()))
        }
        LoaderKind::Http => {
            let timeout = Duration::from_secs(cli.nav_timeout_secs);
            pipeline.run(seed.as_mut(), move || HttpLoader::new(timeout))
        }
    }
    .context("enrichment run failed")?;
    Ok(summary)
}
