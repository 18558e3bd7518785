//! Command-line and environment configuration.

use crate::browser::BrowserOptions;
use crate::delay_manager::{Politeness, WaitPolicy};
use crate::error::{EnrichError, Result};
use crate::extractor::ExtractionRules;
use crate::record_store::DEFAULT_HEADER_ROW;
use crate::sheets::parse_a1;
use clap::{Parser, ValueEnum};
use log::LevelFilter;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SeedKind {
    /// Fetch the search's CSV export URL directly.
    Export,
    /// Click the download control in a browser.
    Download,
    /// Read a local CSV file.
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LoaderKind {
    /// Chrome driven over the DevTools protocol.
    Browser,
    /// Plain HTTP fetch, CSS rules only.
    Http,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "patent-enricher", about = "Fill abstract and first claim for patent search results")]
pub struct Cli {
    /// Spreadsheet ID; takes precedence over --spreadsheet-name
    #[arg(long, env = "PATENT_SHEET_ID")]
    pub spreadsheet_id: Option<String>,

    /// Spreadsheet title, looked up through Drive
    #[arg(long, env = "PATENT_SHEET_NAME", default_value = "Patent Scrapes")]
    pub spreadsheet_name: String,

    /// OAuth bearer token with Sheets (and Drive read) scope
    #[arg(long, env = "GSHEET_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    /// Use a directory of CSV files instead of Google Sheets
    #[arg(long, env = "PATENT_LOCAL_STORE")]
    pub local_store: Option<PathBuf>,

    #[arg(long, default_value = "User Input")]
    pub input_sheet: String,

    /// Cell holding the search URL
    #[arg(long, default_value = "B3")]
    pub input_cell: String,

    #[arg(long, default_value = "Results")]
    pub results_sheet: String,

    #[arg(long, value_enum, default_value_t = SeedKind::Export)]
    pub seed: SeedKind,

    #[arg(long, required_if_eq("seed", "file"))]
    pub seed_file: Option<PathBuf>,

    /// Search URL; overrides the input cell
    #[arg(long, env = "PATENT_SEARCH_URL")]
    pub search_url: Option<String>,

    /// Zero-based row of the CSV header
    #[arg(long, default_value_t = DEFAULT_HEADER_ROW)]
    pub header_row: usize,

    #[arg(long, value_enum, default_value_t = LoaderKind::Browser)]
    pub loader: LoaderKind,

    /// DevTools websocket of an already running browser; launches Chrome when unset
    #[arg(long, env = "CHROME_DEVTOOLS_URL")]
    pub devtools_url: Option<String>,

    #[arg(long, env = "CHROME_PATH")]
    pub chrome_path: Option<PathBuf>,

    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub headless: bool,

    #[arg(long, default_value = "downloads")]
    pub download_dir: PathBuf,

    /// XPath of the CSV download control on the search page
    #[arg(long, default_value = r#"//*[@id="count"]/div[1]/span[2]"#)]
    pub download_button: String,

    #[arg(long, default_value_t = 30)]
    pub nav_timeout_secs: u64,

    #[arg(long, default_value_t = 5)]
    pub ready_timeout_secs: u64,

    #[arg(long, default_value_t = 30)]
    pub store_timeout_secs: u64,

    #[arg(long, default_value_t = 1000)]
    pub delay_min_ms: u64,

    #[arg(long, default_value_t = 3000)]
    pub delay_max_ms: u64,

    /// Visit at most this many pending rows
    #[arg(long)]
    pub limit: Option<usize>,

    /// JSON file with locator rules per field
    #[arg(long)]
    pub rules: Option<PathBuf>,

    #[arg(long, default_value_t = LevelFilter::Info)]
    pub log_level: LevelFilter,
}

/// Settings the pipeline driver runs with.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub input_sheet: String,
    pub input_cell: String,
    pub results_sheet: String,
    pub search_url: Option<String>,
    pub header_row: usize,
    pub rules: ExtractionRules,
    pub politeness: Politeness,
    pub limit: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            input_sheet: "User Input".to_string(),
            input_cell: "B3".to_string(),
            results_sheet: "Results".to_string(),
            search_url: None,
            header_row: DEFAULT_HEADER_ROW,
            rules: ExtractionRules::default(),
            politeness: Politeness::none(),
            limit: None,
        }
    }
}

impl Cli {
    pub fn validate(&self) -> Result<()> {
        if parse_a1(&self.input_cell).is_none() {
            return Err(EnrichError::Config(format!("'{}' is not an A1 cell reference", self.input_cell)));
        }
        if self.delay_min_ms > self.delay_max_ms {
            return Err(EnrichError::Config("--delay-min-ms exceeds --delay-max-ms".into()));
        }
        if self.local_store.is_none() && self.access_token.as_deref().map_or(true, str::is_empty) {
            return Err(EnrichError::Config(
                "GSHEET_ACCESS_TOKEN is required unless --local-store is given".into(),
            ));
        }
        if self.results_sheet.trim().is_empty() {
            return Err(EnrichError::Config("results sheet name is empty".into()));
        }
        Ok(())
    }

    pub fn rules(&self) -> Result<ExtractionRules> {
        match &self.rules {
            Some(path) => ExtractionRules::from_json_file(path),
            None => Ok(ExtractionRules::default()),
        }
    }

    pub fn pipeline_config(&self) -> Result<PipelineConfig> {
        Ok(PipelineConfig {
            input_sheet: self.input_sheet.clone(),
            input_cell: self.input_cell.clone(),
            results_sheet: self.results_sheet.clone(),
            search_url: self.search_url.clone(),
            header_row: self.header_row,
            rules: self.rules()?,
            politeness: Politeness {
                min: Duration::from_millis(self.delay_min_ms),
                max: Duration::from_millis(self.delay_max_ms),
            },
            limit: self.limit,
        })
    }

    pub fn browser_options(&self) -> BrowserOptions {
        BrowserOptions {
            devtools_url: self.devtools_url.clone(),
            chrome_executable: self.chrome_path.clone(),
            headless: self.headless,
            nav_timeout: Duration::from_secs(self.nav_timeout_secs),
            ready: WaitPolicy::new(Duration::from_secs(self.ready_timeout_secs), Duration::from_millis(250)),
            ..BrowserOptions::default()
        }
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }

    /// Bounded wait for a browser-triggered CSV download.
    pub fn download_wait(&self) -> WaitPolicy {
        WaitPolicy::new(Duration::from_secs(self.nav_timeout_secs), Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["patent-enricher"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn defaults_match_workbook_layout() {
        let cli = parse(&["--local-store", "/tmp/store"]);
        assert_eq!(cli.input_sheet, "User Input");
        assert_eq!(cli.input_cell, "B3");
        assert_eq!(cli.results_sheet, "Results");
        assert_eq!(cli.header_row, 1);
        assert!(cli.headless);
        assert_eq!(cli.browser_options().ready.timeout, Duration::from_secs(5));
        cli.validate().unwrap();

        let config = cli.pipeline_config().unwrap();
        assert_eq!(config.politeness.min, Duration::from_secs(1));
        assert_eq!(config.rules, ExtractionRules::default());
    }

    #[test]
    fn token_required_without_local_store() {
        let cli = parse(&["--spreadsheet-id", "abc"]);
        // The env var may be set on a developer machine.
        if cli.access_token.is_none() {
            assert!(matches!(cli.validate(), Err(EnrichError::Config(_))));
        }
    }

    #[test]
    fn rejects_bad_cell_and_inverted_delays() {
        let cli = parse(&["--local-store", "x", "--input-cell", "3B"]);
        assert!(cli.validate().is_err());
        let cli = parse(&["--local-store", "x", "--delay-min-ms", "5", "--delay-max-ms", "1"]);
        assert!(cli.validate().is_err());
    }

    #[test]
    fn file_seed_requires_path() {
        let argv = ["patent-enricher", "--local-store", "x", "--seed", "file"];
        assert!(Cli::try_parse_from(argv).is_err());
        let cli = parse(&["--local-store", "x", "--seed", "file", "--seed-file", "seed.csv", "--headless", "false"]);
        assert_eq!(cli.seed, SeedKind::File);
        assert!(!cli.browser_options().headless);
    }
}
