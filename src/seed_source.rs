//! Ways of obtaining the seed CSV for a search. The pipeline only needs
//! the bytes.

use crate::browser::{BrowserOptions, ChromeSession, PageLoader};
use crate::delay_manager::{wait_until, WaitPolicy};
use crate::error::{EnrichError, Result};
use crate::extractor::Locator;
use log::{debug, info, warn};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

const EXPORT_ENDPOINT: &str = "https://patents.google.com/xhr/query";

pub trait SeedSource {
    fn describe(&self) -> String;

    /// CSV bytes for `search_url`; sources that ignore the target accept `None`.
    fn fetch_csv(&mut self, search_url: Option<&str>) -> Result<Vec<u8>>;

    /// Whether `fetch_csv` needs a search URL at all.
    fn needs_search_url(&self) -> bool {
        true
    }
}

fn require_target(search_url: Option<&str>) -> Result<&str> {
    search_url
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| EnrichError::SeedUnavailable("no search URL configured".into()))
}

/// Export URL for a search page: its query string is passed, encoded, to
/// the CSV download endpoint.
pub fn export_url_for(search_url: &str) -> Result<String> {
    let parsed = Url::parse(search_url)
        .map_err(|e| EnrichError::SeedUnavailable(format!("invalid search URL '{}': {}", search_url, e)))?;
    let query = parsed
        .query()
        .filter(|q| !q.is_empty())
        .ok_or_else(|| EnrichError::SeedUnavailable(format!("search URL '{}' has no query", search_url)))?;
    Ok(format!(
        "{}?url={}&exp=&download=true",
        EXPORT_ENDPOINT,
        urlencoding::encode(query)
    ))
}

/// Fetches the CSV export directly over HTTP.
pub struct ExportUrlSource {
    client: Client,
}

impl ExportUrlSource {
    pub fn new(timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .cookie_store(true)
            .build()
            .map_err(|e| EnrichError::Config(format!("cannot build HTTP client: {}", e)))?;
        Ok(ExportUrlSource { client })
    }
}

impl SeedSource for ExportUrlSource {
    fn describe(&self) -> String {
        "CSV export URL".to_string()
    }

    fn fetch_csv(&mut self, search_url: Option<&str>) -> Result<Vec<u8>> {
        let export = export_url_for(require_target(search_url)?)?;
        info!("Fetching seed CSV from {}", export);
        let resp = self
            .client
            .get(&export)
            .send()
            .map_err(|e| EnrichError::SeedUnavailable(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(EnrichError::SeedUnavailable(format!("export returned HTTP {}", resp.status())));
        }
        let bytes = resp
            .bytes()
            .map_err(|e| EnrichError::SeedUnavailable(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

/// Reads an already-downloaded CSV file.
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileSource { path: path.into() }
    }
}

impl SeedSource for FileSource {
    fn describe(&self) -> String {
        format!("file {:?}", self.path)
    }

    fn fetch_csv(&mut self, _search_url: Option<&str>) -> Result<Vec<u8>> {
        fs::read(&self.path).map_err(|e| EnrichError::SeedUnavailable(format!("{:?}: {}", self.path, e)))
    }

    fn needs_search_url(&self) -> bool {
        false
    }
}

/// Drives a browser to the search page, clicks the download control and
/// waits for the CSV to land in a fresh per-run directory.
pub struct BrowserDownloadSource {
    options: BrowserOptions,
    download_root: PathBuf,
    button: Locator,
    wait: WaitPolicy,
}

impl BrowserDownloadSource {
    pub fn new(options: BrowserOptions, download_root: impl Into<PathBuf>, wait: WaitPolicy) -> Self {
        BrowserDownloadSource {
            options,
            download_root: download_root.into(),
            button: Locator::Xpath(r#"//*[@id="count"]/div[1]/span[2]"#.to_string()),
            wait,
        }
    }

    pub fn with_button(mut self, button: Locator) -> Self {
        self.button = button;
        self
    }

    fn download(&self, session: &mut ChromeSession, target: &str, dir: &Path) -> Result<PathBuf> {
        session.navigate(target)?;
        if !session.click(&self.button)? {
            return Err(EnrichError::SeedUnavailable(format!("download control {} not found", self.button)));
        }
        info!("Clicked download control, waiting for CSV...");
        let file = wait_until("seed CSV download", self.wait, || find_csv(dir))?;
        info!("CSV downloaded: {:?}", file);
        Ok(file)
    }
}

/// First completed `*.csv` file in `dir`; partial downloads are ignored.
pub fn find_csv(dir: &Path) -> Result<Option<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|e| EnrichError::SeedUnavailable(format!("{:?}: {}", dir, e)))?;
    Ok(entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .find(|p| p.is_file() && p.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))))
}

/// Removes a per-run download directory once its CSV has been read.
fn discard_download_dir(dir: &Path) {
    match fs::remove_dir_all(dir) {
        Ok(()) => debug!("Removed download directory {:?}", dir),
        Err(e) => warn!("Failed to remove download directory {:?}: {}", dir, e),
    }
}

impl SeedSource for BrowserDownloadSource {
    fn describe(&self) -> String {
        "browser download".to_string()
    }

    fn fetch_csv(&mut self, search_url: Option<&str>) -> Result<Vec<u8>> {
        let target = require_target(search_url)?;
        let dir = self.download_root.join(uuid::Uuid::new_v4().to_string());
        fs::create_dir_all(&dir).map_err(|e| EnrichError::SeedUnavailable(format!("{:?}: {}", dir, e)))?;
        let dir = dir.canonicalize().unwrap_or(dir);

        let mut options = self.options.clone();
        options.download_dir = Some(dir.clone());
        options.ready_locator = None;
        let mut session = ChromeSession::open(options)
            .map_err(|e| EnrichError::SeedUnavailable(e.to_string()))?;

        let result = self.download(&mut session, target, &dir);
        if let Err(e) = session.close() {
            warn!("Failed to close download session: {}", e);
        }
        let bytes = result.and_then(|file| {
            fs::read(&file).map_err(|e| EnrichError::SeedUnavailable(format!("{:?}: {}", file, e)))
        });
        discard_download_dir(&dir);
        bytes.map_err(|e| match e {
            EnrichError::Timeout { .. } | EnrichError::Navigation { .. } => EnrichError::SeedUnavailable(e.to_string()),
            other => other,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_url_encodes_search_query() {
        let url = export_url_for("https://patents.google.com/?q=(widget)&before=priority:20200101").unwrap();
        assert_eq!(
            url,
            "https://patents.google.com/xhr/query?url=q%3D%28widget%29%26before%3Dpriority%3A20200101&exp=&download=true"
        );
    }

    #[test]
    fn export_url_needs_a_query() {
        assert!(matches!(
            export_url_for("https://patents.google.com/"),
            Err(EnrichError::SeedUnavailable(_))
        ));
        assert!(export_url_for("not a url").is_err());
    }

    #[test]
    fn file_source_reads_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seed.csv");
        fs::write(&path, "banner\nresult link\nhttps://a\n").unwrap();
        let mut source = FileSource::new(&path);
        assert!(!source.needs_search_url());
        assert_eq!(source.fetch_csv(None).unwrap(), b"banner\nresult link\nhttps://a\n");
    }

    #[test]
    fn missing_file_is_seed_unavailable() {
        let mut source = FileSource::new("/nonexistent/seed.csv");
        assert!(matches!(source.fetch_csv(None), Err(EnrichError::SeedUnavailable(_))));
    }

    #[test]
    fn missing_target_is_seed_unavailable() {
        assert!(matches!(require_target(Some("  ")), Err(EnrichError::SeedUnavailable(_))));
        assert_eq!(require_target(Some(" https://x ")).unwrap(), "https://x");
    }

    #[test]
    fn download_dir_is_removed_with_its_files() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("run-1");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("export.csv"), "x").unwrap();

        discard_download_dir(&dir);
        assert!(!dir.exists());
        assert!(root.path().exists());
        // A second removal only logs.
        discard_download_dir(&dir);
    }

    #[test]
    fn find_csv_ignores_partial_downloads() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("export.csv.crdownload"), "").unwrap();
        assert_eq!(find_csv(dir.path()).unwrap(), None);
        fs::write(dir.path().join("export.CSV"), "x").unwrap();
        assert_eq!(find_csv(dir.path()).unwrap(), Some(dir.path().join("export.CSV")));
    }
}
