pub mod browser;
pub mod config;
pub mod delay_manager;
pub mod error;
pub mod extractor;
pub mod http_loader;
pub mod logger;
pub mod pipeline;
pub mod record_store;
pub mod resume_manager;
pub mod seed_source;
pub mod sheets;

// Exporting types for convenience
pub use browser::{BrowserOptions, ChromeSession, PageLoader};
pub use config::{Cli, PipelineConfig};
pub use error::EnrichError;
pub use extractor::{extract, Document, ExtractionRules, Locator};
pub use pipeline::{Pipeline, RunSummary};
pub use record_store::{Field, RecordTable};
pub use sheets::{CsvDirStore, GoogleSheetsClient, SheetStore};
