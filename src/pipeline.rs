//! Drives one enrichment run: ingest or rehydrate the table, visit every
//! pending row, and write the full table back after each one.
//!
//! A failed row is logged and left blank for the next run. Only failing
//! to obtain the table at all ends a run early.

use crate::browser::PageLoader;
use crate::config::PipelineConfig;
use crate::error::{EnrichError, Result};
use crate::extractor::{extract, Document};
use crate::record_store::{Field, RecordTable};
use crate::resume_manager::{self, StartMode};
use crate::seed_source::SeedSource;
use crate::sheets::{SheetStore, WorksheetHandle};
use log::{debug, error, info, warn};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOutcome {
    /// Both fields now hold text.
    Filled,
    /// Page loaded but at least one field had no match.
    Partial,
    /// Navigation or extraction fault; row left unchanged.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub start_mode: StartMode,
    pub total_rows: usize,
    pub pending: usize,
    pub visited: usize,
    pub succeeded: usize,
    pub partial: usize,
    pub failed: usize,
    /// Unfilled rows never visited because they have no link.
    pub skipped: usize,
    pub remaining_unfilled: usize,
    pub cancelled: bool,
    /// Last write to the store failed; the worksheet lags the table.
    pub unsynced: bool,
}

impl RunSummary {
    fn new(start_mode: StartMode, total_rows: usize, pending: usize, skipped: usize) -> Self {
        RunSummary {
            start_mode,
            total_rows,
            pending,
            visited: 0,
            succeeded: 0,
            partial: 0,
            failed: 0,
            skipped,
            remaining_unfilled: 0,
            cancelled: false,
            unsynced: false,
        }
    }

    fn record(&mut self, outcome: RowOutcome) {
        self.visited += 1;
        match outcome {
            RowOutcome::Filled => self.succeeded += 1,
            RowOutcome::Partial => self.partial += 1,
            RowOutcome::Failed => self.failed += 1,
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} pending, {} succeeded, {} failed",
            self.pending, self.succeeded, self.failed
        )?;
        if self.partial > 0 {
            write!(f, ", {} partial", self.partial)?;
        }
        if self.skipped > 0 {
            write!(f, ", {} skipped", self.skipped)?;
        }
        write!(f, "; {} of {} rows still unfilled", self.remaining_unfilled, self.total_rows)?;
        if self.cancelled {
            write!(f, " (cancelled)")?;
        }
        Ok(())
    }
}

/// Holds the page loader for the run. Opened on first use, closed once on
/// every exit path.
struct LoaderSlot<L: PageLoader, O: FnMut() -> Result<L>> {
    loader: Option<L>,
    open: O,
}

impl<L: PageLoader, O: FnMut() -> Result<L>> LoaderSlot<L, O> {
    fn new(open: O) -> Self {
        LoaderSlot { loader: None, open }
    }

    fn get(&mut self) -> Result<&mut L> {
        if self.loader.is_none() {
            self.loader = Some((self.open)()?);
        }
        match self.loader.as_mut() {
            Some(loader) => Ok(loader),
            None => Err(EnrichError::navigation("", "page loader unavailable")),
        }
    }

    fn close(&mut self) {
        if let Some(mut loader) = self.loader.take() {
            if let Err(e) = loader.close() {
                warn!("Failed to close page loader: {}", e);
            }
        }
    }
}

impl<L: PageLoader, O: FnMut() -> Result<L>> Drop for LoaderSlot<L, O> {
    fn drop(&mut self) {
        self.close();
    }
}

pub struct Pipeline<S: SheetStore> {
    store: S,
    config: PipelineConfig,
    cancel: Arc<AtomicBool>,
}

impl<S: SheetStore> Pipeline<S> {
    pub fn new(store: S, config: PipelineConfig) -> Self {
        Pipeline {
            store,
            config,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Setting the flag stops the run before the next pending row.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn run<L, O>(&mut self, seed: &mut dyn SeedSource, open_loader: O) -> Result<RunSummary>
    where
        L: PageLoader,
        O: FnMut() -> Result<L>,
    {
        let mut handle = self.store.get_or_create_worksheet(&self.config.results_sheet)?;
        let (mut table, start_mode) = self.load_table(&handle, seed)?;

        if start_mode == StartMode::ColdStart {
            info!("Writing {} freshly ingested rows to '{}'.", table.len(), handle.title);
            self.store.upsert_table(&mut handle, &table.to_rows())?;
        }

        let resume_manager::Pending { rows: mut pending, skipped } = resume_manager::pending(&table);
        if let Some(limit) = self.config.limit {
            pending.truncate(limit);
        }
        let mut summary = RunSummary::new(start_mode, table.len(), pending.len(), skipped.len());

        let mut loader = LoaderSlot::new(open_loader);
        for (n, &idx) in pending.iter().enumerate() {
            if n > 0 {
                self.config.politeness.pause();
            }
            // Checked after the pause so an interrupt during it still stops the run.
            if self.cancel.load(Ordering::SeqCst) {
                info!("Cancellation requested; stopping before row {}.", idx);
                summary.cancelled = true;
                break;
            }

            info!("Processing row {} ({}/{}) | URL: {}", idx, n + 1, pending.len(), table.link(idx));
            let outcome = match self.enrich_row(&mut loader, &mut table, idx) {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("Error at row {}: {}", idx, e);
                    RowOutcome::Failed
                }
            };
            summary.record(outcome);

            summary.unsynced = !self.sync(&mut handle, &table);
        }
        loader.close();

        if summary.unsynced {
            warn!("Retrying final sync after an earlier failure.");
            summary.unsynced = !self.sync(&mut handle, &table);
        }

        summary.remaining_unfilled = resume_manager::unfilled_count(&table);
        info!("Run complete: {}", summary);
        Ok(summary)
    }

    fn load_table(&mut self, handle: &WorksheetHandle, seed: &mut dyn SeedSource) -> Result<(RecordTable, StartMode)> {
        let existing = self.store.read_table(handle)?;
        match StartMode::for_worksheet(existing.as_deref()) {
            StartMode::Resume => {
                info!("Resuming from worksheet '{}'.", handle.title);
                let rows = existing.unwrap_or_default();
                Ok((RecordTable::from_external_table(rows)?, StartMode::Resume))
            }
            StartMode::ColdStart => {
                let target = if seed.needs_search_url() {
                    self.search_target()?
                } else {
                    None
                };
                info!("Cold start: acquiring seed data via {}.", seed.describe());
                let bytes = seed.fetch_csv(target.as_deref())?;
                Ok((RecordTable::ingest(&bytes, self.config.header_row)?, StartMode::ColdStart))
            }
        }
    }

    fn search_target(&self) -> Result<Option<String>> {
        if let Some(url) = &self.config.search_url {
            return Ok(Some(url.clone()));
        }
        let url = self
            .store
            .read_cell(&self.config.input_sheet, &self.config.input_cell)?;
        match &url {
            Some(u) => info!("Search URL from {}: {}", self.config.input_cell, u),
            None => warn!(
                "No search URL in '{}'!{}",
                self.config.input_sheet, self.config.input_cell
            ),
        }
        Ok(url)
    }

    /// Extracts every blank field of one row. Values are applied only when
    /// the whole row extracted without a fault.
    fn enrich_row<L, O>(&self, loader: &mut LoaderSlot<L, O>, table: &mut RecordTable, idx: usize) -> Result<RowOutcome>
    where
        L: PageLoader,
        O: FnMut() -> Result<L>,
    {
        let link = table.link(idx).trim().to_string();
        let page = loader.get()?.navigate(&link)?;
        if let Some(title) = page.title() {
            debug!("Row {} page title: {}", idx, title);
        }

        let mut found = Vec::new();
        for field in Field::ALL {
            if !table.field(idx, field).trim().is_empty() {
                continue;
            }
            let value = extract(&page, self.config.rules.for_field(field))?;
            if value.is_empty() {
                warn!("{} not found for row {}", field.column(), idx);
            } else {
                found.push((field, value));
            }
        }

        for (field, value) in found {
            table.set_field(idx, field, value);
        }
        Ok(if table.is_filled(idx) {
            RowOutcome::Filled
        } else {
            RowOutcome::Partial
        })
    }

    fn sync(&mut self, handle: &mut WorksheetHandle, table: &RecordTable) -> bool {
        match self.store.upsert_table(handle, &table.to_rows()) {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to sync '{}': {}", handle.title, e);
                false
            }
        }
    }
}
