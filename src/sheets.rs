//! Spreadsheet persistence. A worksheet holds the whole record table,
//! header first; every sync rewrites it in full and row positions are the
//! row identity.

use crate::error::{EnrichError, Result};
use log::{debug, info, warn};
use regex::Regex;
use reqwest::blocking::{Client, RequestBuilder};
use serde_json::{json, Value};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

pub const DEFAULT_ROWS: usize = 1000;
pub const DEFAULT_COLS: usize = 20;

const SHEETS_API: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const DRIVE_FILES_API: &str = "https://www.googleapis.com/drive/v3/files";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorksheetHandle {
    pub title: String,
    pub sheet_id: i64,
    /// Grid capacity.
    pub rows: usize,
    pub cols: usize,
    /// Extent last known to hold data; anything past it is already blank.
    pub used_rows: usize,
    pub used_cols: usize,
}

impl WorksheetHandle {
    fn new(title: &str, sheet_id: i64, rows: usize, cols: usize) -> Self {
        WorksheetHandle {
            title: title.to_string(),
            sheet_id,
            rows,
            cols,
            used_rows: rows,
            used_cols: cols,
        }
    }
}

pub trait SheetStore {
    /// Existing worksheet by name, or a new one with the default capacity.
    fn get_or_create_worksheet(&mut self, name: &str) -> Result<WorksheetHandle>;

    /// Replaces the worksheet contents with `rows`, keeping their order.
    fn upsert_table(&mut self, handle: &mut WorksheetHandle, rows: &[Vec<String>]) -> Result<()>;

    /// The worksheet contents, or `None` when it holds nothing.
    fn read_table(&self, handle: &WorksheetHandle) -> Result<Option<Vec<Vec<String>>>>;

    /// Value of one A1 cell of a named worksheet.
    fn read_cell(&self, sheet: &str, cell: &str) -> Result<Option<String>>;
}

fn a1_pattern() -> Option<&'static Regex> {
    static A1: OnceLock<Option<Regex>> = OnceLock::new();
    A1.get_or_init(|| Regex::new(r"^([A-Za-z]{1,3})([1-9][0-9]*)$").ok())
        .as_ref()
}

/// Zero-based (row, column) of an A1 reference such as `B3`.
pub fn parse_a1(cell: &str) -> Option<(usize, usize)> {
    let caps = a1_pattern()?.captures(cell.trim())?;
    let col = caps[1]
        .to_ascii_uppercase()
        .bytes()
        .fold(0usize, |acc, b| acc * 26 + (b - b'A' + 1) as usize);
    let row: usize = caps[2].parse().ok()?;
    Some((row - 1, col - 1))
}

/// Column letters for a one-based column number: 1 → A, 27 → AA.
pub fn column_letter(mut n: usize) -> String {
    let mut out = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        out.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

fn quoted(sheet: &str) -> String {
    format!("'{}'", sheet.replace('\'', "''"))
}

fn table_width(rows: &[Vec<String>]) -> usize {
    rows.iter().map(Vec::len).max().unwrap_or(0)
}

fn cell_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Google Sheets v4 over REST with a caller-supplied OAuth bearer token.
pub struct GoogleSheetsClient {
    client: Client,
    token: String,
    spreadsheet_id: String,
}

impl GoogleSheetsClient {
    pub fn new(token: &str, spreadsheet_id: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EnrichError::Config(format!("cannot build HTTP client: {}", e)))?;
        Ok(GoogleSheetsClient {
            client,
            token: token.to_string(),
            spreadsheet_id: spreadsheet_id.to_string(),
        })
    }

    /// Resolves a spreadsheet by its title through the Drive files listing.
    pub fn open_by_name(token: &str, name: &str, timeout: Duration) -> Result<Self> {
        let mut this = Self::new(token, "", timeout)?;
        let query = format!(
            "name = '{}' and mimeType = 'application/vnd.google-apps.spreadsheet' and trashed = false",
            name.replace('\'', "\\'")
        );
        let url = format!(
            "{}?q={}&fields=files(id,name)",
            DRIVE_FILES_API,
            urlencoding::encode(&query)
        );
        let body = this.execute(this.client.get(&url))?;
        let id = body["files"]
            .as_array()
            .and_then(|files| files.first())
            .and_then(|f| f["id"].as_str())
            .ok_or_else(|| EnrichError::store(format!("spreadsheet '{}' not found", name)))?;
        info!("Resolved spreadsheet '{}' to {}", name, id);
        this.spreadsheet_id = id.to_string();
        Ok(this)
    }

    fn execute(&self, req: RequestBuilder) -> Result<Value> {
        let resp = req.bearer_auth(&self.token).send().map_err(EnrichError::store)?;
        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().unwrap_or_default();
            return Err(EnrichError::store(format!("HTTP {}: {}", status, detail.trim())));
        }
        resp.json::<Value>().map_err(EnrichError::store)
    }

    fn values_url(&self, range: &str) -> String {
        format!(
            "{}/{}/values/{}",
            SHEETS_API,
            self.spreadsheet_id,
            urlencoding::encode(range)
        )
    }

    fn batch_update(&self, requests: Value) -> Result<Value> {
        let url = format!("{}/{}:batchUpdate", SHEETS_API, self.spreadsheet_id);
        self.execute(self.client.post(&url).json(&json!({ "requests": requests })))
    }

    fn worksheets(&self) -> Result<Vec<WorksheetHandle>> {
        let url = format!("{}/{}?fields=sheets.properties", SHEETS_API, self.spreadsheet_id);
        let body = self.execute(self.client.get(&url))?;
        Ok(parse_sheet_list(&body))
    }

    fn grow(&self, handle: &mut WorksheetHandle, rows: usize, cols: usize) -> Result<()> {
        info!("Growing worksheet '{}' to {}x{}", handle.title, rows, cols);
        self.batch_update(json!([{
            "updateSheetProperties": {
                "properties": {
                    "sheetId": handle.sheet_id,
                    "gridProperties": { "rowCount": rows, "columnCount": cols }
                },
                "fields": "gridProperties(rowCount,columnCount)"
            }
        }]))?;
        handle.rows = rows;
        handle.cols = cols;
        Ok(())
    }

    fn clear(&self, range: &str) -> Result<()> {
        let url = format!("{}:clear", self.values_url(range));
        self.execute(self.client.post(&url).json(&json!({})))?;
        Ok(())
    }
}

/// Calls needed to replace a worksheet's contents with a `height`×`width`
/// table, in execution order: grow, write, then clear.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertPlan {
    /// New grid size when the table does not fit.
    pub grow_to: Option<(usize, usize)>,
    pub write: Option<String>,
    /// Cells left over from a larger previous table. Cleared only after the
    /// write, so the worksheet is never blank between the calls.
    pub clear: Vec<String>,
}

pub fn plan_upsert(handle: &WorksheetHandle, height: usize, width: usize) -> UpsertPlan {
    let sheet = quoted(&handle.title);
    let grow_to = (height > handle.rows || width > handle.cols)
        .then(|| (height.max(handle.rows), width.max(handle.cols)));
    let write = (height > 0 && width > 0)
        .then(|| format!("{}!A1:{}{}", sheet, column_letter(width), height));

    let mut clear = Vec::new();
    if handle.used_rows > height {
        clear.push(format!("{}!{}:{}", sheet, height + 1, handle.used_rows));
    }
    if write.is_some() && handle.used_cols > width {
        clear.push(format!(
            "{}!{}1:{}{}",
            sheet,
            column_letter(width + 1),
            column_letter(handle.used_cols),
            height
        ));
    }
    UpsertPlan { grow_to, write, clear }
}

fn parse_sheet_list(body: &Value) -> Vec<WorksheetHandle> {
    body["sheets"]
        .as_array()
        .map(|sheets| {
            sheets
                .iter()
                .map(|s| {
                    let p = &s["properties"];
                    WorksheetHandle::new(
                        p["title"].as_str().unwrap_or_default(),
                        p["sheetId"].as_i64().unwrap_or_default(),
                        p["gridProperties"]["rowCount"].as_u64().unwrap_or(0) as usize,
                        p["gridProperties"]["columnCount"].as_u64().unwrap_or(0) as usize,
                    )
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_values(body: &Value) -> Vec<Vec<String>> {
    body["values"]
        .as_array()
        .map(|rows| {
            rows.iter()
                .map(|row| {
                    row.as_array()
                        .map(|cells| cells.iter().map(cell_string).collect())
                        .unwrap_or_default()
                })
                .collect()
        })
        .unwrap_or_default()
}

impl SheetStore for GoogleSheetsClient {
    fn get_or_create_worksheet(&mut self, name: &str) -> Result<WorksheetHandle> {
        if let Some(existing) = self.worksheets()?.into_iter().find(|w| w.title == name) {
            debug!("Found worksheet '{}' ({}x{})", name, existing.rows, existing.cols);
            return Ok(existing);
        }
        info!("Worksheet '{}' not found; creating it.", name);
        let body = self.batch_update(json!([{
            "addSheet": {
                "properties": {
                    "title": name,
                    "gridProperties": { "rowCount": DEFAULT_ROWS, "columnCount": DEFAULT_COLS }
                }
            }
        }]))?;
        let sheet_id = body["replies"][0]["addSheet"]["properties"]["sheetId"]
            .as_i64()
            .ok_or_else(|| EnrichError::store("addSheet reply without sheetId"))?;
        let mut handle = WorksheetHandle::new(name, sheet_id, DEFAULT_ROWS, DEFAULT_COLS);
        handle.used_rows = 0;
        handle.used_cols = 0;
        Ok(handle)
    }

    fn upsert_table(&mut self, handle: &mut WorksheetHandle, rows: &[Vec<String>]) -> Result<()> {
        let height = rows.len();
        let width = table_width(rows);
        let plan = plan_upsert(handle, height, width);

        if let Some((grid_rows, grid_cols)) = plan.grow_to {
            self.grow(handle, grid_rows, grid_cols)?;
        }
        if let Some(range) = &plan.write {
            let url = format!("{}?valueInputOption=RAW", self.values_url(range));
            self.execute(self.client.put(&url).json(&json!({
                "range": range,
                "majorDimension": "ROWS",
                "values": rows,
            })))?;
        }
        for range in &plan.clear {
            self.clear(range)?;
        }
        handle.used_rows = height;
        handle.used_cols = width;
        debug!("Synced {} rows to '{}'", height, handle.title);
        Ok(())
    }

    fn read_table(&self, handle: &WorksheetHandle) -> Result<Option<Vec<Vec<String>>>> {
        let body = self.execute(self.client.get(self.values_url(&quoted(&handle.title))))?;
        let rows = parse_values(&body);
        Ok((!rows.is_empty()).then_some(rows))
    }

    fn read_cell(&self, sheet: &str, cell: &str) -> Result<Option<String>> {
        let range = format!("{}!{}", quoted(sheet), cell);
        let body = self.execute(self.client.get(self.values_url(&range)))?;
        Ok(parse_values(&body)
            .into_iter()
            .next()
            .and_then(|row| row.into_iter().next())
            .filter(|v| !v.trim().is_empty()))
    }
}

/// Offline store: one CSV file per worksheet inside a directory.
pub struct CsvDirStore {
    dir: PathBuf,
}

impl CsvDirStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|e| EnrichError::store(format!("cannot create {:?}: {}", dir, e)))?;
        Ok(CsvDirStore { dir })
    }

    fn path_for(&self, sheet: &str) -> PathBuf {
        self.dir.join(format!("{}.csv", sheet))
    }

    fn read_rows(path: &Path) -> Result<Vec<Vec<String>>> {
        let file = File::open(path).map_err(|e| EnrichError::store(format!("{:?}: {}", path, e)))?;
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(file);
        let mut rows = Vec::new();
        for record in rdr.records() {
            let record = record.map_err(EnrichError::store)?;
            rows.push(record.iter().map(str::to_string).collect());
        }
        Ok(rows)
    }
}

impl SheetStore for CsvDirStore {
    fn get_or_create_worksheet(&mut self, name: &str) -> Result<WorksheetHandle> {
        let path = self.path_for(name);
        if !path.exists() {
            info!("Worksheet '{}' not found; creating {:?}", name, path);
            File::create(&path).map_err(|e| EnrichError::store(format!("{:?}: {}", path, e)))?;
        }
        Ok(WorksheetHandle::new(name, 0, DEFAULT_ROWS, DEFAULT_COLS))
    }

    fn upsert_table(&mut self, handle: &mut WorksheetHandle, rows: &[Vec<String>]) -> Result<()> {
        let path = self.path_for(&handle.title);
        let tmp = path.with_extension("csv.tmp");
        {
            let file = File::create(&tmp).map_err(|e| EnrichError::store(format!("{:?}: {}", tmp, e)))?;
            let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(file);
            for row in rows {
                writer.write_record(row).map_err(EnrichError::store)?;
            }
            writer.flush().map_err(EnrichError::store)?;
        }
        fs::rename(&tmp, &path).map_err(|e| EnrichError::store(format!("{:?}: {}", path, e)))?;
        handle.used_rows = rows.len();
        handle.used_cols = table_width(rows);
        Ok(())
    }

    fn read_table(&self, handle: &WorksheetHandle) -> Result<Option<Vec<Vec<String>>>> {
        let rows = Self::read_rows(&self.path_for(&handle.title))?;
        Ok((!rows.is_empty()).then_some(rows))
    }

    fn read_cell(&self, sheet: &str, cell: &str) -> Result<Option<String>> {
        let (row, col) = parse_a1(cell)
            .ok_or_else(|| EnrichError::Config(format!("invalid cell reference '{}'", cell)))?;
        let path = self.path_for(sheet);
        if !path.exists() {
            warn!("Worksheet '{}' does not exist in {:?}", sheet, self.dir);
            return Ok(None);
        }
        Ok(Self::read_rows(&path)?
            .get(row)
            .and_then(|r| r.get(col))
            .filter(|v| !v.trim().is_empty())
            .cloned())
    }
}
