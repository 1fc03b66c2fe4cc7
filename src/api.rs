//! Google Sheets v4 REST client.
//!
//! Blocking HTTP implementation of `SheetClient`. Authenticates with a
//! bearer access token; values are read unformatted so numbers come back
//! as JSON numbers.

use reqwest::blocking::{Client, RequestBuilder};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::error::{MirrorError, MirrorResult};
use crate::mirror::{cell_text, column_letter, records_from_grid, CellUpdate, SheetClient, SheetRecord};

/// Default timeout for API requests (30 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Convert a `reqwest::Error` into a user-friendly message.
fn friendly_error(url: &str, err: &reqwest::Error) -> MirrorError {
    if err.is_connect() {
        return MirrorError::Network(format!("Cannot reach spreadsheet API at {url}"));
    }
    if err.is_timeout() {
        return MirrorError::Network(format!("Connection to {url} timed out"));
    }
    if err.is_builder() {
        return MirrorError::Network(format!("Invalid spreadsheet API URL: {url}"));
    }
    MirrorError::Network(format!("Network error communicating with {url}: {err}"))
}

/// Convert an HTTP status code into a user-friendly message.
fn status_error(status: StatusCode) -> String {
    match status.as_u16() {
        401 => "Spreadsheet access token is invalid or expired".to_string(),
        403 => "Service account has no access to the spreadsheet".to_string(),
        404 => "Spreadsheet or sheet not found".to_string(),
        429 => "Spreadsheet API quota exceeded".to_string(),
        s if s >= 500 => format!("Spreadsheet API server error (HTTP {s})"),
        s => format!("Unexpected response from spreadsheet API (HTTP {s})"),
    }
}

fn percent_encode(input: &str) -> String {
    let mut encoded = String::with_capacity(input.len());
    for b in input.bytes() {
        let is_unreserved =
            b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.' || b == b'~';
        if is_unreserved {
            encoded.push(b as char);
        } else {
            encoded.push_str(&format!("%{b:02X}"));
        }
    }
    encoded
}

/// Quote a sheet title for A1 notation when it contains anything beyond
/// letters, digits and underscores.
fn quoted_sheet(sheet: &str) -> String {
    if sheet.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        sheet.to_string()
    } else {
        format!("'{}'", sheet.replace('\'', "''"))
    }
}

fn cell_range(sheet: &str, row: usize, column: usize) -> String {
    format!("{}!{}{}", quoted_sheet(sheet), column_letter(column), row)
}

/// Cells are stored exactly as sent. Codes such as "0042" stay text and
/// names such as "3/4" are never read as dates.
const VALUE_INPUT_OPTION: &str = "RAW";

fn append_query() -> [(&'static str, &'static str); 2] {
    [
        ("valueInputOption", VALUE_INPUT_OPTION),
        ("insertDataOption", "INSERT_ROWS"),
    ]
}

fn update_query() -> [(&'static str, &'static str); 1] {
    [("valueInputOption", VALUE_INPUT_OPTION)]
}

fn batch_update_body(sheet: &str, updates: &[CellUpdate]) -> Value {
    let data: Vec<Value> = updates
        .iter()
        .map(|u| {
            json!({
                "range": cell_range(sheet, u.row, u.column),
                "values": [[u.value.clone()]],
            })
        })
        .collect();
    json!({
        "valueInputOption": VALUE_INPUT_OPTION,
        "data": data,
    })
}

/// Pull the `values` grid out of a values.get response.
fn grid_from_response(body: &Value) -> MirrorResult<Vec<Vec<Value>>> {
    match body.get("values") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(rows)) => rows
            .iter()
            .map(|row| match row {
                Value::Array(cells) => Ok(cells.clone()),
                other => Err(MirrorError::Decode(format!("row is not an array: {other}"))),
            })
            .collect(),
        Some(other) => Err(MirrorError::Decode(format!(
            "values is not an array: {other}"
        ))),
    }
}

/// Find the numeric sheet id for a tab title in a spreadsheets.get response.
fn sheet_id_from_metadata(body: &Value, title: &str) -> Option<i64> {
    body.get("sheets")?
        .as_array()?
        .iter()
        .filter_map(|s| s.get("properties"))
        .find(|p| p.get("title").and_then(Value::as_str) == Some(title))
        .and_then(|p| p.get("sheetId"))
        .and_then(Value::as_i64)
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct SheetsApiClient {
    http: Client,
    base_url: String,
    spreadsheet_id: String,
    token: Zeroizing<String>,
    sheet_ids: Mutex<HashMap<String, i64>>,
}

impl SheetsApiClient {
    pub fn new(base_url: &str, spreadsheet_id: &str, token: Zeroizing<String>) -> MirrorResult<Self> {
        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| MirrorError::Network(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            spreadsheet_id: spreadsheet_id.trim().to_string(),
            token,
            sheet_ids: Mutex::new(HashMap::new()),
        })
    }

    fn spreadsheet_url(&self) -> String {
        format!(
            "{}/v4/spreadsheets/{}",
            self.base_url,
            percent_encode(&self.spreadsheet_id)
        )
    }

    fn values_url(&self, range: &str) -> String {
        format!("{}/values/{}", self.spreadsheet_url(), percent_encode(range))
    }

    /// Send an authenticated request and decode the JSON body.
    fn send(&self, req: RequestBuilder, what: &str) -> MirrorResult<Value> {
        let start = Instant::now();
        let resp = req
            .bearer_auth(self.token.as_str())
            .send()
            .map_err(|e| friendly_error(&self.base_url, &e))?;
        let status = resp.status();
        let body_text = resp.text().unwrap_or_default();
        debug!(
            op = what,
            status = status.as_u16(),
            latency_ms = start.elapsed().as_millis() as u64,
            "sheets api call"
        );

        if !status.is_success() {
            let detail = serde_json::from_str::<Value>(&body_text)
                .ok()
                .and_then(|v| {
                    v.get("error")
                        .and_then(|e| e.get("message"))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                });
            let message = match detail {
                Some(d) => format!("{} (HTTP {}): {d}", status_error(status), status.as_u16()),
                None => status_error(status),
            };
            return Err(MirrorError::Status(message));
        }

        if body_text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body_text).map_err(|e| MirrorError::Decode(e.to_string()))
    }

    fn read_grid(&self, sheet: &str) -> MirrorResult<Vec<Vec<Value>>> {
        let req = self
            .http
            .get(self.values_url(&quoted_sheet(sheet)))
            .query(&[("valueRenderOption", "UNFORMATTED_VALUE")]);
        let body = self.send(req, "values.get")?;
        grid_from_response(&body)
    }

    fn sheet_id(&self, title: &str) -> MirrorResult<i64> {
        if let Ok(cache) = self.sheet_ids.lock() {
            if let Some(id) = cache.get(title) {
                return Ok(*id);
            }
        }
        let req = self
            .http
            .get(self.spreadsheet_url())
            .query(&[("fields", "sheets.properties")]);
        let body = self.send(req, "spreadsheets.get")?;
        let id = sheet_id_from_metadata(&body, title)
            .ok_or_else(|| MirrorError::Status(format!("Sheet '{title}' not found")))?;
        if let Ok(mut cache) = self.sheet_ids.lock() {
            cache.insert(title.to_string(), id);
        }
        Ok(id)
    }
}

impl SheetClient for SheetsApiClient {
    fn read_records(&self, sheet: &str) -> MirrorResult<Vec<SheetRecord>> {
        let grid = self.read_grid(sheet)?;
        Ok(records_from_grid(&grid))
    }

    fn append_row(&self, sheet: &str, row: Vec<Value>) -> MirrorResult<()> {
        let url = format!("{}:append", self.values_url(&quoted_sheet(sheet)));
        let req = self
            .http
            .post(url)
            .query(&append_query())
            .json(&json!({ "values": [row] }));
        self.send(req, "values.append")?;
        info!(sheet, "row appended");
        Ok(())
    }

    fn find_row(&self, sheet: &str, column: usize, key: &str) -> MirrorResult<Option<usize>> {
        let grid = self.read_grid(sheet)?;
        Ok(grid
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, row)| row.get(column - 1).map(cell_text).as_deref() == Some(key))
            .map(|(i, _)| i + 1))
    }

    fn update_cell(
        &self,
        sheet: &str,
        row: usize,
        column: usize,
        value: Value,
    ) -> MirrorResult<()> {
        let req = self
            .http
            .put(self.values_url(&cell_range(sheet, row, column)))
            .query(&update_query())
            .json(&json!({ "values": [[value]] }));
        self.send(req, "values.update")?;
        Ok(())
    }

    fn delete_row(&self, sheet: &str, row: usize) -> MirrorResult<()> {
        let sheet_id = self.sheet_id(sheet)?;
        let url = format!("{}:batchUpdate", self.spreadsheet_url());
        let req = self.http.post(url).json(&json!({
            "requests": [{
                "deleteDimension": {
                    "range": {
                        "sheetId": sheet_id,
                        "dimension": "ROWS",
                        "startIndex": row - 1,
                        "endIndex": row,
                    }
                }
            }]
        }));
        self.send(req, "spreadsheets.batchUpdate")?;
        info!(sheet, row, "row deleted");
        Ok(())
    }

    fn batch_update(&self, sheet: &str, updates: &[CellUpdate]) -> MirrorResult<()> {
        let url = format!("{}/values:batchUpdate", self.spreadsheet_url());
        let req = self.http.post(url).json(&batch_update_body(sheet, updates));
        self.send(req, "values.batchUpdate")?;
        Ok(())
    }
}
