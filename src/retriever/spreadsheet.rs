//! Spreadsheet retriever.
//!
//! Each sheet of the spreadsheet holds one metric: a header row followed by
//! `date | value` rows. The sheet title is the metric name.

use std::{
    collections::{BTreeMap, HashMap},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use super::{
    http::{base_url, HttpClient},
    RetrieveError, RetrieveWindow, Retriever, SourceId, SourceOutput,
};
use crate::config::SpreadsheetSettings;

#[derive(Debug, Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<Sheet>,
}

#[derive(Debug, Deserialize)]
struct Sheet {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SheetProperties {
    title: String,
    grid_properties: Option<GridProperties>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GridProperties {
    row_count: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchGetResponse {
    #[serde(default)]
    value_ranges: Vec<ValueRange>,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

/// A trimmed cell: numeric when it parses as a number, text otherwise.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    Number(f64),
    Text(String),
}

impl CellValue {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();

        match trimmed.parse::<f64>() {
            Ok(number) if !trimmed.is_empty() && number.is_finite() => CellValue::Number(number),
            _ => CellValue::Text(trimmed.to_string()),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(number) => Some(*number),
            CellValue::Text(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SheetRow {
    pub date: NaiveDate,
    pub value: CellValue,
}

/// Metric name -> rows in sheet order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SpreadsheetOutput {
    pub metrics: BTreeMap<String, Vec<SheetRow>>,
}

impl SpreadsheetOutput {
    pub fn series(&self, metric_name: &str) -> &[SheetRow] {
        self.metrics
            .get(metric_name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Numeric value recorded for exactly `date`.
    pub fn value_on(&self, metric_name: &str, date: NaiveDate) -> Option<f64> {
        self.series(metric_name)
            .iter()
            .rev()
            .find(|row| row.date == date)
            .and_then(|row| row.value.as_number())
    }

    /// Most recent numeric row dated on or before `date`.
    pub fn latest_row_on_or_before(
        &self,
        metric_name: &str,
        date: NaiveDate,
    ) -> Option<(NaiveDate, f64)> {
        self.series(metric_name)
            .iter()
            .filter(|row| row.date <= date)
            .filter_map(|row| row.value.as_number().map(|value| (row.date, value)))
            .max_by_key(|(row_date, _)| *row_date)
    }

    pub fn latest_on_or_before(&self, metric_name: &str, date: NaiveDate) -> Option<f64> {
        self.latest_row_on_or_before(metric_name, date)
            .map(|(_, value)| value)
    }
}

pub struct SpreadsheetRetriever {
    http: HttpClient,
    base_url: Url,
    spreadsheet_id: String,
    api_key: String,
}

impl SpreadsheetRetriever {
    pub fn new(
        settings: &SpreadsheetSettings,
        request_timeout: Duration,
    ) -> Result<Self, RetrieveError> {
        Ok(Self {
            http: HttpClient::new(SourceId::Spreadsheet, request_timeout)?,
            base_url: base_url(&settings.base_url)?,
            spreadsheet_id: settings.spreadsheet_id.clone(),
            api_key: settings.api_key.clone(),
        })
    }

    fn endpoint(&self, tail: Option<&str>) -> Result<Url, RetrieveError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                RetrieveError::Config("spreadsheet base URL cannot be a base".into())
            })?;
            segments.pop_if_empty().push("spreadsheets").push(&self.spreadsheet_id);
            if let Some(tail) = tail {
                segments.push(tail);
            }
        }
        url.query_pairs_mut().append_pair("key", &self.api_key);
        Ok(url)
    }

    async fn get_sheets(&self) -> Result<Vec<Sheet>, RetrieveError> {
        let meta: SpreadsheetMeta = self.http.get_json(self.endpoint(None)?).await?;
        Ok(meta.sheets)
    }

    async fn get_sheets_values(&self, sheets: &[Sheet]) -> Result<Vec<ValueRange>, RetrieveError> {
        let mut url = self.endpoint(Some("values:batchGet"))?;
        {
            let mut query = url.query_pairs_mut();
            for range in ranges(sheets) {
                query.append_pair("ranges", &range);
            }
        }

        let response: BatchGetResponse = self.http.get_json(url).await?;
        Ok(response.value_ranges)
    }

    async fn retrieve_all(&self) -> Result<SpreadsheetOutput, RetrieveError> {
        let sheets = self.get_sheets().await?;
        if sheets.is_empty() {
            return Ok(SpreadsheetOutput::default());
        }

        let value_ranges = self.get_sheets_values(&sheets).await?;
        serialize(&sheets, value_ranges)
    }
}

/// One `'title'!A1:B{rows}` range per sheet.
fn ranges(sheets: &[Sheet]) -> Vec<String> {
    sheets
        .iter()
        .map(|sheet| {
            let rows = sheet
                .properties
                .grid_properties
                .as_ref()
                .map(|grid| grid.row_count)
                .unwrap_or(1000);
            format!("'{}'!A1:B{}", sheet.properties.title, rows)
        })
        .collect()
}

fn cell_text(cell: &Value) -> String {
    match cell {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn parse_sheet_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();

    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(datetime) = DateTime::parse_from_rfc3339(raw) {
        return Some(datetime.naive_utc().date());
    }
    if let Ok(datetime) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(datetime.date());
    }
    NaiveDate::parse_from_str(raw, "%m/%d/%Y").ok()
}

/// Turn one sheet's raw rows into dated cells. Columns are located through the
/// header row, falling back to `A = date`, `B = value`.
///
/// A date appearing on several rows keeps the value of the last one.
fn serialize_sheet(title: &str, values: &[Vec<Value>]) -> Vec<SheetRow> {
    let Some((header, rows)) = values.split_first() else {
        return Vec::new();
    };

    let column = |name: &str, fallback: usize| {
        header
            .iter()
            .position(|cell| cell_text(cell).trim().eq_ignore_ascii_case(name))
            .unwrap_or(fallback)
    };
    let date_column = column("date", 0);
    let value_column = column("value", 1);

    let mut series: Vec<SheetRow> = Vec::with_capacity(rows.len());
    let mut positions: HashMap<NaiveDate, usize> = HashMap::new();
    for row in rows {
        let date_text = row.get(date_column).map(cell_text).unwrap_or_default();
        let Some(date) = parse_sheet_date(&date_text) else {
            if !date_text.trim().is_empty() {
                warn!(
                    "[{}] sheet '{}': skipping row with unparseable date '{}'",
                    SourceId::Spreadsheet,
                    title,
                    date_text
                );
            }
            continue;
        };

        let value = row
            .get(value_column)
            .map(|cell| CellValue::parse(&cell_text(cell)))
            .unwrap_or_else(|| CellValue::Text(String::new()));

        match positions.get(&date) {
            Some(&position) => {
                warn!(
                    "[{}] sheet '{}': duplicate row for {}, keeping the last one",
                    SourceId::Spreadsheet,
                    title,
                    date
                );
                series[position].value = value;
            },
            None => {
                positions.insert(date, series.len());
                series.push(SheetRow { date, value });
            },
        }
    }

    series
}

fn serialize(
    sheets: &[Sheet],
    value_ranges: Vec<ValueRange>,
) -> Result<SpreadsheetOutput, RetrieveError> {
    if value_ranges.len() != sheets.len() {
        return Err(RetrieveError::Schema(format!(
            "expected {} value ranges, got {}",
            sheets.len(),
            value_ranges.len()
        )));
    }

    let metrics = sheets
        .iter()
        .zip(value_ranges)
        .map(|(sheet, range)| {
            let title = sheet.properties.title.clone();
            let series = serialize_sheet(&title, &range.values);
            (title, series)
        })
        .collect();

    Ok(SpreadsheetOutput { metrics })
}

#[async_trait]
impl Retriever for SpreadsheetRetriever {
    fn source(&self) -> SourceId {
        SourceId::Spreadsheet
    }

    async fn retrieve(&self, _window: &RetrieveWindow) -> Result<SourceOutput, RetrieveError> {
        Ok(SourceOutput::Spreadsheet(self.retrieve_all().await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn sheet(title: &str, rows: u32) -> Sheet {
        Sheet {
            properties: SheetProperties {
                title: title.to_string(),
                grid_properties: Some(GridProperties { row_count: rows }),
            },
        }
    }

    #[test]
    fn test_cell_coercion() {
        assert_eq!(CellValue::parse(" 23 "), CellValue::Number(23.0));
        assert_eq!(CellValue::parse("0.35"), CellValue::Number(0.35));
        assert_eq!(
            CellValue::parse("1,000"),
            CellValue::Text("1,000".to_string())
        );
        assert_eq!(
            CellValue::parse("  n/a "),
            CellValue::Text("n/a".to_string())
        );
        assert_eq!(CellValue::parse("NaN"), CellValue::Text("NaN".to_string()));
    }

    #[test]
    fn test_empty_cell_is_not_zero() {
        assert_eq!(CellValue::parse("   "), CellValue::Text(String::new()));
        assert_eq!(CellValue::parse("").as_number(), None);
    }

    #[test]
    fn test_ranges_from_sheet_schema() {
        assert_eq!(
            ranges(&[sheet("test", 2)]),
            vec!["'test'!A1:B2".to_string()]
        );
    }

    #[test]
    fn test_serialize_sheet_rows() {
        let values = vec![
            vec![json!("date"), json!("value")],
            vec![json!("2023-10-01"), json!(" 23 ")],
            vec![json!("2023-10-02"), json!("pending")],
            vec![json!("not a date"), json!("5")],
            vec![json!("2023-10-03")],
        ];

        let rows = serialize_sheet("projects_count", &values);

        assert_eq!(
            rows,
            vec![
                SheetRow {
                    date: date(2023, 10, 1),
                    value: CellValue::Number(23.0)
                },
                SheetRow {
                    date: date(2023, 10, 2),
                    value: CellValue::Text("pending".to_string())
                },
                SheetRow {
                    date: date(2023, 10, 3),
                    value: CellValue::Text(String::new())
                },
            ]
        );
    }

    #[test]
    fn test_duplicate_dates_keep_last_row() {
        let values = vec![
            vec![json!("date"), json!("value")],
            vec![json!("2023-10-01"), json!("10")],
            vec![json!("2023-10-02"), json!("11")],
            vec![json!("2023-10-01"), json!("12")],
        ];

        let rows = serialize_sheet("projects_count", &values);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].date, date(2023, 10, 1));
        assert_eq!(rows[0].value, CellValue::Number(12.0));

        let mut output = SpreadsheetOutput::default();
        output.metrics.insert("projects_count".to_string(), rows);
        let first = date(2023, 10, 1);
        assert_eq!(output.value_on("projects_count", first), Some(12.0));
        assert_eq!(
            output.latest_row_on_or_before("projects_count", first),
            Some((first, 12.0))
        );
    }

    #[test]
    fn test_serialize_uses_header_positions() {
        let values = vec![
            vec![json!("value"), json!("date")],
            vec![json!("7"), json!("2023-10-01T00:00:00.000Z")],
        ];

        let rows = serialize_sheet("swapped", &values);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].date, date(2023, 10, 1));
        assert_eq!(rows[0].value, CellValue::Number(7.0));
    }

    #[test]
    fn test_serialize_spreadsheet() {
        let sheets = [sheet("projects_count", 3), sheet("community_NPS", 2)];
        let value_ranges = vec![
            ValueRange {
                values: vec![
                    vec![json!("date"), json!("value")],
                    vec![json!("2023-10-01"), json!("10")],
                    vec![json!("2023-10-02"), json!("12")],
                ],
            },
            ValueRange { values: vec![] },
        ];

        let output = serialize(&sheets, value_ranges).unwrap();
        assert_eq!(output.series("projects_count").len(), 2);
        assert!(output.series("community_NPS").is_empty());
        assert_eq!(
            output.value_on("projects_count", date(2023, 10, 2)),
            Some(12.0)
        );
        assert_eq!(output.value_on("projects_count", date(2023, 10, 3)), None);
    }

    #[test]
    fn test_serialize_rejects_mismatched_ranges() {
        let sheets = [sheet("a", 2), sheet("b", 2)];
        let result = serialize(&sheets, vec![ValueRange { values: vec![] }]);
        assert!(matches!(result, Err(RetrieveError::Schema(_))));
    }

    #[test]
    fn test_latest_on_or_before() {
        let mut output = SpreadsheetOutput::default();
        output.metrics.insert(
            "voter_power_concentration_index".to_string(),
            vec![
                SheetRow {
                    date: date(2023, 9, 1),
                    value: CellValue::Number(0.3),
                },
                SheetRow {
                    date: date(2023, 10, 1),
                    value: CellValue::Number(0.2),
                },
                SheetRow {
                    date: date(2023, 11, 1),
                    value: CellValue::Number(0.1),
                },
            ],
        );

        let name = "voter_power_concentration_index";
        assert_eq!(
            output.latest_on_or_before(name, date(2023, 10, 15)),
            Some(0.2)
        );
        assert_eq!(
            output.latest_on_or_before(name, date(2023, 11, 1)),
            Some(0.1)
        );
        assert_eq!(output.latest_on_or_before(name, date(2023, 8, 1)), None);
    }

    #[test]
    fn test_endpoints() {
        let settings = SpreadsheetSettings {
            base_url: "https://sheets.googleapis.com/v4/".to_string(),
            spreadsheet_id: "sheet-id".to_string(),
            api_key: "k".to_string(),
        };
        let retriever = SpreadsheetRetriever::new(&settings, Duration::from_secs(30)).unwrap();

        assert_eq!(
            retriever.endpoint(None).unwrap().as_str(),
            "https://sheets.googleapis.com/v4/spreadsheets/sheet-id?key=k"
        );
        assert_eq!(
            retriever.endpoint(Some("values:batchGet")).unwrap().as_str(),
            "https://sheets.googleapis.com/v4/spreadsheets/sheet-id/values:batchGet?key=k"
        );
    }
}
