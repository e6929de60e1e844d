//! HTML table extraction
//!
//! Parses `<table>` elements with `scraper` and maps the chosen table's rows
//! onto [`Record`]s. The aggregator sites render one or more tables per page;
//! which one holds the data is decided by a [`TablePick`] heuristic (the first
//! table under a container, or the longest one on the page).

use crate::crawler::{CursorPosition, FetchRequest, RawPage};
use crate::extract::{ExtractError, ExtractedPage, Record, RecordExtractor};
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use url::Url;

/// Which of several candidate tables to read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TablePick {
    /// The first table in document order
    First,
    /// The table with the most data rows (first wins on ties)
    Longest,
}

/// A parsed HTML table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HtmlTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl HtmlTable {
    /// Widest row or header, whichever is larger
    pub fn width(&self) -> usize {
        self.rows
            .iter()
            .map(Vec::len)
            .chain(std::iter::once(self.headers.len()))
            .max()
            .unwrap_or(0)
    }
}

/// Collects links whose query carries a follow-up key
#[derive(Debug, Clone)]
struct FollowLinks {
    selector: String,
    param: Vec<String>,
}

/// Configurable HTML table extractor
///
/// # Example
///
/// ```
/// use holdings_harvest::extract::{TableExtractor, TablePick};
///
/// let extractor = TableExtractor::new(TablePick::First)
///     .within("#grid")
///     .rename_columns(&["Stock", "Ticker"])
///     .numeric(&["Value"]);
/// ```
#[derive(Debug, Clone)]
pub struct TableExtractor {
    container: Option<String>,
    pick: TablePick,
    columns: Option<Vec<String>>,
    numeric: Vec<String>,
    min_rows: usize,
    max_rows: Option<usize>,
    drop_empty_columns: bool,
    allow_missing: bool,
    follow: Option<FollowLinks>,
    key_column: Option<String>,
}

impl TableExtractor {
    pub fn new(pick: TablePick) -> Self {
        Self {
            container: None,
            pick,
            columns: None,
            numeric: Vec::new(),
            min_rows: 0,
            max_rows: None,
            drop_empty_columns: false,
            allow_missing: false,
            follow: None,
            key_column: None,
        }
    }

    /// Restricts candidates to tables matched by (or nested in) a CSS selector
    pub fn within(mut self, selector: &str) -> Self {
        self.container = Some(selector.to_string());
        self
    }

    /// Keeps only the first `names.len()` columns, renamed positionally
    pub fn rename_columns(mut self, names: &[&str]) -> Self {
        self.columns = Some(names.iter().map(|s| s.to_string()).collect());
        self
    }

    /// Columns whose values are normalized with [`clean_number`]
    pub fn numeric(mut self, names: &[&str]) -> Self {
        self.numeric = names.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Tables with fewer data rows are reported as [`ExtractError::NoTable`]
    pub fn min_rows(mut self, rows: usize) -> Self {
        self.min_rows = rows;
        self
    }

    pub fn max_rows(mut self, rows: Option<usize>) -> Self {
        self.max_rows = rows;
        self
    }

    /// Drops columns that are empty in every row
    pub fn drop_empty_columns(mut self) -> Self {
        self.drop_empty_columns = true;
        self
    }

    /// Treats a page without any candidate table as an empty page
    pub fn allow_missing(mut self) -> Self {
        self.allow_missing = true;
        self
    }

    /// On the seed page, collect follow-up keys from matching links instead
    /// of reading a table
    ///
    /// The key is the value of the first query pair in the link's href whose
    /// name is listed in `params`. Keys are de-duplicated in first-seen order.
    pub fn follow_links(mut self, selector: &str, params: &[&str]) -> Self {
        self.follow = Some(FollowLinks {
            selector: selector.to_string(),
            param: params.iter().map(|s| s.to_string()).collect(),
        });
        self
    }

    /// On follow-up pages, insert the follow-up key as the first data column
    pub fn key_column(mut self, name: &str) -> Self {
        self.key_column = Some(name.to_string());
        self
    }

    fn extract_table(&self, request: &FetchRequest, page: &RawPage) -> Result<ExtractedPage, ExtractError> {
        let tables = parse_tables(&page.body, self.container.as_deref())?;

        let picked = match self.pick {
            TablePick::First => tables.into_iter().next(),
            TablePick::Longest => tables.into_iter().fold(None, |best: Option<HtmlTable>, t| match best {
                Some(b) if b.rows.len() >= t.rows.len() => Some(b),
                _ => Some(t),
            }),
        };

        let mut table = match picked {
            Some(table) => table,
            None if self.allow_missing => return Ok(ExtractedPage::empty()),
            None => {
                return Err(ExtractError::NoTable(format!(
                    "no table matched {}",
                    self.container.as_deref().unwrap_or("table")
                )))
            }
        };

        if table.rows.len() < self.min_rows {
            return Err(ExtractError::NoTable(format!(
                "table has {} rows, need at least {}",
                table.rows.len(),
                self.min_rows
            )));
        }

        if let Some(names) = &self.columns {
            let width = table.width();
            if width < names.len() {
                return Err(ExtractError::Malformed(format!(
                    "expected at least {} columns, found {}",
                    names.len(),
                    width
                )));
            }
            table.headers = names.clone();
            for row in &mut table.rows {
                row.truncate(names.len());
            }
        }

        normalize_width(&mut table);

        if self.drop_empty_columns {
            drop_blank_columns(&mut table);
        }

        if let Some(limit) = self.max_rows {
            table.rows.truncate(limit);
        }

        let numeric: Vec<usize> = table
            .headers
            .iter()
            .enumerate()
            .filter(|(_, h)| self.numeric.iter().any(|n| n == *h))
            .map(|(i, _)| i)
            .collect();

        let key = match (&self.key_column, &request.position) {
            (Some(column), CursorPosition::Follow(key)) => Some((column, key)),
            _ => None,
        };

        let records = table
            .rows
            .into_iter()
            .map(|row| {
                let mut record = Record::new();
                for (i, (header, value)) in table.headers.iter().zip(row).enumerate() {
                    let value = if numeric.contains(&i) {
                        clean_number(&value)
                    } else {
                        value
                    };
                    record.set(header.as_str(), value);
                }
                if let Some((column, key)) = key {
                    record.prepend(column.as_str(), key.as_str());
                }
                record
            })
            .collect();

        Ok(ExtractedPage::from_records(records))
    }

    fn extract_links(&self, follow: &FollowLinks, page: &RawPage) -> Result<ExtractedPage, ExtractError> {
        let base = Url::parse(&page.url)
            .map_err(|e| ExtractError::Malformed(format!("bad page url '{}': {}", page.url, e)))?;
        let selector = parse_selector(&follow.selector)?;
        let document = Html::parse_document(&page.body);

        let mut seen = HashSet::new();
        let mut keys = Vec::new();

        for element in document.select(&selector) {
            let Some(href) = element.value().attr("href") else {
                continue;
            };
            let Ok(link) = base.join(href) else {
                tracing::debug!("Skipping unparsable link {}", href);
                continue;
            };
            let key = link
                .query_pairs()
                .find(|(name, _)| follow.param.iter().any(|p| p == name))
                .map(|(_, value)| value.into_owned());

            if let Some(key) = key.filter(|k| !k.is_empty()) {
                if seen.insert(key.clone()) {
                    keys.push(key);
                }
            }
        }

        Ok(ExtractedPage {
            item_count: keys.len(),
            follow_ups: keys,
            ..ExtractedPage::default()
        })
    }
}

impl RecordExtractor for TableExtractor {
    fn extract(&self, request: &FetchRequest, page: &RawPage) -> Result<ExtractedPage, ExtractError> {
        match (&self.follow, &request.position) {
            (Some(follow), CursorPosition::Start) => self.extract_links(follow, page),
            _ => self.extract_table(request, page),
        }
    }
}

/// Parses every candidate table in an HTML document
///
/// When `container` is given, candidates are the elements it matches if they
/// are tables, otherwise the tables nested inside them.
pub fn parse_tables(html: &str, container: Option<&str>) -> Result<Vec<HtmlTable>, ExtractError> {
    let document = Html::parse_document(html);
    let table_selector = parse_selector("table")?;

    let mut tables = Vec::new();
    match container {
        Some(css) => {
            let selector = parse_selector(css)?;
            for element in document.select(&selector) {
                if element.value().name() == "table" {
                    tables.push(read_table(element)?);
                } else {
                    for nested in element.select(&table_selector) {
                        tables.push(read_table(nested)?);
                    }
                }
            }
        }
        None => {
            for element in document.select(&table_selector) {
                tables.push(read_table(element)?);
            }
        }
    }

    Ok(tables)
}

fn read_table(table: ElementRef<'_>) -> Result<HtmlTable, ExtractError> {
    let row_selector = parse_selector("tr")?;
    let cell_selector = parse_selector("th, td")?;

    let mut parsed = HtmlTable::default();
    for row in table.select(&row_selector) {
        let cells: Vec<ElementRef<'_>> = row.select(&cell_selector).collect();
        if cells.is_empty() {
            continue;
        }

        let texts: Vec<String> = cells.iter().map(|c| cell_text(*c)).collect();
        let is_header = cells.iter().all(|c| c.value().name() == "th");

        if is_header && parsed.headers.is_empty() && parsed.rows.is_empty() {
            parsed.headers = texts;
        } else if !is_header {
            parsed.rows.push(texts);
        }
    }

    Ok(parsed)
}

fn cell_text(cell: ElementRef<'_>) -> String {
    cell.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse_selector(css: &str) -> Result<Selector, ExtractError> {
    Selector::parse(css)
        .map_err(|e| ExtractError::Malformed(format!("invalid selector '{}': {:?}", css, e)))
}

/// Pads headers and rows so every row has one value per header, and makes
/// repeated header names unique (`Change`, `Change_2`, ...)
fn normalize_width(table: &mut HtmlTable) {
    let width = table.width();
    for i in table.headers.len()..width {
        table.headers.push(format!("column_{}", i + 1));
    }
    for row in &mut table.rows {
        row.resize(width, String::new());
    }

    let originals: HashSet<String> = table.headers.iter().cloned().collect();
    let mut used = HashSet::new();
    for header in &mut table.headers {
        if used.insert(header.clone()) {
            continue;
        }
        let unique = (2..)
            .map(|n| format!("{}_{}", header, n))
            .find(|candidate| !originals.contains(candidate) && !used.contains(candidate))
            .unwrap_or_default();
        used.insert(unique.clone());
        *header = unique;
    }
}

fn drop_blank_columns(table: &mut HtmlTable) {
    let keep: Vec<bool> = (0..table.headers.len())
        .map(|i| table.rows.iter().any(|row| !row[i].is_empty()))
        .collect();

    let retain = |values: &mut Vec<String>| {
        let mut index = 0;
        values.retain(|_| {
            let kept = keep[index];
            index += 1;
            kept
        });
    };

    retain(&mut table.headers);
    for row in &mut table.rows {
        retain(row);
    }
}

/// Strips currency, percent and thousands separators from a numeric cell
///
/// Values that still do not parse as a number become `"0"`.
pub fn clean_number(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .filter(|c| !matches!(c, '$' | '%' | ',') && !c.is_whitespace())
        .collect();

    match cleaned.parse::<f64>() {
        Ok(number) => number.to_string(),
        Err(_) => "0".to_string(),
    }
}
