//! Work items read from, and results written back to, a tabular row store.
//!
//! Read layout relative to the first column of the range: name at offset 0,
//! links at 2, previously written links at 3, status at 4.

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde::Serialize;

use crate::errors::RelayResult;

const NAME_COL: usize = 0;
const LINKS_COL: usize = 2;
const EXISTING_LINKS_COL: usize = 3;
const STATUS_COL: usize = 4;

#[async_trait]
pub trait RowStore: Send + Sync {
    async fn read_range(&self, range: &str) -> RelayResult<Vec<Vec<String>>>;
    async fn write_range(&self, range: &str, values: Vec<Vec<String>>) -> RelayResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RowStatus {
    Done,
    Partial,
}

impl RowStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RowStatus::Done => "DONE",
            RowStatus::Partial => "PARTIAL",
        }
    }

    fn is_finished(status: &str) -> bool {
        let status = status.trim();
        status.eq_ignore_ascii_case(RowStatus::Done.as_str())
            || status.eq_ignore_ascii_case(RowStatus::Partial.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub row_index: usize,
    pub name: String,
    pub urls: Vec<String>,
    pub existing_links: String,
    pub existing_status: String,
}

/// Where the rows live: `videos!C2:G` reads tab `videos` starting at row 2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetLayout {
    pub read_range: String,
    pub tab: Option<String>,
    pub first_row: usize,
    pub write_columns: (String, String),
}

impl SheetLayout {
    pub fn parse(read_range: &str, write_columns: (String, String)) -> anyhow::Result<Self> {
        let (tab, cells) = match read_range.split_once('!') {
            Some((tab, cells)) => (Some(tab.trim_matches('\'').to_string()), cells),
            None => (None, read_range),
        };
        if tab.as_deref().is_some_and(str::is_empty) {
            bail!("sheet range {read_range} has an empty tab name");
        }
        let start = cells.split(':').next().unwrap_or_default();
        let letters = start.chars().take_while(char::is_ascii_alphabetic).count();
        let digits = &start[letters..];
        if letters == 0 {
            bail!("sheet range {read_range} does not start with a column");
        }
        let first_row = if digits.is_empty() {
            1
        } else {
            digits
                .parse::<usize>()
                .ok()
                .filter(|row| *row > 0)
                .with_context(|| format!("sheet range {read_range} has a bad start row"))?
        };
        Ok(Self {
            read_range: read_range.to_string(),
            tab,
            first_row,
            write_columns,
        })
    }

    pub fn write_range(&self, row_index: usize) -> String {
        let (from, to) = &self.write_columns;
        match &self.tab {
            Some(tab) => format!("{tab}!{from}{row_index}:{to}{row_index}"),
            None => format!("{from}{row_index}:{to}{row_index}"),
        }
    }
}

fn cell(row: &[String], idx: usize) -> &str {
    row.get(idx).map_or("", |s| s.trim())
}

pub fn parse_rows(values: &[Vec<String>], first_row: usize) -> Vec<WorkItem> {
    values
        .iter()
        .enumerate()
        .filter_map(|(offset, row)| {
            let status = cell(row, STATUS_COL).to_ascii_uppercase();
            if RowStatus::is_finished(&status) {
                return None;
            }
            let urls: Vec<String> = cell(row, LINKS_COL)
                .lines()
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(ToString::to_string)
                .collect();
            if urls.is_empty() {
                return None;
            }
            Some(WorkItem {
                row_index: first_row + offset,
                name: cell(row, NAME_COL).to_string(),
                urls,
                existing_links: cell(row, EXISTING_LINKS_COL).to_string(),
                existing_status: status,
            })
        })
        .collect()
}

pub async fn read_pending(
    store: &dyn RowStore,
    layout: &SheetLayout,
) -> RelayResult<Vec<WorkItem>> {
    let values = store.read_range(&layout.read_range).await?;
    let items = parse_rows(&values, layout.first_row);
    log::info!(
        "Read {} rows from {}, {} pending",
        values.len(),
        layout.read_range,
        items.len()
    );
    Ok(items)
}

pub async fn write_result(
    store: &dyn RowStore,
    layout: &SheetLayout,
    row_index: usize,
    links: &[String],
    status: RowStatus,
) -> RelayResult<()> {
    let range = layout.write_range(row_index);
    log::info!("Writing {} to {range}", status.as_str());
    store
        .write_range(
            &range,
            vec![vec![links.join("\n"), status.as_str().to_string()]],
        )
        .await
}
