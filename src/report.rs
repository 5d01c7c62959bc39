// cteractl - CLI for CTERA Portal and Edge Filer administration
// Copyright (C) 2024 Mathias Uhl <mathiasuhl@gmx.de>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Append-only CSV status report.
//!
//! The file is reopened for every row, so an interrupted run leaves every row
//! written so far intact.

use crate::collector::{CollectOptions, collect};
use crate::enumerate::{Scope, list_devices};
use crate::record::{COLUMN_COUNT, COLUMNS, StatusRecord, is_sentinel};
use crate::session::PortalSession;
use anyhow::{Context, Result};
use csv::{QuoteStyle, Terminator, WriterBuilder};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use tracing::{info, warn};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, Clone, Default)]
pub struct ReportOptions {
    pub collect: CollectOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportSummary {
    pub devices: usize,
    pub rows_written: usize,
    pub header_written: bool,
}

/// Writes the BOM and header row unless the file already has content.
/// Returns whether anything was written.
pub fn ensure_header(path: &Path) -> Result<bool> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("creating {:?}", parent))?;
    }

    // Never truncate: an existing report is only ever appended to
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening {:?}", path))?;
    let len = file
        .metadata()
        .with_context(|| format!("reading metadata of {:?}", path))?
        .len();
    if len > 0 {
        return Ok(false);
    }

    file.write_all(UTF8_BOM)
        .with_context(|| format!("writing {:?}", path))?;
    let mut writer = csv_writer(file);
    writer
        .write_record(COLUMNS)
        .with_context(|| format!("writing header to {:?}", path))?;
    writer
        .flush()
        .with_context(|| format!("writing {:?}", path))?;
    Ok(true)
}

pub fn append_row(path: &Path, record: &StatusRecord) -> Result<()> {
    let file = OpenOptions::new()
        .append(true)
        .open(path)
        .with_context(|| format!("opening {:?} for append", path))?;
    let mut writer = csv_writer(file);
    writer
        .write_record(record.fields())
        .with_context(|| format!("writing row for {} to {:?}", record.name, path))?;
    writer
        .flush()
        .with_context(|| format!("writing {:?}", path))?;
    Ok(())
}

/// Enumerates `scope`, collects every filer and appends its row as soon as
/// it is ready. Only report-file I/O errors are returned.
pub fn run_report(
    session: &mut dyn PortalSession,
    scope: &Scope,
    path: &Path,
    options: &ReportOptions,
) -> Result<ReportSummary> {
    let header_written = ensure_header(path)?;
    let devices = list_devices(session, scope);
    if devices.is_empty() {
        warn!(?scope, "no connected devices found");
    }

    let mut rows_written = 0;
    for device in &devices {
        info!(tenant = %device.tenant, device = %device.name, "collecting status");
        let record = collect(session, device, &options.collect);
        let unavailable = record.fields().iter().filter(|v| is_sentinel(v)).count();
        if unavailable == COLUMN_COUNT - 2 {
            warn!(tenant = %device.tenant, device = %device.name, "no status could be read");
        }
        append_row(path, &record)?;
        rows_written += 1;
    }

    Ok(ReportSummary {
        devices: devices.len(),
        rows_written,
        header_written,
    })
}

fn csv_writer<W: Write>(inner: W) -> csv::Writer<W> {
    WriterBuilder::new()
        .delimiter(b',')
        .quote(b'"')
        .quote_style(QuoteStyle::Necessary)
        .terminator(Terminator::CRLF)
        .has_headers(false)
        .from_writer(inner)
}
