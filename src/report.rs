use crate::grid::{row_is_blank, row_text_lower, Cell, Grid};
use chrono::{NaiveDate, NaiveDateTime};

/// Rows scanned from the top of the grid while looking for the participants
/// header before giving up.
pub const HEADER_SCAN_WINDOW: usize = 60;
/// Keyword hits a row needs to qualify as the participants header.
pub const HEADER_SCORE_MIN: usize = 3;
/// Consecutive fully-blank rows that end the participant block when the
/// export is missing its terminator row.
pub const BLANK_RUN_LIMIT: usize = 50;

const HEADER_KEYWORDS: [&str; 5] = ["name", "first join", "last leave", "duration", "email"];
const SECTION_MARKER: &str = "participants";
const SECTION_TERMINATOR: &str = "in-meeting activities";

/// One data row of the participants block, exactly as printed.
#[derive(Debug, Clone)]
pub struct RawParticipantRecord {
    pub row_index: usize,
    pub raw_name: String,
    pub raw_join: Option<String>,
    pub raw_leave: Option<String>,
    pub raw_duration: Option<String>,
}

/// All rows of one physical participant folded together. A participant who
/// dropped and rejoined contributes one additive segment per row.
#[derive(Debug, Clone)]
pub struct ConsolidatedParticipant {
    pub canonical_name: String,
    pub total_duration_minutes: f64,
    pub first_join: Option<NaiveDateTime>,
    pub last_leave: Option<NaiveDateTime>,
    pub rejoin_count: usize,
    pub source_rows: Vec<usize>,
}

/// Header row location plus the column layout read from it.
#[derive(Debug, Clone)]
pub struct SectionLayout {
    pub header_row: usize,
    pub name_col: Option<usize>,
    pub join_col: Option<usize>,
    pub leave_col: Option<usize>,
    pub duration_col: Option<usize>,
}

/// No qualifying header row inside the scan window. Fatal for the import;
/// carries what was scanned so the caller can show it.
#[derive(Debug)]
pub struct HeaderDetectionError {
    pub rows_scanned: usize,
    pub participants_marker_found: bool,
    pub scanned_rows: Vec<String>,
}

impl std::fmt::Display for HeaderDetectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.participants_marker_found {
            write!(
                f,
                "no participants header row found in the first {} rows",
                self.rows_scanned
            )
        } else {
            write!(
                f,
                "no participants section marker found in the first {} rows",
                self.rows_scanned
            )
        }
    }
}

impl std::error::Error for HeaderDetectionError {}

/// Free-text duration to minutes. Never fails: null, blanks and garbage all
/// come back as 0.0. Handles "1h 27m 29s", "hh:mm:ss", "mm:ss" and bare
/// numeric minutes.
pub fn parse_duration_minutes(raw: Option<&str>) -> f64 {
    let Some(raw) = raw else { return 0.0 };
    let s = raw.trim().to_lowercase();
    if s.is_empty() {
        return 0.0;
    }

    if has_unit_suffix(&s) {
        let mut total = 0.0;
        if let Some(h) = unit_value(&s, 'h') {
            total += h * 60.0;
        }
        if let Some(m) = unit_value(&s, 'm') {
            total += m;
        }
        if let Some(sec) = unit_value(&s, 's') {
            total += sec / 60.0;
        }
        return total;
    }

    if s.contains(':') {
        let parts: Vec<&str> = s.split(':').collect();
        let nums: Option<Vec<f64>> = parts
            .iter()
            .map(|p| p.trim().parse::<f64>().ok())
            .collect();
        if let Some(nums) = nums {
            match nums.len() {
                3 => return nums[0] * 60.0 + nums[1] + nums[2] / 60.0,
                2 => return nums[0] + nums[1] / 60.0,
                _ => {}
            }
        }
        return 0.0;
    }

    // Some exports write the duration column as a plain number of minutes.
    if let Ok(n) = s.parse::<f64>() {
        if n.is_finite() && n >= 0.0 {
            return n;
        }
    }

    0.0
}

fn has_unit_suffix(s: &str) -> bool {
    // A unit letter only counts immediately after a digit run, so words like
    // "absent" or a name drifting into the column do not read as durations.
    let bytes = s.as_bytes();
    for i in 1..bytes.len() {
        let c = bytes[i];
        if matches!(c, b'h' | b'm' | b's') {
            let mut j = i;
            while j > 0 && bytes[j - 1] == b' ' {
                j -= 1;
            }
            if j > 0 && bytes[j - 1].is_ascii_digit() {
                return true;
            }
        }
    }
    false
}

/// First `\d+ <unit>` occurrence in the string, tolerating spaces between the
/// digits and the unit letter.
fn unit_value(s: &str, unit: char) -> Option<f64> {
    let bytes = s.as_bytes();
    let unit = unit as u8;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i].is_ascii_digit() {
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            let mut j = i;
            while j < bytes.len() && bytes[j] == b' ' {
                j += 1;
            }
            if j < bytes.len() && bytes[j] == unit {
                return s[start..i].parse::<f64>().ok();
            }
        } else {
            i += 1;
        }
    }
    None
}

/// Provider timestamp text ("2/15/26, 6:12:54 PM") to a naive instant.
/// Matched with an explicit hand-written pattern rather than a generic date
/// parser so M/D ordering and 2-digit years stay deterministic. Any
/// non-match is None, never an error.
pub fn parse_report_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    // Split the date part from the clock part; the comma is optional.
    let (date_part, rest) = s.split_once(|c| c == ',' || c == ' ')?;
    let rest = rest.trim_start_matches(',').trim();

    let mut date_nums = date_part.split('/');
    let month: u32 = date_nums.next()?.trim().parse().ok()?;
    let day: u32 = date_nums.next()?.trim().parse().ok()?;
    let year_raw: i32 = date_nums.next()?.trim().parse().ok()?;
    if date_nums.next().is_some() {
        return None;
    }
    let year = if year_raw < 100 { 2000 + year_raw } else { year_raw };

    let (clock, meridiem) = rest.split_once(' ')?;
    let meridiem = meridiem.trim().to_ascii_uppercase();
    if meridiem != "AM" && meridiem != "PM" {
        return None;
    }
    let mut clock_nums = clock.trim().split(':');
    let mut hour: u32 = clock_nums.next()?.trim().parse().ok()?;
    let minute: u32 = clock_nums.next()?.trim().parse().ok()?;
    let second: u32 = clock_nums.next()?.trim().parse().ok()?;
    if clock_nums.next().is_some() || hour == 0 || hour > 12 {
        return None;
    }

    if meridiem == "PM" && hour != 12 {
        hour += 12;
    } else if meridiem == "AM" && hour == 12 {
        hour = 0;
    }

    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)
}

/// Grouping key for consolidation: trimmed, parenthetical annotations like
/// "(Guest)" removed, whitespace collapsed, lower-cased.
pub fn canonicalize_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut depth = 0usize;
    for c in raw.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Keyword score of one row against the participants-header keyword set.
/// Pure: counts cells whose lower-cased text contains any keyword.
pub fn header_keyword_score(cells: &[Cell]) -> usize {
    cells
        .iter()
        .filter_map(|c| c.text())
        .filter(|t| {
            let t = t.to_lowercase();
            HEADER_KEYWORDS.iter().any(|k| t.contains(k))
        })
        .count()
}

/// Locate the participants header inside the grid and read the column layout
/// off it. Everything above the section marker is the summary block and is
/// ignored wholesale.
pub fn scan_participant_section(grid: &Grid) -> Result<SectionLayout, HeaderDetectionError> {
    let window = grid.len().min(HEADER_SCAN_WINDOW);
    let mut marker_found = false;

    for (i, row) in grid.iter().take(window).enumerate() {
        let text = row_text_lower(row);
        if !marker_found {
            if text.contains(SECTION_MARKER) {
                marker_found = true;
            }
            continue;
        }
        if header_keyword_score(row) >= HEADER_SCORE_MIN {
            return Ok(read_layout(i, row));
        }
    }

    Err(HeaderDetectionError {
        rows_scanned: window,
        participants_marker_found: marker_found,
        scanned_rows: grid
            .iter()
            .take(window)
            .map(|r| row_text_lower(r))
            .collect(),
    })
}

fn read_layout(header_row: usize, row: &[Cell]) -> SectionLayout {
    let find = |needle: &str| {
        row.iter().position(|c| {
            c.text()
                .map(|t| t.to_lowercase().contains(needle))
                .unwrap_or(false)
        })
    };
    SectionLayout {
        header_row,
        name_col: find("name"),
        join_col: find("join"),
        leave_col: find("leave"),
        duration_col: find("duration"),
    }
}

/// Walk the rows after the header and build one raw record per data row.
/// A row containing the activities terminator ends the block immediately, no
/// matter what else is in it; a long run of blank rows ends it as a safety
/// net for truncated exports.
pub fn extract_records(grid: &Grid, layout: &SectionLayout) -> Vec<RawParticipantRecord> {
    let mut records = Vec::new();
    let mut blank_run = 0usize;

    for (i, row) in grid.iter().enumerate().skip(layout.header_row + 1) {
        let text = row_text_lower(row);
        if text.contains(SECTION_TERMINATOR) {
            break;
        }
        if row_is_blank(row) {
            blank_run += 1;
            if blank_run > BLANK_RUN_LIMIT {
                break;
            }
            continue;
        }
        blank_run = 0;

        let cell_text = |col: Option<usize>| col.and_then(|c| row.get(c)).and_then(|c| c.text());

        let Some(raw_name) = cell_text(layout.name_col) else {
            log::warn!("report row {}: no name cell, row skipped", i);
            continue;
        };

        records.push(RawParticipantRecord {
            row_index: i,
            raw_name,
            raw_join: cell_text(layout.join_col),
            raw_leave: cell_text(layout.leave_col),
            raw_duration: cell_text(layout.duration_col),
        });
    }

    records
}

/// Fold raw records into one participant per canonical name. Durations are
/// additive segments; joins take the minimum, leaves the maximum.
pub fn consolidate(records: &[RawParticipantRecord]) -> Vec<ConsolidatedParticipant> {
    let mut order: Vec<String> = Vec::new();
    let mut by_name: std::collections::HashMap<String, ConsolidatedParticipant> =
        std::collections::HashMap::new();

    for rec in records {
        let key = canonicalize_name(&rec.raw_name);
        if key.is_empty() {
            log::warn!("report row {}: name empty after canonicalization", rec.row_index);
            continue;
        }

        let duration = parse_duration_minutes(rec.raw_duration.as_deref());
        if duration == 0.0 {
            if let Some(d) = rec.raw_duration.as_deref() {
                if !d.trim().is_empty() {
                    log::warn!("report row {}: unparseable duration {:?}", rec.row_index, d);
                }
            }
        }
        let join = rec.raw_join.as_deref().and_then(parse_report_timestamp);
        if join.is_none() && rec.raw_join.as_deref().map(|s| !s.trim().is_empty()) == Some(true) {
            log::warn!(
                "report row {}: unparseable join time {:?}",
                rec.row_index,
                rec.raw_join
            );
        }
        let leave = rec.raw_leave.as_deref().and_then(parse_report_timestamp);
        if leave.is_none() && rec.raw_leave.as_deref().map(|s| !s.trim().is_empty()) == Some(true) {
            log::warn!(
                "report row {}: unparseable leave time {:?}",
                rec.row_index,
                rec.raw_leave
            );
        }

        let entry = by_name.entry(key.clone()).or_insert_with(|| {
            order.push(key.clone());
            ConsolidatedParticipant {
                canonical_name: key.clone(),
                total_duration_minutes: 0.0,
                first_join: None,
                last_leave: None,
                rejoin_count: 0,
                source_rows: Vec::new(),
            }
        });

        if !entry.source_rows.is_empty() {
            entry.rejoin_count += 1;
        }
        entry.source_rows.push(rec.row_index);
        entry.total_duration_minutes += duration;
        if let Some(j) = join {
            entry.first_join = Some(match entry.first_join {
                Some(cur) => cur.min(j),
                None => j,
            });
        }
        if let Some(l) = leave {
            entry.last_leave = Some(match entry.last_leave {
                Some(cur) => cur.max(l),
                None => l,
            });
        }
    }

    let mut out: Vec<ConsolidatedParticipant> = order
        .into_iter()
        .filter_map(|k| by_name.remove(&k))
        .collect();

    for p in &mut out {
        if let (Some(j), Some(l)) = (p.first_join, p.last_leave) {
            if j > l {
                log::warn!(
                    "participant {:?}: first join {} after last leave {}, leave dropped",
                    p.canonical_name,
                    j,
                    l
                );
                p.last_leave = None;
            }
        }
    }

    out
}
