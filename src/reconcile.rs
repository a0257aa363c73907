use crate::grid::Grid;
use crate::report::{self, ConsolidatedParticipant};
use crate::resolve::{self, MatchOutcome, MatchResult, RosterEntry};
use chrono::NaiveDateTime;

/// Minutes a participant must accumulate to count as attended when the
/// session does not configure its own threshold.
pub const DEFAULT_MIN_ATTENDANCE_MINUTES: f64 = 5.0;

/// One computed attendance row, keyed by `(session_id, student_id)` at the
/// persister. Below-threshold participants still get a row with
/// `attended = false` so the import stays auditable.
#[derive(Debug, Clone)]
pub struct AttendanceRecord {
    pub student_id: String,
    pub attended: bool,
    pub first_join: Option<NaiveDateTime>,
    pub last_leave: Option<NaiveDateTime>,
    pub total_duration_minutes: f64,
}

/// A participant name that could not be resolved. `candidates` is non-empty
/// when the token rule tied between several roster entries.
#[derive(Debug, Clone)]
pub struct UnmatchedName {
    pub canonical_name: String,
    pub candidates: Vec<String>,
}

/// Supplies the enrolled students for a session, in a stable order.
pub trait RosterProvider {
    fn enrolled_students(&self, session_id: &str) -> anyhow::Result<Vec<RosterEntry>>;
}

/// Accepts the full record batch atomically, with replace semantics per
/// `(session_id, student_id)`. A failure means nothing was written.
pub trait AttendancePersister {
    fn upsert_batch(
        &mut self,
        session_id: &str,
        records: &[AttendanceRecord],
    ) -> anyhow::Result<()>;
}

/// Receives the unmatched-names report. Best-effort: failures are logged by
/// the caller and do not abort the import.
pub trait UnmatchedReporter {
    fn report(&mut self, session_id: &str, names: &[UnmatchedName]) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
pub struct MatchedParticipant {
    pub canonical_name: String,
    pub student_id: String,
    pub tier: &'static str,
    pub total_duration_minutes: f64,
    pub attended: bool,
}

#[derive(Debug, Default, Clone)]
pub struct ImportSummary {
    pub matched: Vec<MatchedParticipant>,
    pub unmatched: Vec<UnmatchedName>,
    pub absent_student_ids: Vec<String>,
    pub records_written: usize,
    pub roster_size: usize,
    pub raw_rows: usize,
    pub participants: usize,
}

fn build_records(
    participants: &[ConsolidatedParticipant],
    results: &[MatchResult],
    roster: &[RosterEntry],
    min_minutes: f64,
) -> (Vec<AttendanceRecord>, Vec<MatchedParticipant>, Vec<UnmatchedName>, Vec<String>) {
    let mut records = Vec::new();
    let mut matched = Vec::new();
    let mut unmatched = Vec::new();
    let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();

    for (participant, result) in participants.iter().zip(results.iter()) {
        match &result.outcome {
            MatchOutcome::Matched { student_id, tier } => {
                let attended = participant.total_duration_minutes >= min_minutes;
                records.push(AttendanceRecord {
                    student_id: student_id.clone(),
                    attended,
                    first_join: participant.first_join,
                    last_leave: participant.last_leave,
                    total_duration_minutes: participant.total_duration_minutes,
                });
                matched.push(MatchedParticipant {
                    canonical_name: participant.canonical_name.clone(),
                    student_id: student_id.clone(),
                    tier: tier.as_str(),
                    total_duration_minutes: participant.total_duration_minutes,
                    attended,
                });
                seen.insert(student_id.clone());
            }
            MatchOutcome::Ambiguous { candidates } => {
                unmatched.push(UnmatchedName {
                    canonical_name: participant.canonical_name.clone(),
                    candidates: candidates.clone(),
                });
            }
            MatchOutcome::Unmatched => {
                unmatched.push(UnmatchedName {
                    canonical_name: participant.canonical_name.clone(),
                    candidates: Vec::new(),
                });
            }
        }
    }

    // Enrolled students missing from the report are marked absent so one
    // import produces the complete sheet for the session.
    let mut absent = Vec::new();
    for entry in roster {
        if !seen.contains(&entry.student_id) {
            records.push(AttendanceRecord {
                student_id: entry.student_id.clone(),
                attended: false,
                first_join: None,
                last_leave: None,
                total_duration_minutes: 0.0,
            });
            absent.push(entry.student_id.clone());
        }
    }

    (records, matched, unmatched, absent)
}

/// Run the whole pipeline over one report grid: scan, extract, consolidate,
/// resolve, then hand the record batch to the persister in one shot and the
/// unmatched names to the reporter. Header detection failure and persistence
/// failure abort the import; the unmatched report is best-effort.
pub fn run_import(
    session_id: &str,
    grid: &Grid,
    min_minutes: f64,
    roster_provider: &dyn RosterProvider,
    persister: &mut dyn AttendancePersister,
    reporter: &mut dyn UnmatchedReporter,
) -> anyhow::Result<ImportSummary> {
    let roster = roster_provider.enrolled_students(session_id)?;

    let layout = report::scan_participant_section(grid)?;
    let raw_records = report::extract_records(grid, &layout);
    let participants = report::consolidate(&raw_records);
    let results = resolve::resolve_participants(&participants, &roster);

    let (records, matched, unmatched, absent) =
        build_records(&participants, &results, &roster, min_minutes);

    persister.upsert_batch(session_id, &records)?;

    if let Err(e) = reporter.report(session_id, &unmatched) {
        log::warn!("session {}: unmatched report not written: {}", session_id, e);
    }

    log::info!(
        "session {}: {} raw rows, {} participants, {} matched, {} unmatched, {} absent",
        session_id,
        raw_records.len(),
        participants.len(),
        matched.len(),
        unmatched.len(),
        absent.len()
    );

    Ok(ImportSummary {
        records_written: records.len(),
        roster_size: roster.len(),
        raw_rows: raw_records.len(),
        participants: participants.len(),
        matched,
        unmatched,
        absent_student_ids: absent,
    })
}
