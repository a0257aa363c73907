use crate::db;
use crate::grid;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::reconcile::{self, DEFAULT_MIN_ATTENDANCE_MINUTES};
use crate::report::HeaderDetectionError;
use rusqlite::Connection;
use serde_json::json;
use std::path::PathBuf;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }

    fn db(e: rusqlite::Error) -> Self {
        HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        }
    }
}

fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: format!("missing {}", key),
            details: None,
        })
}

fn require_session(conn: &Connection, session_id: &str) -> Result<(), HandlerErr> {
    match db::session_exists(conn, session_id) {
        Ok(true) => Ok(()),
        Ok(false) => Err(HandlerErr {
            code: "not_found",
            message: "session not found".to_string(),
            details: None,
        }),
        Err(e) => Err(HandlerErr {
            code: "internal",
            message: e.to_string(),
            details: None,
        }),
    }
}

/// Report grid from the request: either an inline JSON grid or a path to a
/// CSV export on disk. A file that cannot be read or decoded fails here,
/// before any section parsing.
fn load_grid(params: &serde_json::Value) -> Result<grid::Grid, HandlerErr> {
    if let Some(inline) = params.get("grid") {
        return grid::from_json(inline).map_err(|e| HandlerErr {
            code: "bad_params",
            message: e.to_string(),
            details: None,
        });
    }
    if let Some(path) = params.get("reportPath").and_then(|v| v.as_str()) {
        let path = PathBuf::from(path);
        return grid::load_csv(&path).map_err(|e| HandlerErr {
            code: "report_unreadable",
            message: e.to_string(),
            details: Some(json!({ "reportPath": path.to_string_lossy() })),
        });
    }
    Err(HandlerErr {
        code: "bad_params",
        message: "missing grid or reportPath".to_string(),
        details: None,
    })
}

fn effective_threshold(
    conn: &Connection,
    session_id: &str,
    params: &serde_json::Value,
) -> Result<f64, HandlerErr> {
    if let Some(v) = params.get("minAttendanceMinutes").and_then(|v| v.as_f64()) {
        if v < 0.0 {
            return Err(HandlerErr {
                code: "bad_params",
                message: "minAttendanceMinutes must be >= 0".to_string(),
                details: None,
            });
        }
        return Ok(v);
    }
    match db::session_min_minutes(conn, session_id) {
        Ok(v) => Ok(v.unwrap_or(DEFAULT_MIN_ATTENDANCE_MINUTES)),
        Err(e) => Err(HandlerErr {
            code: "internal",
            message: e.to_string(),
            details: None,
        }),
    }
}

fn attendance_import(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let session_id = get_required_str(params, "sessionId")?;
    require_session(conn, &session_id)?;
    let grid = load_grid(params)?;
    let min_minutes = effective_threshold(conn, &session_id, params)?;

    let provider = db::SqliteStore { conn };
    let mut persister = db::SqliteStore { conn };
    let mut reporter = db::SqliteStore { conn };

    let summary = reconcile::run_import(
        &session_id,
        &grid,
        min_minutes,
        &provider,
        &mut persister,
        &mut reporter,
    )
    .map_err(|e| match e.downcast_ref::<HeaderDetectionError>() {
        Some(h) => HandlerErr {
            code: "header_not_found",
            message: e.to_string(),
            details: Some(json!({
                "rowsScanned": h.rows_scanned,
                "participantsMarkerFound": h.participants_marker_found,
                "scannedRows": h.scanned_rows,
            })),
        },
        None => HandlerErr {
            code: "import_failed",
            message: e.to_string(),
            details: None,
        },
    })?;

    let matched: Vec<serde_json::Value> = summary
        .matched
        .iter()
        .map(|m| {
            json!({
                "canonicalName": m.canonical_name,
                "studentId": m.student_id,
                "tier": m.tier,
                "totalDurationMinutes": m.total_duration_minutes,
                "attended": m.attended,
            })
        })
        .collect();
    let unmatched: Vec<serde_json::Value> = summary
        .unmatched
        .iter()
        .map(|u| {
            json!({
                "canonicalName": u.canonical_name,
                "candidates": u.candidates,
            })
        })
        .collect();

    Ok(json!({
        "rawRows": summary.raw_rows,
        "participants": summary.participants,
        "rosterSize": summary.roster_size,
        "recordsWritten": summary.records_written,
        "minAttendanceMinutes": min_minutes,
        "matched": matched,
        "unmatched": unmatched,
        "absentStudentIds": summary.absent_student_ids,
    }))
}

fn attendance_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let session_id = get_required_str(params, "sessionId")?;
    require_session(conn, &session_id)?;

    let mut stmt = conn
        .prepare(
            "SELECT a.student_id, s.username, a.attended,
                    a.first_join_time, a.last_leave_time,
                    a.total_duration_minutes, a.updated_at
             FROM attendance_records a
             JOIN students s ON s.id = a.student_id
             WHERE a.session_id = ?
             ORDER BY s.sort_order, s.id",
        )
        .map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map([&session_id], |r| {
            Ok(json!({
                "studentId": r.get::<_, String>(0)?,
                "username": r.get::<_, String>(1)?,
                "attended": r.get::<_, i64>(2)? != 0,
                "firstJoinTime": r.get::<_, Option<String>>(3)?,
                "lastLeaveTime": r.get::<_, Option<String>>(4)?,
                "totalDurationMinutes": r.get::<_, f64>(5)?,
                "updatedAt": r.get::<_, String>(6)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    Ok(json!({ "records": rows }))
}

fn attendance_unmatched(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let session_id = get_required_str(params, "sessionId")?;
    require_session(conn, &session_id)?;

    let mut stmt = conn
        .prepare(
            "SELECT canonical_name, candidates, reported_at
             FROM unmatched_participants
             WHERE session_id = ?
             ORDER BY canonical_name",
        )
        .map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map([&session_id], |r| {
            let candidates_raw: String = r.get(1)?;
            Ok(json!({
                "canonicalName": r.get::<_, String>(0)?,
                "candidates": serde_json::from_str::<serde_json::Value>(&candidates_raw)
                    .unwrap_or_else(|_| json!([])),
                "reportedAt": r.get::<_, String>(2)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;

    Ok(json!({ "unmatched": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handled = matches!(
        req.method.as_str(),
        "attendance.import" | "attendance.list" | "attendance.unmatched"
    );
    if !handled {
        return None;
    }

    let Some(conn) = state.db.as_ref() else {
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    };

    let result = match req.method.as_str() {
        "attendance.import" => attendance_import(conn, &req.params),
        "attendance.list" => attendance_list(conn, &req.params),
        "attendance.unmatched" => attendance_unmatched(conn, &req.params),
        _ => unreachable!(),
    };

    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
