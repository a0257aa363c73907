use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::reconcile::DEFAULT_MIN_ATTENDANCE_MINUTES;
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

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

fn sessions_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let title = get_required_str(params, "title")?;
    let scheduled_time = params
        .get("scheduledTime")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let min_minutes = params
        .get("minAttendanceMinutes")
        .and_then(|v| v.as_f64())
        .unwrap_or(DEFAULT_MIN_ATTENDANCE_MINUTES);
    if min_minutes < 0.0 {
        return Err(HandlerErr {
            code: "bad_params",
            message: "minAttendanceMinutes must be >= 0".to_string(),
            details: None,
        });
    }

    let session_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO sessions(id, title, scheduled_time, min_attendance_minutes)
         VALUES(?, ?, ?, ?)",
        (&session_id, &title, &scheduled_time, min_minutes),
    )
    .map_err(HandlerErr::db)?;

    Ok(json!({ "sessionId": session_id }))
}

fn sessions_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, title, scheduled_time, min_attendance_minutes
             FROM sessions ORDER BY title, id",
        )
        .map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "title": r.get::<_, String>(1)?,
                "scheduledTime": r.get::<_, Option<String>>(2)?,
                "minAttendanceMinutes": r.get::<_, f64>(3)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(json!({ "sessions": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handled = matches!(req.method.as_str(), "sessions.create" | "sessions.list");
    if !handled {
        return None;
    }

    let Some(conn) = state.db.as_ref() else {
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    };

    let result = match req.method.as_str() {
        "sessions.create" => sessions_create(conn, &req.params),
        "sessions.list" => sessions_list(conn),
        _ => unreachable!(),
    };

    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
