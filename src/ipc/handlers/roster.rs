use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::reconcile::RosterProvider;
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

    fn internal(e: anyhow::Error) -> Self {
        HandlerErr {
            code: "internal",
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
        Err(e) => Err(HandlerErr::internal(e)),
    }
}

/// New students append at the end of the stable roster order.
fn next_sort_order(conn: &Connection) -> Result<i64, HandlerErr> {
    conn.query_row(
        "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM students",
        [],
        |r| r.get(0),
    )
    .map_err(HandlerErr::db)
}

fn student_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let username = get_required_str(params, "username")?;
    if username.trim().is_empty() {
        return Err(HandlerErr {
            code: "bad_params",
            message: "username must not be blank".to_string(),
            details: None,
        });
    }
    let full_name = params
        .get("fullName")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let email = params
        .get("email")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let student_id = Uuid::new_v4().to_string();
    let sort_order = next_sort_order(conn)?;
    conn.execute(
        "INSERT INTO students(id, username, full_name, email, sort_order)
         VALUES(?, ?, ?, ?, ?)",
        (&student_id, username.trim(), &full_name, &email, sort_order),
    )
    .map_err(HandlerErr::db)?;

    Ok(json!({ "studentId": student_id, "sortOrder": sort_order }))
}

fn roster_enroll(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let session_id = get_required_str(params, "sessionId")?;
    let student_id = get_required_str(params, "studentId")?;
    require_session(conn, &session_id)?;

    conn.execute(
        "INSERT INTO enrollments(session_id, student_id) VALUES(?, ?)
         ON CONFLICT(session_id, student_id) DO NOTHING",
        (&session_id, &student_id),
    )
    .map_err(HandlerErr::db)?;

    Ok(json!({ "enrolled": true }))
}

fn roster_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let session_id = get_required_str(params, "sessionId")?;
    require_session(conn, &session_id)?;

    let store = db::SqliteStore { conn };
    let roster = store
        .enrolled_students(&session_id)
        .map_err(HandlerErr::internal)?;
    let students: Vec<serde_json::Value> = roster
        .iter()
        .map(|s| {
            json!({
                "id": s.student_id,
                "username": s.username,
                "fullName": s.full_name,
                "email": s.email,
            })
        })
        .collect();

    Ok(json!({ "students": students }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let handled = matches!(
        req.method.as_str(),
        "roster.addStudent" | "roster.enroll" | "roster.list"
    );
    if !handled {
        return None;
    }

    let Some(conn) = state.db.as_ref() else {
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    };

    let result = match req.method.as_str() {
        "roster.addStudent" => student_create(conn, &req.params),
        "roster.enroll" => roster_enroll(conn, &req.params),
        "roster.list" => roster_list(conn, &req.params),
        _ => unreachable!(),
    };

    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
