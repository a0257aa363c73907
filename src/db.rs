use crate::reconcile::{AttendancePersister, AttendanceRecord, RosterProvider, UnmatchedName, UnmatchedReporter};
use crate::resolve::RosterEntry;
use chrono::NaiveDateTime;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("rollcall.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    create_schema(&conn)?;
    Ok(conn)
}

fn create_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS sessions(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            scheduled_time TEXT,
            min_attendance_minutes REAL NOT NULL DEFAULT 5.0
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL,
            full_name TEXT,
            email TEXT,
            sort_order INTEGER NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_sort ON students(sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            session_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            PRIMARY KEY(session_id, student_id),
            FOREIGN KEY(session_id) REFERENCES sessions(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_records(
            session_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            attended INTEGER NOT NULL,
            first_join_time TEXT,
            last_leave_time TEXT,
            total_duration_minutes REAL NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY(session_id, student_id),
            FOREIGN KEY(session_id) REFERENCES sessions(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS unmatched_participants(
            session_id TEXT NOT NULL,
            canonical_name TEXT NOT NULL,
            candidates TEXT NOT NULL DEFAULT '[]',
            reported_at TEXT NOT NULL,
            FOREIGN KEY(session_id) REFERENCES sessions(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_unmatched_session ON unmatched_participants(session_id)",
        [],
    )?;

    Ok(())
}

pub fn session_exists(conn: &Connection, session_id: &str) -> anyhow::Result<bool> {
    let found = conn
        .query_row("SELECT 1 FROM sessions WHERE id = ?", [session_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?;
    Ok(found.is_some())
}

pub fn session_min_minutes(conn: &Connection, session_id: &str) -> anyhow::Result<Option<f64>> {
    Ok(conn
        .query_row(
            "SELECT min_attendance_minutes FROM sessions WHERE id = ?",
            [session_id],
            |r| r.get(0),
        )
        .optional()?)
}

fn format_time(t: Option<NaiveDateTime>) -> Option<String> {
    t.map(|v| v.format(TIME_FORMAT).to_string())
}

pub fn now_stamp() -> String {
    chrono::Utc::now().format(TIME_FORMAT).to_string()
}

/// Workspace database acting as all three reconciler collaborators. Built
/// per request on top of the open connection; no process-wide state.
pub struct SqliteStore<'a> {
    pub conn: &'a Connection,
}

impl RosterProvider for SqliteStore<'_> {
    fn enrolled_students(&self, session_id: &str) -> anyhow::Result<Vec<RosterEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT s.id, s.username, s.full_name, s.email
             FROM students s
             JOIN enrollments e ON e.student_id = s.id
             WHERE e.session_id = ?
             ORDER BY s.sort_order, s.id",
        )?;
        let rows = stmt
            .query_map([session_id], |r| {
                Ok(RosterEntry {
                    student_id: r.get(0)?,
                    username: r.get(1)?,
                    full_name: r.get(2)?,
                    email: r.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

impl AttendancePersister for SqliteStore<'_> {
    fn upsert_batch(
        &mut self,
        session_id: &str,
        records: &[AttendanceRecord],
    ) -> anyhow::Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        let now = now_stamp();
        {
            let mut stmt = tx.prepare(
                "INSERT INTO attendance_records(
                    session_id, student_id, attended,
                    first_join_time, last_leave_time,
                    total_duration_minutes, updated_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(session_id, student_id) DO UPDATE SET
                   attended = excluded.attended,
                   first_join_time = excluded.first_join_time,
                   last_leave_time = excluded.last_leave_time,
                   total_duration_minutes = excluded.total_duration_minutes,
                   updated_at = excluded.updated_at",
            )?;
            for rec in records {
                stmt.execute((
                    session_id,
                    &rec.student_id,
                    rec.attended as i64,
                    format_time(rec.first_join),
                    format_time(rec.last_leave),
                    rec.total_duration_minutes,
                    &now,
                ))?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

impl UnmatchedReporter for SqliteStore<'_> {
    fn report(&mut self, session_id: &str, names: &[UnmatchedName]) -> anyhow::Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        let now = now_stamp();
        tx.execute(
            "DELETE FROM unmatched_participants WHERE session_id = ?",
            [session_id],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO unmatched_participants(session_id, canonical_name, candidates, reported_at)
                 VALUES(?, ?, ?, ?)",
            )?;
            for name in names {
                let candidates = serde_json::to_string(&name.candidates)?;
                stmt.execute((session_id, &name.canonical_name, &candidates, &now))?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_db() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        create_schema(&conn).expect("schema");
        conn
    }

    fn seed(conn: &Connection) {
        conn.execute(
            "INSERT INTO sessions(id, title) VALUES('sess-1', 'Session 7')",
            [],
        )
        .unwrap();
        for (i, (id, name)) in [("s1", "Aditi H Nayak"), ("s2", "Bala Tharun")]
            .iter()
            .enumerate()
        {
            conn.execute(
                "INSERT INTO students(id, username, sort_order) VALUES(?, ?, ?)",
                (id, name, i as i64),
            )
            .unwrap();
            conn.execute(
                "INSERT INTO enrollments(session_id, student_id) VALUES('sess-1', ?)",
                [id],
            )
            .unwrap();
        }
    }

    #[test]
    fn roster_comes_back_in_sort_order() {
        let conn = memory_db();
        seed(&conn);
        let store = SqliteStore { conn: &conn };
        let roster = store.enrolled_students("sess-1").expect("roster");
        assert_eq!(roster.len(), 2);
        assert_eq!(roster[0].student_id, "s1");
        assert_eq!(roster[1].username, "Bala Tharun");
    }

    #[test]
    fn upsert_batch_replaces_instead_of_duplicating() {
        let conn = memory_db();
        seed(&conn);
        let mut store = SqliteStore { conn: &conn };

        let rec = |attended: bool, minutes: f64| AttendanceRecord {
            student_id: "s1".into(),
            attended,
            first_join: None,
            last_leave: None,
            total_duration_minutes: minutes,
        };
        store
            .upsert_batch("sess-1", &[rec(true, 40.0)])
            .expect("first");
        store
            .upsert_batch("sess-1", &[rec(false, 2.0)])
            .expect("second");

        let (count, attended, minutes): (i64, i64, f64) = conn
            .query_row(
                "SELECT COUNT(*), MAX(attended), MAX(total_duration_minutes)
                 FROM attendance_records WHERE session_id = 'sess-1' AND student_id = 's1'",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .expect("row");
        assert_eq!(count, 1);
        assert_eq!(attended, 0);
        assert_eq!(minutes, 2.0);
    }

    #[test]
    fn unmatched_report_is_replaced_per_import() {
        let conn = memory_db();
        seed(&conn);
        let mut store = SqliteStore { conn: &conn };

        let name = |n: &str| UnmatchedName {
            canonical_name: n.into(),
            candidates: vec![],
        };
        store
            .report("sess-1", &[name("ghost one"), name("ghost two")])
            .expect("first");
        store
            .report("sess-1", &[name("ghost three")])
            .expect("second");

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM unmatched_participants WHERE session_id = 'sess-1'",
                [],
                |r| r.get(0),
            )
            .expect("count");
        assert_eq!(count, 1);
    }

    #[test]
    fn session_lookups() {
        let conn = memory_db();
        seed(&conn);
        assert!(session_exists(&conn, "sess-1").unwrap());
        assert!(!session_exists(&conn, "sess-9").unwrap());
        assert_eq!(session_min_minutes(&conn, "sess-1").unwrap(), Some(5.0));
        assert_eq!(session_min_minutes(&conn, "sess-9").unwrap(), None);
    }
}
