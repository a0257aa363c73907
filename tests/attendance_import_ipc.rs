
use serde_json::json;
use test_support::{fixture_path, request_ok, seed_session, spawn_sidecar, temp_dir};

#[test]
fn csv_report_import_matches_consolidates_and_marks_absent() {
    let workspace = temp_dir("rollcall-import");
    let report = fixture_path("fixtures/reports/career_launchpad_s7.csv");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (session_id, student_ids) = seed_session(&mut stdin, &mut reader, &workspace);

    let summary = request_ok(
        &mut stdin,
        &mut reader,
        "import",
        "attendance.import",
        json!({
            "sessionId": session_id,
            "reportPath": report.to_string_lossy(),
        }),
    );

    // Four data rows, three distinct participants after consolidation.
    assert_eq!(summary.get("rawRows").and_then(|v| v.as_u64()), Some(4));
    assert_eq!(summary.get("participants").and_then(|v| v.as_u64()), Some(3));
    assert_eq!(summary.get("rosterSize").and_then(|v| v.as_u64()), Some(3));
    // Two matched + one absent roster student.
    assert_eq!(
        summary.get("recordsWritten").and_then(|v| v.as_u64()),
        Some(3)
    );

    let matched = summary
        .get("matched")
        .and_then(|v| v.as_array())
        .expect("matched");
    assert_eq!(matched.len(), 2);

    let aditi = matched
        .iter()
        .find(|m| m.get("canonicalName").and_then(|v| v.as_str()) == Some("aditi nayak"))
        .expect("aditi matched");
    assert_eq!(aditi.get("tier").and_then(|v| v.as_str()), Some("tokenFuzzy"));
    assert_eq!(
        aditi.get("studentId").and_then(|v| v.as_str()),
        Some(student_ids[0].as_str())
    );
    let aditi_minutes = aditi
        .get("totalDurationMinutes")
        .and_then(|v| v.as_f64())
        .expect("minutes");
    // 47m 9s + 55m 19s, the rejoined segments are additive.
    assert!((aditi_minutes - (47.0 + 9.0 / 60.0 + 55.0 + 19.0 / 60.0)).abs() < 1e-9);
    assert_eq!(aditi.get("attended").and_then(|v| v.as_bool()), Some(true));

    let bala = matched
        .iter()
        .find(|m| m.get("canonicalName").and_then(|v| v.as_str()) == Some("bala tharun"))
        .expect("bala matched");
    // "(Guest)" stripped, then an exact hit on the roster name.
    assert_eq!(bala.get("tier").and_then(|v| v.as_str()), Some("exact"));

    let unmatched = summary
        .get("unmatched")
        .and_then(|v| v.as_array())
        .expect("unmatched");
    assert_eq!(unmatched.len(), 1);
    assert_eq!(
        unmatched[0].get("canonicalName").and_then(|v| v.as_str()),
        Some("unknown student")
    );

    assert_eq!(
        summary.get("absentStudentIds").and_then(|v| v.as_array()),
        Some(&vec![json!(student_ids[2])])
    );
}

#[test]
fn imported_records_and_unmatched_report_are_queryable() {
    let workspace = temp_dir("rollcall-import-query");
    let report = fixture_path("fixtures/reports/career_launchpad_s7.csv");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (session_id, student_ids) = seed_session(&mut stdin, &mut reader, &workspace);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "import",
        "attendance.import",
        json!({
            "sessionId": session_id,
            "reportPath": report.to_string_lossy(),
        }),
    );

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "list",
        "attendance.list",
        json!({ "sessionId": session_id }),
    );
    let records = listed
        .get("records")
        .and_then(|v| v.as_array())
        .expect("records");
    assert_eq!(records.len(), 3);
    // Roster order: Aditi, Bala, Chitra.
    assert_eq!(
        records[0].get("studentId").and_then(|v| v.as_str()),
        Some(student_ids[0].as_str())
    );
    assert_eq!(
        records[0].get("firstJoinTime").and_then(|v| v.as_str()),
        Some("2026-02-15T18:13:01")
    );
    assert_eq!(
        records[0].get("lastLeaveTime").and_then(|v| v.as_str()),
        Some("2026-02-15T20:00:41")
    );
    assert_eq!(
        records[1].get("attended").and_then(|v| v.as_bool()),
        Some(true)
    );

    let chitra = &records[2];
    assert_eq!(
        chitra.get("studentId").and_then(|v| v.as_str()),
        Some(student_ids[2].as_str())
    );
    assert_eq!(chitra.get("attended").and_then(|v| v.as_bool()), Some(false));
    assert!(chitra.get("firstJoinTime").unwrap().is_null());
    assert_eq!(
        chitra
            .get("totalDurationMinutes")
            .and_then(|v| v.as_f64()),
        Some(0.0)
    );

    let unmatched = request_ok(
        &mut stdin,
        &mut reader,
        "unmatched",
        "attendance.unmatched",
        json!({ "sessionId": session_id }),
    );
    let rows = unmatched
        .get("unmatched")
        .and_then(|v| v.as_array())
        .expect("rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0].get("canonicalName").and_then(|v| v.as_str()),
        Some("unknown student")
    );
}

#[test]
fn threshold_override_marks_short_attendance_false() {
    let workspace = temp_dir("rollcall-threshold");
    let report = fixture_path("fixtures/reports/career_launchpad_s7.csv");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (session_id, _student_ids) = seed_session(&mut stdin, &mut reader, &workspace);

    let summary = request_ok(
        &mut stdin,
        &mut reader,
        "import",
        "attendance.import",
        json!({
            "sessionId": session_id,
            "reportPath": report.to_string_lossy(),
            "minAttendanceMinutes": 100.0,
        }),
    );

    let matched = summary
        .get("matched")
        .and_then(|v| v.as_array())
        .expect("matched");
    let aditi = matched
        .iter()
        .find(|m| m.get("canonicalName").and_then(|v| v.as_str()) == Some("aditi nayak"))
        .expect("aditi");
    // 102.5 minutes clears the bar.
    assert_eq!(aditi.get("attended").and_then(|v| v.as_bool()), Some(true));
    let bala = matched
        .iter()
        .find(|m| m.get("canonicalName").and_then(|v| v.as_str()) == Some("bala tharun"))
        .expect("bala");
    // 94.75 minutes does not, but the record is still written.
    assert_eq!(bala.get("attended").and_then(|v| v.as_bool()), Some(false));
}

#[test]
fn unreadable_report_file_fails_before_parsing() {
    let workspace = temp_dir("rollcall-unreadable");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (session_id, _) = seed_session(&mut stdin, &mut reader, &workspace);

    let resp = test_support::request(
        &mut stdin,
        &mut reader,
        "import",
        "attendance.import",
        json!({
            "sessionId": session_id,
            "reportPath": workspace.join("does-not-exist.csv").to_string_lossy(),
        }),
    );
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        resp.pointer("/error/code").and_then(|v| v.as_str()),
        Some("report_unreadable")
    );

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "list",
        "attendance.list",
        json!({ "sessionId": session_id }),
    );
    assert_eq!(
        listed.get("records").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );
}
