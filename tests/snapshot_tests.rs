use std::time::UNIX_EPOCH;

use insta::assert_debug_snapshot;
use vigil::system::process::{
    ProcessRecord, ProcessSnapshot, command_line_from_args_blob, command_line_or_name,
};

fn args_blob(argc: i32, body: &[u8]) -> Vec<u8> {
    let mut out = argc.to_ne_bytes().to_vec();
    out.extend_from_slice(body);
    out
}

fn mock_record(pid: u32, parent_pid: u32, name: &str, blob: Option<Vec<u8>>) -> ProcessRecord {
    let reconstructed = blob.as_deref().and_then(command_line_from_args_blob);
    ProcessRecord {
        pid,
        parent_pid,
        real_uid: 501,
        effective_uid: 501,
        real_gid: 20,
        start_time: 1_700_000_000,
        name: name.to_string(),
        command_line: command_line_or_name(reconstructed, name),
        is_zombie: false,
        resident_memory_kib: None,
        cpu_time_tenths: None,
        sampled_at: UNIX_EPOCH,
    }
}

fn normalized_lineage(snapshot: &ProcessSnapshot) -> Vec<(u32, Option<u32>, Vec<u32>, String)> {
    let mut rows: Vec<(u32, Option<u32>, Vec<u32>, String)> = snapshot
        .iter()
        .map(|p| {
            (
                p.pid,
                snapshot.parent_of(p.pid).map(|parent| parent.pid),
                snapshot.children_of(p.pid),
                p.command_line.clone(),
            )
        })
        .collect();
    rows.sort_by_key(|r| r.0);
    rows
}

#[test]
fn deterministic_lineage_snapshot_from_mock_data() {
    let records = vec![
        mock_record(1, 0, "launchd", Some(args_blob(1, b"/sbin/launchd\0launchd\0"))),
        mock_record(0, 0, "kernel_task", None),
        mock_record(
            2,
            1,
            "worker",
            Some(args_blob(3, b"/usr/bin/worker\0\0\0worker\0--queue\0a\0HOME=/\0")),
        ),
        mock_record(3, 1, "worker_b", Some(args_blob(0, b"/usr/bin/worker\0"))),
        mock_record(4, 2, "worker_child", None),
        // orphan: parent pid 4040 does not exist
        mock_record(8, 4040, "orphan", None),
    ];

    let snapshot = ProcessSnapshot::from_records(records);
    let normalized = normalized_lineage(&snapshot);

    assert_debug_snapshot!("process_lineage_normalized", normalized);
}

#[test]
fn lineage_invariants_hold_with_orphans() {
    let records = vec![
        mock_record(10, 0, "root", None),
        mock_record(11, 10, "child", None),
        mock_record(12, 9999, "orphan", None),
    ];

    let snapshot = ProcessSnapshot::from_records(records);

    // No process dropped.
    assert_eq!(snapshot.len(), 3);

    assert_eq!(snapshot.children_of(10), vec![11]);
    assert_eq!(snapshot.parent_of(11).map(|p| p.pid), Some(10));

    // Orphan remains present without an inferred parent.
    assert!(snapshot.get(12).is_some());
    assert!(snapshot.parent_of(12).is_none());
    assert!(snapshot.children_of(12).is_empty());
}
