use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

/// One process as seen in a single cycle.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProcessRecord {
    pub pid: u32,
    pub parent_pid: u32,
    pub real_uid: u32,
    pub effective_uid: u32,
    pub real_gid: u32,
    /// Seconds since the Unix epoch.
    pub start_time: u64,
    /// Short process name as stored in the control block.
    pub name: String,
    pub command_line: String,
    pub is_zombie: bool,
    pub resident_memory_kib: Option<u64>,
    /// Cumulative user + system time in tenths of a second.
    pub cpu_time_tenths: Option<u64>,
    pub sampled_at: SystemTime,
}

impl ProcessRecord {
    pub fn sampled_at_secs(&self) -> f64 {
        self.sampled_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}

/// Every process visible at one sample time, in kernel enumeration order.
///
/// Lookups go through pid values, never positions. Nothing is shared with
/// the previous cycle's snapshot.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ProcessSnapshot {
    records: Vec<ProcessRecord>,
    #[serde(skip)]
    by_pid: HashMap<u32, usize>,
}

impl ProcessSnapshot {
    /// Build a snapshot, keeping the first record when a pid repeats.
    pub fn from_records(records: Vec<ProcessRecord>) -> Self {
        let mut kept = Vec::with_capacity(records.len());
        let mut by_pid = HashMap::with_capacity(records.len());
        for record in records {
            if by_pid.contains_key(&record.pid) {
                tracing::debug!(pid = record.pid, "duplicate pid in enumeration, keeping first");
                continue;
            }
            by_pid.insert(record.pid, kept.len());
            kept.push(record);
        }
        ProcessSnapshot {
            records: kept,
            by_pid,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProcessRecord> {
        self.records.iter()
    }

    pub fn records(&self) -> &[ProcessRecord] {
        &self.records
    }

    pub fn get(&self, pid: u32) -> Option<&ProcessRecord> {
        self.by_pid.get(&pid).map(|&i| &self.records[i])
    }

    /// `None` for roots and orphans whose parent is not in this snapshot.
    pub fn parent_of(&self, pid: u32) -> Option<&ProcessRecord> {
        let record = self.get(pid)?;
        if record.parent_pid == record.pid {
            return None;
        }
        self.get(record.parent_pid)
    }

    pub fn children_of(&self, pid: u32) -> Vec<u32> {
        let mut children: Vec<u32> = self
            .records
            .iter()
            .filter(|r| r.parent_pid == pid && r.pid != pid)
            .map(|r| r.pid)
            .collect();
        children.sort_unstable();
        children
    }

    pub fn into_records(self) -> Vec<ProcessRecord> {
        self.records
    }
}

impl<'a> IntoIterator for &'a ProcessSnapshot {
    type Item = &'a ProcessRecord;
    type IntoIter = std::slice::Iter<'a, ProcessRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// Rebuild a command line from a kernel argument blob.
///
/// Layout: a native-endian `i32` argc, the executable path, then argc
/// arguments and the environment. Every string is NUL terminated and runs of
/// NUL padding may sit between strings. The executable path is skipped and at
/// most argc strings are joined with single spaces.
///
/// Returns `None` when the blob is malformed or yields no argument text.
pub fn command_line_from_args_blob(blob: &[u8]) -> Option<String> {
    const ARGC_LEN: usize = std::mem::size_of::<i32>();

    let argc_bytes: [u8; ARGC_LEN] = blob.get(..ARGC_LEN)?.try_into().ok()?;
    let argc = i32::from_ne_bytes(argc_bytes);
    if argc <= 0 {
        return None;
    }
    let body = &blob[ARGC_LEN..];

    // Executable path.
    let mut cursor = body.iter().position(|&b| b == 0)?;

    let mut remaining = argc as usize;
    let mut args: Vec<String> = Vec::with_capacity(remaining.min(64));
    while remaining > 0 && cursor < body.len() {
        if body[cursor] == 0 {
            cursor += 1;
            continue;
        }
        let end = body[cursor..]
            .iter()
            .position(|&b| b == 0)
            .map_or(body.len(), |n| cursor + n);
        args.push(String::from_utf8_lossy(&body[cursor..end]).into_owned());
        remaining -= 1;
        cursor = end;
    }

    let line = args.join(" ");
    let trimmed = line.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Combined user + system time as tenths of a second:
/// `seconds * 10 + microseconds / 100_000`.
pub fn tenths_of_second(seconds: i64, microseconds: i64) -> u64 {
    (seconds * 10 + microseconds / 100_000).max(0) as u64
}

/// The reconstructed command line, or the short name when there is none.
pub fn command_line_or_name(reconstructed: Option<String>, name: &str) -> String {
    match reconstructed {
        Some(line) if !line.trim().is_empty() => line,
        _ => name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(argc: i32, parts: &[&[u8]]) -> Vec<u8> {
        let mut out = argc.to_ne_bytes().to_vec();
        for part in parts {
            out.extend_from_slice(part);
        }
        out
    }

    fn record(pid: u32, parent_pid: u32, name: &str) -> ProcessRecord {
        ProcessRecord {
            pid,
            parent_pid,
            real_uid: 0,
            effective_uid: 0,
            real_gid: 0,
            start_time: 0,
            name: name.to_string(),
            command_line: name.to_string(),
            is_zombie: false,
            resident_memory_kib: None,
            cpu_time_tenths: None,
            sampled_at: UNIX_EPOCH,
        }
    }

    #[test]
    fn padding_collapsed_and_exec_path_excluded() {
        let b = blob(3, &[b"/usr/bin/tool\0", b"a\0", b"\0\0b\0", b"c\0"]);
        assert_eq!(command_line_from_args_blob(&b).as_deref(), Some("a b c"));
    }

    #[test]
    fn stops_after_argc_strings() {
        let b = blob(
            2,
            &[b"/bin/sh\0\0\0\0", b"sh\0", b"-c\0", b"PATH=/bin\0", b"HOME=/\0"],
        );
        assert_eq!(command_line_from_args_blob(&b).as_deref(), Some("sh -c"));
    }

    #[test]
    fn stops_at_blob_exhaustion() {
        let b = blob(5, &[b"/bin/ls\0", b"ls\0", b"-l"]);
        assert_eq!(command_line_from_args_blob(&b).as_deref(), Some("ls -l"));
    }

    #[test]
    fn malformed_blobs_yield_none() {
        assert_eq!(command_line_from_args_blob(&[]), None);
        assert_eq!(command_line_from_args_blob(&[1, 0]), None);
        assert_eq!(command_line_from_args_blob(&blob(0, &[b"/bin/ls\0", b"ls\0"])), None);
        assert_eq!(command_line_from_args_blob(&blob(-4, &[b"/bin/ls\0"])), None);
        assert_eq!(command_line_from_args_blob(&blob(1, &[b"/bin/ls-no-terminator"])), None);
        assert_eq!(command_line_from_args_blob(&blob(2, &[b"/bin/ls\0\0\0\0"])), None);
    }

    #[test]
    fn cpu_time_in_tenths() {
        assert_eq!(tenths_of_second(12, 340_000), 123);
        assert_eq!(tenths_of_second(0, 99_999), 0);
        // microseconds of user and system time summed before dividing
        assert_eq!(tenths_of_second(3, 1_500_000), 45);
    }

    #[test]
    fn fallback_to_name_when_empty() {
        assert_eq!(command_line_or_name(None, "kernel_task"), "kernel_task");
        assert_eq!(command_line_or_name(Some("  ".into()), "launchd"), "launchd");
        assert_eq!(command_line_or_name(Some("a b".into()), "x"), "a b");
    }

    #[test]
    fn lineage_lookups_are_by_value() {
        let snapshot = ProcessSnapshot::from_records(vec![
            record(40, 1, "child_b"),
            record(1, 0, "launchd"),
            record(0, 0, "kernel_task"),
            record(12, 1, "child_a"),
            record(99, 12, "grandchild"),
            record(7, 4040, "orphan"),
        ]);

        assert_eq!(snapshot.children_of(1), vec![12, 40]);
        assert_eq!(snapshot.children_of(0), vec![1]);
        assert_eq!(snapshot.parent_of(99).map(|p| p.pid), Some(12));
        assert!(snapshot.parent_of(7).is_none());
        assert!(snapshot.parent_of(0).is_none());
        assert_eq!(snapshot.get(40).map(|p| p.name.as_str()), Some("child_b"));
    }

    #[test]
    fn duplicate_pids_keep_first_record() {
        let snapshot = ProcessSnapshot::from_records(vec![
            record(5, 1, "first"),
            record(6, 1, "other"),
            record(5, 1, "second"),
        ]);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.get(5).map(|p| p.name.as_str()), Some("first"));
        let order: Vec<u32> = snapshot.iter().map(|p| p.pid).collect();
        assert_eq!(order, vec![5, 6]);
    }
}
