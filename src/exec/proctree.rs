// src/exec/proctree.rs

//! Process-tree discovery from `/proc`.
//!
//! Only Linux exposes the parent links we need; elsewhere the tree is just
//! the root process.

#[cfg(target_os = "linux")]
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;

/// CPU time and resident memory of one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcStat {
    pub pid: u32,
    pub ppid: u32,
    /// utime + stime, in clock ticks.
    pub cpu_ticks: u64,
}

/// All transitive children of `root`, excluding `root` itself.
#[cfg(target_os = "linux")]
pub fn descendants(root: u32) -> Vec<u32> {
    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    for stat in process_table() {
        children.entry(stat.ppid).or_default().push(stat.pid);
    }

    let mut result = Vec::new();
    let mut stack = vec![root];
    while let Some(pid) = stack.pop() {
        if let Some(kids) = children.get(&pid) {
            for &kid in kids {
                if kid != root && !result.contains(&kid) {
                    result.push(kid);
                    stack.push(kid);
                }
            }
        }
    }
    result
}

#[cfg(not(target_os = "linux"))]
pub fn descendants(_root: u32) -> Vec<u32> {
    Vec::new()
}

#[cfg(target_os = "linux")]
fn process_table() -> Vec<ProcStat> {
    let Ok(entries) = fs::read_dir("/proc") else {
        return Vec::new();
    };
    entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().to_str().and_then(|s| s.parse::<u32>().ok()))
        .filter_map(read_stat)
        .collect()
}

/// Read `/proc/<pid>/stat`. `None` once the process is gone.
#[cfg(target_os = "linux")]
pub fn read_stat(pid: u32) -> Option<ProcStat> {
    let stat = fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    parse_stat(pid, &stat)
}

#[cfg(not(target_os = "linux"))]
pub fn read_stat(_pid: u32) -> Option<ProcStat> {
    None
}

/// Parse the fields we need. `comm` may contain spaces and parentheses, so
/// fields are counted from the last `)`.
pub fn parse_stat(pid: u32, stat: &str) -> Option<ProcStat> {
    let close = stat.rfind(')')?;
    let fields: Vec<&str> = stat[close + 1..].split_whitespace().collect();
    // fields[0] is field 3 (state) of proc(5).
    let ppid = fields.get(1)?.parse().ok()?;
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;
    Some(ProcStat {
        pid,
        ppid,
        cpu_ticks: utime + stime,
    })
}

/// Resident set size in kilobytes from `/proc/<pid>/status`.
#[cfg(target_os = "linux")]
pub fn read_rss_kb(pid: u32) -> Option<u64> {
    let status = fs::read_to_string(format!("/proc/{pid}/status")).ok()?;
    parse_rss_kb(&status)
}

#[cfg(not(target_os = "linux"))]
pub fn read_rss_kb(_pid: u32) -> Option<u64> {
    None
}

pub fn parse_rss_kb(status: &str) -> Option<u64> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("VmRSS:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kb| kb.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_stat_handles_spaces_in_comm() {
        let line = "4242 (npm run (dev)) S 4000 4242 4242 0 -1 4194560 2000 0 0 0 150 25 0 0 20 0 1 0 123 0 0";
        let stat = parse_stat(4242, line).unwrap();
        assert_eq!(stat.ppid, 4000);
        assert_eq!(stat.cpu_ticks, 175);
    }

    #[test]
    fn parse_rss_reads_kilobytes() {
        let status = "Name:\tnode\nVmPeak:\t  900 kB\nVmRSS:\t  51200 kB\nThreads:\t11\n";
        assert_eq!(parse_rss_kb(status), Some(51200));
        assert_eq!(parse_rss_kb("Name:\tzombie\n"), None);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn own_process_is_readable() {
        let me = std::process::id();
        assert!(read_stat(me).is_some());
        assert!(!descendants(me).contains(&me));
    }
}
