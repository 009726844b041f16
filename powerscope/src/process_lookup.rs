//! Find the target PID from a process name.
//!
//! Candidates are matched against both the command name in
//! `/proc/<pid>/stat` and the basename of `/proc/<pid>/exe`. Exact matches
//! win over substring matches; the profiler never matches itself.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::Pid;

/// A process found by name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: Pid,
    pub exe_path: PathBuf,
    pub command: String,
}

/// Find the single process matching `name`
///
/// # Errors
/// - No processes found
/// - Multiple equally good matches (ambiguous)
pub fn find_process_by_name(name: &str) -> Result<ProcessInfo> {
    let own = i32::try_from(std::process::id()).ok().map(Pid);
    find_in(Path::new("/proc"), name, own)
}

fn find_in(proc_root: &Path, name: &str, exclude: Option<Pid>) -> Result<ProcessInfo> {
    let entries =
        fs::read_dir(proc_root).with_context(|| format!("Failed to read {}", proc_root.display()))?;

    let mut exact = Vec::new();
    let mut partial = Vec::new();
    for entry in entries.flatten() {
        let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<i32>().ok()).map(Pid) else {
            continue;
        };
        if Some(pid) == exclude {
            continue;
        }
        // Kernel threads have no exe link; unreadable processes are skipped too
        let Some(info) = inspect(&entry.path(), pid) else {
            continue;
        };
        match classify(&info.command, &info.exe_path, name) {
            Match::Exact => exact.push(info),
            Match::Partial => partial.push(info),
            Match::None => {}
        }
    }

    let mut candidates = if exact.is_empty() { partial } else { exact };
    candidates.sort_by_key(|info| info.pid.0);
    match candidates.len() {
        0 => bail!(
            "No process matching '{name}' found.\n\
             Check running processes with: ps aux | grep {name}"
        ),
        1 => Ok(candidates.remove(0)),
        _ => {
            let list: Vec<String> =
                candidates.iter().map(|c| format!("  {} ({})", c.pid.0, c.command)).collect();
            bail!(
                "Multiple processes match '{name}':\n{}\n\n\
                 Specify PID explicitly: powerscope --pid <PID>",
                list.join("\n")
            )
        }
    }
}

fn inspect(dir: &Path, pid: Pid) -> Option<ProcessInfo> {
    let exe_path = fs::read_link(dir.join("exe")).ok()?;
    let stat = fs::read_to_string(dir.join("stat")).ok()?;
    let command = extract_comm(&stat).ok()?;
    Some(ProcessInfo { pid, exe_path, command })
}

/// Extract command name from `/proc/<pid>/stat`.
/// Format: "pid (comm) state ..."
fn extract_comm(stat_line: &str) -> Result<String> {
    let open = stat_line.find('(').context("Invalid stat format")?;
    let close = stat_line.rfind(')').context("Invalid stat format")?;
    if open >= close {
        bail!("Invalid stat format");
    }
    Ok(stat_line[open + 1..close].to_string())
}

#[derive(Debug, PartialEq, Eq)]
enum Match {
    Exact,
    Partial,
    None,
}

fn classify(command: &str, exe_path: &Path, pattern: &str) -> Match {
    let exe_basename = exe_path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let pattern_basename = Path::new(pattern).file_name().and_then(|n| n.to_str()).unwrap_or(pattern);

    if command == pattern_basename || exe_basename == pattern_basename {
        Match::Exact
    } else if command.contains(pattern_basename) || exe_basename.contains(pattern_basename) {
        Match::Partial
    } else {
        Match::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;
    use tempfile::TempDir;

    fn fake_proc(processes: &[(i32, &str, &str)]) -> TempDir {
        let root = TempDir::new().unwrap();
        for (pid, comm, exe) in processes {
            let dir = root.path().join(pid.to_string());
            fs::create_dir(&dir).unwrap();
            fs::write(dir.join("stat"), format!("{pid} ({comm}) S 1 {pid} {pid} 0 -1")).unwrap();
            symlink(exe, dir.join("exe")).unwrap();
        }
        // Kernel thread: no exe link
        fs::create_dir(root.path().join("2")).unwrap();
        fs::write(root.path().join("2/stat"), "2 (kthreadd) S 0 0 0").unwrap();
        root
    }

    #[test]
    fn test_extract_comm() {
        let stat = "1234 (my-app) S 1 1234 1234 0 -1 4194304";
        assert_eq!(extract_comm(stat).unwrap(), "my-app");
    }

    #[test]
    fn test_extract_comm_with_parens() {
        // Command names can contain parentheses
        let stat = "1234 (app (v2)) S 1 1234";
        assert_eq!(extract_comm(stat).unwrap(), "app (v2)");
        assert!(extract_comm("1234 )x( S").is_err());
    }

    #[test]
    fn test_classify() {
        let exe = Path::new("/usr/bin/my-server");
        assert_eq!(classify("my-server", exe, "my-server"), Match::Exact);
        assert_eq!(classify("my-server", exe, "./target/my-server"), Match::Exact);
        assert_eq!(classify("my-server", exe, "server"), Match::Partial);
        assert_eq!(classify("my-server", exe, "other"), Match::None);
    }

    #[test]
    fn test_exact_match_beats_partial() {
        let root = fake_proc(&[(100, "busy", "/opt/busy"), (200, "busy-chain", "/opt/busy-chain")]);
        let info = find_in(root.path(), "busy", None).unwrap();
        assert_eq!(info.pid, Pid(100));
        assert_eq!(info.exe_path, PathBuf::from("/opt/busy"));
    }

    #[test]
    fn test_ambiguous_and_missing() {
        let root = fake_proc(&[(100, "worker", "/a/worker"), (200, "worker", "/b/worker")]);
        let err = find_in(root.path(), "worker", None).unwrap_err().to_string();
        assert!(err.contains("Multiple processes"));
        assert!(err.contains("  100 (worker)"));

        assert!(find_in(root.path(), "worker", Some(Pid(200))).is_ok());
        assert!(find_in(root.path(), "kthreadd", None).is_err());
    }
}
