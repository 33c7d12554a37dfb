//! Host probing primitives
//!
//! All hardware inspection goes through the [`Probe`] trait: reading sysfs /
//! procfs files, listing directories and running inspection tools. The real
//! host implementation is [`HostProbe`].

use std::io;
use std::path::Path;
use std::process::Command;

/// Captured output of an inspection tool
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit status was zero
    pub success: bool,
    /// Standard output (lossy UTF-8)
    pub stdout: String,
    /// Standard error (lossy UTF-8)
    pub stderr: String,
}

/// Read-only access to host state
pub trait Probe {
    /// Read a whole file as text
    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// List the entry names of a directory, in no particular order
    fn list_dir(&self, path: &Path) -> io::Result<Vec<String>>;

    /// Check whether a path exists
    fn exists(&self, path: &Path) -> bool;

    /// Run a tool to completion and capture its output
    ///
    /// A tool that cannot be spawned yields `Err` with kind `NotFound`.
    fn run(&self, program: &str, args: &[&str]) -> io::Result<CommandOutput>;

    /// Logical CPU count as reported by the OS, if known
    fn logical_cpus(&self) -> Option<usize>;
}

/// Probe backed by the real filesystem and process table
#[derive(Debug, Clone, Copy, Default)]
pub struct HostProbe;

impl HostProbe {
    /// Create a host probe
    pub fn new() -> Self {
        Self
    }
}

impl Probe for HostProbe {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn list_dir(&self, path: &Path) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn run(&self, program: &str, args: &[&str]) -> io::Result<CommandOutput> {
        let output = Command::new(program).args(args).output()?;
        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn logical_cpus(&self) -> Option<usize> {
        match num_cpus::get() {
            0 => None,
            n => Some(n),
        }
    }
}

/// Count the CPUs in a list such as "0-3,8-11" (-> 8)
///
/// Malformed parts and reversed ranges are skipped. Returns `None` if the
/// total overflows.
pub fn count_cpu_list(s: &str) -> Option<usize> {
    let mut count: usize = 0;

    for part in s.trim().split(',') {
        let part = part.trim();
        let size = if let Some((start, end)) = part.split_once('-') {
            match (start.parse::<usize>(), end.parse::<usize>()) {
                (Ok(start), Ok(end)) if start <= end => (end - start).checked_add(1)?,
                _ => 0,
            }
        } else if part.parse::<usize>().is_ok() {
            1
        } else {
            0
        };
        count = count.checked_add(size)?;
    }

    Some(count)
}

/// Sort key that orders `mlx5_6` before `mlx5_10`
pub fn natural_key(name: &str) -> (String, u64, String) {
    let digits_at = name
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| i);

    match digits_at {
        Some(i) => {
            let number = name[i..].parse().unwrap_or(u64::MAX);
            (name[..i].to_string(), number, name.to_string())
        }
        None => (name.to_string(), 0, name.to_string()),
    }
}

/// True if `name` is `prefix` followed by one or more ASCII digits
pub fn matches_indexed(name: &str, prefix: &str) -> bool {
    name.strip_prefix(prefix)
        .map(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
        .unwrap_or(false)
}

#[cfg(test)]
pub(crate) mod fake {
    //! In-memory probe for detection tests

    use super::{CommandOutput, Probe};
    use std::collections::{BTreeSet, HashMap};
    use std::io;
    use std::path::{Path, PathBuf};

    #[derive(Debug, Default, Clone)]
    pub struct FakeProbe {
        files: HashMap<PathBuf, String>,
        dirs: BTreeSet<PathBuf>,
        commands: HashMap<String, CommandOutput>,
        cpus: Option<usize>,
    }

    impl FakeProbe {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn file(mut self, path: &str, contents: &str) -> Self {
            let path = PathBuf::from(path);
            self.add_parents(&path);
            self.files.insert(path, contents.to_string());
            self
        }

        pub fn dir(mut self, path: &str) -> Self {
            let path = PathBuf::from(path);
            self.add_parents(&path);
            self.dirs.insert(path);
            self
        }

        pub fn command(mut self, line: &str, stdout: &str) -> Self {
            self.commands.insert(
                line.to_string(),
                CommandOutput {
                    success: true,
                    stdout: stdout.to_string(),
                    stderr: String::new(),
                },
            );
            self
        }

        pub fn failing_command(mut self, line: &str, stderr: &str) -> Self {
            self.commands.insert(
                line.to_string(),
                CommandOutput {
                    success: false,
                    stdout: String::new(),
                    stderr: stderr.to_string(),
                },
            );
            self
        }

        pub fn cpus(mut self, n: usize) -> Self {
            self.cpus = Some(n);
            self
        }

        fn add_parents(&mut self, path: &Path) {
            let mut current = path.parent();
            while let Some(p) = current {
                if p.as_os_str().is_empty() {
                    break;
                }
                self.dirs.insert(p.to_path_buf());
                current = p.parent();
            }
        }
    }

    impl Probe for FakeProbe {
        fn read_to_string(&self, path: &Path) -> io::Result<String> {
            self.files
                .get(path)
                .cloned()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.display().to_string()))
        }

        fn list_dir(&self, path: &Path) -> io::Result<Vec<String>> {
            if !self.dirs.contains(path) {
                return Err(io::Error::new(io::ErrorKind::NotFound, path.display().to_string()));
            }
            let mut names = BTreeSet::new();
            for child in self.dirs.iter().chain(self.files.keys()) {
                if child.parent() == Some(path) {
                    if let Some(name) = child.file_name() {
                        names.insert(name.to_string_lossy().into_owned());
                    }
                }
            }
            Ok(names.into_iter().collect())
        }

        fn exists(&self, path: &Path) -> bool {
            self.dirs.contains(path) || self.files.contains_key(path)
        }

        fn run(&self, program: &str, args: &[&str]) -> io::Result<CommandOutput> {
            let mut line = program.to_string();
            for arg in args {
                line.push(' ');
                line.push_str(arg);
            }
            self.commands
                .get(&line)
                .cloned()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, line))
        }

        fn logical_cpus(&self) -> Option<usize> {
            self.cpus
        }
    }
}
