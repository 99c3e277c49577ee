//! Parallel rsync of a directory tree to several destinations
//!
//! One bash script starts an rsync per destination in the background. Each
//! child's output is prefixed with `[key] ` and bracketed by
//! `[key] START pid=N` and `[key] EXIT pid=N status=S` markers, so a single
//! supervised process can follow all of them.

#![allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]

use refurb_errors::TaskError;
use refurb_platform::{shell_quote, OutputStream, PlatformCommand};
use refurb_runner::{OutputParser, ProcessTask, TaskState};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const MARKER_PATTERN: &str = r"^\[([^\]]+)\]\s+(START|EXIT)\s+pid=(\d+)(?:\s+status=(\d+))?\s*$";
const TAGGED_PATTERN: &str = r"^\[([^\]]+)\]\s?(.*)$";
const PROGRESS_PATTERN: &str = r"^\s*([\d,]+)\s+(\d{1,3})%\s+(\S+/s)\s+(\d+):(\d{2}):(\d{2})";

/// Where one rsync child stands
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RsyncChild {
    pub pid: Option<u32>,
    pub bytes: u64,
    pub percent: u32,
    pub rate: String,
    pub eta_secs: u64,
    pub exit_status: Option<i32>,
}

impl RsyncChild {
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.pid.is_some() && self.exit_status.is_none()
    }
}

/// Parsed form of one output line
#[derive(Debug, Clone, PartialEq)]
pub enum RsyncLine {
    Start { key: String, pid: u32 },
    Exit { key: String, pid: u32, status: i32 },
    Progress { key: String, bytes: u64, percent: u32, rate: String, eta_secs: u64 },
    Other { key: Option<String>, text: String },
}

/// Follows `--info=progress2` output of several tagged rsync children
pub struct RsyncProgress {
    marker: Regex,
    tagged: Regex,
    progress: Regex,
    children: BTreeMap<String, RsyncChild>,
    seen_progress: bool,
}

fn parse_error(e: &regex::Error) -> TaskError {
    TaskError::Parse {
        tool: "rsync".to_string(),
        message: e.to_string(),
    }
}

impl RsyncProgress {
    /// Track the given destination keys
    ///
    /// # Errors
    ///
    /// Returns `TaskError::Parse` if a line pattern fails to compile.
    pub fn new<I, S>(keys: I) -> Result<Self, TaskError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(Self {
            marker: Regex::new(MARKER_PATTERN).map_err(|e| parse_error(&e))?,
            tagged: Regex::new(TAGGED_PATTERN).map_err(|e| parse_error(&e))?,
            progress: Regex::new(PROGRESS_PATTERN).map_err(|e| parse_error(&e))?,
            children: keys
                .into_iter()
                .map(|k| (k.into(), RsyncChild::default()))
                .collect(),
            seen_progress: false,
        })
    }

    #[must_use]
    pub fn children(&self) -> &BTreeMap<String, RsyncChild> {
        &self.children
    }

    /// Classify one line; untagged lines belong to the empty key
    #[must_use]
    pub fn parse_line(&self, line: &str) -> RsyncLine {
        if let Some(caps) = self.marker.captures(line) {
            let key = caps[1].to_string();
            let pid = caps[3].parse().unwrap_or_default();
            return match (&caps[2], caps.get(4)) {
                ("EXIT", Some(status)) => RsyncLine::Exit {
                    key,
                    pid,
                    status: status.as_str().parse().unwrap_or(-1),
                },
                ("EXIT", None) => RsyncLine::Exit {
                    key,
                    pid,
                    status: -1,
                },
                _ => RsyncLine::Start { key, pid },
            };
        }

        let (key, body) = match self.tagged.captures(line) {
            Some(caps) => (
                caps[1].to_string(),
                caps.get(2).map_or("", |m| m.as_str()).to_string(),
            ),
            None => (String::new(), line.to_string()),
        };
        if let Some(caps) = self.progress.captures(&body) {
            let bytes = caps[1].replace(',', "").parse().unwrap_or_default();
            let field = |i: usize| caps[i].parse::<u64>().unwrap_or_default();
            return RsyncLine::Progress {
                key,
                bytes,
                percent: caps[2].parse().unwrap_or_default(),
                rate: caps[3].to_string(),
                eta_secs: field(4) * 3600 + field(5) * 60 + field(6),
            };
        }
        RsyncLine::Other {
            key: (!key.is_empty()).then_some(key),
            text: body,
        }
    }

    fn overall_percent(&self) -> u32 {
        if self.children.is_empty() {
            return 0;
        }
        let sum: u32 = self.children.values().map(|c| c.percent.min(100)).sum();
        sum / self.children.len() as u32
    }

    fn longest_eta(&self) -> Option<u64> {
        self.children
            .values()
            .filter(|c| c.is_running())
            .map(|c| c.eta_secs)
            .max()
    }
}

impl OutputParser for RsyncProgress {
    fn feed(
        &mut self,
        _stream: OutputStream,
        line: &str,
        state: &mut TaskState,
    ) -> Result<(), TaskError> {
        match self.parse_line(line) {
            RsyncLine::Start { key, pid } => {
                tracing::debug!(%key, pid, "rsync started");
                self.children.entry(key).or_default().pid = Some(pid);
            }
            RsyncLine::Exit { key, pid, status } => {
                tracing::debug!(%key, pid, status, "rsync exited");
                let child = self.children.entry(key.clone()).or_default();
                child.pid.get_or_insert(pid);
                child.exit_status = Some(status);
                if status == 0 {
                    child.percent = 100;
                } else {
                    state.append_verdict(format!("{key}: rsync exited with status {status}"));
                }
            }
            RsyncLine::Progress {
                key,
                bytes,
                percent,
                rate,
                eta_secs,
            } => {
                self.seen_progress = true;
                let child = self.children.entry(key).or_default();
                child.bytes = bytes;
                child.percent = child.percent.max(percent);
                child.rate = rate;
                child.eta_secs = eta_secs;
            }
            RsyncLine::Other { key, text } => {
                if text.starts_with("rsync:") || text.starts_with("rsync error") {
                    let prefix = key.map(|k| format!("{k}: ")).unwrap_or_default();
                    state.append_verdict(format!("{prefix}{text}"));
                }
                return Ok(());
            }
        }

        state.set_progress(self.overall_percent());
        if let Some(eta) = self.longest_eta() {
            let estimate = state.elapsed() + eta as f64;
            state.set_estimate(estimate);
        }
        let running = self.children.values().filter(|c| c.is_running()).count();
        state.message = format!("{running} rsync running, {}%", self.overall_percent());
        Ok(())
    }

    fn reports_progress(&self) -> bool {
        self.seen_progress
    }

    fn finish(&mut self, _state: &mut TaskState) -> Result<(), TaskError> {
        let failed: Vec<String> = self
            .children
            .iter()
            .filter_map(|(key, child)| match child.exit_status {
                Some(0) => None,
                Some(status) => Some(format!("{key} (status {status})")),
                None => Some(format!("{key} (never finished)")),
            })
            .collect();
        if failed.is_empty() {
            Ok(())
        } else {
            Err(TaskError::failed("rsync", format!("failed: {}", failed.join(", "))))
        }
    }
}

/// Keys end up inside a sed replacement and a bracketed tag
fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Build the bash script running one tagged rsync per destination
#[must_use]
pub fn rsync_script(rsync: &str, source: &Path, destinations: &[(String, PathBuf)], extra: &[String]) -> String {
    let mut source_arg = source.display().to_string();
    if !source_arg.ends_with('/') {
        source_arg.push('/');
    }
    let extra: Vec<String> = extra.iter().map(|a| shell_quote(a)).collect();

    let mut script = String::new();
    for (key, dest) in destinations {
        let key = sanitize_key(key);
        let mut dest_arg = dest.display().to_string();
        if !dest_arg.ends_with('/') {
            dest_arg.push('/');
        }
        script.push_str(&format!(
            "{{ {rsync} -a --delete --info=progress2 --no-inc-recursive {extra} {src} {dst} \
             > >(tr '\\r' '\\n' | sed -u 's/^/[{key}] /') 2>&1 & pid=$!; \
             echo \"[{key}] START pid=$pid\"; wait $pid; \
             echo \"[{key}] EXIT pid=$pid status=$?\"; }} &\n",
            rsync = shell_quote(rsync),
            extra = extra.join(" "),
            src = shell_quote(&source_arg),
            dst = shell_quote(&dest_arg),
        ));
    }
    script.push_str("wait\n");
    script
}

/// A supervised group of rsync children
pub type RsyncTask = ProcessTask<RsyncProgress>;

/// Build an rsync task syncing `source` into each destination directory
///
/// # Errors
///
/// Returns `TaskError::Parse` if the progress parser cannot be built.
pub fn rsync_task(
    rsync: &str,
    source: &Path,
    destinations: &[(String, PathBuf)],
    extra: &[String],
    estimate: f64,
) -> Result<RsyncTask, TaskError> {
    let keys = destinations.iter().map(|(k, _)| sanitize_key(k));
    let parser = RsyncProgress::new(keys)?;
    let command = PlatformCommand::shell(&rsync_script(rsync, source, destinations, extra));
    Ok(ProcessTask::with_parser(
        format!("rsync {} to {} destinations", source.display(), destinations.len()),
        command,
        parser,
    )
    .with_estimate(estimate))
}
