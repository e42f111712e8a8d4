//! 内核日志行解析
//!
//! 格式：`<L><n>:[<file>:][<line>:][<col>:]<msg>`，`L` 为 `I`/`D`/`W`/`E`。

use super::KernelLogger;
use tracing::{debug, error, info, warn};

/// 解析后的日志行
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelLogLine {
    pub level: char,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub msg: String,
}

impl KernelLogLine {
    /// `file:line:col`，缺失部分省略
    pub fn location(&self) -> String {
        let mut parts = Vec::new();
        if let Some(file) = &self.file {
            parts.push(file.clone());
        }
        if let Some(line) = self.line {
            parts.push(line.to_string());
        }
        if let Some(column) = self.column {
            parts.push(column.to_string());
        }
        parts.join(":")
    }
}

fn take_number(rest: &str) -> Option<(u32, &str)> {
    let (head, tail) = rest.split_once(':')?;
    if head.is_empty() || !head.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((head.parse().ok()?, tail))
}

pub fn parse_log_line(raw: &str) -> Option<KernelLogLine> {
    let raw = raw.trim();
    let mut chars = raw.chars();
    let level = chars.next().filter(|c| c.is_ascii_uppercase())?;
    let _ = chars.next().filter(|c| c.is_ascii_digit() || *c == ' ')?;
    let mut rest = chars.as_str().strip_prefix(':')?;

    let mut file = None;
    if let Some((head, tail)) = rest.split_once(':')
        && !head.is_empty()
    {
        file = Some(head.to_string());
        rest = tail;
    }

    let mut line = None;
    if let Some((n, tail)) = take_number(rest) {
        line = Some(n);
        rest = tail;
    }

    let mut column = None;
    if let Some((n, tail)) = take_number(rest) {
        column = Some(n);
        rest = tail;
    }

    Some(KernelLogLine {
        level,
        file,
        line,
        column,
        msg: rest.to_string(),
    })
}

/// 把内核日志转发到 tracing
pub fn kernel_logger() -> KernelLogger {
    Box::new(|raw: &str| {
        let Some(entry) = parse_log_line(raw) else {
            return;
        };
        let location = entry.location();
        match entry.level {
            'I' => info!(target: "gantry::kernel", location = %location, "{}", entry.msg),
            'D' => debug!(target: "gantry::kernel", location = %location, "{}", entry.msg),
            'W' => warn!(target: "gantry::kernel", location = %location, "{}", entry.msg),
            'E' => error!(target: "gantry::kernel", location = %location, "{}", entry.msg),
            _ => error!("Could not parse planner log line: {}", raw),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_line() {
        let entry = parse_log_line("E1:part.nc:12:4:Arc radius too small").unwrap();
        assert_eq!(entry.level, 'E');
        assert_eq!(entry.file.as_deref(), Some("part.nc"));
        assert_eq!(entry.line, Some(12));
        assert_eq!(entry.column, Some(4));
        assert_eq!(entry.msg, "Arc radius too small");
        assert_eq!(entry.location(), "part.nc:12:4");
    }

    #[test]
    fn test_message_only() {
        let entry = parse_log_line("I :Planning started").unwrap();
        assert_eq!(entry.level, 'I');
        assert_eq!(entry.file, None);
        assert_eq!(entry.msg, "Planning started");
        assert_eq!(entry.location(), "");
    }

    #[test]
    fn test_message_keeps_colons() {
        let entry = parse_log_line("W3:job.nc:7:unknown word: Q").unwrap();
        assert_eq!(entry.file.as_deref(), Some("job.nc"));
        assert_eq!(entry.line, Some(7));
        assert_eq!(entry.column, None);
        assert_eq!(entry.msg, "unknown word: Q");
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(parse_log_line("").is_none());
        assert!(parse_log_line("i1:lower").is_none());
        assert!(parse_log_line("IX:bad").is_none());
        assert!(parse_log_line("I1 no colon").is_none());
    }
}
