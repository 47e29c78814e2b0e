//! Engine output parsing
//!
//! The engine reports progress either as JSON lines (`{"objectsDone": ...}`)
//! or as `PROGRESS key=value ...` lines. Anything else is plain log output.

use objectdeck_common::Progress;

/// Parse one output line into a progress snapshot, if it is one.
#[must_use]
pub fn parse_progress_line(line: &str) -> Option<Progress> {
    let line = line.trim();
    if line.starts_with('{') {
        return serde_json::from_str(line).ok();
    }
    let rest = line.strip_prefix("PROGRESS ")?;

    let mut progress = Progress::default();
    let mut saw_any = false;
    for pair in rest.split_whitespace() {
        let (key, value) = pair.split_once('=')?;
        let parsed: u64 = value.parse().ok()?;
        saw_any = true;
        match key {
            "objects_done" => progress.objects_done = parsed,
            "objects_total" => progress.objects_total = Some(parsed),
            "bytes_done" => progress.bytes_done = parsed,
            "bytes_total" => progress.bytes_total = Some(parsed),
            "speed_bps" => progress.speed_bps = parsed,
            "eta_seconds" => progress.eta_seconds = Some(parsed),
            _ => {}
        }
    }
    saw_any.then_some(progress)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_value_line() {
        let p = parse_progress_line(
            "PROGRESS objects_done=5 objects_total=10 bytes_done=512 bytes_total=1024 speed_bps=256 eta_seconds=2",
        )
        .unwrap();
        assert_eq!(p.objects_done, 5);
        assert_eq!(p.objects_total, Some(10));
        assert_eq!(p.bytes_total, Some(1024));
        assert_eq!(p.eta_seconds, Some(2));
    }

    #[test]
    fn test_json_line() {
        let p = parse_progress_line(r#"{"objectsDone": 3, "bytesDone": 9, "speedBps": 1}"#).unwrap();
        assert_eq!(p.objects_done, 3);
        assert_eq!(p.bytes_done, 9);
        assert!(p.objects_total.is_none());
    }

    #[test]
    fn test_plain_log_lines_ignored() {
        assert!(parse_progress_line("copying photos/cat.jpg").is_none());
        assert!(parse_progress_line("PROGRESS garbage").is_none());
        assert!(parse_progress_line("").is_none());
    }
}
