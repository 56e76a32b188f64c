//! Progress sample derivation from encoder stderr output. Pure parsing logic,
//! ported from the teacher's ffmpeg stderr scraping with no IO of its own.

/// `{ percent_complete, elapsed_seconds, estimated_total_seconds }`, monotonic
/// non-decreasing within a job (enforced by [`ProgressTracker`], not here).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSample {
    pub percent_complete: f64,
    pub elapsed_seconds: f64,
    pub estimated_total_seconds: Option<f64>,
}

pub fn compute_progress_percent(total_duration: Option<f64>, elapsed_seconds: f64) -> f64 {
    match total_duration {
        Some(total) if total.is_finite() && total > 0.0 => {
            let elapsed = if elapsed_seconds.is_finite() && elapsed_seconds > 0.0 {
                elapsed_seconds
            } else {
                0.0
            };
            let ratio = elapsed / total;
            let value = (ratio * 100.0).clamp(0.0, 100.0);
            if value.is_finite() { value } else { 0.0 }
        }
        _ => 0.0,
    }
}

pub fn parse_ffmpeg_progress_line(line: &str) -> Option<(f64, Option<f64>)> {
    let mut elapsed: Option<f64> = None;
    let mut speed: Option<f64> = None;

    for token in line.split_whitespace() {
        if let Some(rest) = token.strip_prefix("time=") {
            elapsed = Some(parse_ffmpeg_time_to_seconds(rest));
        } else if let Some(rest) = token.strip_prefix("out_time=") {
            elapsed = Some(parse_ffmpeg_time_to_seconds(rest));
        } else if let Some(rest) = token.strip_prefix("out_time_ms=") {
            if let Ok(us) = rest.parse::<f64>() {
                elapsed = Some(us / 1_000_000.0);
            }
        } else if let Some(rest) = token.strip_prefix("speed=") {
            let value = rest.trim_end_matches('x');
            if let Ok(v) = value.parse::<f64>() {
                speed = Some(v);
            }
        }
    }

    elapsed.map(|e| (e, speed))
}

pub fn is_ffmpeg_progress_end(line: &str) -> bool {
    for token in line.split_whitespace() {
        if let Some(rest) = token.strip_prefix("progress=")
            && rest.eq_ignore_ascii_case("end")
        {
            return true;
        }
    }
    false
}

pub fn parse_ffmpeg_time_to_seconds(s: &str) -> f64 {
    if s.contains(':') {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() == 3 {
            let h = parts[0].parse::<f64>().unwrap_or(0.0);
            let m = parts[1].parse::<f64>().unwrap_or(0.0);
            let sec = parts[2].parse::<f64>().unwrap_or(0.0);
            return h * 3600.0 + m * 60.0 + sec;
        }
    }
    s.parse::<f64>().unwrap_or(0.0)
}

pub fn parse_ffmpeg_duration_from_metadata_line(line: &str) -> Option<f64> {
    let idx = line.find("Duration:")?;
    let rest = &line[idx + "Duration:".len()..];
    let time_str = rest.trim().split(',').next().unwrap_or("").trim();
    if time_str.is_empty() {
        return None;
    }
    let seconds = parse_ffmpeg_time_to_seconds(time_str);
    if seconds > 0.0 { Some(seconds) } else { None }
}

/// Clamps a stream of raw elapsed/total readings into a monotonic
/// non-decreasing sequence of [`ProgressSample`]s for one job.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    last_percent: f64,
    total_duration_seconds: Option<f64>,
}

impl ProgressTracker {
    pub fn new(total_duration_seconds: Option<f64>) -> Self {
        ProgressTracker {
            last_percent: 0.0,
            total_duration_seconds,
        }
    }

    /// Feeds one stderr line; returns a sample when the line carries a
    /// progress marker (`time=`/`out_time=`/`out_time_ms=`), or a forced
    /// 100% sample on the `progress=end` marker, which ffmpeg emits on its
    /// own line with no time marker attached.
    pub fn observe_line(&mut self, line: &str) -> Option<ProgressSample> {
        if self.total_duration_seconds.is_none()
            && let Some(d) = parse_ffmpeg_duration_from_metadata_line(line)
        {
            self.total_duration_seconds = Some(d);
        }

        if is_ffmpeg_progress_end(line) {
            self.last_percent = 100.0;
            return Some(ProgressSample {
                percent_complete: 100.0,
                elapsed_seconds: self.total_duration_seconds.unwrap_or(0.0),
                estimated_total_seconds: self.total_duration_seconds,
            });
        }

        let (elapsed, _speed) = parse_ffmpeg_progress_line(line)?;
        let mut percent = compute_progress_percent(self.total_duration_seconds, elapsed);
        if percent < self.last_percent {
            percent = self.last_percent;
        }
        self.last_percent = percent;
        Some(ProgressSample {
            percent_complete: percent,
            elapsed_seconds: elapsed,
            estimated_total_seconds: self.total_duration_seconds,
        })
    }
}
