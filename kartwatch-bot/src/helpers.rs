use std::time::{SystemTime, UNIX_EPOCH};

/// Game tics per second.
pub const TICRATE: u32 = 35;

pub fn now() -> i64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_secs() as i64)
    .unwrap_or_default()
}

/// Formats a duration in seconds as the largest whole unit, e.g. `3h` or `12m`.
pub fn format_time_online(secs: i64) -> String {
  match secs {
    s if s >= 86_400 => format!("{}d", s / 86_400),
    s if s >= 3_600 => format!("{}h", s / 3_600),
    s if s >= 60 => format!("{}m", s / 60),
    s => format!("{}s", s.max(0)),
  }
}

/// Formats a tic count as `m:ss`.
pub fn format_tics(tics: u32) -> String {
  let secs = tics / TICRATE;
  format!("{}:{:02}", secs / 60, secs % 60)
}
