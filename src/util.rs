//! Small utility helpers used across modules.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock milliseconds since the Unix epoch, as stored in `lastUpdated`.
pub fn now_millis() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_millis() as u64)
    .unwrap_or(0)
}

/// Log-safe truncation for large strings.
/// Avoids spamming logs with huge response payloads.
pub fn trunc_for_log(s: &str, max: usize) -> String {
  if s.len() <= max {
    return s.to_string();
  }
  let mut end = max;
  while !s.is_char_boundary(end) { end -= 1; }
  format!("{}… ({} bytes total)", &s[..end], s.len())
}

/// Lets one operation run at a time. Later callers get `None` instead of waiting.
#[derive(Debug, Default)]
pub struct SingleFlight {
  busy: AtomicBool,
}

impl SingleFlight {
  pub fn try_acquire(&self) -> Option<FlightGuard<'_>> {
    self.busy
      .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
      .ok()
      .map(|_| FlightGuard { busy: &self.busy })
  }

  pub fn is_busy(&self) -> bool { self.busy.load(Ordering::SeqCst) }
}

/// Releases the flight on drop, including on cancellation.
#[derive(Debug)]
pub struct FlightGuard<'a> {
  busy: &'a AtomicBool,
}

impl Drop for FlightGuard<'_> {
  fn drop(&mut self) { self.busy.store(false, Ordering::SeqCst); }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn second_acquire_is_rejected_until_release() {
    let flight = SingleFlight::default();
    let guard = flight.try_acquire();
    assert!(guard.is_some());
    assert!(flight.try_acquire().is_none());
    drop(guard);
    assert!(!flight.is_busy());
    assert!(flight.try_acquire().is_some());
  }

  #[test]
  fn truncation_respects_char_boundaries() {
    assert_eq!(trunc_for_log("short", 10), "short");
    let out = trunc_for_log("ñañañaña", 3);
    assert!(out.starts_with("ña"));
    assert!(out.ends_with("bytes total)"));
  }
}
