use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Monotonic nanosecond clock with precise sleeping and frame-time
/// bookkeeping. The experiment state machine is generic over this so tests
/// can drive it with a hand-cranked clock.
pub trait Timer: Clone + Send + Sync {
    type Timestamp: Copy + Send + Sync;

    fn now(&self) -> Self::Timestamp;
    fn elapsed(&self, ts: Self::Timestamp) -> Duration;
    fn sleep(&self, d: Duration);
    fn record_frame(&mut self, d: Duration);
    /// Total frames recorded since construction.
    fn frame_count(&self) -> usize;
    fn calibration_stats(&self) -> CalibrationStats;
}

/// Frame-time statistics over the rolling sample window.
#[derive(Debug, Clone)]
pub struct CalibrationStats {
    pub average_frame_time_ns: f64,
    pub jitter_ns: f64,
    pub min_frame_time_ns: f64,
    pub max_frame_time_ns: f64,
    pub effective_fps: f64,
}

impl CalibrationStats {
    fn zero() -> Self {
        Self {
            average_frame_time_ns: 0.0,
            jitter_ns: 0.0,
            min_frame_time_ns: 0.0,
            max_frame_time_ns: 0.0,
            effective_fps: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HighPrecisionTimer {
    start: Instant,
    frame_times: VecDeque<Duration>,
    max_samples: usize,
    frames_recorded: usize,
}

impl HighPrecisionTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            frame_times: VecDeque::with_capacity(1000),
            max_samples: 1000,
            frames_recorded: 0,
        }
    }

    /// Sleep with the best precision the platform offers. Plain
    /// `thread::sleep` overshoots by whole scheduler quanta, which is visible
    /// in reaction-time data.
    pub fn high_precision_sleep(&self, duration: Duration) {
        #[cfg(target_os = "windows")]
        self.windows_sleep(duration);
        #[cfg(target_os = "linux")]
        self.linux_sleep(duration);
        #[cfg(target_os = "macos")]
        self.macos_sleep(duration);
        #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
        std::thread::sleep(duration);
    }

    #[cfg(target_os = "windows")]
    fn windows_sleep(&self, duration: Duration) {
        use windows::Win32::Foundation::CloseHandle;
        use windows::Win32::System::Threading::{
            CreateWaitableTimerW, SetWaitableTimer, WaitForSingleObject, INFINITE,
        };

        // Relative due time in 100 ns intervals.
        let due = -((duration.as_nanos() / 100) as i64);
        unsafe {
            match CreateWaitableTimerW(None, true, None) {
                Ok(timer) => {
                    if SetWaitableTimer(timer, &due, 0, None, None, false).is_ok() {
                        WaitForSingleObject(timer, INFINITE);
                    }
                    let _ = CloseHandle(timer);
                }
                Err(_) => std::thread::sleep(duration),
            }
        }
    }

    #[cfg(target_os = "linux")]
    fn linux_sleep(&self, duration: Duration) {
        use libc::{clock_nanosleep, timespec, CLOCK_MONOTONIC};

        let request = timespec {
            tv_sec: duration.as_secs() as libc::time_t,
            tv_nsec: duration.subsec_nanos() as libc::c_long,
        };

        unsafe {
            clock_nanosleep(CLOCK_MONOTONIC, 0, &request, std::ptr::null_mut());
        }
    }

    #[cfg(target_os = "macos")]
    fn macos_sleep(&self, duration: Duration) {
        use mach2::mach_time::{mach_absolute_time, mach_timebase_info, mach_timebase_info_data_t};

        // Spin on the hardware clock for sub-100 µs waits; the scheduler
        // cannot hit those reliably.
        if duration.as_nanos() < 100_000 {
            unsafe {
                let start = mach_absolute_time();
                let mut timebase = mach_timebase_info_data_t { numer: 0, denom: 0 };
                mach_timebase_info(&mut timebase);

                let target_ticks =
                    duration.as_nanos() as u64 * timebase.denom as u64 / timebase.numer as u64;

                while mach_absolute_time() - start < target_ticks {
                    std::hint::spin_loop();
                }
            }
        } else {
            std::thread::sleep(duration);
        }
    }
}

impl Timer for HighPrecisionTimer {
    type Timestamp = u64;

    fn now(&self) -> u64 {
        self.start.elapsed().as_nanos() as u64
    }

    fn elapsed(&self, ts: u64) -> Duration {
        Duration::from_nanos(self.now().saturating_sub(ts))
    }

    fn sleep(&self, d: Duration) {
        self.high_precision_sleep(d);
    }

    fn record_frame(&mut self, d: Duration) {
        if self.frame_times.len() == self.max_samples {
            self.frame_times.pop_front();
        }
        self.frame_times.push_back(d);
        self.frames_recorded += 1;
    }

    fn frame_count(&self) -> usize {
        self.frames_recorded
    }

    fn calibration_stats(&self) -> CalibrationStats {
        if self.frame_times.is_empty() {
            return CalibrationStats::zero();
        }

        let mut sum = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for d in &self.frame_times {
            let ns = d.as_nanos() as f64;
            sum += ns;
            min = min.min(ns);
            max = max.max(ns);
        }
        let count = self.frame_times.len() as f64;
        let avg = sum / count;
        let variance = self
            .frame_times
            .iter()
            .map(|d| {
                let diff = d.as_nanos() as f64 - avg;
                diff * diff
            })
            .sum::<f64>()
            / count;

        CalibrationStats {
            average_frame_time_ns: avg,
            jitter_ns: variance.sqrt(),
            min_frame_time_ns: min,
            max_frame_time_ns: max,
            effective_fps: if avg > 0.0 { 1e9 / avg } else { 0.0 },
        }
    }
}

impl Default for HighPrecisionTimer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_is_monotonic() {
        let timer = HighPrecisionTimer::new();
        let a = timer.now();
        let b = timer.now();
        assert!(b >= a);
    }

    #[test]
    fn stats_on_empty_window_are_zero() {
        let timer = HighPrecisionTimer::new();
        let stats = timer.calibration_stats();
        assert_eq!(stats.average_frame_time_ns, 0.0);
        assert_eq!(stats.effective_fps, 0.0);
    }

    #[test]
    fn stats_match_known_samples() {
        let mut timer = HighPrecisionTimer::new();
        timer.record_frame(Duration::from_millis(10));
        timer.record_frame(Duration::from_millis(20));

        let stats = timer.calibration_stats();
        assert_eq!(stats.average_frame_time_ns, 15e6);
        assert_eq!(stats.min_frame_time_ns, 10e6);
        assert_eq!(stats.max_frame_time_ns, 20e6);
        // Population standard deviation of {10ms, 20ms}.
        assert!((stats.jitter_ns - 5e6).abs() < 1.0);
        assert!((stats.effective_fps - 1e9 / 15e6).abs() < 1e-6);
    }

    #[test]
    fn frame_count_outlives_sample_window() {
        let mut timer = HighPrecisionTimer::new();
        timer.max_samples = 4;
        for _ in 0..10 {
            timer.record_frame(Duration::from_millis(16));
        }
        assert_eq!(timer.frame_count(), 10);
        assert_eq!(timer.frame_times.len(), 4);
    }
}
