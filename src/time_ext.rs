use std::time::Duration as StdDuration;

pub(crate) trait TimeDurationExt {
    /// Negative durations are clamped to zero.
    fn to_std_duration(self) -> StdDuration;
}

impl TimeDurationExt for time::Duration {
    fn to_std_duration(self) -> StdDuration {
        match self.is_negative() {
            true => StdDuration::ZERO,
            false => u64::try_from(self.whole_nanoseconds())
                .map_or(StdDuration::MAX, StdDuration::from_nanos),
        }
    }
}

pub(crate) trait StdDurationExt {
    /// Saturates at `time::Duration::MAX`.
    fn to_time_duration(self) -> time::Duration;
}

impl StdDurationExt for StdDuration {
    fn to_time_duration(self) -> time::Duration {
        time::Duration::try_from(self).unwrap_or(time::Duration::MAX)
    }
}
