//! Automatable parameter with a time-ordered event list.
//!
//! Events follow the usual audio-graph scheduling model: a value set at a
//! time holds until the next event, a linear ramp interpolates from the
//! previous event's end point, and a target approach decays exponentially
//! toward its target with the given time constant.

/// Events older than this are folded into a single set-value when a new
/// smoothed transition is scheduled, so long live sessions stay bounded.
const RETAINED_HISTORY_SECONDS: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamEvent {
    SetValue {
        time: f64,
        value: f32,
    },
    LinearRamp {
        time: f64,
        value: f32,
    },
    SetTarget {
        time: f64,
        target: f32,
        time_constant: f64,
        from: f32,
    },
}

impl ParamEvent {
    #[must_use]
    pub fn time(&self) -> f64 {
        match *self {
            Self::SetValue { time, .. }
            | Self::LinearRamp { time, .. }
            | Self::SetTarget { time, .. } => time,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioParam {
    default_value: f32,
    events: Vec<ParamEvent>,
}

impl AudioParam {
    #[must_use]
    pub fn new(default_value: f32) -> Self {
        Self {
            default_value,
            events: Vec::new(),
        }
    }

    #[must_use]
    pub fn events(&self) -> &[ParamEvent] {
        &self.events
    }

    pub fn set_value_at_time(&mut self, value: f32, time: f64) {
        self.insert(ParamEvent::SetValue { time, value });
    }

    pub fn linear_ramp_to_value_at_time(&mut self, value: f32, time: f64) {
        self.insert(ParamEvent::LinearRamp { time, value });
    }

    /// Smoothed approach toward `target`, starting from whatever value the
    /// parameter holds at `time`.
    pub fn set_target_at_time(&mut self, target: f32, time: f64, time_constant: f64) {
        let time_constant = time_constant.max(f64::EPSILON);
        self.forget_before(time - RETAINED_HISTORY_SECONDS);
        let from = self.value_at(time);
        self.cancel_scheduled_values(time);
        self.insert(ParamEvent::SetTarget {
            time,
            target,
            time_constant,
            from,
        });
    }

    /// Drop every event scheduled at or after `time`.
    pub fn cancel_scheduled_values(&mut self, time: f64) {
        let keep = self.events.partition_point(|event| event.time() < time);
        self.events.truncate(keep);
    }

    #[must_use]
    pub fn value_at(&self, time: f64) -> f32 {
        let upcoming = self.events.partition_point(|event| event.time() <= time);

        if let Some(ParamEvent::LinearRamp {
            time: end_time,
            value: end_value,
        }) = self.events.get(upcoming).copied()
        {
            let Some(previous) = upcoming.checked_sub(1) else {
                return self.default_value;
            };
            let start_time = self.events[previous].time();
            let start_value = self.value_after(previous, start_time);
            let span = end_time - start_time;
            if span <= 0.0 {
                return end_value;
            }
            let fraction = ((time - start_time) / span) as f32;
            return start_value + (end_value - start_value) * fraction;
        }

        match upcoming.checked_sub(1) {
            Some(index) => self.value_after(index, time),
            None => self.default_value,
        }
    }

    fn value_after(&self, index: usize, time: f64) -> f32 {
        match self.events[index] {
            ParamEvent::SetValue { value, .. } | ParamEvent::LinearRamp { value, .. } => value,
            ParamEvent::SetTarget {
                time: start,
                target,
                time_constant,
                from,
            } => {
                let elapsed = (time - start).max(0.0);
                target + (from - target) * (-elapsed / time_constant).exp() as f32
            }
        }
    }

    fn insert(&mut self, event: ParamEvent) {
        let index = self
            .events
            .partition_point(|existing| existing.time() <= event.time());
        self.events.insert(index, event);
    }

    fn forget_before(&mut self, cutoff: f64) {
        let stale = self.events.partition_point(|event| event.time() < cutoff);
        if stale == 0 {
            return;
        }
        let value = self.value_at(cutoff);
        self.events.drain(..stale);
        self.events.insert(0, ParamEvent::SetValue {
            time: cutoff,
            value,
        });
    }
}
