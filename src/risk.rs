/// Portfolio-level drawdown kill-switch with hysteresis.
///
/// Locks once drawdown from the running peak exceeds `max_drawdown` and
/// releases only after it has recovered to `release_ratio * max_drawdown`.
/// Locking blocks new entries; open positions are left alone.
#[derive(Debug, Clone)]
pub struct DrawdownTracker {
    peak_value: Option<f64>,
    max_drawdown: f64,
    release_ratio: f64,
    locked: bool,
    last_drawdown: f64,
}

const RELEASE_EPS: f64 = 1e-12;

impl DrawdownTracker {
    pub fn new(max_drawdown: f64, release_ratio: f64) -> Self {
        Self {
            peak_value: None,
            max_drawdown,
            release_ratio,
            locked: false,
            last_drawdown: 0.0,
        }
    }

    /// Feeds the current portfolio value. Returns `true` while entries are blocked.
    pub fn update(&mut self, value: f64) -> bool {
        if !value.is_finite() {
            log::warn!("[RISK] ignoring non-finite portfolio value");
            return self.locked;
        }
        let peak = match self.peak_value {
            Some(peak) if peak >= value => peak,
            _ => {
                self.peak_value = Some(value);
                value
            }
        };
        let drawdown = if peak > 0.0 {
            (peak - value) / peak
        } else {
            0.0
        };
        self.last_drawdown = drawdown;

        if !self.locked && drawdown > self.max_drawdown {
            self.locked = true;
            log::warn!(
                "[RISK] drawdown {:.2}% exceeds {:.2}%; new entries blocked",
                drawdown * 100.0,
                self.max_drawdown * 100.0
            );
        } else if self.locked && drawdown <= self.release_level() + RELEASE_EPS {
            self.locked = false;
            log::info!(
                "[RISK] drawdown recovered to {:.2}% (release {:.2}%); entries re-enabled",
                drawdown * 100.0,
                self.release_level() * 100.0
            );
        }
        self.locked
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn peak_value(&self) -> Option<f64> {
        self.peak_value
    }

    pub fn current_drawdown(&self) -> f64 {
        self.last_drawdown
    }

    pub fn release_level(&self) -> f64 {
        self.release_ratio * self.max_drawdown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hysteresis_holds_lock_until_release_level() {
        let mut tracker = DrawdownTracker::new(0.15, 0.7);
        assert!(!tracker.update(100.0));
        assert!(!tracker.update(100.0));
        assert!(tracker.update(80.0), "20% drawdown must lock");
        assert!(tracker.update(87.0), "13% is below max but above release");
        assert!(tracker.update(89.4), "10.6% is still above 10.5%");
        assert!(!tracker.update(89.5), "10.5% releases the lock");
        assert_eq!(tracker.peak_value(), Some(100.0));
    }

    #[test]
    fn does_not_lock_at_exact_threshold() {
        let mut tracker = DrawdownTracker::new(0.2, 0.7);
        tracker.update(100.0);
        assert!(!tracker.update(80.0));
        assert!(tracker.update(79.9));
    }

    #[test]
    fn new_peak_resets_drawdown() {
        let mut tracker = DrawdownTracker::new(0.1, 0.7);
        tracker.update(100.0);
        assert!(tracker.update(85.0));
        assert!(!tracker.update(120.0));
        assert_eq!(tracker.peak_value(), Some(120.0));
        assert_eq!(tracker.current_drawdown(), 0.0);
        assert!(!tracker.update(110.0));
    }

    #[test]
    fn non_finite_value_keeps_state() {
        let mut tracker = DrawdownTracker::new(0.15, 0.7);
        tracker.update(100.0);
        tracker.update(80.0);
        assert!(tracker.update(f64::NAN));
        assert_eq!(tracker.peak_value(), Some(100.0));
    }
}
