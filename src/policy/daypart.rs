//! Day/night window.

use serde::{Deserialize, Serialize};

/// Hours (0-23) at which day and night begin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayPart {
    pub day_start: u32,
    pub night_start: u32,
}

impl DayPart {
    pub fn new(day_start: u32, night_start: u32) -> Self {
        Self {
            day_start,
            night_start,
        }
    }

    /// Whether `hour` falls in the night window.
    ///
    /// A night start after the day start wraps midnight; a night start before
    /// it is a same-day window. Equal hours mean there is no night.
    pub fn is_night(&self, hour: u32) -> bool {
        use std::cmp::Ordering;
        match self.night_start.cmp(&self.day_start) {
            Ordering::Greater => hour >= self.night_start || hour < self.day_start,
            Ordering::Less => hour >= self.night_start && hour < self.day_start,
            Ordering::Equal => false,
        }
    }
}

impl Default for DayPart {
    fn default() -> Self {
        Self::new(7, 22)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrapping_window() {
        let dp = DayPart::new(7, 22);
        assert!(dp.is_night(23));
        assert!(dp.is_night(0));
        assert!(dp.is_night(6));
        assert!(!dp.is_night(7));
        assert!(!dp.is_night(21));
        assert!(dp.is_night(22));
    }

    #[test]
    fn test_same_day_window() {
        // Night shift worker sleeping 09:00-17:00
        let dp = DayPart::new(17, 9);
        assert!(dp.is_night(9));
        assert!(dp.is_night(16));
        assert!(!dp.is_night(17));
        assert!(!dp.is_night(3));
    }

    #[test]
    fn test_equal_hours_never_night() {
        let dp = DayPart::new(8, 8);
        assert!((0..24).all(|h| !dp.is_night(h)));
    }
}
