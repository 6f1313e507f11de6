//! AM/PM inference for legacy playlist pages.
//!
//! Old pages print `H:MM` with no meridiem. Cards run newest-first, so a full
//! day reads 11 PM down to 1 PM, noon, then 11 AM down to 1 AM. The clock
//! walks the cards in page order and decides which half of the day each hour
//! belongs to.
//!
//! This is an approximation, not a resolver: a day with a single 11 o'clock
//! card, or one that starts mid-afternoon, can be misplaced. Midnight-hour
//! cards (`12:xx` at the bottom of the page) are read as noon.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockPhase {
    /// Still in the 11 PM slot (or nothing seen yet).
    BeforeElevenPm,
    /// Seen an hour below 11, so the 11 PM slot is behind us.
    AfterElevenPm,
    /// Seen 11 again after that: this is the 11 AM slot and everything below it.
    Morning,
}

#[derive(Debug, Clone)]
pub struct LegacyClock {
    phase: ClockPhase,
}

impl Default for LegacyClock {
    fn default() -> Self {
        Self::new()
    }
}

impl LegacyClock {
    pub fn new() -> Self {
        Self { phase: ClockPhase::BeforeElevenPm }
    }

    pub fn phase(&self) -> ClockPhase {
        self.phase
    }

    /// Feed the next on-page hour (0–23) and get back the 24-hour hour.
    pub fn resolve_hour(&mut self, hour: u32) -> u32 {
        self.phase = match (self.phase, hour) {
            (ClockPhase::BeforeElevenPm, h) if h < 11 => ClockPhase::AfterElevenPm,
            (ClockPhase::AfterElevenPm, 11) => ClockPhase::Morning,
            (phase, _) => phase,
        };

        // 12 is never shifted; 13+ is already on a 24-hour clock.
        if self.phase != ClockPhase::Morning && hour < 12 {
            hour + 12
        } else {
            hour
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve_all(hours: &[u32]) -> Vec<u32> {
        let mut clock = LegacyClock::new();
        hours.iter().map(|&h| clock.resolve_hour(h)).collect()
    }

    #[test]
    fn full_day_splits_at_the_second_eleven() {
        let mut page: Vec<u32> = (1..=11).rev().collect();
        page.push(12);
        page.extend((1..=11).rev());

        let resolved = resolve_all(&page);

        let mut expected: Vec<u32> = (13..=23).rev().collect();
        expected.push(12);
        expected.extend((1..=11).rev());
        assert_eq!(resolved, expected);
        assert_eq!(resolved[0], 23, "first 11 is PM");
        assert_eq!(resolved[12], 11, "second 11 is AM");
    }

    #[test]
    fn phases_advance_in_order() {
        let mut clock = LegacyClock::new();
        clock.resolve_hour(11);
        assert_eq!(clock.phase(), ClockPhase::BeforeElevenPm);
        clock.resolve_hour(10);
        assert_eq!(clock.phase(), ClockPhase::AfterElevenPm);
        clock.resolve_hour(12);
        assert_eq!(clock.phase(), ClockPhase::AfterElevenPm);
        clock.resolve_hour(11);
        assert_eq!(clock.phase(), ClockPhase::Morning);
        clock.resolve_hour(3);
        assert_eq!(clock.phase(), ClockPhase::Morning);
    }

    #[test]
    fn repeated_elevens_in_the_pm_slot_stay_pm() {
        assert_eq!(resolve_all(&[11, 11, 11, 10]), vec![23, 23, 23, 22]);
    }

    #[test]
    fn lone_eleven_is_read_as_pm() {
        // Genuinely ambiguous; documented behaviour is PM.
        assert_eq!(resolve_all(&[11]), vec![23]);
    }

    #[test]
    fn noon_is_never_shifted() {
        assert_eq!(resolve_all(&[12, 12, 11, 12]), vec![12, 12, 23, 12]);
    }

    #[test]
    fn twenty_four_hour_values_pass_through() {
        assert_eq!(resolve_all(&[23, 15, 9]), vec![23, 15, 21]);
    }
}
