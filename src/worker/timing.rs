//! Pause-threshold tiers for completion detection
//!
//! A worker is considered finished once it has been silent for longer than a
//! pause that grows with the request's overall timeout. The default tiers are
//! empirical; they are tunable through `[[worker.pause_tiers]]`.

use std::time::Duration;

/// One row of the lookup table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PauseTier {
    /// Applies when the overall timeout is at least this long
    pub min_timeout: Duration,
    pub pause: Duration,
}

/// Ordered lookup table from overall timeout to silence threshold
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PauseTiers {
    tiers: Vec<PauseTier>,
    fallback: Duration,
}

impl PauseTiers {
    /// Build a table; tiers are sorted by descending `min_timeout`
    pub fn new(mut tiers: Vec<PauseTier>, fallback: Duration) -> Self {
        tiers.sort_by(|a, b| b.min_timeout.cmp(&a.min_timeout));
        Self { tiers, fallback }
    }

    /// Silence threshold for a request with the given overall timeout
    pub fn pause_for(&self, timeout: Duration) -> Duration {
        self.tiers
            .iter()
            .find(|tier| timeout >= tier.min_timeout)
            .map(|tier| tier.pause)
            .unwrap_or(self.fallback)
    }

    pub fn tiers(&self) -> &[PauseTier] {
        &self.tiers
    }

    pub fn fallback(&self) -> Duration {
        self.fallback
    }
}

impl Default for PauseTiers {
    fn default() -> Self {
        let secs = Duration::from_secs;
        Self::new(
            vec![
                PauseTier {
                    min_timeout: secs(120),
                    pause: secs(10),
                },
                PauseTier {
                    min_timeout: secs(60),
                    pause: secs(7),
                },
                PauseTier {
                    min_timeout: secs(30),
                    pause: secs(5),
                },
            ],
            secs(3),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tiers() {
        let tiers = PauseTiers::default();
        let secs = Duration::from_secs;

        assert_eq!(tiers.pause_for(secs(300)), secs(10));
        assert_eq!(tiers.pause_for(secs(120)), secs(10));
        assert_eq!(tiers.pause_for(secs(119)), secs(7));
        assert_eq!(tiers.pause_for(secs(60)), secs(7));
        assert_eq!(tiers.pause_for(secs(45)), secs(5));
        assert_eq!(tiers.pause_for(secs(30)), secs(5));
        assert_eq!(tiers.pause_for(secs(29)), secs(3));
        assert_eq!(tiers.pause_for(Duration::ZERO), secs(3));
    }

    #[test]
    fn test_unsorted_input_is_sorted() {
        let tiers = PauseTiers::new(
            vec![
                PauseTier {
                    min_timeout: Duration::from_secs(10),
                    pause: Duration::from_secs(1),
                },
                PauseTier {
                    min_timeout: Duration::from_secs(100),
                    pause: Duration::from_secs(9),
                },
            ],
            Duration::from_millis(500),
        );

        assert_eq!(tiers.pause_for(Duration::from_secs(150)), Duration::from_secs(9));
        assert_eq!(tiers.pause_for(Duration::from_secs(50)), Duration::from_secs(1));
        assert_eq!(tiers.pause_for(Duration::from_secs(5)), Duration::from_millis(500));
    }
}
