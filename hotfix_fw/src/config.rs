//! Benchmark configuration.

use crate::error::ConfigError;
use crate::thumb;

/// Repeat counts of the sweep. The 78 000–80 000 cluster brackets the point
/// where the per-hit fault cost of method A catches up with the two page
/// erases of method B on the nRF52840.
pub const LOOP_COUNTS: [u32; 12] = [
    1, 10, 100, 1_000, 10_000, 50_000, 78_000, 78_500, 79_000, 79_500, 80_000, 100_000,
];

/// Which candidate encodings may be executed without disturbing the harness.
///
/// Accepted: everything below `shift_add_limit` (Thumb-1 shift, add/sub and
/// move/compare/add/sub immediate forms, registers r0-r7 only) and the
/// data-processing register group selected by `data_proc_mask` /
/// `data_proc_base`. Branches, loads/stores, stack and system instructions all
/// fall outside both.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SafetyFilter {
    pub shift_add_limit: u16,
    pub data_proc_mask: u16,
    pub data_proc_base: u16,
}

impl SafetyFilter {
    pub const THUMB1: SafetyFilter = SafetyFilter {
        shift_add_limit: 0x2000,
        data_proc_mask: 0xFC00,
        data_proc_base: 0x4000,
    };

    pub const fn is_exec_safe(&self, hw: u16) -> bool {
        hw < self.shift_add_limit || hw & self.data_proc_mask == self.data_proc_base
    }
}

impl Default for SafetyFilter {
    fn default() -> Self {
        Self::THUMB1
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BenchConfig {
    /// Undefined instruction parked in the slot between trials.
    pub sentinel: u16,
    /// Ascending repeat counts run for every candidate.
    pub loop_counts: &'static [u32],
    pub filter: SafetyFilter,
    /// Bench page override; `None` selects the last flash page.
    pub bench_page: Option<u32>,
}

impl BenchConfig {
    pub const DEFAULT: BenchConfig = BenchConfig {
        sentinel: thumb::UDF_SENTINEL,
        loop_counts: &LOOP_COUNTS,
        filter: SafetyFilter::THUMB1,
        bench_page: None,
    };

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !thumb::is_udf(self.sentinel) {
            return Err(ConfigError::SentinelNotUndefined(self.sentinel));
        }
        if self.loop_counts.is_empty() {
            return Err(ConfigError::EmptySweep);
        }
        if self.loop_counts.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ConfigError::UnorderedSweep);
        }
        match self.bench_page {
            Some(page) => Self::validate_page(page, 0),
            None => Ok(()),
        }
    }

    /// The bench page gets erased: it must not be page 0 (vector table,
    /// and the dispatcher's "unbound" marker) nor overlap the linked image,
    /// which ends at `image_end`.
    pub fn validate_page(page: u32, image_end: u32) -> Result<(), ConfigError> {
        if page == 0 || page % 4 != 0 || page < image_end {
            return Err(ConfigError::BenchPage(page));
        }
        Ok(())
    }
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert_eq!(BenchConfig::default().validate(), Ok(()));
        assert_eq!(BenchConfig::DEFAULT.loop_counts.first(), Some(&1));
        assert_eq!(BenchConfig::DEFAULT.loop_counts.last(), Some(&100_000));
    }

    #[test]
    fn executable_sentinel_is_rejected() {
        let cfg = BenchConfig {
            sentinel: 0x4770,
            ..BenchConfig::DEFAULT
        };
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::SentinelNotUndefined(0x4770))
        );
    }

    #[test]
    fn sweep_must_ascend() {
        let cfg = BenchConfig {
            loop_counts: &[10, 10, 100],
            ..BenchConfig::DEFAULT
        };
        assert_eq!(cfg.validate(), Err(ConfigError::UnorderedSweep));

        let cfg = BenchConfig {
            loop_counts: &[],
            ..BenchConfig::DEFAULT
        };
        assert_eq!(cfg.validate(), Err(ConfigError::EmptySweep));
    }

    #[test]
    fn bench_page_override_must_stay_clear_of_the_image() {
        let cfg = BenchConfig {
            bench_page: Some(0),
            ..BenchConfig::DEFAULT
        };
        assert_eq!(cfg.validate(), Err(ConfigError::BenchPage(0)));

        let cfg = BenchConfig {
            bench_page: Some(0x000F_F002),
            ..BenchConfig::DEFAULT
        };
        assert_eq!(cfg.validate(), Err(ConfigError::BenchPage(0x000F_F002)));

        let cfg = BenchConfig {
            bench_page: Some(0x000F_F000),
            ..BenchConfig::DEFAULT
        };
        assert_eq!(cfg.validate(), Ok(()));

        assert_eq!(
            BenchConfig::validate_page(0x0000_8000, 0x0001_2345),
            Err(ConfigError::BenchPage(0x0000_8000))
        );
        assert_eq!(BenchConfig::validate_page(0x000F_F000, 0x0001_2345), Ok(()));
    }

    #[test]
    fn safety_filter_groups() {
        let f = SafetyFilter::THUMB1;
        assert!(f.is_exec_safe(0x0000)); // movs r0, r0
        assert!(f.is_exec_safe(0x1C00)); // adds r0, r0, #0
        assert!(f.is_exec_safe(0x4040)); // eors r0, r0
        assert!(!f.is_exec_safe(0x4770)); // bx lr
        assert!(!f.is_exec_safe(0x6800)); // ldr r0, [r0]
        assert!(!f.is_exec_safe(0xD000)); // beq
        assert!(!f.is_exec_safe(0xDE42)); // udf
    }
}
