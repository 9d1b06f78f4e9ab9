//! Text formatting of rows and summaries.
//!
//! Output is line oriented ASCII terminated by `\r\n` and only meant for
//! humans; nothing parses it.

use core::fmt;

use crate::bench::{Summary, TrialResult};
use crate::clock::cycles_to_us;

/// `0x` followed by four upper-case hex digits.
#[derive(Copy, Clone, Debug)]
pub struct Hex16(pub u16);

impl fmt::Display for Hex16 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

#[derive(Copy, Clone, Debug)]
pub struct Hex32(pub u32);

impl fmt::Display for Hex32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

/// `num / den` with three decimals, rounded half up. A zero denominator
/// renders as `inf`.
#[derive(Copy, Clone, Debug)]
pub struct Ratio3 {
    pub num: u64,
    pub den: u64,
}

impl Ratio3 {
    pub fn new(num: impl Into<u64>, den: impl Into<u64>) -> Self {
        Self {
            num: num.into(),
            den: den.into(),
        }
    }
}

impl fmt::Display for Ratio3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.den == 0 {
            return f.write_str("inf");
        }
        let den = self.den as u128;
        let milli = (self.num as u128 * 1000 + den / 2) / den;
        write!(f, "{}.{:03}", milli / 1000, milli % 1000)
    }
}

/// One successful trial.
pub struct Row<'a>(pub &'a TrialResult);

impl fmt::Display for Row<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = self.0;
        write!(
            f,
            "hw={} N={} A_cyc={} B_cyc={} ratio(B/A)={}",
            Hex16(r.candidate_value),
            r.repeat_count,
            r.method_a_cycles,
            r.method_b_cycles,
            Ratio3::new(r.method_b_cycles, r.method_a_cycles),
        )
    }
}

pub fn write_banner(out: &mut impl fmt::Write, page: u32, sentinel: u16) -> fmt::Result {
    write!(out, "\r\n=== Hotfix Benchmark: fault redirect (A) vs flash rewrite (B) ===\r\n")?;
    write!(out, "Bench Page: {}\r\n", Hex32(page))?;
    write!(out, "Sentinel  : {}\r\n\r\n", Hex16(sentinel))
}

/// Summary block. `hz` converts the accumulated cycle totals to microseconds.
pub fn write_summary(out: &mut impl fmt::Write, summary: &Summary, hz: u32) -> fmt::Result {
    write!(
        out,
        "\r\n[SUMMARY] OK={} FAIL={} SAFE_HW={} SKIPPED={}\r\n",
        summary.ok_rows, summary.fail_rows, summary.safe_candidates, summary.skipped,
    )?;
    write!(
        out,
        "[TOTAL] A_cyc={} B_cyc={} ratio(B/A)={} A_us={} B_us={}\r\n",
        summary.total_a_cycles,
        summary.total_b_cycles,
        Ratio3::new(summary.total_b_cycles, summary.total_a_cycles),
        cycles_to_us(summary.total_a_cycles, hz),
        cycles_to_us(summary.total_b_cycles, hz),
    )?;
    if summary.unexpected_faults > 0 {
        write!(
            out,
            "[WARN] UNEXPECTED_FAULTS={} last_pc={}\r\n",
            summary.unexpected_faults,
            Hex32(summary.last_unexpected_pc),
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(value: impl fmt::Display) -> String {
        format!("{value}")
    }

    #[test]
    fn ratio_rounds_half_up() {
        assert_eq!(render(Ratio3::new(3u32, 2u32)), "1.500");
        assert_eq!(render(Ratio3::new(1u32, 3u32)), "0.333");
        assert_eq!(render(Ratio3::new(2u32, 3u32)), "0.667");
        assert_eq!(render(Ratio3::new(1u32, 2000u32)), "0.001");
        assert_eq!(render(Ratio3::new(1u32, 2001u32)), "0.000");
        assert_eq!(render(Ratio3::new(0u32, 7u32)), "0.000");
        assert_eq!(render(Ratio3::new(123_456u32, 1u32)), "123456.000");
    }

    #[test]
    fn zero_denominator_is_infinite() {
        assert_eq!(render(Ratio3::new(5u32, 0u32)), "inf");
        assert_eq!(render(Ratio3::new(0u32, 0u32)), "inf");
    }

    #[test]
    fn huge_totals_do_not_overflow() {
        assert_eq!(render(Ratio3::new(u64::MAX, u64::MAX)), "1.000");
    }

    #[test]
    fn hex_is_zero_padded_upper_case() {
        assert_eq!(render(Hex16(0xde42)), "0xDE42");
        assert_eq!(render(Hex16(0)), "0x0000");
        assert_eq!(render(Hex32(0xF_F000)), "0x000FF000");
    }

    #[test]
    fn row_layout() {
        let r = TrialResult {
            candidate_value: 0x1C00,
            repeat_count: 10,
            method_a_cycles: 2000,
            method_b_cycles: 3000,
            ok: true,
        };
        assert_eq!(
            render(Row(&r)),
            "hw=0x1C00 N=10 A_cyc=2000 B_cyc=3000 ratio(B/A)=1.500"
        );
    }

    #[test]
    fn summary_layout() {
        let s = Summary {
            ok_rows: 3,
            fail_rows: 1,
            safe_candidates: 2,
            skipped: 5,
            total_a_cycles: 64,
            total_b_cycles: 128,
            ..Default::default()
        };
        let mut out = String::new();
        write_summary(&mut out, &s, 64_000_000).unwrap();
        assert_eq!(
            out,
            "\r\n[SUMMARY] OK=3 FAIL=1 SAFE_HW=2 SKIPPED=5\r\n\
             [TOTAL] A_cyc=64 B_cyc=128 ratio(B/A)=2.000 A_us=1 B_us=2\r\n"
        );
    }
}
