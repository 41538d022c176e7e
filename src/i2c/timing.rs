// Licensed under the Apache-2.0 license

//! Bus speed to divider conversion.
//!
//! The controller divides its source clock by `2 * step * sample`. The
//! search below finds the smallest product that does not exceed the
//! requested speed, then derives the `TIMING`, `LTIMING` and `HS` register
//! values from one, two or three such searches.

use crate::i2c::common::{DEFAULT_SPEED_HZ, MAX_FS_MODE_SPEED_HZ, MAX_HS_MODE_SPEED_HZ};
use crate::i2c::compat::Capabilities;
use crate::i2c::error::TransferError;

pub const MAX_SAMPLE_CNT_DIV: u32 = 8;
pub const MAX_STEP_CNT_DIV: u32 = 64;
pub const MAX_HS_STEP_CNT_DIV: u32 = 8;

const SAMPLE_COUNT_MASK: u16 = 0x0007;
const STEP_DIV_MASK: u16 = 0x003f;
const HS_TIME_DEFAULT: u16 = 0x0003;
const HALF_DUTY_CYCLE: u32 = 50;
const DUTY_CYCLE: u32 = 45;

/// SCL low phase allowed before the revision 2 timeout fires, in ms.
const MAX_SCL_LOW_TIME_MS: u32 = 2;
const LSTEP_MASK: u16 = 0x003f;
const LSAMPLE_MASK: u16 = 0x01c0;

/// Divider pair in register encoding (`count - 1`).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Divider {
    pub step: u16,
    pub sample: u16,
}

impl Divider {
    /// `step_count * sample_count`.
    #[must_use]
    pub fn product(&self) -> u32 {
        (u32::from(self.step) + 1) * (u32::from(self.sample) + 1)
    }
}

/// Find the divider pair with the smallest product that keeps the bus at or
/// under `target_hz`.
///
/// # Errors
///
/// [`TransferError::UnsupportedSpeed`] when `target_hz` is zero, above
/// high-speed mode on revisions that check it, or too slow for the largest
/// divider.
pub fn calculate_speed(
    clock_in_hz: u32,
    target_hz: u32,
    check_max_freq: bool,
) -> Result<Divider, TransferError> {
    if target_hz == 0 {
        return Err(TransferError::UnsupportedSpeed);
    }

    let max_step_cnt = if target_hz > MAX_HS_MODE_SPEED_HZ {
        if check_max_freq {
            return Err(TransferError::UnsupportedSpeed);
        }
        MAX_HS_STEP_CNT_DIV
    } else if target_hz > MAX_FS_MODE_SPEED_HZ {
        MAX_HS_STEP_CNT_DIV
    } else {
        MAX_STEP_CNT_DIV
    };

    let clock = u64::from(clock_in_hz);
    let target = u64::from(target_hz);
    let min_div = clock.div_ceil(2 * target).max(1);

    let mut best_mul = u64::from(MAX_SAMPLE_CNT_DIV * max_step_cnt);
    let mut sample_div = u64::from(MAX_SAMPLE_CNT_DIV);
    let mut step_div = u64::from(max_step_cnt);

    for sample_cnt in 1..=u64::from(MAX_SAMPLE_CNT_DIV) {
        let step_cnt = min_div.div_ceil(sample_cnt);
        if step_cnt > u64::from(max_step_cnt) {
            continue;
        }
        let cnt_mul = step_cnt * sample_cnt;
        if cnt_mul < best_mul {
            best_mul = cnt_mul;
            sample_div = sample_cnt;
            step_div = step_cnt;
            if best_mul == min_div {
                break;
            }
        }
    }

    if clock > 2 * sample_div * step_div * target {
        log::debug!(
            "{} mode: unsupported speed ({target_hz} Hz)",
            if target_hz > MAX_FS_MODE_SPEED_HZ { "HS" } else { "ST/FT" }
        );
        return Err(TransferError::UnsupportedSpeed);
    }

    // Both counts are bounded by 64, the casts cannot truncate.
    Ok(Divider {
        step: (step_div - 1) as u16,
        sample: (sample_div - 1) as u16,
    })
}

/// Register values for one bus speed.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct TimingRegisters {
    pub timing: u16,
    /// Low-phase timing; zero on revisions without the register.
    pub ltiming: u16,
    /// High-speed phase; zero below high-speed mode.
    pub high_speed: u16,
}

impl TimingRegisters {
    /// Derive the timing registers for `speed_hz`.
    ///
    /// # Errors
    ///
    /// [`TransferError::UnsupportedSpeed`] if any of the required divider
    /// searches fails.
    pub fn compute(
        clock_in_hz: u32,
        speed_hz: u32,
        caps: &Capabilities,
        hs_only: bool,
    ) -> Result<Self, TransferError> {
        let check = caps.check_max_freq;

        if speed_hz > MAX_FS_MODE_SPEED_HZ && !hs_only {
            let l = calculate_speed(clock_in_hz, MAX_FS_MODE_SPEED_HZ, check)?;
            let h = calculate_speed(clock_in_hz, speed_hz, check)?;

            let ltiming = if caps.set_ltiming {
                (l.sample << 6)
                    | l.step
                    | (h.sample & SAMPLE_COUNT_MASK) << 12
                    | (h.step & SAMPLE_COUNT_MASK) << 9
            } else {
                0
            };

            return Ok(Self {
                timing: (l.sample & SAMPLE_COUNT_MASK) << 8 | (l.step & STEP_DIV_MASK),
                ltiming,
                high_speed: HS_TIME_DEFAULT
                    | (h.sample & SAMPLE_COUNT_MASK) << 12
                    | (h.step & SAMPLE_COUNT_MASK) << 8,
            });
        }

        let duty = if speed_hz > DEFAULT_SPEED_HZ
            && speed_hz <= MAX_FS_MODE_SPEED_HZ
            && caps.set_ltiming
        {
            DUTY_CYCLE
        } else {
            HALF_DUTY_CYCLE
        };

        let d = calculate_speed(clock_in_hz, scale(speed_hz, duty), check)?;
        let ltiming = if caps.set_ltiming {
            let l = calculate_speed(clock_in_hz, scale(speed_hz, 100 - duty), check)?;
            (l.sample & SAMPLE_COUNT_MASK) << 6 | (l.step & STEP_DIV_MASK)
        } else {
            0
        };

        Ok(Self {
            timing: (d.sample & SAMPLE_COUNT_MASK) << 8 | (d.step & STEP_DIV_MASK),
            ltiming,
            high_speed: 0,
        })
    }
}

/// `speed * 50 / duty`, saturating.
fn scale(speed_hz: u32, duty: u32) -> u32 {
    let scaled = u64::from(speed_hz) * u64::from(HALF_DUTY_CYCLE) / u64::from(duty);
    u32::try_from(scaled).unwrap_or(u32::MAX)
}

/// Revision 2 SCL-low timeout counter for the given low-phase timing.
#[must_use]
pub fn hw_timeout_value(clock_in_hz: u32, ltiming: u16) -> u16 {
    let tv1 = (clock_in_hz / 1000) * MAX_SCL_LOW_TIME_MS;
    let tv2 = (u32::from(ltiming & LSTEP_MASK) + 1) * (u32::from((ltiming & LSAMPLE_MASK) >> 6) + 1);
    (tv1.div_ceil(tv2) & 0xffff) as u16
}
