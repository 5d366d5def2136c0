//! Server timezone inference from listing dates versus `MDTM`.
//!
//! Listings show wall-clock times in the server's zone while `MDTM` reports
//! UTC. The difference between the two for the same file is the server's
//! offset; every zone with that raw offset is a candidate. The match is
//! imprecise during daylight saving time, when the observed offset includes
//! the DST shift but candidates are compared by raw offset.

use chrono::{DateTime, Offset, TimeZone, Utc};
use chrono_tz::{OffsetComponents, Tz, TZ_VARIANTS};

const MINUTE_MS: i64 = 60_000;

fn truncate_to_minute(ms: i64) -> i64 {
    ms - ms.rem_euclid(MINUTE_MS)
}

fn instant(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

/// Total offset (including DST) of `tz` at `utc_ms`, in milliseconds.
pub fn total_offset_ms(tz: Tz, utc_ms: i64) -> i64 {
    match instant(utc_ms) {
        Some(at) => {
            let offset = tz.offset_from_utc_datetime(&at.naive_utc());
            i64::from(offset.fix().local_minus_utc()) * 1000
        }
        None => 0,
    }
}

/// Raw offset (excluding DST) of `tz` at `utc_ms`, in milliseconds.
pub fn raw_offset_ms(tz: Tz, utc_ms: i64) -> i64 {
    match instant(utc_ms) {
        Some(at) => tz
            .offset_from_utc_datetime(&at.naive_utc())
            .base_utc_offset()
            .num_milliseconds(),
        None => 0,
    }
}

/// Wall-clock reading of `utc_ms` in `tz`, expressed as if it were UTC.
pub fn wall_clock_ms(tz: Tz, utc_ms: i64) -> i64 {
    utc_ms + total_offset_ms(tz, utc_ms)
}

/// Candidate server zones given the authoritative UTC modification time of
/// a file and the wall-clock time the listing shows for it.
///
/// Returns `[default]` when the observed offset is the default zone's offset
/// at that instant, otherwise every zone whose raw offset matches (possibly
/// none).
pub fn infer_timezones(utc_ms: i64, local_ms: i64, default: Tz) -> Vec<Tz> {
    let utc = truncate_to_minute(utc_ms);
    let local = truncate_to_minute(local_ms);
    let offset = local - utc;
    log::info!("Calculated UTC offset is {}ms", offset);
    if total_offset_ms(default, utc) == offset {
        log::info!("Offset equals default timezone {}", default);
        return vec![default];
    }
    let zones: Vec<Tz> = TZ_VARIANTS
        .iter()
        .copied()
        .filter(|tz| raw_offset_ms(*tz, utc) == offset)
        .collect();
    if zones.is_empty() {
        log::warn!("No timezone matches offset {}ms", offset);
    } else {
        log::debug!("{} timezones match offset {}ms", zones.len(), offset);
    }
    zones
}
