//! Sunrise/sunset for a fixed site, computed with the NOAA sunrise equation.
//!
//! Accuracy is about a minute at mid latitudes, which is plenty for a
//! daylight flag. Any failure (unknown timezone, polar day or polar night)
//! reports the sun as down.

use std::f64::consts::PI;

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use tracing::warn;

/// Julian date of 2000-01-01 12:00 TT.
const J2000: f64 = 2_451_545.0;
/// Julian date of the Unix epoch.
const UNIX_EPOCH_JD: f64 = 2_440_587.5;
/// Sun's apparent radius plus standard refraction.
const HORIZON_DEG: f64 = -0.833;
const OBLIQUITY_DEG: f64 = 23.4397;

/// Fixed observer site.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Location {
    #[serde(default)]
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    /// IANA timezone name, e.g. `Europe/Amsterdam`.
    pub timezone: String,
}

impl Location {
    fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| anyhow!("unknown timezone {:?}: {e}", self.timezone))
    }
}

/// Sunrise and sunset for one local calendar day.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SunTimes {
    pub sunrise: DateTime<Tz>,
    pub sunset: DateTime<Tz>,
}

/// Compute sunrise and sunset on local `date` at `location`.
pub fn sun_times(location: &Location, date: NaiveDate) -> Result<SunTimes> {
    let tz = location.tz()?;

    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| anyhow!("invalid date {date}"))?
        .and_utc()
        .timestamp() as f64;
    let jd_midnight = midnight / 86_400.0 + UNIX_EPOCH_JD;
    let n = (jd_midnight - J2000 + 0.0008).ceil();

    // Mean solar noon, east longitudes positive.
    let j_star = n - location.longitude / 360.0;

    let m = (357.5291 + 0.985_600_28 * j_star).rem_euclid(360.0);
    let m_rad = m.to_radians();
    let c = 1.9148 * m_rad.sin() + 0.0200 * (2.0 * m_rad).sin() + 0.0003 * (3.0 * m_rad).sin();
    let lambda = (m + c + 180.0 + 102.9372).rem_euclid(360.0).to_radians();

    let j_transit = J2000 + j_star + 0.0053 * m_rad.sin() - 0.0069 * (2.0 * lambda).sin();

    let sin_decl = lambda.sin() * OBLIQUITY_DEG.to_radians().sin();
    let cos_decl = sin_decl.asin().cos();
    let phi = location.latitude.to_radians();

    let cos_omega =
        (HORIZON_DEG.to_radians().sin() - phi.sin() * sin_decl) / (phi.cos() * cos_decl);
    if !cos_omega.is_finite() {
        bail!("hour angle undefined at latitude {}", location.latitude);
    }
    if cos_omega > 1.0 {
        bail!("sun never rises on {date} at latitude {}", location.latitude);
    }
    if cos_omega < -1.0 {
        bail!("sun never sets on {date} at latitude {}", location.latitude);
    }
    let omega_days = cos_omega.acos() / (2.0 * PI);

    Ok(SunTimes {
        sunrise: julian_to_local(j_transit - omega_days, &tz)?,
        sunset: julian_to_local(j_transit + omega_days, &tz)?,
    })
}

fn julian_to_local(jd: f64, tz: &Tz) -> Result<DateTime<Tz>> {
    let millis = ((jd - UNIX_EPOCH_JD) * 86_400_000.0).round() as i64;
    let utc = Utc
        .timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| anyhow!("julian date {jd} out of range"))?;
    Ok(utc.with_timezone(tz))
}

/// Whether `now` lies within today's sunrise..=sunset at `location`, where
/// "today" is the local calendar date of `now`.
pub fn is_sun_up_at(location: &Location, now: DateTime<Utc>) -> Result<bool> {
    let local = now.with_timezone(&location.tz()?);
    let times = sun_times(location, local.date_naive())?;
    Ok(times.sunrise <= local && local <= times.sunset)
}

/// Recomputed every cycle; never cached.
#[derive(Debug, Clone)]
pub struct SolarClock {
    location: Location,
}

impl SolarClock {
    pub fn new(location: Location) -> Self {
        Self { location }
    }

    /// Fail-safe daylight flag: errors are logged and read as sun down.
    pub fn is_sun_up(&self, now: DateTime<Utc>) -> bool {
        match is_sun_up_at(&self.location, now) {
            Ok(up) => up,
            Err(e) => {
                warn!(site = %self.location.name, "solar computation failed, assuming sun down: {e:#}");
                false
            }
        }
    }
}
