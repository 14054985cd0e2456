//! Low-precision positions of the Sun, the Moon and the galactic centre.
//!
//! Solar terms follow the NOAA solar calculator; the Moon uses the short
//! periodic series from the Astronomical Almanac. Both are good to a few
//! tenths of a degree, well within what hourly scoring on a quarter-degree grid
//! needs.

use std::f64::consts::PI;

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc};

const DEG: f64 = PI / 180.0;

/// Galactic centre (Sagittarius A*), J2000: RA 17h58m03.47s, Dec -26°06'04.6".
pub const GALACTIC_CENTER_RA_DEG: f64 = (17.0 + 58.0 / 60.0 + 3.47 / 3600.0) * 15.0;
pub const GALACTIC_CENTER_DEC_DEG: f64 = -(26.0 + 6.0 / 60.0 + 4.6 / 3600.0);

/// Mean synodic month, days.
pub const SYNODIC_MONTH_DAYS: f64 = 29.530588853;

/// Equatorial coordinates in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Equatorial {
    pub ra: f64,
    pub dec: f64,
}

/// Julian date of a UTC instant (Meeus, chapter 7).
pub fn julian_date(t: &DateTime<Utc>) -> f64 {
    let (y, m) = if t.month() <= 2 {
        (t.year() - 1, t.month() + 12)
    } else {
        (t.year(), t.month())
    };
    let day = t.day() as f64
        + (t.hour() as f64
            + t.minute() as f64 / 60.0
            + (t.second() as f64 + t.nanosecond() as f64 * 1e-9) / 3600.0)
            / 24.0;

    let a = (y as f64 / 100.0).floor();
    let b = 2.0 - a + (a / 4.0).floor();

    (365.25 * (y as f64 + 4716.0)).floor() + (30.6001 * (m as f64 + 1.0)).floor() + day + b
        - 1524.5
}

fn julian_century(jd: f64) -> f64 {
    (jd - 2451545.0) / 36525.0
}

pub fn normalize_degrees(deg: f64) -> f64 {
    deg.rem_euclid(360.0)
}

/// Wrap an angle into (-180, 180].
fn signed_degrees(deg: f64) -> f64 {
    let d = normalize_degrees(deg);
    if d > 180.0 {
        d - 360.0
    } else {
        d
    }
}

/// Greenwich mean sidereal time, degrees.
pub fn gmst_degrees(jd: f64) -> f64 {
    let t = julian_century(jd);
    normalize_degrees(
        280.46061837 + 360.98564736629 * (jd - 2451545.0) + t * t * (0.000387933 - t / 38710000.0),
    )
}

fn obliquity(t: f64) -> f64 {
    let mean = 23.0 + (26.0 + (21.448 - t * (46.815 + t * (0.00059 - t * 0.001813))) / 60.0) / 60.0;
    let omega = 125.04 - 1934.136 * t;
    mean + 0.00256 * (omega * DEG).cos()
}

fn ecliptic_to_equatorial(lambda: f64, beta: f64, epsilon: f64) -> Equatorial {
    let (l, b, e) = (lambda * DEG, beta * DEG, epsilon * DEG);
    let ra = (l.sin() * e.cos() - b.tan() * e.sin()).atan2(l.cos());
    let dec = (b.sin() * e.cos() + b.cos() * e.sin() * l.sin()).asin();
    Equatorial {
        ra: normalize_degrees(ra / DEG),
        dec: dec / DEG,
    }
}

/// Apparent ecliptic longitude of the Sun, degrees.
pub fn sun_longitude(jd: f64) -> f64 {
    let t = julian_century(jd);
    let l0 = 280.46646 + t * (36000.76983 + t * 0.0003032);
    let m = (357.52911 + t * (35999.05029 - t * 0.0001537)) * DEG;
    let center = m.sin() * (1.914602 - t * (0.004817 + t * 0.000014))
        + (2.0 * m).sin() * (0.019993 - t * 0.000101)
        + (3.0 * m).sin() * 0.000289;
    let omega = 125.04 - 1934.136 * t;
    normalize_degrees(l0 + center - 0.00569 - 0.00478 * (omega * DEG).sin())
}

pub fn sun_position(jd: f64) -> Equatorial {
    let t = julian_century(jd);
    ecliptic_to_equatorial(sun_longitude(jd), 0.0, obliquity(t))
}

/// Geocentric ecliptic longitude, latitude and horizontal parallax of the
/// Moon, degrees.
pub fn moon_ecliptic(jd: f64) -> (f64, f64, f64) {
    let t = julian_century(jd);
    let s = |a: f64, b: f64| ((a + b * t) * DEG).sin();
    let c = |a: f64, b: f64| ((a + b * t) * DEG).cos();

    let lambda = 218.32 + 481267.881 * t + 6.29 * s(135.0, 477198.87) - 1.27 * s(259.3, -413335.36)
        + 0.66 * s(235.7, 890534.22)
        + 0.21 * s(269.9, 954397.74)
        - 0.19 * s(357.5, 35999.05)
        - 0.11 * s(186.5, 966404.03);
    let beta = 5.13 * s(93.3, 483202.02) + 0.28 * s(228.2, 960400.89)
        - 0.28 * s(318.3, 6003.15)
        - 0.17 * s(217.6, -407332.21);
    let parallax = 0.9508
        + 0.0518 * c(135.0, 477198.87)
        + 0.0095 * c(259.3, -413335.36)
        + 0.0078 * c(235.7, 890534.22)
        + 0.0028 * c(269.9, 954397.74);

    (normalize_degrees(lambda), beta, parallax)
}

pub fn moon_position(jd: f64) -> (Equatorial, f64) {
    let t = julian_century(jd);
    let (lambda, beta, parallax) = moon_ecliptic(jd);
    (ecliptic_to_equatorial(lambda, beta, obliquity(t)), parallax)
}

/// Angular separation of two equatorial positions, degrees.
pub fn separation(a: &Equatorial, b: &Equatorial) -> f64 {
    let cos_sep = (a.dec * DEG).sin() * (b.dec * DEG).sin()
        + (a.dec * DEG).cos() * (b.dec * DEG).cos() * ((a.ra - b.ra) * DEG).cos();
    cos_sep.clamp(-1.0, 1.0).acos() / DEG
}

/// Illuminated fraction of the Moon's disc from the Sun-Moon elongation.
pub fn moon_illumination(sun: &Equatorial, moon: &Equatorial) -> f64 {
    let elongation = separation(sun, moon) * DEG;
    (1.0 - elongation.cos()) / 2.0
}

/// Altitude above the horizon, degrees, of a body at the given local hour
/// angle.
pub fn altitude_from_hour_angle(lat: f64, dec: f64, hour_angle: f64) -> f64 {
    let (phi, delta, h) = (lat * DEG, dec * DEG, hour_angle * DEG);
    let sin_alt = phi.sin() * delta.sin() + phi.cos() * delta.cos() * h.cos();
    sin_alt.clamp(-1.0, 1.0).asin() / DEG
}

/// Altitude of an equatorial position seen from (`lat`, `lng`), degrees.
pub fn altitude(pos: &Equatorial, gmst: f64, lat: f64, lng: f64) -> f64 {
    altitude_from_hour_angle(lat, pos.dec, gmst + lng - pos.ra)
}

/// Correct a geocentric lunar altitude for parallax.
pub fn topocentric_altitude(geocentric: f64, parallax: f64) -> f64 {
    geocentric - parallax * (geocentric * DEG).cos()
}

/// Moon minus Sun ecliptic longitude in (-180, 180].
fn phase_angle(jd: f64) -> f64 {
    signed_degrees(moon_ecliptic(jd).0 - sun_longitude(jd))
}

fn from_julian_date(jd: f64) -> DateTime<Utc> {
    let millis = ((jd - 2440587.5) * 86_400_000.0).round() as i64;
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Instants of new moon (conjunction in ecliptic longitude) within a year.
pub fn new_moons(year: i32) -> Vec<DateTime<Utc>> {
    let Some(start) = Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).single() else {
        return Vec::new();
    };
    let Some(end) = Utc.with_ymd_and_hms(year + 1, 1, 1, 0, 0, 0).single() else {
        return Vec::new();
    };

    let step = 0.25;
    let end_jd = julian_date(&end);
    let mut jd = julian_date(&start);
    let mut prev = phase_angle(jd);
    let mut found = Vec::new();

    while jd < end_jd {
        let next_jd = jd + step;
        let next = phase_angle(next_jd);
        if prev < 0.0 && next >= 0.0 && next - prev < 90.0 {
            let (mut lo, mut hi) = (jd, next_jd);
            for _ in 0..30 {
                let mid = (lo + hi) / 2.0;
                if phase_angle(mid) < 0.0 {
                    lo = mid;
                } else {
                    hi = mid;
                }
            }
            if hi < end_jd {
                found.push(from_julian_date(hi));
            }
        }
        jd = next_jd;
        prev = next;
    }
    found
}

/// Calendar dates (UTC) of new moons within a year.
pub fn new_moon_dates(year: i32) -> Vec<NaiveDate> {
    new_moons(year).into_iter().map(|t| t.date_naive()).collect()
}

/// Quantities that depend only on the instant, shared by every cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AstroContext {
    pub instant: DateTime<Utc>,
    pub gmst: f64,
    pub sun: Equatorial,
    pub moon: Equatorial,
    pub moon_parallax: f64,
    pub moon_illumination: f64,
}

impl AstroContext {
    pub fn for_instant(instant: DateTime<Utc>) -> Self {
        let jd = julian_date(&instant);
        let sun = sun_position(jd);
        let (moon, moon_parallax) = moon_position(jd);
        Self {
            instant,
            gmst: gmst_degrees(jd),
            sun,
            moon,
            moon_parallax,
            moon_illumination: moon_illumination(&sun, &moon),
        }
    }

    pub fn galactic_center() -> Equatorial {
        Equatorial {
            ra: GALACTIC_CENTER_RA_DEG,
            dec: GALACTIC_CENTER_DEC_DEG,
        }
    }

    pub fn sun_altitude(&self, lat: f64, lng: f64) -> f64 {
        altitude(&self.sun, self.gmst, lat, lng)
    }

    pub fn moon_altitude(&self, lat: f64, lng: f64) -> f64 {
        topocentric_altitude(altitude(&self.moon, self.gmst, lat, lng), self.moon_parallax)
    }

    pub fn core_altitude(&self, lat: f64, lng: f64) -> f64 {
        altitude(&Self::galactic_center(), self.gmst, lat, lng)
    }

    /// Context one hour later.
    pub fn next_hour(&self) -> Self {
        Self::for_instant(self.instant + Duration::hours(1))
    }
}
