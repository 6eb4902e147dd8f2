//! Resolve decoded barcode fields into a dated travel record.

use super::grammar::DecodedTicket;
use super::timetable::Timetable;
use super::{ScanError, TravelRecord};
use crate::ticket::Stop;
use chrono::{Datelike, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

/// Canonical stop for a station code printed on the ticket.
pub fn station_stop(code: &str) -> Option<Stop> {
    match code {
        "SPX" | "SPI" => Some(Stop::Lspi),
        "BMI" => Some(Stop::Bmz),
        "PNO" => Some(Stop::Pgdn),
        "EI" => Some(Stop::Ei),
        "AI" => Some(Stop::Ai),
        "CF" => Some(Stop::Cf),
        "LE" => Some(Stop::Le),
        _ => None,
    }
}

pub fn country_timezone(code: &str) -> Option<Tz> {
    match code {
        "GB" => Some(chrono_tz::Europe::London),
        "FR" => Some(chrono_tz::Europe::Paris),
        "BE" => Some(chrono_tz::Europe::Brussels),
        _ => None,
    }
}

/// Year of travel from the booking year digit. A travel day earlier in the
/// year than the booking day belongs to the following year.
pub fn travel_year(booking_year: u8, booking_day: u16, travel_day: u16) -> i32 {
    let base = 2010 + i32::from(booking_year);
    if booking_day <= travel_day {
        base
    } else {
        base + 1
    }
}

/// `Ok(None)` when the fields name something we do not serve (unknown station
/// or country, impossible day). A known train with no scheduled departure is an
/// error: the table and the ticket disagree.
pub fn normalize(
    decoded: &DecodedTicket,
    timetable: &Timetable,
) -> Result<Option<TravelRecord>, ScanError> {
    let (Some(from), Some(to)) = (
        station_stop(&decoded.from_station),
        station_stop(&decoded.to_station),
    ) else {
        log::debug!(
            "scan: unknown station {} -> {}",
            decoded.from_station,
            decoded.to_station
        );
        return Ok(None);
    };
    let Some(timezone) = country_timezone(&decoded.from_country) else {
        log::debug!("scan: unknown country {}", decoded.from_country);
        return Ok(None);
    };

    let year = travel_year(decoded.booking_year, decoded.booking_day, decoded.travel_day);
    let Some(day) = NaiveDate::from_yo_opt(year, u32::from(decoded.travel_day)) else {
        log::debug!("scan: day {} does not exist in {}", decoded.travel_day, year);
        return Ok(None);
    };
    let weekday = day.weekday();
    let time = timetable
        .departure(decoded.train_number, from, weekday)
        .ok_or(ScanError::MissingTimetable {
            train: decoded.train_number,
            stop: from,
            weekday,
        })?;
    let local = day.and_time(time);
    let departure = timezone
        .from_local_datetime(&local)
        .earliest()
        .ok_or_else(|| ScanError::NonexistentLocalTime {
            local: local.to_string(),
            timezone: timezone.name().to_string(),
        })?;

    Ok(Some(TravelRecord {
        from,
        to,
        date: departure.with_timezone(&Utc),
        timezone,
        train_number: decoded.train_number,
        coach: decoded.coach.clone(),
        seat: decoded.seat.clone(),
        fare_class: decoded.fare_class.clone(),
        reference: decoded.reference_number.clone(),
    }))
}
