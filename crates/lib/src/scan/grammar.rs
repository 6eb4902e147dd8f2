//! Fixed positional grammar of the barcode printed on e-tickets.

use regex::Regex;
use std::sync::OnceLock;

const TICKET_PATTERN: &str = r"^eRIV([A-Z]{6}).*100(\d)(\d{3})(\d{3}).*([A-Z]{2})([A-Z]{3})([A-Z]{2})([A-Z]{3})\d*(\d{4})\d{7}(\d{3})(\d{3})(\d[A-Z])[A-Z]$";

fn ticket_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(TICKET_PATTERN).expect("ticket pattern is valid"))
}

/// Raw fields of a decoded barcode, before station/timetable resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTicket {
    pub reference_number: String,
    /// Last digit of the booking year, counted from 2010.
    pub booking_year: u8,
    /// Day of year the booking was made (1-366).
    pub booking_day: u16,
    /// Day of year of travel (1-366).
    pub travel_day: u16,
    pub from_country: String,
    pub from_station: String,
    pub to_country: String,
    pub to_station: String,
    pub train_number: u16,
    pub coach: String,
    pub seat: String,
    pub fare_class: String,
}

/// Parse decoded barcode text. Spaces are ignored. `None` if the text does not
/// follow the grammar.
pub fn parse(raw: &str) -> Option<DecodedTicket> {
    let compact: String = raw.chars().filter(|c| *c != ' ').collect();
    let caps = ticket_regex().captures(&compact)?;
    let field = |i: usize| caps.get(i).map(|m| m.as_str()).unwrap_or_default();
    Some(DecodedTicket {
        reference_number: field(1).to_string(),
        booking_year: field(2).parse().ok()?,
        booking_day: field(3).parse().ok()?,
        travel_day: field(4).parse().ok()?,
        from_country: field(5).to_string(),
        from_station: field(6).to_string(),
        to_country: field(7).to_string(),
        to_station: field(8).to_string(),
        train_number: field(9).parse().ok()?,
        coach: field(10).to_string(),
        seat: field(11).to_string(),
        fare_class: field(12).to_string(),
    })
}
