//! Scheduled departures, keyed by train, stop and weekday.

use crate::ticket::Stop;
use chrono::{NaiveTime, Weekday};
use std::collections::HashMap;

/// Columns of a row: seven day flags (Monday first), stop times, train number.
/// Four stop times is the Paris line, six the Brussels line. Even trains run
/// from London, odd trains towards it, so their stops read in reverse.
const PARIS_LINE: [Stop; 4] = [Stop::Lspi, Stop::Ei, Stop::Ai, Stop::Pgdn];
const BRUSSELS_LINE: [Stop; 6] = [Stop::Lspi, Stop::Ei, Stop::Ai, Stop::Cf, Stop::Le, Stop::Bmz];
const DAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

const EUROSTAR_ROWS: &[&str] = &[
    "P P P P P - - 05:40 05:58 06:24 09:17 9080",
    "- - - - - P - 06:18 - 06:55 09:47 9002",
    "P P P P P - - 07:01 - - 10:17 9004",
    "P P P P P P - 07:55 08:12 - 11:17 9008",
    "- - - - - - P 08:19 08:38 - 11:47 9010",
    "P - - - P P - 08:31 - - 11:47 9010",
    "- P P P - - - 08:31 - - 11:47 9010",
    "P P P P P - - 09:17 09:34 09:55 12:47 9014",
    "- - - - - - P 09:22 - 09:55 12:47 9014",
    "- - - - - P - 09:24 09:41 - 12:47 9014",
    "- - - - - - P 10:01 - - 13:17 9016",
    "- - - - - P - 10:01 - - 13:17 9016",
    "P P P P P - P 10:24 10:42 - 13:47 9018",
    "- - - - - P - 11:01 - - 14:17 9020",
    "- - - - - - P 11:01 - - 14:17 9020",
    "- - - - - P - 11:22 - 11:55 14:17 9022",
    "P - - P P - P 11:31 - - 14:47 9022",
    "- P P - - - - 11:31 - - 14:47 9022",
    "P - - P P - - 12:01 - - 15:17 9060",
    "- - - - - P - 12:01 - - 15:17 9060",
    "- P P - - - - 12:01 - - 15:17 9060",
    "P P P P P P P 12:24 12:42 - 15:47 9024",
    "- - - - P P P 13:31 - - 16:47 9028",
    "P P P P - - - 13:31 - - 16:47 9028",
    "- - - - P - P 14:01 - - 17:17 9030",
    "P P P P P P P 14:22 - 14:55 17:47 9032",
    "P P P P P P P 15:31 - - 18:47 9036",
    "- - - - P - P 16:01 - - 19:17 9038",
    "P - - - - - - 16:01 - - 19:17 9038",
    "P P P P P P P 16:31 - - 19:47 9040",
    "P P P P P P P 17:31 - - 20:47 9044",
    "P P P P P - - 18:01 - - 21:17 9046",
    "- - - - P - P 18:31 - - 21:47 9048",
    "- - - - - P - 18:31 - - 21:47 9048",
    "P - - P - - - 18:31 - - 21:47 9048",
    "- P P - - - - 18:31 - - 21:47 9048",
    "P P P P P - P 19:01 - - 22:17 9050",
    "- - - - P - - 19:25 - - 22:47 9052",
    "P P P P P P P 20:01 - - 23:17 9054",
    "- - - - - - P 20:31 - - 23:47 9056",
    "P - - - - - - 06:43 - - 08:02 9005",
    "P P P P P P - 07:13 - - 08:32 9007",
    "P P P P P - - 07:43 - - 09:00 9009",
    "- - - - - P P 08:13 - - 09:30 9011",
    "P - - - - - - 08:43 09:37 - 10:09 9013",
    "- P P P P - - 08:43 09:37 - 10:09 9013",
    "P P P P P P P 09:13 - 10:18 10:39 9015",
    "- - - P P P - 10:13 - - 11:30 9019",
    "P - - - - - - 10:13 - - 11:30 9019",
    "- P P - - - P 10:13 - - 11:30 9019",
    "- - - - P - - 10:43 - - 12:00 9021",
    "- - - - - - P 10:43 - - 12:00 9021",
    "P P P P P P P 11:13 12:07 - 12:39 9023",
    "- - - - - P - 11:43 - - 13:00 9025",
    "P - - - P - P 12:13 - - 13:30 9027",
    "- P P P - - - 12:13 - - 13:30 9027",
    "- - - - - P - 12:13 - - 13:30 9027",
    "P - - P P - - 12:43 - - 14:00 9029",
    "- P P - - - - 12:43 - - 14:00 9029",
    "- - - - - - P 12:43 - 13:48 14:09 9029",
    "- - - - - - P 13:13 - - 14:30 9031",
    "P P P P P P - 13:13 - 14:18 14:39 9031",
    "- - - - - P - 13:43 - - 15:00 9033",
    "- - - - - P P 14:13 - - 15:30 9035",
    "- - - - P - - 14:43 - - 16:02 9037",
    "P - - P - - P 14:43 - - 16:02 9037",
    "- P P - - - - 14:43 - - 16:02 9037",
    "P P P P P P P 15:13 - - 16:30 9039",
    "P P P P P P P 16:13 - 17:18 17:39 9043",
    "- - - - - - P 16:43 17:37 - 18:12 9045",
    "- - - - P - - 16:43 - 17:48 18:12 9045",
    "P P P P P P P 17:13 - - 18:32 9047",
    "P P P P P - P 18:13 - 19:18 19:39 9051",
    "- - - - P - - 18:43 - - 20:02 9053",
    "- P P P - - P 18:43 - - 20:02 9053",
    "P - - - - - - 18:43 - - 20:02 9053",
    "P P P P P P P 19:13 20:07 - 20:39 9055",
    "P P P P P P P 20:13 - 21:18 21:39 9059",
    "- - - - - - P 20:43 - - 22:00 9061",
    "P P P P P - P 21:13 - 22:18 22:39 9063",
    "P - - - - - - 06:13 06:30 06:52 - - 09:28 9108",
    "- P P P P - - 06:50 07:07 07:28 08:59 09:30 10:07 9110",
    "- - - - - P - 06:57 - 07:28 - 09:26 10:05 9110",
    "P - - - - - - 07:19 - 07:55 - 09:51 - 9084",
    "P P P P P - - 08:04 - - - 10:26 11:05 9114",
    "- P P P P - - 08:55 09:15 - - 11:26 12:05 9116",
    "P - - - - - - 08:55 09:15 - 10:59 11:30 12:11 9116",
    "- - - - - P P 08:58 09:15 - 10:59 11:30 12:08 9116",
    "P P P P P P - 10:58 11:15 - - 13:26 14:05 9126",
    "- - - - - - P 11:04 - - - 13:26 14:05 9126",
    "P P P P P P P 12:58 13:15 - 14:59 15:30 16:08 9132",
    "- - - - P - P 14:04 - - - 16:26 17:05 9136",
    "P P P P - - - 14:04 - - - 16:26 17:05 9136",
    "P P P P P - P 15:04 - - - 17:26 18:05 9140",
    "- - - - - P - 16:04 - - - 18:26 19:05 9144",
    "P P P P P - P 17:04 - - - 19:26 20:05 9148",
    "- - - - - P - 17:04 - - - 19:26 20:05 9148",
    "- - - - - - P 17:55 - 18:28 - 20:26 21:05 9152",
    "P P P P P - - 18:04 - - - 20:26 21:05 9152",
    "- - - - - P P 19:04 - - 20:59 21:30 22:08 9156",
    "P P P P P - - 19:34 - - 21:29 22:00 22:38 9158",
    "- - - - - - P 20:03 - - - 22:26 23:05 9162",
    "P - - - - - - 06:56 07:36 - - - 07:59 9109",
    "P P P P P P - 07:56 08:36 - - - 08:59 9113",
    "P P P P P P P 08:52 09:30 10:01 - - 09:57 9117",
    "P P P P P - - 10:56 11:36 - - - 11:57 9125",
    "- - - - - P - 10:56 11:36 - - - 11:57 9125",
    "- - - - - - P 11:56 12:36 - - - 12:57 9129",
    "P P P P P P - 12:52 13:30 14:01 - 13:45 14:05 9133",
    "- - - - - - P 14:52 15:30 16:01 - 15:45 16:05 9141",
    "P P P P P P - 14:56 15:36 - - 15:45 16:05 9141",
    "- - - - P - P 15:56 16:36 - - - 16:57 9145",
    "P P P P - - - 15:56 16:36 - - - 16:57 9145",
    "- - - - - - P 16:56 17:36 - - 17:45 18:03 9149",
    "P P P P P P - 16:56 17:36 - 17:34 - 18:06 9149",
    "P P P P P - - 17:56 18:36 - - 18:45 19:03 9153",
    "- - - - - - P 17:56 18:36 - 18:35 - 19:10 9153",
    "P P P P P - P 18:56 19:35 - - - 19:57 9157",
    "P P P P P P P 19:52 20:30 21:01 - 20:45 21:03 9161",
];

#[derive(Debug, thiserror::Error)]
#[error("timetable row {row}: {reason}")]
pub struct TimetableError {
    pub row: usize,
    pub reason: String,
}

/// Read-only departure table. Built once at startup and shared.
#[derive(Debug, Clone, Default)]
pub struct Timetable {
    entries: HashMap<(u16, Stop, Weekday), NaiveTime>,
}

impl Timetable {
    /// The embedded Eurostar timetable.
    pub fn eurostar() -> Result<Self, TimetableError> {
        Self::from_rows(EUROSTAR_ROWS.iter().copied())
    }

    /// Parse rows of the form `P P P P P - - 05:40 05:58 06:24 09:17 9080`.
    /// A later row for the same train, stop and day replaces an earlier one.
    pub fn from_rows<'a>(rows: impl IntoIterator<Item = &'a str>) -> Result<Self, TimetableError> {
        let mut entries = HashMap::new();
        for (i, row) in rows.into_iter().enumerate() {
            let err = |reason: String| TimetableError { row: i, reason };
            let cols: Vec<&str> = row.split_whitespace().collect();
            if cols.len() < DAYS.len() + 2 {
                return Err(err(format!("expected at least {} columns, got {}", DAYS.len() + 2, cols.len())));
            }
            let (days, rest) = cols.split_at(DAYS.len());
            let (times, train) = rest.split_at(rest.len() - 1);
            let train: u16 = train[0]
                .parse()
                .map_err(|_| err(format!("bad train number {:?}", train[0])))?;
            let mut stops: Vec<Stop> = match times.len() {
                4 => PARIS_LINE.to_vec(),
                6 => BRUSSELS_LINE.to_vec(),
                n => return Err(err(format!("expected 4 or 6 stop times, got {}", n))),
            };
            if train % 2 == 1 {
                stops.reverse();
            }
            for (day, flag) in DAYS.iter().zip(days) {
                match *flag {
                    "P" => {}
                    "-" => continue,
                    other => return Err(err(format!("bad day flag {:?}", other))),
                }
                for (stop, time) in stops.iter().zip(times) {
                    if *time == "-" {
                        continue;
                    }
                    let at = NaiveTime::parse_from_str(time, "%H:%M")
                        .map_err(|_| err(format!("bad time {:?}", time)))?;
                    entries.insert((train, *stop, *day), at);
                }
            }
        }
        Ok(Self { entries })
    }

    /// Scheduled departure of `train` from `stop` on `day`.
    pub fn departure(&self, train: u16, stop: Stop, day: Weekday) -> Option<NaiveTime> {
        self.entries.get(&(train, stop, day)).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
