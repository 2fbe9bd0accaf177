use std::collections::{BTreeMap, HashMap};

use crate::diagnostics::{Diagnostics, Entity};
use crate::feed::StopTimeRecord;
use crate::model::{StopId, TripId, TripTimes};

/// Minutes after midnight for `H:MM:SS` (or `H:MM`). Seconds are rounded to the nearest minute,
/// half a minute rounds up.
pub fn parse_minutes(text: &str) -> Option<u32> {
    let mut parts = text.trim().split(':');
    let hours: u32 = parts.next()?.trim().parse().ok()?;
    let minutes: u32 = parts.next()?.trim().parse().ok()?;
    let seconds: u32 = match parts.next() {
        Some(seconds) => seconds.trim().parse().ok()?,
        None => 0,
    };
    if parts.next().is_some() || minutes >= 60 || seconds >= 60 {
        return None;
    }
    hours
        .checked_mul(60)?
        .checked_add(minutes)?
        .checked_add((seconds * 2 + 60) / 120)
}

/// Stop times of one trip after ingestion and validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TripStopTimes {
    pub times: TripTimes,
    pub stops: BTreeMap<u32, StopId>,
}

/// Groups stop-time rows by trip, each group ordered by stop sequence.
pub fn group_by_trip(records: &[StopTimeRecord]) -> HashMap<TripId, Vec<&StopTimeRecord>> {
    let mut rows_by_trip: HashMap<TripId, Vec<&StopTimeRecord>> = HashMap::new();
    for record in records {
        rows_by_trip
            .entry(TripId::new(&record.trip_id))
            .or_default()
            .push(record);
    }
    for rows in rows_by_trip.values_mut() {
        rows.sort_by_key(|row| row.stop_sequence);
    }
    rows_by_trip
}

/// Turns the rows of one trip into start time and offsets. Returns `None` (after logging why)
/// when the resulting stop times are unusable.
pub fn ingest_trip(
    trip_id: TripId,
    rows: &[&StopTimeRecord],
    max_gap_minutes: u32,
    diagnostics: &mut Diagnostics,
) -> Option<TripStopTimes> {
    let mut start_time: Option<u32> = None;
    let mut offsets: Vec<i64> = vec![];
    let mut stops: BTreeMap<u32, StopId> = BTreeMap::new();
    let mut previous_stop: Option<&str> = None;
    let mut has_departure_times = false;

    for row in rows {
        if !row.arrival_time.contains(':') || !row.departure_time.contains(':') {
            diagnostics.info(
                Entity::Trip(trip_id),
                format!(
                    "skipping stop_sequence={} without time: {:?}/{:?}",
                    row.stop_sequence, row.arrival_time, row.departure_time
                ),
            );
            continue;
        }
        let (Some(arrival), Some(departure)) = (
            parse_minutes(&row.arrival_time),
            parse_minutes(&row.departure_time),
        ) else {
            diagnostics.error(
                Entity::Trip(trip_id),
                format!(
                    "unparsable time at stop_sequence={}: {:?}/{:?}",
                    row.stop_sequence, row.arrival_time, row.departure_time
                ),
            );
            continue;
        };
        let start = *start_time.get_or_insert(arrival);
        let arrival_offset = i64::from(arrival) - i64::from(start);
        let departure_offset = i64::from(departure) - i64::from(start);

        if arrival == departure
            && offsets.last() == Some(&arrival_offset)
            && previous_stop == Some(row.stop_id.as_str())
        {
            diagnostics.info(
                Entity::Trip(trip_id),
                format!("ignoring duplicate stop_id={}", row.stop_id),
            );
            continue;
        }
        if departure < arrival {
            diagnostics.error(
                Entity::Trip(trip_id),
                format!(
                    "departure_time < arrival_time at stop_sequence={}: {} < {}",
                    row.stop_sequence, row.departure_time, row.arrival_time
                ),
            );
        }

        has_departure_times |= arrival != departure;
        offsets.push(arrival_offset);
        offsets.push(departure_offset);
        previous_stop = Some(row.stop_id.as_str());

        let stop_id = StopId::new(&row.stop_id);
        match stops.get(&row.stop_sequence) {
            None => {
                stops.insert(row.stop_sequence, stop_id);
            }
            Some(existing) if *existing != stop_id => {
                diagnostics.error(
                    Entity::Trip(trip_id),
                    format!(
                        "two stops for stop_sequence={}: {} {}",
                        row.stop_sequence, existing, stop_id
                    ),
                );
            }
            Some(_) => {}
        }
    }

    if let Some(reason) = invalid_reason(&offsets, max_gap_minutes) {
        diagnostics.error(
            Entity::Trip(trip_id),
            format!("invalid stop_times ({}): {:?}", reason, offsets),
        );
        return None;
    }

    Some(TripStopTimes {
        times: TripTimes {
            start_time: start_time.unwrap_or_default(),
            // Sorted and starting at zero, so none of them is negative.
            offsets: offsets.iter().map(|&offset| offset as u32).collect(),
            has_departure_times,
        },
        stops,
    })
}

fn invalid_reason(offsets: &[i64], max_gap_minutes: u32) -> Option<&'static str> {
    if offsets.len() < 4 {
        return Some("short");
    }
    if offsets.windows(2).any(|pair| pair[0] > pair[1]) {
        return Some("order");
    }
    let max_gap = offsets
        .windows(2)
        .map(|pair| pair[1] - pair[0])
        .max()
        .unwrap_or(0);
    if max_gap > i64::from(max_gap_minutes) {
        return Some("gap");
    }
    None
}
