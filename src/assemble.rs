use std::collections::HashMap;

use anyhow::{anyhow, Result};
use indicatif::ProgressIterator;
use serde_json::{json, Map, Value};

use crate::codec;
use crate::dates::{DateCounter, DateDictionary, DateRule};
use crate::dedup::DedupCache;
use crate::diagnostics::{Diagnostics, Entity};
use crate::model::*;

pub const ROOT_FIELDS: &[&str] = &[
    "field_index_map",
    "gtfs_epoch",
    "json_epoch",
    "route_types",
    "dates",
    "routes",
];
pub const ROUTE_FIELDS: &[&str] = &[
    "id",
    "name",
    "long_name",
    "type",
    "shapes",
    "stop_distances",
    "trip_dates",
    "trip_groups",
    "stop_times",
    "is_departure_times",
    "directions",
];
pub const TRIP_DATES_FIELDS: &[&str] = &[
    "start_date_i",
    "end_date_i",
    "weekdays",
    "added_dates",
    "removed_dates",
];
pub const TRIP_GROUP_FIELDS: &[&str] = &["shape_i", "stop_distances_i", "trip_dates_i"];
pub const DIRECTION_FIELDS: &[&str] = &["trips"];
pub const TRIPS_FIELDS: &[&str] = &[
    "first_start_time",
    "start_times",
    "stop_times_indexes",
    "trip_group_indexes",
];

/// Name to position of every array layout in the document.
pub fn field_index_map() -> Value {
    let layouts = [
        ("root", ROOT_FIELDS),
        ("route", ROUTE_FIELDS),
        ("trip_dates", TRIP_DATES_FIELDS),
        ("trip_group", TRIP_GROUP_FIELDS),
        ("direction", DIRECTION_FIELDS),
        ("trips", TRIPS_FIELDS),
    ];
    let mut map = Map::new();
    for (name, fields) in layouts {
        let positions: Map<String, Value> = fields
            .iter()
            .enumerate()
            .map(|(i, field)| (field.to_string(), json!(i)))
            .collect();
        map.insert(name.to_string(), Value::Object(positions));
    }
    Value::Object(map)
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OutputStats {
    pub routes: usize,
    pub trips: usize,
    pub shapes: usize,
    pub trip_groups: usize,
    pub stop_times: usize,
    pub dates: usize,
}

/// Trips of a route in output order plus the trip-dates entries they use.
struct RoutePlan<'a> {
    route: &'a Route,
    directions: Vec<Vec<&'a Trip>>,
    trip_dates: DedupCache<DateRule>,
    trip_dates_by_service: HashMap<ServiceIndex, usize>,
}

/// Lays out the schedule as the positional-array document. Every trip must have a resolved shape.
pub fn assemble(
    schedule: &Schedule,
    gtfs_epoch: i64,
    json_epoch: i64,
    diagnostics: &mut Diagnostics,
) -> Result<(Value, OutputStats)> {
    let plans: Vec<RoutePlan> = schedule
        .routes
        .values()
        .map(|route| plan_route(route, &schedule.services, diagnostics))
        .collect();

    let mut counter = DateCounter::new();
    for plan in &plans {
        for rule in plan.trip_dates.values() {
            counter.add_rule(rule);
        }
    }
    let dictionary = counter.into_dictionary();

    let style = indicatif::ProgressStyle::with_template(
        "[{elapsed_precise}] {bar:40.cyan/blue} {human_pos:>7}/{human_len:7} {msg}",
    )?;
    let mut stats = OutputStats {
        routes: plans.len(),
        dates: dictionary.len(),
        ..Default::default()
    };
    let mut routes = Vec::with_capacity(plans.len());
    for plan in plans
        .iter()
        .progress_with_style(style)
        .with_message("Assemble routes.")
        .with_finish(indicatif::ProgressFinish::AndLeave)
    {
        routes.push(render_route(plan, &dictionary, &mut stats)?);
    }
    log::info!("output stats: {:?}", stats);

    let document = json!([
        field_index_map(),
        gtfs_epoch,
        json_epoch,
        schedule.modes,
        dictionary.dates(),
        routes,
    ]);
    Ok((document, stats))
}

fn plan_route<'a>(
    route: &'a Route,
    services: &[Service],
    diagnostics: &mut Diagnostics,
) -> RoutePlan<'a> {
    let directions = split_directions(route, diagnostics);
    let mut trip_dates = DedupCache::new();
    let mut trip_dates_by_service = HashMap::new();
    for trip in directions.iter().flatten() {
        trip_dates_by_service
            .entry(trip.service)
            .or_insert_with(|| trip_dates.index_of(DateRule::of(&services[trip.service.0])));
    }
    RoutePlan {
        route,
        directions,
        trip_dates,
        trip_dates_by_service,
    }
}

/// One bucket if no trip has a direction, otherwise one per direction. Each bucket is sorted by
/// start time, then trip id.
fn split_directions<'a>(route: &'a Route, diagnostics: &mut Diagnostics) -> Vec<Vec<&'a Trip>> {
    let count = if route.has_directions() { 2 } else { 1 };
    let mut directions: Vec<Vec<&Trip>> = vec![vec![]; count];
    for trip in route.trips.values() {
        let index = match trip.direction {
            Some(direction) => direction.index(),
            None => {
                if count > 1 {
                    diagnostics.warn(
                        Entity::Trip(trip.id),
                        format!("no direction_id in route {}, using 0", route.id),
                    );
                }
                0
            }
        };
        directions[index].push(trip);
    }
    for trips in &mut directions {
        trips.sort_by_key(|trip| (trip.times.start_time, trip.id));
    }
    directions
}

fn render_route(
    plan: &RoutePlan,
    dictionary: &DateDictionary,
    stats: &mut OutputStats,
) -> Result<Value> {
    let route = plan.route;
    let is_departure_times = route.has_departure_times();
    let mut stop_distances: DedupCache<Vec<u32>> = DedupCache::new();
    let mut stop_times: DedupCache<String> = DedupCache::new();
    let mut trip_groups: DedupCache<[usize; 3]> = DedupCache::new();

    let mut directions = vec![];
    for trips in &plan.directions {
        if trips.is_empty() {
            directions.push(json!([]));
            continue;
        }
        let mut start_times = vec![0];
        let mut stop_times_indexes = vec![];
        let mut trip_group_indexes = vec![];
        for trip in trips {
            let resolved = trip
                .resolved_shape
                .as_ref()
                .ok_or_else(|| anyhow!("trip {} has no resolved shape", trip.id))?;
            let trip_dates_i = *plan
                .trip_dates_by_service
                .get(&trip.service)
                .ok_or_else(|| anyhow!("trip {} has no trip dates", trip.id))?;
            let stop_distances_i = stop_distances.index_of(resolved.stop_distances.clone());
            let group = [resolved.shape_index, stop_distances_i, trip_dates_i];
            trip_group_indexes.push(trip_groups.index_of(group) as i64);

            let times: Vec<i64> = if is_departure_times {
                trip.times.offsets.iter().map(|&t| i64::from(t)).collect()
            } else {
                trip.times.arrivals().map(i64::from).collect()
            };
            stop_times_indexes.push(stop_times.index_of(codec::encode_sorted(&times)?) as i64);
            start_times.push(i64::from(trip.times.start_time));
        }
        stats.trips += trips.len();

        // The leading zero only anchors the deltas; the first real start time is stored as is.
        let start_time_deltas = codec::delta_encode(&start_times)?;
        directions.push(json!([[
            start_times[1],
            codec::pack(&start_time_deltas[1..])?,
            codec::pack(&stop_times_indexes)?,
            codec::pack(&trip_group_indexes)?,
        ]]));
    }

    let stop_distances = stop_distances
        .values()
        .iter()
        .map(|distances| {
            let distances: Vec<i64> = distances.iter().map(|&d| i64::from(d)).collect();
            codec::encode_sorted(&distances)
        })
        .collect::<Result<Vec<String>>>()?;
    let trip_dates = plan
        .trip_dates
        .values()
        .iter()
        .map(|rule| render_trip_dates(rule, dictionary))
        .collect::<Result<Vec<Value>>>()?;

    stats.shapes += route.shapes.len();
    stats.trip_groups += trip_groups.len();
    stats.stop_times += stop_times.len();

    Ok(json!([
        route.id.as_str(),
        route.short_name,
        route.long_name,
        route.mode,
        route.shapes.values(),
        stop_distances,
        trip_dates,
        trip_groups.values(),
        stop_times.values(),
        u8::from(is_departure_times),
        directions,
    ]))
}

fn render_trip_dates(rule: &DateRule, dictionary: &DateDictionary) -> Result<Value> {
    let index = |date: &Option<String>| -> Result<Option<usize>> {
        date.as_deref().map(|date| dictionary.index_of(date)).transpose()
    };
    let indexes = |dates: &[String]| -> Result<Vec<usize>> {
        dates.iter().map(|date| dictionary.index_of(date)).collect()
    };
    let weekdays = match &rule.weekdays {
        Some(Weekdays::Single(day)) => json!(day),
        Some(Weekdays::Mask(mask)) => json!(mask),
        None => Value::Null,
    };
    Ok(json!([
        index(&rule.start_date)?,
        index(&rule.end_date)?,
        weekdays,
        indexes(&rule.added_dates)?,
        indexes(&rule.removed_dates)?,
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn trip(id: &str, direction: Option<Direction>, start_time: u32, offsets: Vec<u32>) -> Trip {
        Trip {
            id: TripId::new(id),
            service: ServiceIndex(0),
            direction,
            shape_id: Some(ShapeId::new("sh")),
            stops: BTreeMap::new(),
            times: TripTimes {
                start_time,
                has_departure_times: offsets.chunks(2).any(|pair| pair[0] != pair[1]),
                offsets,
            },
            resolved_shape: Some(ResolvedShape {
                shape_index: 0,
                stop_distances: vec![0, 3],
            }),
        }
    }

    fn schedule(trips: Vec<Trip>) -> Schedule {
        let mut service = Service::new(ServiceId::new("s"));
        service.start_date = Some("20240101".to_string());
        service.end_date = Some("20240131".to_string());
        service.weekdays = Some(Weekdays::Mask("1111100".to_string()));
        service.removed_dates = vec!["20240105".to_string()];
        let mut shapes = DedupCache::new();
        shapes.insert("_p~iF~ps|U".to_string());
        let route = Route {
            id: RouteId::new("r"),
            short_name: "1".to_string(),
            long_name: "One".to_string(),
            mode: 1,
            trips: trips.into_iter().map(|trip| (trip.id, trip)).collect(),
            shapes,
        };
        Schedule {
            routes: BTreeMap::from([(route.id, route)]),
            services: vec![service],
            modes: vec!["airplane".to_string(), "bus".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_field_index_map() {
        let map = field_index_map();
        assert_eq!(map["root"]["routes"], 5);
        assert_eq!(map["route"]["directions"], 10);
        assert_eq!(map["trips"]["trip_group_indexes"], 3);
        assert_eq!(map["trip_group"]["trip_dates_i"], 2);
    }

    #[test]
    fn test_route_without_directions() {
        let schedule = schedule(vec![
            trip("b", None, 600, vec![0, 0, 5, 5]),
            trip("a", None, 480, vec![0, 0, 5, 5]),
            trip("c", None, 480, vec![0, 0, 7, 7]),
        ]);
        let mut diagnostics = Diagnostics::new();
        let (document, stats) = assemble(&schedule, 1, 2, &mut diagnostics).unwrap();
        assert_eq!(document[1], 1);
        assert_eq!(document[3], json!(["airplane", "bus"]));
        assert_eq!(document[4], json!(["20240101", "20240105", "20240131"]));

        let route = &document[5][0];
        assert_eq!(route[0], "r");
        assert_eq!(route[3], 1);
        assert_eq!(route[5], json!([codec::pack(&[3]).unwrap()]));
        assert_eq!(route[6], json!([[0, 2, "1111100", [], [1]]]));
        assert_eq!(route[7], json!([[0, 0, 0]]));
        assert_eq!(route[9], 0);

        // Trips a, c, b: start times 480, 480, 600.
        let directions = route[10].as_array().unwrap();
        assert_eq!(directions.len(), 1);
        let trips = &directions[0][0];
        assert_eq!(trips[0], 480);
        assert_eq!(codec::unpack(trips[1].as_str().unwrap()).unwrap(), vec![0, 120]);
        assert_eq!(codec::unpack(trips[2].as_str().unwrap()).unwrap(), vec![0, 1, 0]);
        assert_eq!(codec::unpack(trips[3].as_str().unwrap()).unwrap(), vec![0, 0, 0]);
        assert_eq!(stats.trips, 3);
        assert_eq!(stats.stop_times, 2);
    }

    #[test]
    fn test_directions_and_departure_times() {
        let schedule = schedule(vec![
            trip("in", Some(Direction::Inbound), 500, vec![0, 0, 5, 6]),
            trip("none", None, 490, vec![0, 0, 5, 5]),
        ]);
        let mut diagnostics = Diagnostics::new();
        let (document, _) = assemble(&schedule, 1, 2, &mut diagnostics).unwrap();
        let route = &document[5][0];
        assert_eq!(route[9], 1);
        let stop_times: Vec<Vec<i64>> = route[8]
            .as_array()
            .unwrap()
            .iter()
            .map(|text| codec::decode_sorted(text.as_str().unwrap()).unwrap())
            .collect();
        assert_eq!(stop_times, vec![vec![0, 0, 5, 5], vec![0, 0, 5, 6]]);

        let directions = route[10].as_array().unwrap();
        assert_eq!(directions.len(), 2);
        assert_eq!(directions[0][0][0], 490);
        assert_eq!(directions[1][0][0], 500);
        assert_eq!(diagnostics.count(log::Level::Warn), 1);
    }

    #[test]
    fn test_empty_direction_placeholder() {
        let schedule = schedule(vec![trip("in", Some(Direction::Inbound), 500, vec![0, 0, 5, 5])]);
        let mut diagnostics = Diagnostics::new();
        let (document, _) = assemble(&schedule, 1, 2, &mut diagnostics).unwrap();
        let directions = &document[5][0][10];
        assert_eq!(directions[0], json!([]));
        assert_eq!(directions[1][0][1], "");
    }
}
