use std::collections::{BTreeMap, HashMap, HashSet};

use geo_types::coord;

use crate::config::{CompactConfig, RouteTypeVocabulary};
use crate::dedup::DedupCache;
use crate::diagnostics::{Diagnostics, Entity};
use crate::feed::{ExceptionType, FeedTables, RouteRecord};
use crate::model::*;
use crate::shape;
use crate::stop_times;

/// Cross-references the parsed tables into a schedule graph. Every trip that ends up in a route
/// has dates and valid stop times; everything else is dropped and reported.
pub fn link_schedule(
    tables: &FeedTables,
    config: &CompactConfig,
    diagnostics: &mut Diagnostics,
) -> Schedule {
    let mut schedule = Schedule::default();

    let service_indexes = link_services(tables, &mut schedule.services, diagnostics);
    log::debug!("linked {} services", schedule.services.len());

    for stop in &tables.stops {
        match (stop.latitude, stop.longitude) {
            (Some(latitude), Some(longitude)) => {
                schedule.stops.insert(
                    StopId::new(&stop.id),
                    coord! { x: longitude, y: latitude },
                );
            }
            _ => diagnostics.warn(Entity::Stop(StopId::new(&stop.id)), "no coordinates"),
        }
    }

    for record in &tables.shapes {
        let shape = shape::build_shape(record, config);
        if shape.is_invalid {
            diagnostics.error(Entity::Shape(shape.id), "invalid point in shape");
        }
        schedule.shapes.insert(shape.id, shape);
    }
    log::debug!(
        "parsed {} stops and {} shapes",
        schedule.stops.len(),
        schedule.shapes.len()
    );

    let mut modes = ModeTable::new(&config.route_types);
    for record in &tables.routes {
        let route_id = RouteId::new(&record.id);
        if schedule.routes.contains_key(&route_id) {
            diagnostics.error(Entity::Route(route_id), "duplicate route_id in routes");
            continue;
        }
        let route = new_route(record, &mut modes, diagnostics);
        schedule.routes.insert(route_id, route);
    }
    schedule.modes = modes.names;

    let mut stop_time_rows = stop_times::group_by_trip(&tables.stop_times);
    let mut seen_trip_ids = HashSet::new();
    let mut listed_trip_ids = HashSet::new();
    for record in &tables.trips {
        let trip_id = TripId::new(&record.id);
        let entity = Entity::Trip(trip_id);
        listed_trip_ids.insert(trip_id);
        let direction = match record.direction_id.as_deref() {
            None => None,
            Some(code) => match code.trim().parse::<u8>().ok().and_then(Direction::from_code) {
                Some(direction) => Some(direction),
                None => {
                    diagnostics.error(entity, format!("invalid direction_id: {}", code));
                    continue;
                }
            },
        };
        if !seen_trip_ids.insert(trip_id) {
            diagnostics.error(entity, "duplicate trip_id in trips");
            continue;
        }
        let route_id = RouteId::new(&record.route_id);
        let Some(route) = schedule.routes.get_mut(&route_id) else {
            diagnostics.error(entity, format!("no route with route_id={}", route_id));
            continue;
        };
        let service_id = ServiceId::new(&record.service_id);
        let Some(&service) = service_indexes
            .get(&service_id)
            .filter(|index| schedule.services[index.0].has_dates())
        else {
            diagnostics.error(entity, format!("no dates for service_id={}", service_id));
            continue;
        };
        let Some(rows) = stop_time_rows.remove(&trip_id) else {
            diagnostics.error(entity, "no stop times");
            continue;
        };
        let Some(ingested) = stop_times::ingest_trip(
            trip_id,
            &rows,
            config.max_stop_time_gap_minutes,
            diagnostics,
        ) else {
            continue;
        };

        route.trips.insert(
            trip_id,
            Trip {
                id: trip_id,
                service,
                direction,
                shape_id: record.shape_id.as_deref().map(ShapeId::new),
                stops: ingested.stops,
                times: ingested.times,
                resolved_shape: None,
            },
        );
    }

    let mut orphans: Vec<TripId> = stop_time_rows
        .into_keys()
        .filter(|trip_id| !listed_trip_ids.contains(trip_id))
        .collect();
    orphans.sort();
    for trip_id in orphans {
        diagnostics.error(Entity::Trip(trip_id), "stop times for unknown trip");
    }

    drop_empty_routes(&mut schedule, diagnostics);
    schedule
}

fn link_services(
    tables: &FeedTables,
    services: &mut Vec<Service>,
    diagnostics: &mut Diagnostics,
) -> HashMap<ServiceId, ServiceIndex> {
    let mut indexes: HashMap<ServiceId, ServiceIndex> = HashMap::new();

    let mut with_calendar = HashSet::new();
    for record in &tables.calendars {
        let service_id = ServiceId::new(&record.service_id);
        if !with_calendar.insert(service_id) {
            diagnostics.error(Entity::Service(service_id), "duplicate service_id in calendar");
            continue;
        }
        let index = service_index(&mut indexes, services, service_id);
        let weekdays = Weekdays::from_flags(&record.weekdays);
        if let Weekdays::Mask(mask) = &weekdays {
            diagnostics.info(
                Entity::Service(service_id),
                format!("week days are not a single day: {}", mask),
            );
        }
        let service = &mut services[index.0];
        service.start_date = Some(record.start_date.clone());
        service.end_date = Some(record.end_date.clone());
        service.weekdays = Some(weekdays);
    }

    for record in &tables.calendar_dates {
        let service_id = ServiceId::new(&record.service_id);
        let index = service_index(&mut indexes, services, service_id);
        let service = &mut services[index.0];
        match record.exception_type {
            ExceptionType::Added => service.added_dates.push(record.date.clone()),
            ExceptionType::Removed => service.removed_dates.push(record.date.clone()),
        }
    }

    for service in services.iter() {
        let (Some(start), Some(end)) = (&service.start_date, &service.end_date) else {
            continue;
        };
        for date in service.added_dates.iter().chain(&service.removed_dates) {
            if date < start || date > end {
                diagnostics.warn(
                    Entity::Service(service.id),
                    format!("exception date {} outside {}-{}", date, start, end),
                );
            }
        }
    }

    indexes
}

fn service_index(
    indexes: &mut HashMap<ServiceId, ServiceIndex>,
    services: &mut Vec<Service>,
    id: ServiceId,
) -> ServiceIndex {
    *indexes.entry(id).or_insert_with(|| {
        services.push(Service::new(id));
        ServiceIndex(services.len() - 1)
    })
}

fn new_route(
    record: &RouteRecord,
    modes: &mut ModeTable,
    diagnostics: &mut Diagnostics,
) -> Route {
    let id = RouteId::new(&record.id);
    let mode = match modes.index_of(record.route_type) {
        Some(mode) => mode,
        None => {
            diagnostics.error(
                Entity::Route(id),
                format!("route_type {} not in route type vocabulary", record.route_type),
            );
            modes.add_unknown(record.route_type)
        }
    };
    let short_name = record.short_name.clone().unwrap_or_default();
    Route {
        id,
        // Some feeds (HSL metro) have no short names.
        short_name: if short_name.is_empty() {
            record.id.clone()
        } else {
            short_name
        },
        long_name: record.long_name.clone().unwrap_or_default(),
        mode,
        trips: BTreeMap::new(),
        shapes: DedupCache::new(),
    }
}

/// Removes routes without trips. Used after linking and again after shape resolution.
pub fn drop_empty_routes(schedule: &mut Schedule, diagnostics: &mut Diagnostics) {
    let empty: Vec<RouteId> = schedule
        .routes
        .values()
        .filter(|route| route.trips.is_empty())
        .map(|route| route.id)
        .collect();
    for route_id in empty {
        if let Some(route) = schedule.routes.remove(&route_id) {
            diagnostics.info(
                Entity::Route(route_id),
                format!("deleted route ({}) with no trips", route.long_name),
            );
        }
    }
}

/// Output mode vocabulary: configured names first, then unknown route types as text.
struct ModeTable<'a> {
    vocabulary: &'a RouteTypeVocabulary,
    names: Vec<String>,
    unknown: HashMap<i32, usize>,
}

impl<'a> ModeTable<'a> {
    fn new(vocabulary: &'a RouteTypeVocabulary) -> Self {
        ModeTable {
            vocabulary,
            names: vocabulary.mode_names(),
            unknown: HashMap::new(),
        }
    }

    fn index_of(&self, route_type: i32) -> Option<usize> {
        if let Some(&index) = self.unknown.get(&route_type) {
            return Some(index);
        }
        let name = self.vocabulary.mode_of(route_type)?;
        self.names.iter().position(|n| n == name)
    }

    fn add_unknown(&mut self, route_type: i32) -> usize {
        self.names.push(route_type.to_string());
        let index = self.names.len() - 1;
        self.unknown.insert(route_type, index);
        index
    }
}
