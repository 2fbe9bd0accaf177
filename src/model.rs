use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use geo_types::Coord;
use ustr::{ustr, Ustr};

use crate::dedup::DedupCache;

macro_rules! entity_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(Ustr);

        impl $name {
            pub fn new(id: &str) -> Self {
                $name(ustr(id))
            }

            pub fn as_str(&self) -> &str {
                self.0.as_str()
            }
        }

        // Ordered by the id text so every sorted output is reproducible.
        impl Ord for $name {
            fn cmp(&self, other: &Self) -> Ordering {
                self.as_str().cmp(other.as_str())
            }
        }

        impl PartialOrd for $name {
            fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
                Some(self.cmp(other))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

entity_id!(RouteId);
entity_id!(TripId);
entity_id!(ServiceId);
entity_id!(ShapeId);
entity_id!(StopId);

/// Linked schedule graph. Routes own their trips; trips refer to services by index.
#[derive(Debug, Default)]
pub struct Schedule {
    pub routes: BTreeMap<RouteId, Route>,
    pub services: Vec<Service>,
    pub shapes: HashMap<ShapeId, Shape>,
    /// x is the longitude, y the latitude.
    pub stops: HashMap<StopId, Coord<f64>>,
    /// Mode names referenced by `Route::mode`.
    pub modes: Vec<String>,
}

#[derive(Debug)]
pub struct Route {
    pub id: RouteId,
    pub short_name: String,
    pub long_name: String,
    pub mode: usize,
    pub trips: BTreeMap<TripId, Trip>,
    /// Encoded polylines of the simplified shapes used by the trips.
    pub shapes: DedupCache<String>,
}

impl Route {
    /// Whether the stop times of this route need separate departure times.
    pub fn has_departure_times(&self) -> bool {
        self.trips.values().any(|trip| trip.times.has_departure_times)
    }

    pub fn has_directions(&self) -> bool {
        self.trips.values().any(|trip| trip.direction.is_some())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Direction {
    Outbound,
    Inbound,
}

impl Direction {
    pub fn from_code(code: u8) -> Option<Direction> {
        match code {
            0 => Some(Direction::Outbound),
            1 => Some(Direction::Inbound),
            _ => None,
        }
    }

    pub fn index(self) -> usize {
        match self {
            Direction::Outbound => 0,
            Direction::Inbound => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceIndex(pub usize);

#[derive(Debug, Clone)]
pub struct Trip {
    pub id: TripId,
    pub service: ServiceIndex,
    pub direction: Option<Direction>,
    pub shape_id: Option<ShapeId>,
    /// Stop sequence number to stop.
    pub stops: BTreeMap<u32, StopId>,
    pub times: TripTimes,
    /// Filled in once the shape has been resolved.
    pub resolved_shape: Option<ResolvedShape>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TripTimes {
    /// Minutes after midnight of the service day.
    pub start_time: u32,
    /// Arrival and departure for every stop, in minutes after `start_time`.
    pub offsets: Vec<u32>,
    pub has_departure_times: bool,
}

impl TripTimes {
    pub fn arrivals(&self) -> impl Iterator<Item = u32> + '_ {
        self.offsets.iter().step_by(2).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedShape {
    /// Index into `Route::shapes`.
    pub shape_index: usize,
    /// For every stop, the index of its point in the simplified shape.
    pub stop_distances: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Weekdays {
    /// Monday is 0.
    Single(u8),
    /// Seven characters, Monday first, `1` for days with service.
    Mask(String),
}

impl Weekdays {
    pub fn from_flags(flags: &[bool; 7]) -> Weekdays {
        let active: Vec<usize> = (0..7).filter(|&i| flags[i]).collect();
        if active.len() == 1 {
            Weekdays::Single(active[0] as u8)
        } else {
            Weekdays::Mask(flags.iter().map(|&f| if f { '1' } else { '0' }).collect())
        }
    }
}

/// Date rule shared by all trips with the same service id. Dates are `YYYYMMDD`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub id: ServiceId,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub weekdays: Option<Weekdays>,
    pub added_dates: Vec<String>,
    pub removed_dates: Vec<String>,
}

impl Service {
    pub fn new(id: ServiceId) -> Self {
        Service {
            id,
            start_date: None,
            end_date: None,
            weekdays: None,
            added_dates: vec![],
            removed_dates: vec![],
        }
    }

    pub fn has_dates(&self) -> bool {
        self.start_date.is_some() || !self.added_dates.is_empty() || !self.removed_dates.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Shape {
    pub id: ShapeId,
    /// x is the longitude, y the latitude.
    pub points: Vec<Coord<f64>>,
    pub is_invalid: bool,
}
