//! Parsed GTFS tables as handed from the loader to the linker.

#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Debug, Clone, Default)]
#[rkyv(derive(Debug))]
pub struct FeedTables {
    /// Seconds since the epoch of the most recent table modification.
    pub modification_time: i64,
    pub routes: Vec<RouteRecord>,
    pub trips: Vec<TripRecord>,
    pub calendars: Vec<CalendarRecord>,
    pub calendar_dates: Vec<CalendarDateRecord>,
    pub stop_times: Vec<StopTimeRecord>,
    pub shapes: Vec<ShapeRecord>,
    pub stops: Vec<StopRecord>,
}

#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Debug, Clone)]
#[rkyv(derive(Debug))]
pub struct RouteRecord {
    pub id: String,
    pub short_name: Option<String>,
    pub long_name: Option<String>,
    pub route_type: i32,
}

#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Debug, Clone)]
#[rkyv(derive(Debug))]
pub struct TripRecord {
    pub id: String,
    pub route_id: String,
    pub service_id: String,
    pub direction_id: Option<String>,
    pub shape_id: Option<String>,
}

#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Debug, Clone)]
#[rkyv(derive(Debug))]
pub struct CalendarRecord {
    pub service_id: String,
    /// Monday first.
    pub weekdays: [bool; 7],
    pub start_date: String,
    pub end_date: String,
}

#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Debug, Clone)]
#[rkyv(derive(Debug))]
pub struct CalendarDateRecord {
    pub service_id: String,
    pub date: String,
    pub exception_type: ExceptionType,
}

#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[rkyv(derive(Debug))]
pub enum ExceptionType {
    Added,
    Removed,
}

#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Debug, Clone)]
#[rkyv(derive(Debug))]
pub struct StopTimeRecord {
    pub trip_id: String,
    pub stop_id: String,
    pub stop_sequence: u32,
    /// `H:MM:SS`, hours may exceed 23.
    pub arrival_time: String,
    pub departure_time: String,
}

#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Debug, Clone)]
#[rkyv(derive(Debug))]
pub struct ShapeRecord {
    pub id: String,
    /// Ordered by the point sequence.
    pub points: Vec<ShapePoint>,
}

#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Debug, Clone, Copy, PartialEq)]
#[rkyv(derive(Debug))]
pub struct ShapePoint {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Debug, Clone)]
#[rkyv(derive(Debug))]
pub struct StopRecord {
    pub id: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}
