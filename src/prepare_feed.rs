use std::{
    collections::{BTreeMap, BTreeSet},
    fs::File,
    io::{Read, Write},
    path::{Path, PathBuf},
    time::SystemTime,
};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;

use crate::diagnostics::{Diagnostics, Entity};
use crate::feed::*;
use crate::memory_mapped_rkyv::MemoryMappedRkyv;

const RKYV_FILE_NAME: &str = "feed_rkyv.bin";

/// Loads the feed tables of a GTFS directory or zip, going through the binary cache unless
/// `use_cache` is false.
pub fn load_feed(
    feed_path: &Path,
    use_cache: bool,
    diagnostics: &mut Diagnostics,
) -> Result<FeedTables> {
    let modification_time = source_modification_time(feed_path, diagnostics)?;
    if !use_cache {
        return read_feed_tables(feed_path, modification_time);
    }

    let rkyv_path = cache_path(feed_path);
    match read_cached(&rkyv_path, modification_time) {
        Ok(Some(tables)) => {
            log::info!("Using cached feed data from {:?}", rkyv_path);
            return Ok(tables);
        }
        Ok(None) => {}
        Err(err) => log::warn!("Ignoring unreadable feed cache {:?}: {:#}", rkyv_path, err),
    }
    let tables = read_feed_tables(feed_path, modification_time)?;
    write_cache(&rkyv_path, &tables)?;
    Ok(tables)
}

/// `feed_rkyv.bin` inside a feed directory, `<name>.rkyv.bin` next to a zip.
pub fn cache_path(feed_path: &Path) -> PathBuf {
    if feed_path.is_dir() {
        feed_path.join(RKYV_FILE_NAME)
    } else {
        feed_path.with_extension("rkyv.bin")
    }
}

/// Returns the cached tables if the cache exists and was built from the same source version.
fn read_cached(rkyv_path: &Path, modification_time: i64) -> Result<Option<FeedTables>> {
    if !rkyv_path.exists() {
        return Ok(None);
    }
    // Safety: The cache is only written by this process before it is mapped.
    let mapped = unsafe { MemoryMappedRkyv::open(rkyv_path)? };
    let archived = mapped.access::<ArchivedFeedTables>()?;
    if archived.modification_time.to_native() != modification_time {
        log::info!("Feed cache {:?} is outdated", rkyv_path);
        return Ok(None);
    }
    let tables = rkyv::deserialize::<FeedTables, rkyv::rancor::Error>(archived)?;
    Ok(Some(tables))
}

fn write_cache(rkyv_path: &Path, tables: &FeedTables) -> Result<()> {
    log::info!("Serializing data.");
    let buffer = rkyv::to_bytes::<rkyv::rancor::Error>(tables)?;
    log::info!("Writing data to {:?}", rkyv_path);
    let mut file = std::fs::File::create(rkyv_path)
        .with_context(|| format!("creating feed cache {:?}", rkyv_path))?;
    file.write_all(&buffer)?;
    Ok(())
}

/// Latest modification time of the feed tables in seconds since the epoch. Tables changed on
/// different days are reported.
pub fn source_modification_time(feed_path: &Path, diagnostics: &mut Diagnostics) -> Result<i64> {
    let mut times: Vec<DateTime<Utc>> = vec![];
    if feed_path.is_dir() {
        for entry in std::fs::read_dir(feed_path)
            .with_context(|| format!("reading feed directory {:?}", feed_path))?
        {
            let path = entry?.path();
            if path.extension().is_some_and(|extension| extension == "txt") {
                times.push(modified(&path)?);
            }
        }
    } else {
        times = zip_entry_times(feed_path)?;
        if times.is_empty() {
            times.push(modified(feed_path)?);
        }
    }

    let days: BTreeSet<NaiveDate> = times.iter().map(|time| time.date_naive()).collect();
    if days.len() > 1 {
        diagnostics.warn(
            Entity::Feed,
            format!("tables modified on several days: {:?}", days),
        );
    }
    times
        .iter()
        .max()
        .map(|time| time.timestamp())
        .with_context(|| format!("no GTFS tables in {:?}", feed_path))
}

fn modified(path: &Path) -> Result<DateTime<Utc>> {
    let time: SystemTime = std::fs::metadata(path)?.modified()?;
    Ok(DateTime::<Utc>::from(time))
}

/// Stored modification times of the `*.txt` entries of a zip feed.
fn zip_entry_times(feed_path: &Path) -> Result<Vec<DateTime<Utc>>> {
    let file = File::open(feed_path).with_context(|| format!("opening {:?}", feed_path))?;
    let mut archive =
        zip::ZipArchive::new(file).with_context(|| format!("reading zip {:?}", feed_path))?;
    let mut times = vec![];
    for index in 0..archive.len() {
        let entry = archive.by_index(index)?;
        if entry.is_dir() || !entry.name().ends_with(".txt") {
            continue;
        }
        if let Some(time) = entry.last_modified().and_then(zip_time) {
            times.push(time);
        }
    }
    Ok(times)
}

/// Zip entries carry a local time without zone, it is read as UTC.
fn zip_time(time: zip::DateTime) -> Option<DateTime<Utc>> {
    NaiveDate::from_ymd_opt(time.year().into(), time.month().into(), time.day().into())?
        .and_hms_opt(time.hour().into(), time.minute().into(), time.second().into())
        .map(|time| time.and_utc())
}

#[derive(Debug, Deserialize)]
struct TripRow {
    trip_id: String,
    route_id: String,
    service_id: String,
    #[serde(default)]
    direction_id: Option<String>,
    #[serde(default)]
    shape_id: Option<String>,
}

/// Reads `trips.txt` of a directory or zip feed. `direction_id` stays text so that a bad code
/// drops only its trip when linking.
fn read_trips(feed_path: &Path) -> Result<Vec<TripRecord>> {
    if feed_path.is_dir() {
        let path = feed_path.join("trips.txt");
        let file = File::open(&path).with_context(|| format!("opening {:?}", path))?;
        return parse_trips(file);
    }
    let file = File::open(feed_path).with_context(|| format!("opening {:?}", feed_path))?;
    let mut archive =
        zip::ZipArchive::new(file).with_context(|| format!("reading zip {:?}", feed_path))?;
    let name = archive
        .file_names()
        .find(|name| Path::new(name).file_name() == Some(std::ffi::OsStr::new("trips.txt")))
        .map(str::to_owned)
        .with_context(|| format!("no trips.txt in {:?}", feed_path))?;
    let entry = archive.by_name(&name)?;
    parse_trips(entry)
}

fn parse_trips<R: Read>(reader: R) -> Result<Vec<TripRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let mut trips = vec![];
    for row in reader.deserialize() {
        let row: TripRow = row.context("reading trips")?;
        trips.push(TripRecord {
            id: row.trip_id,
            route_id: row.route_id,
            service_id: row.service_id,
            direction_id: row.direction_id.filter(|code| !code.is_empty()),
            shape_id: row.shape_id.filter(|id| !id.is_empty()),
        });
    }
    Ok(trips)
}

pub fn read_feed_tables(feed_path: &Path, modification_time: i64) -> Result<FeedTables> {
    log::info!("Loading original GTFS data from {:?}", feed_path);
    let gtfs = gtfs_structures::RawGtfs::from_path(feed_path)?;

    log::info!("Preparing stops.");
    let mut stops = vec![];
    for stop in gtfs.stops.context("reading stops")? {
        stops.push(StopRecord {
            id: stop.id.clone(),
            latitude: stop.latitude,
            longitude: stop.longitude,
        });
    }

    log::info!("Preparing stop times.");
    let mut stop_times = vec![];
    for stop_time in gtfs.stop_times.context("reading stop times")? {
        stop_times.push(StopTimeRecord {
            trip_id: stop_time.trip_id.clone(),
            stop_id: stop_time.stop_id.clone(),
            stop_sequence: u32::from(stop_time.stop_sequence),
            arrival_time: format_time(stop_time.arrival_time),
            departure_time: format_time(stop_time.departure_time),
        });
    }

    log::info!("Preparing trips.");
    let trips = read_trips(feed_path)?;

    log::info!("Preparing routes.");
    let mut routes = vec![];
    for route in gtfs.routes.context("reading routes")? {
        routes.push(RouteRecord {
            id: route.id.clone(),
            short_name: route.short_name.clone(),
            long_name: route.long_name.clone(),
            route_type: route_type_code(route.route_type),
        });
    }

    log::info!("Preparing calendars.");
    let mut calendars = vec![];
    if let Some(gtfs_calendars) = gtfs.calendar {
        for calendar in gtfs_calendars? {
            calendars.push(CalendarRecord {
                service_id: calendar.id.clone(),
                weekdays: [
                    calendar.monday,
                    calendar.tuesday,
                    calendar.wednesday,
                    calendar.thursday,
                    calendar.friday,
                    calendar.saturday,
                    calendar.sunday,
                ],
                start_date: format_date(calendar.start_date),
                end_date: format_date(calendar.end_date),
            });
        }
    }

    let mut calendar_dates = vec![];
    if let Some(gtfs_calendar_dates) = gtfs.calendar_dates {
        for calendar_date in gtfs_calendar_dates? {
            calendar_dates.push(CalendarDateRecord {
                service_id: calendar_date.service_id.clone(),
                date: format_date(calendar_date.date),
                exception_type: match calendar_date.exception_type {
                    gtfs_structures::Exception::Added => ExceptionType::Added,
                    gtfs_structures::Exception::Deleted => ExceptionType::Removed,
                },
            });
        }
    }

    log::info!("Preparing shapes.");
    let mut points_by_shape: BTreeMap<String, Vec<(usize, ShapePoint)>> = BTreeMap::new();
    if let Some(gtfs_shapes) = gtfs.shapes {
        for point in gtfs_shapes? {
            points_by_shape.entry(point.id.clone()).or_default().push((
                point.sequence as usize,
                ShapePoint {
                    latitude: point.latitude,
                    longitude: point.longitude,
                },
            ));
        }
    }
    let shapes = points_by_shape
        .into_iter()
        .map(|(id, mut points)| {
            points.sort_by_key(|(sequence, _)| *sequence);
            ShapeRecord {
                id,
                points: points.into_iter().map(|(_, point)| point).collect(),
            }
        })
        .collect();

    Ok(FeedTables {
        modification_time,
        routes,
        trips,
        calendars,
        calendar_dates,
        stop_times,
        shapes,
        stops,
    })
}

/// Base numeric code of a route type.
pub fn route_type_code(route_type: gtfs_structures::RouteType) -> i32 {
    match route_type {
        gtfs_structures::RouteType::Tramway => 0,
        gtfs_structures::RouteType::Subway => 1,
        gtfs_structures::RouteType::Rail => 2,
        gtfs_structures::RouteType::Bus => 3,
        gtfs_structures::RouteType::Ferry => 4,
        gtfs_structures::RouteType::CableCar => 5,
        gtfs_structures::RouteType::Gondola => 6,
        gtfs_structures::RouteType::Funicular => 7,
        gtfs_structures::RouteType::Coach => 200,
        gtfs_structures::RouteType::Air => 1100,
        gtfs_structures::RouteType::Taxi => 1500,
        gtfs_structures::RouteType::Other(other) => i32::from(other),
    }
}

/// Seconds after midnight as `H:MM:SS`, the empty string for a missing time.
pub fn format_time(seconds: Option<u32>) -> String {
    match seconds {
        Some(seconds) => format!(
            "{}:{:02}:{:02}",
            seconds / 3600,
            seconds / 60 % 60,
            seconds % 60
        ),
        None => String::new(),
    }
}

pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "gtfs-compactor-{}-{}",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&path);
        std::fs::create_dir_all(&path).unwrap();
        path
    }

    #[test]
    fn test_format_time_and_date() {
        assert_eq!(format_time(Some(8 * 3600 + 5 * 60 + 9)), "8:05:09");
        assert_eq!(format_time(Some(25 * 3600)), "25:00:00");
        assert_eq!(format_time(None), "");
        let date = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        assert_eq!(format_date(date), "20240307");
    }

    #[test]
    fn test_route_type_codes() {
        assert_eq!(route_type_code(gtfs_structures::RouteType::Tramway), 0);
        assert_eq!(route_type_code(gtfs_structures::RouteType::Coach), 200);
        assert_eq!(route_type_code(gtfs_structures::RouteType::Other(109)), 109);
    }

    #[test]
    fn test_cache_path() {
        assert_eq!(
            cache_path(Path::new("/data/hsl.zip")),
            PathBuf::from("/data/hsl.rkyv.bin")
        );
        let dir = temp_dir("cache-path");
        assert_eq!(cache_path(&dir), dir.join("feed_rkyv.bin"));
    }

    #[test]
    fn test_cache_round_trip_and_staleness() {
        let dir = temp_dir("cache");
        let path = dir.join(RKYV_FILE_NAME);
        let mut tables = FeedTables {
            modification_time: 1_700_000_000,
            ..Default::default()
        };
        tables.stops.push(StopRecord {
            id: "s1".to_string(),
            latitude: Some(60.17),
            longitude: None,
        });
        write_cache(&path, &tables).unwrap();

        let cached = read_cached(&path, 1_700_000_000).unwrap().unwrap();
        assert_eq!(cached.stops[0].id, "s1");
        assert_eq!(cached.stops[0].latitude, Some(60.17));
        assert!(read_cached(&path, 1_800_000_000).unwrap().is_none());
        assert!(read_cached(&dir.join("missing.bin"), 0).unwrap().is_none());

        std::fs::write(&path, b"not an archive").unwrap();
        assert!(read_cached(&path, 1_700_000_000).is_err());
    }

    fn feed_files(trips: &'static str) -> [(&'static str, &'static str); 6] {
        [
            (
                "routes.txt",
                "route_id,route_short_name,route_long_name,route_type\nr1,1,One,3\n",
            ),
            ("trips.txt", trips),
            (
                "calendar.txt",
                "service_id,monday,tuesday,wednesday,thursday,friday,saturday,sunday,start_date,end_date\n\
                 s1,1,1,1,1,1,0,0,20240101,20240131\n",
            ),
            (
                "stop_times.txt",
                "trip_id,arrival_time,departure_time,stop_id,stop_sequence\n\
                 t1,08:00:00,08:00:00,a,1\nt1,08:05:00,08:06:00,b,2\n\
                 t2,09:00:00,09:00:00,a,1\nt2,09:05:00,09:05:00,b,2\n",
            ),
            (
                "stops.txt",
                "stop_id,stop_name,stop_lat,stop_lon\na,A,60.1,24.9\nb,B,60.2,24.8\n",
            ),
            (
                "shapes.txt",
                "shape_id,shape_pt_lat,shape_pt_lon,shape_pt_sequence\n\
                 sh1,60.2,24.8,2\nsh1,60.1,24.9,1\n",
            ),
        ]
    }

    fn write_zip(path: &Path, entries: &[(&str, &str, zip::DateTime)]) {
        let mut writer = zip::ZipWriter::new(File::create(path).unwrap());
        for (name, content, time) in entries {
            let options = zip::write::SimpleFileOptions::default().last_modified_time(*time);
            writer.start_file(*name, options).unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn test_reads_feed_directory() {
        let dir = temp_dir("feed");
        let files = feed_files(
            "route_id,service_id,trip_id,direction_id,shape_id\nr1,s1,t1,1,sh1\nr1,s1,t2,,\n",
        );
        for (name, content) in files {
            std::fs::write(dir.join(name), content).unwrap();
        }

        let tables = read_feed_tables(&dir, 42).unwrap();
        assert_eq!(tables.modification_time, 42);
        assert_eq!(tables.routes[0].route_type, 3);
        assert_eq!(tables.trips[0].direction_id.as_deref(), Some("1"));
        assert_eq!(tables.trips[1].direction_id, None);
        assert_eq!(tables.trips[1].shape_id, None);
        assert_eq!(tables.calendars[0].weekdays[5], false);
        assert_eq!(tables.calendars[0].start_date, "20240101");
        assert_eq!(tables.stop_times[1].departure_time, "8:06:00");
        assert_eq!(tables.shapes[0].points[0].latitude, 60.1);
        assert!(tables.calendar_dates.is_empty());

        let mut diagnostics = Diagnostics::new();
        assert!(source_modification_time(&dir, &mut diagnostics).unwrap() > 0);
    }

    #[test]
    fn test_bad_direction_drops_only_its_trip() {
        use crate::config::CompactConfig;
        use crate::link::link_schedule;
        use crate::model::{RouteId, TripId};

        let trips = "route_id,service_id,trip_id,direction_id,shape_id\n\
                     r1,s1,t1,2,sh1\nr1,s1,t2,0,sh1\n";
        let files = feed_files(trips);
        let dir = temp_dir("bad-direction");
        for (name, content) in files {
            std::fs::write(dir.join(name), content).unwrap();
        }
        let zip_path = dir.join("feed.zip");
        let time = zip::DateTime::from_date_and_time(2024, 3, 1, 10, 0, 0).unwrap();
        let entries: Vec<(&str, &str, zip::DateTime)> = files
            .iter()
            .map(|(name, content)| (*name, *content, time))
            .collect();
        write_zip(&zip_path, &entries);

        for feed_path in [dir.clone(), zip_path] {
            let tables = read_feed_tables(&feed_path, 0).unwrap();
            assert_eq!(tables.trips.len(), 2);
            let mut diagnostics = Diagnostics::new();
            let schedule = link_schedule(&tables, &CompactConfig::default(), &mut diagnostics);
            let route = &schedule.routes[&RouteId::new("r1")];
            assert_eq!(route.trips.len(), 1);
            assert!(route.trips.contains_key(&TripId::new("t2")));
            assert!(diagnostics
                .about(&Entity::Trip(TripId::new("t1")))
                .any(|d| d.message == "invalid direction_id: 2"));
        }
    }

    #[test]
    fn test_modification_time_of_zip_entries() {
        let dir = temp_dir("zip-times");
        let path = dir.join("feed.zip");
        let march_1 = zip::DateTime::from_date_and_time(2024, 3, 1, 10, 0, 0).unwrap();
        let march_4 = zip::DateTime::from_date_and_time(2024, 3, 4, 8, 30, 0).unwrap();
        let may_1 = zip::DateTime::from_date_and_time(2024, 5, 1, 0, 0, 0).unwrap();
        write_zip(
            &path,
            &[
                ("gtfs/stops.txt", "stop_id\n", march_1),
                ("gtfs/trips.txt", "trip_id\n", march_4),
                ("gtfs/readme.html", "", may_1),
            ],
        );
        let mut diagnostics = Diagnostics::new();
        let expected = NaiveDate::from_ymd_opt(2024, 3, 4)
            .unwrap()
            .and_hms_opt(8, 30, 0)
            .unwrap()
            .and_utc()
            .timestamp();
        assert_eq!(source_modification_time(&path, &mut diagnostics).unwrap(), expected);
        assert_eq!(diagnostics.count(log::Level::Warn), 1);

        write_zip(
            &path,
            &[("stops.txt", "stop_id\n", march_1), ("trips.txt", "trip_id\n", march_1)],
        );
        let mut diagnostics = Diagnostics::new();
        source_modification_time(&path, &mut diagnostics).unwrap();
        assert_eq!(diagnostics.count(log::Level::Warn), 0);
    }

    #[test]
    fn test_modification_time_of_directory_tables() {
        let dir = temp_dir("dir-times");
        for (name, seconds) in [("stops.txt", 1_700_000_000), ("trips.txt", 1_700_200_000)] {
            let path = dir.join(name);
            std::fs::write(&path, "x\n").unwrap();
            File::options()
                .write(true)
                .open(&path)
                .unwrap()
                .set_modified(SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(seconds))
                .unwrap();
        }
        std::fs::write(dir.join("notes.md"), "").unwrap();
        let mut diagnostics = Diagnostics::new();
        assert_eq!(
            source_modification_time(&dir, &mut diagnostics).unwrap(),
            1_700_200_000
        );
        assert_eq!(diagnostics.count(log::Level::Warn), 1);
    }
}
