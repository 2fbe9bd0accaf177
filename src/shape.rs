use std::collections::HashMap;

use anyhow::{anyhow, Result};
use geo_types::{coord, Coord};
use indicatif::ProgressIterator;

use crate::config::CompactConfig;
use crate::diagnostics::{Diagnostics, Entity};
use crate::feed::ShapeRecord;
use crate::model::*;
use crate::simplify::{distance, simplify_anchored};

const POLYLINE_PRECISION: u32 = 5;

pub fn build_shape(record: &ShapeRecord, config: &CompactConfig) -> Shape {
    let is_invalid = record.points.iter().any(|point| {
        !(-90.0..=90.0).contains(&point.latitude)
            || !(-180.0..=180.0).contains(&point.longitude)
            || config
                .invalid_shape_points
                .iter()
                .any(|bad| bad[0] == point.latitude && bad[1] == point.longitude)
    });
    Shape {
        id: ShapeId::new(&record.id),
        points: record
            .points
            .iter()
            .map(|point| coord! { x: point.longitude, y: point.latitude })
            .collect(),
        is_invalid,
    }
}

/// Index of the point closest to `target`, searching from `from` to the end.
pub fn nearest_point_index(points: &[Coord<f64>], target: Coord<f64>, from: usize) -> Option<usize> {
    points
        .iter()
        .enumerate()
        .skip(from)
        .map(|(i, point)| (i, distance(*point, target)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(i, _)| i)
}

/// Maps every stop onto the shape, each search starting where the previous stop was found.
pub fn stop_distances(points: &[Coord<f64>], stops: &[Coord<f64>]) -> Option<Vec<usize>> {
    let mut distances = Vec::with_capacity(stops.len());
    let mut from = 0;
    for stop in stops {
        from = nearest_point_index(points, *stop, from)?;
        distances.push(from);
    }
    Some(distances)
}

/// Number of stops when consecutive stops at the same location count once.
pub fn count_unique_stops(stops: &[Coord<f64>]) -> usize {
    let mut unique = 0;
    let mut previous = None;
    for stop in stops {
        if previous != Some(*stop) {
            unique += 1;
        }
        previous = Some(*stop);
    }
    unique
}

/// Encodes points as polyline text. Coordinates are floored onto the 1e-5 grid first.
pub fn encode_points(points: &[Coord<f64>]) -> Result<String> {
    let scale = 10f64.powi(POLYLINE_PRECISION as i32);
    let floored = points.iter().map(|point| Coord {
        x: (point.x * scale).floor() / scale,
        y: (point.y * scale).floor() / scale,
    });
    polyline::encode_coordinates(floored, POLYLINE_PRECISION)
        .map_err(|err| anyhow!("cannot encode polyline: {:?}", err))
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShapeStats {
    pub shapes: usize,
    pub points: usize,
    pub dropped_points: usize,
    pub bytes: usize,
}

/// Resolves the stops of every trip onto its shape, simplifies the shape and stores the encoded
/// result in the route's shape cache. Trips whose shape cannot be used are removed.
pub fn resolve_shapes(
    schedule: &mut Schedule,
    config: &CompactConfig,
    diagnostics: &mut Diagnostics,
) -> Result<ShapeStats> {
    let style = indicatif::ProgressStyle::with_template(
        "[{elapsed_precise}] {bar:40.cyan/blue} {human_pos:>7}/{human_len:7} {msg}",
    )?;
    let mut stats = ShapeStats::default();

    for route in schedule
        .routes
        .values_mut()
        .progress_with_style(style)
        .with_message("Resolve shapes.")
        .with_finish(indicatif::ProgressFinish::AndLeave)
    {
        let Route {
            id: route_id,
            short_name,
            trips,
            shapes: encoded_shapes,
            ..
        } = route;
        let mut resolved_by_pattern: HashMap<(ShapeId, Vec<StopId>), ResolvedShape> =
            HashMap::new();
        let mut invalid_trips = vec![];

        for trip in trips.values_mut() {
            let Some(shape) = usable_shape(trip, *route_id, &schedule.shapes, diagnostics) else {
                invalid_trips.push(trip.id);
                continue;
            };
            let stop_ids: Vec<StopId> = trip.stops.values().copied().collect();
            let key = (shape.id, stop_ids);
            if let Some(resolved) = resolved_by_pattern.get(&key) {
                trip.resolved_shape = Some(resolved.clone());
                continue;
            }

            let Some(stops) = stop_locations(trip, &schedule.stops, diagnostics) else {
                invalid_trips.push(trip.id);
                continue;
            };
            let Some(distances) = stop_distances(&shape.points, &stops) else {
                diagnostics.error(
                    Entity::Trip(trip.id),
                    format!("no point index for stops in shape_id={}", shape.id),
                );
                invalid_trips.push(trip.id);
                continue;
            };
            let context = format!("route={}/{}", short_name, route_id);
            if !is_shape_long_enough(trip, &context, shape, &stops, diagnostics) {
                invalid_trips.push(trip.id);
                continue;
            }

            let simplified = simplify_anchored(&shape.points, &distances, config.simplify_tolerance)?;
            let encoded = encode_points(&simplified.points)?;
            let encoded_len = encoded.len();
            let (shape_index, is_new) = encoded_shapes.insert(encoded);
            if is_new {
                stats.shapes += 1;
                stats.points += shape.points.len();
                stats.dropped_points += simplified.dropped_points(shape.points.len());
                stats.bytes += encoded_len;
            } else {
                diagnostics.info(
                    Entity::Route(*route_id),
                    format!("duplicate shape encoding for shape_id={}", shape.id),
                );
            }
            let resolved = ResolvedShape {
                shape_index,
                stop_distances: simplified.anchors.iter().map(|&i| i as u32).collect(),
            };
            resolved_by_pattern.insert(key, resolved.clone());
            trip.resolved_shape = Some(resolved);
        }

        for trip_id in invalid_trips {
            trips.remove(&trip_id);
        }
    }

    log::info!("shape encoding stats: {:?}", stats);
    Ok(stats)
}

fn usable_shape<'a>(
    trip: &Trip,
    route_id: RouteId,
    shapes: &'a HashMap<ShapeId, Shape>,
    diagnostics: &mut Diagnostics,
) -> Option<&'a Shape> {
    let entity = Entity::Trip(trip.id);
    let Some(shape_id) = trip.shape_id else {
        diagnostics.error(entity, format!("no shape_id in route_id={}", route_id));
        return None;
    };
    match shapes.get(&shape_id) {
        None => {
            diagnostics.error(entity, format!("no shape information for shape_id={}", shape_id));
            None
        }
        Some(shape) if shape.is_invalid => {
            diagnostics.error(entity, format!("invalid shape_id={}", shape_id));
            None
        }
        Some(shape) if shape.points.is_empty() => {
            diagnostics.error(entity, format!("empty shape_id={}", shape_id));
            None
        }
        Some(shape) => Some(shape),
    }
}

fn stop_locations(
    trip: &Trip,
    stops: &HashMap<StopId, Coord<f64>>,
    diagnostics: &mut Diagnostics,
) -> Option<Vec<Coord<f64>>> {
    let mut locations = Vec::with_capacity(trip.stops.len());
    for stop_id in trip.stops.values() {
        match stops.get(stop_id) {
            Some(location) => locations.push(*location),
            None => {
                diagnostics.error(
                    Entity::Trip(trip.id),
                    format!("no stop information for stop_id={}", stop_id),
                );
                return None;
            }
        }
    }
    Some(locations)
}

fn is_shape_long_enough(
    trip: &Trip,
    context: &str,
    shape: &Shape,
    stops: &[Coord<f64>],
    diagnostics: &mut Diagnostics,
) -> bool {
    if shape.points.len() >= stops.len() {
        return true;
    }
    let unique_stops = count_unique_stops(stops);
    if unique_stops < stops.len() {
        diagnostics.info(
            Entity::Trip(trip.id),
            format!(
                "{} less unique stops than stops: {} < {}",
                context,
                unique_stops,
                stops.len()
            ),
        );
    }
    if shape.points.len() < unique_stops {
        diagnostics.error(
            Entity::Trip(trip.id),
            format!(
                "{} less points in shape_id={} than unique stops: {} < {}",
                context,
                shape.id,
                shape.points.len(),
                unique_stops
            ),
        );
        return false;
    }
    true
}
