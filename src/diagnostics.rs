use std::fmt;

use log::Level;

use crate::model::{RouteId, ServiceId, ShapeId, StopId, TripId};

/// The entity a data-quality record is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Feed,
    Route(RouteId),
    Trip(TripId),
    Service(ServiceId),
    Shape(ShapeId),
    Stop(StopId),
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entity::Feed => write!(f, "feed"),
            Entity::Route(id) => write!(f, "route_id={}", id),
            Entity::Trip(id) => write!(f, "trip_id={}", id),
            Entity::Service(id) => write!(f, "service_id={}", id),
            Entity::Shape(id) => write!(f, "shape_id={}", id),
            Entity::Stop(id) => write!(f, "stop_id={}", id),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub level: Level,
    pub entity: Entity,
    pub message: String,
}

/// Collects every dropped or suspicious entity of a run. Each record is also forwarded to the
/// `log` facade.
#[derive(Debug, Default)]
pub struct Diagnostics {
    records: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, level: Level, entity: Entity, message: impl Into<String>) {
        let message = message.into();
        log::log!(level, "{}: {}", entity, message);
        self.records.push(Diagnostic {
            level,
            entity,
            message,
        });
    }

    pub fn error(&mut self, entity: Entity, message: impl Into<String>) {
        self.report(Level::Error, entity, message);
    }

    pub fn warn(&mut self, entity: Entity, message: impl Into<String>) {
        self.report(Level::Warn, entity, message);
    }

    pub fn info(&mut self, entity: Entity, message: impl Into<String>) {
        self.report(Level::Info, entity, message);
    }

    pub fn records(&self) -> &[Diagnostic] {
        &self.records
    }

    pub fn count(&self, level: Level) -> usize {
        self.records.iter().filter(|r| r.level == level).count()
    }

    pub fn about<'a>(&'a self, entity: &'a Entity) -> impl Iterator<Item = &'a Diagnostic> + 'a {
        self.records.iter().filter(move |r| &r.entity == entity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_are_attributed() {
        let mut diagnostics = Diagnostics::new();
        let trip = Entity::Trip(TripId::new("t1"));
        diagnostics.error(trip.clone(), "too short");
        diagnostics.info(Entity::Feed, "parsed");
        assert_eq!(diagnostics.count(Level::Error), 1);
        assert_eq!(diagnostics.about(&trip).count(), 1);
        assert_eq!(diagnostics.records()[1].entity.to_string(), "feed");
        assert_eq!(trip.to_string(), "trip_id=t1");
    }
}
