use std::collections::HashMap;

use anyhow::{anyhow, Result};

use crate::model::{Service, Weekdays};

/// The date rule of a service without its id, so that services with equal rules share one
/// trip-dates entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DateRule {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub weekdays: Option<Weekdays>,
    pub added_dates: Vec<String>,
    pub removed_dates: Vec<String>,
}

impl DateRule {
    pub fn of(service: &Service) -> DateRule {
        let sorted = |dates: &[String]| {
            let mut dates = dates.to_vec();
            dates.sort();
            dates.dedup();
            dates
        };
        DateRule {
            start_date: service.start_date.clone(),
            end_date: service.end_date.clone(),
            weekdays: service.weekdays.clone(),
            added_dates: sorted(&service.added_dates),
            removed_dates: sorted(&service.removed_dates),
        }
    }

    /// Every date the rule refers to, in output order.
    pub fn dates(&self) -> impl Iterator<Item = &str> {
        self.start_date
            .iter()
            .chain(&self.end_date)
            .chain(&self.added_dates)
            .chain(&self.removed_dates)
            .map(|date| date.as_str())
    }
}

#[derive(Debug, Default)]
pub struct DateCounter {
    counts: HashMap<String, usize>,
}

impl DateCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_rule(&mut self, rule: &DateRule) {
        for date in rule.dates() {
            self.add(date);
        }
    }

    pub fn add(&mut self, date: &str) {
        *self.counts.entry(date.to_string()).or_default() += 1;
    }

    pub fn into_dictionary(self) -> DateDictionary {
        DateDictionary::from_counts(self.counts)
    }
}

/// All dates of the document, most referenced first. Dates elsewhere are indexes into it.
#[derive(Debug, Clone, Default)]
pub struct DateDictionary {
    dates: Vec<String>,
    indexes: HashMap<String, usize>,
}

impl DateDictionary {
    pub fn from_counts(counts: HashMap<String, usize>) -> DateDictionary {
        let mut counted: Vec<(String, usize)> = counts.into_iter().collect();
        counted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        let dates: Vec<String> = counted.into_iter().map(|(date, _)| date).collect();
        let indexes = dates
            .iter()
            .enumerate()
            .map(|(i, date)| (date.clone(), i))
            .collect();
        DateDictionary { dates, indexes }
    }

    pub fn index_of(&self, date: &str) -> Result<usize> {
        self.indexes
            .get(date)
            .copied()
            .ok_or_else(|| anyhow!("date {} missing from the date dictionary", date))
    }

    pub fn dates(&self) -> &[String] {
        &self.dates
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ServiceId;

    #[test]
    fn test_most_used_dates_first() {
        let counts = HashMap::from([
            ("20240103".to_string(), 3),
            ("20240105".to_string(), 5),
            ("20240101".to_string(), 1),
        ]);
        let dictionary = DateDictionary::from_counts(counts);
        assert_eq!(dictionary.dates(), &["20240105", "20240103", "20240101"]);
        assert_eq!(dictionary.index_of("20240103").unwrap(), 1);
        assert!(dictionary.index_of("20990101").is_err());
    }

    #[test]
    fn test_ties_are_ordered_by_date() {
        let mut counter = DateCounter::new();
        for date in ["20240302", "20240301", "20240302", "20240301", "20240303"] {
            counter.add(date);
        }
        let dictionary = counter.into_dictionary();
        assert_eq!(dictionary.dates(), &["20240301", "20240302", "20240303"]);
    }

    #[test]
    fn test_rule_ignores_service_id_and_exception_order() {
        let mut a = Service::new(ServiceId::new("a"));
        a.start_date = Some("20240101".to_string());
        a.end_date = Some("20240131".to_string());
        a.added_dates = vec!["20240210".to_string(), "20240205".to_string()];
        let mut b = a.clone();
        b.id = ServiceId::new("b");
        b.added_dates.reverse();
        assert_eq!(DateRule::of(&a), DateRule::of(&b));
        let rule = DateRule::of(&a);
        let dates: Vec<&str> = rule.dates().collect();
        assert_eq!(dates, vec!["20240101", "20240131", "20240205", "20240210"]);
    }
}
