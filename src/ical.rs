use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use icalendar::{Calendar, Component, Event, EventLike};

use crate::models::ClassOccurrence;

#[derive(Clone, Default)]
pub struct ICalExporter;

/// Interprets a studio-local wall-clock time; ambiguous times take the
/// earlier offset and times skipped by a DST jump fall back to UTC.
fn to_utc(local: NaiveDateTime, tz: Tz) -> DateTime<Utc> {
    tz.from_local_datetime(&local)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&local))
}

impl ICalExporter {
    pub fn new() -> Self {
        Self
    }

    pub fn generate(&self, classes: &[ClassOccurrence], studio_name: &str, tz: Tz) -> Vec<u8> {
        let mut calendar = Calendar::new();
        calendar.name(&format!("{studio_name} Classes"));

        for class in classes {
            let start = to_utc(class.date.and_time(class.start_time), tz);
            let end = to_utc(class.date.and_time(class.end_time), tz);

            let mut event = Event::new();
            event.summary(&class.title);
            event.starts(start);
            event.ends(end);
            event.location(class.location.as_deref().unwrap_or(studio_name));

            let mut description = Vec::new();
            if let Some(text) = class.description.as_deref().filter(|d| !d.trim().is_empty()) {
                description.push(text.to_string());
            }
            if let Some(instructor) = &class.instructor {
                description.push(format!("Instructor: {instructor}"));
            }
            if let Some(level) = &class.level {
                description.push(format!("Level: {level}"));
            }
            description.push(format!("Spots left: {}", class.spots_left()));
            event.description(&description.join("\n"));
            event.uid(&format!("class-{}-{}@dance-studio", class.id, class.slug));
            calendar.push(event);
        }

        calendar.to_string().into_bytes()
    }
}
