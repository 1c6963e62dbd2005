//! Race-card feed wire format.
//!
//! Shared by the HTTP and fixture collectors:
//!
//! ```json
//! { "races": [ { "venue": "Meadow Park", "race_number": 3,
//!                "start_time": "2026-03-14T14:30:00Z",
//!                "runners": [ { "name": "Alpha", "number": 1, "odds": "5/2" } ] } ] }
//! ```
//!
//! Races are decoded one at a time so a single garbled entry is skipped
//! instead of discarding the whole card.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use super::odds::{odds_from_number, parse_odds};
use crate::types::{CollectorError, NormalizedRace, NormalizedRunner, OddsQuote, SourceId};

#[derive(Debug, Deserialize)]
struct FeedDocument {
    races: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct FeedRace {
    venue: String,
    #[serde(alias = "raceNumber")]
    race_number: u32,
    #[serde(default, alias = "startTime")]
    start_time: Option<DateTime<Utc>>,
    #[serde(default, alias = "raceType")]
    race_type: Option<String>,
    #[serde(default)]
    distance: Option<String>,
    #[serde(default)]
    runners: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct FeedRunner {
    name: String,
    #[serde(default, alias = "programNumber", alias = "program_number")]
    number: Option<u32>,
    #[serde(default)]
    odds: serde_json::Value,
    #[serde(default)]
    scratched: bool,
}

/// Decode a feed document into races attributed to `source`.
///
/// Fails only when the document itself is unreadable. Individual races or
/// runners that do not decode are logged and skipped.
pub fn parse_feed(
    source: &SourceId,
    body: &str,
    observed_at: DateTime<Utc>,
) -> Result<Vec<NormalizedRace>, CollectorError> {
    let doc: FeedDocument = serde_json::from_str(body)
        .map_err(|e| CollectorError::Malformed(format!("feed document: {e}")))?;

    let total = doc.races.len();
    let mut races = Vec::with_capacity(total);

    for (index, value) in doc.races.into_iter().enumerate() {
        let feed_race: FeedRace = match serde_json::from_value(value) {
            Ok(r) => r,
            Err(e) => {
                warn!(source = %source, index, error = %e, "Skipping unreadable race");
                continue;
            }
        };

        let mut race = NormalizedRace::new(
            source.clone(),
            &feed_race.venue,
            feed_race.race_number,
            feed_race.start_time,
        );
        race.race_type = feed_race.race_type;
        race.distance = feed_race.distance;

        for runner_value in feed_race.runners {
            match serde_json::from_value::<FeedRunner>(runner_value) {
                Ok(r) => race.upsert_runner(to_runner(source, r, observed_at)),
                Err(e) => {
                    debug!(source = %source, venue = %race.venue, error = %e, "Skipping unreadable runner");
                }
            }
        }

        races.push(race);
    }

    debug!(source = %source, decoded = races.len(), total, "Feed parsed");
    Ok(races)
}

fn to_runner(source: &SourceId, r: FeedRunner, observed_at: DateTime<Utc>) -> NormalizedRunner {
    let price = match &r.odds {
        serde_json::Value::String(s) => parse_odds(s),
        serde_json::Value::Number(n) => odds_from_number(n),
        _ => None,
    };
    let scratched = r.scratched
        || matches!(&r.odds, serde_json::Value::String(s) if s.trim().to_uppercase().starts_with("SCR"));

    let mut runner = NormalizedRunner::new(&r.name, r.number)
        .with_quote(source.clone(), OddsQuote::new(price, observed_at));
    runner.scratched = scratched;
    runner
}
