//! Identity & merge engine.
//!
//! Races from different sources that share an identity key (folded venue,
//! race number, start minute) are combined into one record:
//!
//! - Top-level scalars (venue display, start time, race type, distance)
//!   come from the highest-priority race that defines them. The winning
//!   source is recorded in `provenance`, so a merged race competes in a
//!   later merge with the rank of the source that actually supplied each
//!   field. This is what makes merging associative.
//! - Runners are unioned by program number, else by folded name. Quote maps
//!   are unioned per source; a repeated source keeps its latest quote.
//! - `sources` lists every contributor, in priority order, without
//!   duplicates.
//!
//! A race with no start time joins the first timed group with the same
//! venue and race number, if there is one.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

use crate::types::{IdentityKey, NormalizedRace, NormalizedRunner, RaceProvenance, RunnerKey, SourceId};

/// Position of a source in the trust order. Lower is more trusted.
/// Unlisted sources rank after every listed one, ordered by id.
type Rank = (usize, String);

/// Lookup table built from the configured `source_priority` list.
#[derive(Debug, Clone, Default)]
pub struct SourcePriority {
    order: HashMap<SourceId, usize>,
}

impl SourcePriority {
    pub fn new(priority: &[SourceId]) -> Self {
        let mut order = HashMap::with_capacity(priority.len());
        for (index, id) in priority.iter().enumerate() {
            order.entry(id.clone()).or_insert(index);
        }
        Self { order }
    }

    fn rank(&self, source: Option<&SourceId>) -> Rank {
        match source {
            Some(id) => match self.order.get(id) {
                Some(&index) => (index, String::new()),
                None => (self.order.len(), id.as_str().to_string()),
            },
            None => (usize::MAX, String::new()),
        }
    }

    fn race_rank(&self, race: &NormalizedRace) -> Rank {
        race.sources
            .iter()
            .map(|s| self.rank(Some(s)))
            .min()
            .unwrap_or_else(|| self.rank(None))
    }

    /// Sort source ids most trusted first.
    pub fn sort(&self, sources: &mut Vec<SourceId>) {
        sources.sort_by_cached_key(|s| self.rank(Some(s)));
        sources.dedup();
    }
}

/// Merge races that describe the same real-world race.
///
/// Output is ordered by identity key. `merge(merge(x)) == merge(x)`.
pub fn merge(races: Vec<NormalizedRace>, priority: &[SourceId]) -> Vec<NormalizedRace> {
    let input = races.len();
    let ranks = SourcePriority::new(priority);

    let merged: Vec<NormalizedRace> = group_by_identity(races)
        .into_iter()
        .map(|(key, group)| {
            if group.len() > 1 {
                debug!(key = %key, candidates = group.len(), "Merging race group");
            }
            merge_group(group, &ranks)
        })
        .collect();

    info!(input, merged = merged.len(), "Merge complete");
    merged
}

fn group_by_identity(races: Vec<NormalizedRace>) -> BTreeMap<IdentityKey, Vec<NormalizedRace>> {
    let mut groups: BTreeMap<IdentityKey, Vec<NormalizedRace>> = BTreeMap::new();
    let mut untimed = Vec::new();

    for race in races {
        let key = race.identity_key();
        if key.start_minute.is_some() {
            groups.entry(key).or_default().push(race);
        } else {
            untimed.push((key, race));
        }
    }

    for (key, race) in untimed {
        let lower = IdentityKey {
            start_minute: Some(i64::MIN),
            ..key.clone()
        };
        let timed = groups
            .range(lower..)
            .next()
            .map(|(k, _)| k)
            .filter(|k| k.venue == key.venue && k.race_number == key.race_number)
            .cloned();
        groups.entry(timed.unwrap_or(key)).or_default().push(race);
    }

    groups
}

fn merge_group(mut group: Vec<NormalizedRace>, ranks: &SourcePriority) -> NormalizedRace {
    // Stable: equal-rank races keep input order, so same-source quotes
    // with equal timestamps resolve to the later one.
    group.sort_by_cached_key(|r| ranks.race_rank(r));

    let (venue, venue_src) = pick(&group, ranks, |r| Some(&r.venue), |p| p.venue.as_ref()).unwrap_or_default();
    let start = pick(&group, ranks, |r| r.start_time.as_ref(), |p| p.start_time.as_ref());
    let race_type = pick(&group, ranks, |r| r.race_type.as_ref(), |p| p.race_type.as_ref());
    let distance = pick(&group, ranks, |r| r.distance.as_ref(), |p| p.distance.as_ref());

    let race_number = group.first().map(|r| r.race_number).unwrap_or_default();

    let mut sources: Vec<SourceId> = group.iter().flat_map(|r| r.sources.iter().cloned()).collect();
    ranks.sort(&mut sources);

    let runners = merge_runners(&group, ranks);

    let (start_time, start_src) = split(start);
    let (race_type, type_src) = split(race_type);
    let (distance, distance_src) = split(distance);

    NormalizedRace {
        venue,
        race_number,
        start_time,
        race_type,
        distance,
        runners,
        sources,
        provenance: RaceProvenance {
            venue: venue_src,
            start_time: start_src,
            race_type: type_src,
            distance: distance_src,
        },
    }
}

/// Choose a scalar by `(rank of supplying source, value)`.
fn pick<T: Ord + Clone>(
    group: &[NormalizedRace],
    ranks: &SourcePriority,
    value: impl Fn(&NormalizedRace) -> Option<&T>,
    supplied_by: impl Fn(&RaceProvenance) -> Option<&SourceId>,
) -> Option<(T, Option<SourceId>)> {
    group
        .iter()
        .filter_map(|race| {
            let v = value(race)?;
            let source = supplied_by(&race.provenance).or_else(|| race.primary_source());
            Some((ranks.rank(source), v, source))
        })
        .min_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)))
        .map(|(_, v, source)| (v.clone(), source.cloned()))
}

fn split<T>(picked: Option<(T, Option<SourceId>)>) -> (Option<T>, Option<SourceId>) {
    match picked {
        Some((v, source)) => (Some(v), source),
        None => (None, None),
    }
}

fn merge_runners(group: &[NormalizedRace], ranks: &SourcePriority) -> Vec<NormalizedRunner> {
    let mut merged: BTreeMap<RunnerKey, (Rank, NormalizedRunner)> = BTreeMap::new();

    for race in group {
        let race_rank = ranks.race_rank(race);
        for runner in &race.runners {
            let rank = runner
                .odds_by_source
                .keys()
                .map(|s| ranks.rank(Some(s)))
                .min()
                .unwrap_or_else(|| race_rank.clone());

            match merged.entry(runner.key()) {
                Entry::Vacant(slot) => {
                    slot.insert((rank, runner.clone()));
                }
                Entry::Occupied(mut slot) => {
                    let (best, existing) = slot.get_mut();
                    if (&rank, &runner.name) < (&*best, &existing.name) {
                        existing.name = runner.name.clone();
                        *best = rank;
                    }
                    existing.scratched |= runner.scratched;
                    for (source, quote) in &runner.odds_by_source {
                        let keep_existing = existing
                            .odds_by_source
                            .get(source)
                            .is_some_and(|q| q.observed_at > quote.observed_at);
                        if !keep_existing {
                            existing.record_quote(source.clone(), quote.clone());
                        }
                    }
                }
            }
        }
    }

    merged.into_values().map(|(_, runner)| runner).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
