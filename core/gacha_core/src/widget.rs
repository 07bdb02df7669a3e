//! Widget timelines: a fixed-cadence list of future dates the host OS uses to
//! schedule redraws, plus the date after which the whole timeline is reloaded.

use serde::Serialize;
use thiserror::Error;
use time::{format_description::well_known::Rfc3339, Duration, OffsetDateTime};

use crate::entry::GachaProfileId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WidgetError {
    #[error("no profile found")]
    NoProfileFound,
    #[error("a profile must be selected for this widget")]
    ProfileSelectionNeeded,
    #[error("timeline dates fall outside the supported calendar range")]
    TimelineOutOfRange,
}

impl WidgetError {
    pub fn code(self) -> &'static str {
        match self {
            WidgetError::NoProfileFound => "no_profile_found",
            WidgetError::ProfileSelectionNeeded => "profile_selection_needed",
            WidgetError::TimelineOutOfRange => "timeline_out_of_range",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TimelinePolicy {
    pub entry_every: Duration,
    pub entry_count: usize,
    pub refresh_after: Duration,
}

impl Default for TimelinePolicy {
    fn default() -> Self {
        Self {
            entry_every: Duration::minutes(8),
            entry_count: 41,
            refresh_after: Duration::minutes(30),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TimelineEntry {
    pub date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WidgetTimeline {
    pub entries: Vec<TimelineEntry>,
    pub reload_at: String,
}

/// Dates at `now + i * entry_every` for `i in 0..entry_count`.
pub fn plan_timeline(
    now: OffsetDateTime,
    policy: TimelinePolicy,
) -> Result<(Vec<OffsetDateTime>, OffsetDateTime), WidgetError> {
    let offset = |step: Duration| now.checked_add(step).ok_or(WidgetError::TimelineOutOfRange);
    let dates = (0..policy.entry_count)
        .map(|i| {
            let i = i32::try_from(i).map_err(|_| WidgetError::TimelineOutOfRange)?;
            let step = policy
                .entry_every
                .checked_mul(i)
                .ok_or(WidgetError::TimelineOutOfRange)?;
            offset(step)
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok((dates, offset(policy.refresh_after)?))
}

pub fn select_profile<'a>(
    profiles: &'a [GachaProfileId],
    selected: Option<&str>,
) -> Result<&'a GachaProfileId, WidgetError> {
    let first = profiles.first().ok_or(WidgetError::NoProfileFound)?;
    match selected {
        None if profiles.len() == 1 => Ok(first),
        None => Err(WidgetError::ProfileSelectionNeeded),
        // A deleted profile can linger in a widget configuration.
        Some(key) => profiles
            .iter()
            .find(|p| p.uid_with_game() == key)
            .ok_or(WidgetError::ProfileSelectionNeeded),
    }
}

/// On a selection failure the timeline holds a single entry carrying the
/// error, still reloaded after `refresh_after`. A policy whose dates cannot
/// be represented is an error of its own.
pub fn build_timeline(
    now: OffsetDateTime,
    policy: TimelinePolicy,
    profiles: &[GachaProfileId],
    selected: Option<&str>,
) -> Result<WidgetTimeline, WidgetError> {
    let fmt = |t: OffsetDateTime| {
        t.format(&Rfc3339)
            .map_err(|_| WidgetError::TimelineOutOfRange)
    };
    let (dates, reload_at) = plan_timeline(now, policy)?;

    let entries = match select_profile(profiles, selected) {
        Ok(profile) => {
            let key = profile.uid_with_game();
            dates
                .into_iter()
                .map(|d| {
                    Ok(TimelineEntry {
                        date: fmt(d)?,
                        profile: Some(key.clone()),
                        error: None,
                    })
                })
                .collect::<Result<Vec<_>, WidgetError>>()?
        }
        Err(err) => vec![TimelineEntry {
            date: fmt(now)?,
            profile: None,
            error: Some(err.code()),
        }],
    };

    Ok(WidgetTimeline {
        entries,
        reload_at: fmt(reload_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::Game;

    fn now() -> OffsetDateTime {
        OffsetDateTime::parse("2024-03-01T00:00:00Z", &Rfc3339).unwrap()
    }

    #[test]
    fn default_plan_is_41_entries_eight_minutes_apart() {
        let (dates, reload) = plan_timeline(now(), TimelinePolicy::default()).unwrap();
        assert_eq!(dates.len(), 41);
        assert_eq!(dates[0], now());
        assert_eq!(dates[1] - dates[0], Duration::minutes(8));
        assert_eq!(dates[40] - now(), Duration::minutes(320));
        assert_eq!(reload - now(), Duration::minutes(30));
    }

    #[test]
    fn select_profile_rules() {
        let one = vec![GachaProfileId::new("100", Game::GenshinImpact)];
        let two = vec![
            GachaProfileId::new("100", Game::GenshinImpact),
            GachaProfileId::new("200", Game::StarRail),
        ];

        assert_eq!(select_profile(&[], None), Err(WidgetError::NoProfileFound));
        assert_eq!(select_profile(&one, None).unwrap().uid, "100");
        assert_eq!(
            select_profile(&two, None),
            Err(WidgetError::ProfileSelectionNeeded)
        );
        assert_eq!(select_profile(&two, Some("HSR-200")).unwrap().uid, "200");
        assert_eq!(
            select_profile(&two, Some("ZZZ-1")),
            Err(WidgetError::ProfileSelectionNeeded)
        );
    }

    #[test]
    fn failed_selection_yields_single_error_entry() {
        let t = build_timeline(now(), TimelinePolicy::default(), &[], None).unwrap();
        assert_eq!(t.entries.len(), 1);
        assert_eq!(t.entries[0].error, Some("no_profile_found"));
        assert_eq!(t.reload_at, "2024-03-01T00:30:00Z");
    }

    #[test]
    fn timeline_entries_carry_selected_profile() {
        let profiles = vec![GachaProfileId::new("100", Game::GenshinImpact)];
        let policy = TimelinePolicy {
            entry_every: Duration::minutes(10),
            entry_count: 3,
            refresh_after: Duration::minutes(60),
        };
        let t = build_timeline(now(), policy, &profiles, None).unwrap();
        let dates: Vec<&str> = t.entries.iter().map(|e| e.date.as_str()).collect();
        assert_eq!(
            dates,
            ["2024-03-01T00:00:00Z", "2024-03-01T00:10:00Z", "2024-03-01T00:20:00Z"]
        );
        assert!(t.entries.iter().all(|e| e.profile.as_deref() == Some("GI-100")));
    }

    #[test]
    fn oversized_intervals_are_rejected_not_overflowed() {
        let profiles = vec![GachaProfileId::new("100", Game::GenshinImpact)];
        let huge_step = TimelinePolicy {
            entry_every: Duration::minutes(1_000_000_000),
            ..TimelinePolicy::default()
        };
        assert_eq!(
            plan_timeline(now(), huge_step).unwrap_err(),
            WidgetError::TimelineOutOfRange
        );
        assert_eq!(
            build_timeline(now(), huge_step, &profiles, None).unwrap_err(),
            WidgetError::TimelineOutOfRange
        );

        let huge_reload = TimelinePolicy {
            refresh_after: Duration::MAX,
            ..TimelinePolicy::default()
        };
        assert!(build_timeline(now(), huge_reload, &[], None).is_err());

        let max_step = TimelinePolicy {
            entry_every: Duration::MAX,
            entry_count: 3,
            ..TimelinePolicy::default()
        };
        assert!(plan_timeline(now(), max_step).is_err());
    }
}
