//! Actual-LRP event calculation.
//!
//! Given before and after snapshots of the instance records for one
//! (process, index) slot, [`EventCalculator::emit_events`] decides which
//! events to broadcast, in which order, on which stream:
//!
//! - the **group stream** carries the coarse two-slot
//!   [`ActualLrpGroup`](roster_core::actual_lrp::ActualLrpGroup) view for
//!   legacy subscribers
//! - the **instance stream** carries one event per record
//!
//! ## Identity rules
//!
//! A record is identified by its slot key plus its instance key. While the
//! keys hold, any field change is a `Changed` event. An empty instance key
//! has no identity: claiming (`Unclaimed → Claimed`) is a change, not a
//! replacement. The reverse transition — a placed record going back to
//! `Unclaimed` — would erase a non-empty instance key in place, which
//! subscribers must never observe; the calculator decomposes it into a
//! create of the unclaimed record followed by a remove of the placed one.
//!
//! ## Ordering
//!
//! Events from one calculation are emitted so that routability is
//! continuous: crash notifications first (cause before effect), then
//! events whose resulting record is running (the live replacement), then
//! the remaining non-removals, and removals last.
//!
//! The calculation is total: undefined diffs produce no events rather than
//! an error.

use std::sync::Arc;

use roster_core::actual_lrp::{ActualLrp, ActualLrpState, resolve_group};
use roster_core::events::Event;

use crate::hub::Hub;

/// Diffs slot snapshots and emits the resulting events on the two streams.
#[derive(Debug, Clone)]
pub struct EventCalculator {
    group_hub: Arc<Hub>,
    instance_hub: Arc<Hub>,
}

impl EventCalculator {
    /// Creates a calculator emitting on the given hubs.
    #[must_use]
    pub fn new(group_hub: Arc<Hub>, instance_hub: Arc<Hub>) -> Self {
        Self {
            group_hub,
            instance_hub,
        }
    }

    /// Emits the events that turn `before` into `after`.
    ///
    /// Both snapshots describe the same (process, index) slot. Entries may
    /// be `None`: in `after` that marks an explicit removal recorded by
    /// [`EventCalculator::record_change`]. Applying the emitted
    /// instance-stream events to `before`, in order, yields exactly the
    /// non-`None` records of `after`.
    pub fn emit_events(&self, before: &[Option<ActualLrp>], after: &[Option<ActualLrp>]) {
        let before_group = resolve_group(before.iter().flatten());
        let after_group = resolve_group(after.iter().flatten());

        let mut group_events =
            group_slot_events(before_group.instance.as_ref(), after_group.instance.as_ref());
        group_events.extend(group_slot_events(
            before_group.evacuating.as_ref(),
            after_group.evacuating.as_ref(),
        ));
        group_events.sort_by_key(emission_rank);

        let mut instance_events = Vec::new();
        for (b, a) in pair_records(before, after) {
            instance_events.extend(instance_pair_events(b, a));
        }
        instance_events.sort_by_key(emission_rank);

        tracing::debug!(
            group_events = group_events.len(),
            instance_events = instance_events.len(),
            "calculated slot events"
        );

        for event in group_events {
            self.group_hub.emit(event);
        }
        for event in instance_events {
            self.instance_hub.emit(event);
        }
    }

    /// Returns a working set with `before` replaced by `after`.
    ///
    /// The entry whose instance key matches `before` is replaced in place;
    /// when no entry matches (or `before` is `None`), `after` is appended.
    /// `None` entries mark earlier removals and keep their positions. Use
    /// this to thread the `after` snapshot through sequential mutations of
    /// one slot before a single [`EventCalculator::emit_events`] call.
    #[must_use]
    pub fn record_change(
        before: Option<&ActualLrp>,
        after: Option<ActualLrp>,
        lrps: &[Option<ActualLrp>],
    ) -> Vec<Option<ActualLrp>> {
        let mut found = false;
        let mut updated = Vec::with_capacity(lrps.len());

        for entry in lrps {
            match (entry, before) {
                (None, _) => updated.push(None),
                (Some(existing), Some(before))
                    if existing.instance_key == before.instance_key =>
                {
                    updated.push(after.clone());
                    found = true;
                }
                (Some(existing), _) => updated.push(Some(existing.clone())),
            }
        }

        if !found {
            let mut appended = lrps.to_vec();
            appended.push(after);
            return appended;
        }

        updated
    }
}

/// Pairs before and after records for the instance-stream diff.
///
/// Records are matched by instance key; entries without a usable key —
/// unclaimed records, removal markers, and records whose key appears on
/// only one side — fall back to positional pairing, which is exactly the
/// set of "key transitions to or from empty" cases. Leftovers pair with
/// `None` and become plain creates or removes.
fn pair_records<'a>(
    before: &'a [Option<ActualLrp>],
    after: &'a [Option<ActualLrp>],
) -> Vec<(Option<&'a ActualLrp>, Option<&'a ActualLrp>)> {
    let mut pairs = Vec::new();
    let mut before_used = vec![false; before.len()];
    let mut after_used = vec![false; after.len()];

    for (j, entry) in after.iter().enumerate() {
        let Some(a) = entry else { continue };
        if a.instance_key.is_empty() {
            continue;
        }
        let matched = before.iter().enumerate().find_map(|(i, b)| match b {
            Some(b) if !before_used[i] && b.instance_key == a.instance_key => Some(i),
            _ => None,
        });
        if let Some(i) = matched {
            before_used[i] = true;
            after_used[j] = true;
            pairs.push((before[i].as_ref(), Some(a)));
        }
    }

    for idx in 0..before.len().max(after.len()) {
        let b = if idx < before.len() && !before_used[idx] {
            before[idx].as_ref()
        } else {
            None
        };
        let a = if idx < after.len() && !after_used[idx] {
            after[idx].as_ref()
        } else {
            None
        };
        if b.is_some() || a.is_some() {
            pairs.push((b, a));
        }
    }

    pairs
}

fn instance_pair_events(before: Option<&ActualLrp>, after: Option<&ActualLrp>) -> Vec<Event> {
    match (before, after) {
        (None, None) => Vec::new(),
        (None, Some(after)) => vec![Event::InstanceCreated {
            actual_lrp: after.clone(),
        }],
        (Some(before), None) => vec![Event::InstanceRemoved {
            actual_lrp: before.clone(),
        }],
        (Some(before), Some(after)) if before == after => Vec::new(),
        (Some(before), Some(after)) => match after.state {
            ActualLrpState::Crashed => vec![
                Event::actual_lrp_crashed(before, after),
                Event::InstanceChanged {
                    before: before.clone(),
                    after: after.clone(),
                },
            ],
            // The instance key transitions to empty, which is forbidden as
            // a single update; subscribers see a remove plus a create.
            ActualLrpState::Unclaimed => {
                let mut events = Vec::new();
                if after.crash_count > before.crash_count {
                    events.push(Event::actual_lrp_crashed(before, after));
                }
                events.push(Event::InstanceCreated {
                    actual_lrp: after.clone(),
                });
                events.push(Event::InstanceRemoved {
                    actual_lrp: before.clone(),
                });
                events
            }
            ActualLrpState::Claimed | ActualLrpState::Running => vec![Event::InstanceChanged {
                before: before.clone(),
                after: after.clone(),
            }],
        },
    }
}

fn group_slot_events(before: Option<&ActualLrp>, after: Option<&ActualLrp>) -> Vec<Event> {
    match (before, after) {
        (None, None) => Vec::new(),
        (None, Some(after)) => vec![Event::ActualLrpCreated {
            actual_lrp_group: after.to_group(),
        }],
        (Some(before), None) => vec![Event::ActualLrpRemoved {
            actual_lrp_group: before.to_group(),
        }],
        (Some(before), Some(after)) if before == after => Vec::new(),
        (Some(before), Some(after)) => {
            // One placement superseding another (e.g. an ordinary record
            // replacing a suspect one) is a create plus a remove. An empty
            // before-key has no identity, so claiming stays a change.
            if !before.instance_key.is_empty()
                && !after.instance_key.is_empty()
                && before.instance_key != after.instance_key
            {
                return vec![
                    Event::ActualLrpCreated {
                        actual_lrp_group: after.to_group(),
                    },
                    Event::ActualLrpRemoved {
                        actual_lrp_group: before.to_group(),
                    },
                ];
            }

            let changed = Event::ActualLrpChanged {
                before: before.to_group(),
                after: after.to_group(),
            };
            match after.state {
                ActualLrpState::Crashed => {
                    vec![Event::actual_lrp_crashed(before, after), changed]
                }
                ActualLrpState::Unclaimed => {
                    let mut events = Vec::new();
                    if after.crash_count > before.crash_count {
                        events.push(Event::actual_lrp_crashed(before, after));
                    }
                    events.push(changed);
                    events
                }
                ActualLrpState::Claimed | ActualLrpState::Running => vec![changed],
            }
        }
    }
}

/// Emission rank for one calculation; lower ranks emit first.
///
/// Crash notifications lead so legacy consumers see cause before effect;
/// events resolving to a running record follow so subscribers learn about
/// a live replacement before hearing a peer is gone; removals come last.
fn emission_rank(event: &Event) -> u8 {
    if matches!(event, Event::ActualLrpCrashed { .. }) {
        return 0;
    }
    match resulting_lrp(event) {
        Some(lrp) if lrp.state == ActualLrpState::Running => 1,
        Some(_) => 2,
        None => 3,
    }
}

/// The record an event resolves to: the created record, or the after side
/// of a change. Crashes and removals resolve to nothing.
fn resulting_lrp(event: &Event) -> Option<&ActualLrp> {
    match event {
        Event::ActualLrpCreated { actual_lrp_group } => actual_lrp_group.resolve(),
        Event::ActualLrpChanged { after, .. } => after.resolve(),
        Event::InstanceCreated { actual_lrp } => Some(actual_lrp),
        Event::InstanceChanged { after, .. } => Some(after),
        _ => None,
    }
}
