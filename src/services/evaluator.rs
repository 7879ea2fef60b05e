//! Containment evaluation and entry/exit transition detection
//!
//! The evaluator is the engine's working memory: per (user, region) it
//! remembers the last containment classification and detects the
//! transitions that matter. Only `outside -> inside` produces an entry
//! signal; `inside -> outside` produces an exit signal once the
//! distance clears the hysteresis band (`radius * exit_factor`), which
//! keeps GPS jitter at the boundary from flapping episodes open and
//! closed.
//!
//! State here is ephemeral and reconstructible; losing it costs at
//! worst one duplicate notification, which the dedup store bounds.
//!
//! Given identical state and the same update, the output is
//! deterministic: no randomness, no wall clock beyond the update's own
//! timestamp, and signals are emitted in region-id order.

use crate::domain::geo::haversine_m;
use crate::domain::types::{
    Containment, EntrySignal, ExitSignal, LocationUpdate, RegionId, UserId,
};
use crate::services::region_index::IndexSnapshot;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use tracing::debug;

/// Last known containment for one (user, region) pair
#[derive(Debug, Clone)]
struct PresenceState {
    containment: Containment,
    /// Timestamp of the last transition
    since: DateTime<Utc>,
}

/// Result of evaluating one location update
#[derive(Debug, Default)]
pub struct Evaluation {
    pub entries: Vec<EntrySignal>,
    pub exits: Vec<ExitSignal>,
}

/// Stateful per-update evaluator
pub struct Evaluator {
    /// Regions each user is currently inside (absence means outside)
    presence: FxHashMap<UserId, FxHashMap<RegionId, PresenceState>>,
    exit_factor: f64,
    hint_cap_m: f64,
}

impl Evaluator {
    pub fn new(exit_factor: f64, hint_cap_m: f64) -> Self {
        Self { presence: FxHashMap::default(), exit_factor, hint_cap_m }
    }

    /// Evaluate one update against a consistent index snapshot
    pub fn evaluate(&mut self, update: &LocationUpdate, snapshot: &IndexSnapshot) -> Evaluation {
        let mut eval = Evaluation::default();
        let user_state = self.presence.entry(update.user_id).or_default();

        let hint_m = snapshot.max_radius_m().min(self.hint_cap_m);
        let candidates = snapshot.query(update.coordinate, hint_m);

        for &region_id in &candidates {
            // Query only returns ids present in the snapshot
            let Some(entry) = snapshot.get(region_id) else { continue };

            let distance_m = haversine_m(update.coordinate, entry.center);
            let radius_m = entry.radius_m as f64;
            let was_inside = user_state
                .get(&region_id)
                .map(|s| s.containment == Containment::Inside)
                .unwrap_or(false);

            // Exit threshold is wider than the entry threshold
            let now_inside = if was_inside {
                distance_m <= radius_m * self.exit_factor
            } else {
                distance_m <= radius_m
            };

            match (was_inside, now_inside) {
                (false, true) => {
                    user_state.insert(
                        region_id,
                        PresenceState { containment: Containment::Inside, since: update.timestamp },
                    );
                    eval.entries.push(EntrySignal {
                        user_id: update.user_id,
                        region_id,
                        experience_id: entry.experience_id,
                        distance_m,
                    });
                }
                (true, false) => {
                    user_state.remove(&region_id);
                    eval.exits.push(ExitSignal {
                        user_id: update.user_id,
                        region_id,
                        region_gone: false,
                    });
                }
                _ => {}
            }
        }

        // Regions the user was inside that the candidate set no longer
        // covers: either removed/deactivated (synthesize a silent
        // close) or simply far away now.
        let stale: Vec<RegionId> = user_state
            .keys()
            .filter(|&&id| !candidates.contains(&id))
            .copied()
            .collect();
        for region_id in stale {
            match snapshot.get(region_id) {
                None => {
                    let inside_since = user_state.remove(&region_id).map(|s| s.since);
                    debug!(
                        user_id = %update.user_id,
                        region_id = %region_id,
                        inside_since = ?inside_since,
                        "region_gone_synthesized_close"
                    );
                    eval.exits.push(ExitSignal {
                        user_id: update.user_id,
                        region_id,
                        region_gone: true,
                    });
                }
                Some(entry) => {
                    let distance_m = haversine_m(update.coordinate, entry.center);
                    if distance_m > entry.radius_m as f64 * self.exit_factor {
                        user_state.remove(&region_id);
                        eval.exits.push(ExitSignal {
                            user_id: update.user_id,
                            region_id,
                            region_gone: false,
                        });
                    }
                }
            }
        }

        if user_state.is_empty() {
            self.presence.remove(&update.user_id);
        }

        // Fixed emission order regardless of map iteration order
        eval.entries.sort_by_key(|e| e.region_id);
        eval.exits.sort_by_key(|e| e.region_id);
        eval
    }

    /// Forget the containment for one pair
    ///
    /// Used when a downstream failure means the entry was never acted
    /// on; the next inside update then re-signals the entry naturally.
    pub fn reset_pair(&mut self, user_id: UserId, region_id: RegionId) {
        if let Some(user_state) = self.presence.get_mut(&user_id) {
            user_state.remove(&region_id);
            if user_state.is_empty() {
                self.presence.remove(&user_id);
            }
        }
    }

    /// Number of (user, region) pairs currently inside
    pub fn tracked_pairs(&self) -> usize {
        self.presence.values().map(|m| m.len()).sum()
    }

    /// Number of users with at least one inside containment
    pub fn tracked_users(&self) -> usize {
        self.presence.len()
    }
}
