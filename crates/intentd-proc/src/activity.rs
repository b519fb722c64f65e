//! Activity records.
//!
//! Per-activity lifecycle state as the process and broadcast subsystems
//! see it. The contract here is read-only state exposure: the window
//! manager and stack supervisor drive the transitions; consumers only ask
//! questions like "is this still interesting to the user".

use chrono::{DateTime, Utc};
use intentd_intent::{ComponentName, Intent, UserId};
use serde::{Deserialize, Serialize};

/// Lifecycle state of one activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivityState {
    Initializing,
    Resumed,
    Pausing,
    Paused,
    Stopping,
    Stopped,
    Finishing,
    Destroyed,
}

/// One activity in a task stack.
#[derive(Debug, Clone)]
pub struct ActivityRecord {
    pub component: ComponentName,
    pub user_id: UserId,
    /// The intent that launched this activity.
    pub intent: Intent,
    pub state: ActivityState,
    /// Does this activity's window need to be shown?
    pub visible: bool,
    /// Is the window actually visible right now?
    pub now_visible: bool,
    /// Have we told the activity to sleep?
    pub sleeping: bool,
    /// Is the activity on its way out?
    pub finishing: bool,
    /// Has the activity reported idle after launch?
    pub idle: bool,
    pub launch_time: DateTime<Utc>,
    pub last_visible_time: Option<DateTime<Utc>>,
}

impl ActivityRecord {
    pub fn new(component: ComponentName, user_id: UserId, intent: Intent) -> Self {
        Self {
            component,
            user_id,
            intent,
            state: ActivityState::Initializing,
            visible: false,
            now_visible: false,
            sleeping: false,
            finishing: false,
            idle: false,
            launch_time: Utc::now(),
            last_visible_time: None,
        }
    }

    /// Whether the user would notice this activity going away: visible,
    /// becoming visible, or in the resume/pause window.
    pub fn is_interesting_to_user(&self) -> bool {
        self.visible
            || self.now_visible
            || self.state == ActivityState::Pausing
            || self.state == ActivityState::Resumed
    }

    /// Tell the activity to sleep or wake. Redundant transitions are
    /// dropped unless `force` replays the current value.
    pub fn set_sleeping(&mut self, sleeping: bool, force: bool) {
        if !force && self.sleeping == sleeping {
            return;
        }
        tracing::debug!(component = %self.component, sleeping, "activity sleep state changed");
        self.sleeping = sleeping;
    }

    pub fn make_visible(&mut self) {
        self.visible = true;
        self.now_visible = true;
        self.last_visible_time = Some(Utc::now());
    }

    pub fn make_invisible(&mut self) {
        self.visible = false;
        self.now_visible = false;
    }

    pub fn set_state(&mut self, state: ActivityState) {
        tracing::trace!(component = %self.component, from = ?self.state, to = ?state, "activity state");
        self.state = state;
        if state == ActivityState::Finishing || state == ActivityState::Destroyed {
            self.finishing = true;
        }
    }
}
