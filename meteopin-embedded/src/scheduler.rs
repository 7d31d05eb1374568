use heapless::Vec;
use serde::{Deserialize, Serialize};

use crate::config::{
    CONTROL_TICK_MS, HOUSEKEEPING_MS, RECONFIG_CHECK_MS, SAMPLE_INTERVAL_MS, SEND_INTERVAL_MS,
};
use crate::error::{Error, Result};

/// Periods of the five cooperative activities, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulePlan {
    pub send_interval_ms: u64,
    pub sample_interval_ms: u64,
    pub control_tick_ms: u64,
    pub reconfig_check_ms: u64,
    pub housekeeping_ms: u64,
}

impl Default for SchedulePlan {
    fn default() -> Self {
        Self {
            send_interval_ms: SEND_INTERVAL_MS,
            sample_interval_ms: SAMPLE_INTERVAL_MS,
            control_tick_ms: CONTROL_TICK_MS,
            reconfig_check_ms: RECONFIG_CHECK_MS,
            housekeeping_ms: HOUSEKEEPING_MS,
        }
    }
}

impl SchedulePlan {
    pub fn validate(&self) -> Result<()> {
        if Activity::ALL.iter().any(|a| self.period(*a) == 0) {
            return Err(Error::InvalidSchedule("periods must be non-zero"));
        }
        // A send needs a fresh sample to deliver.
        if self.sample_interval_ms > self.send_interval_ms {
            return Err(Error::InvalidSchedule(
                "sample interval exceeds send interval",
            ));
        }
        Ok(())
    }

    pub fn period(&self, activity: Activity) -> u64 {
        match activity {
            Activity::Control => self.control_tick_ms,
            Activity::Reconfigure => self.reconfig_check_ms,
            Activity::Housekeeping => self.housekeeping_ms,
            Activity::Sample => self.sample_interval_ms,
            Activity::Send => self.send_interval_ms,
        }
    }
}

/// Periodic activities, in the order they run when due at the same instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Activity {
    Control,
    Reconfigure,
    Housekeeping,
    Sample,
    Send,
}

impl Activity {
    pub const ALL: [Activity; 5] = [
        Activity::Control,
        Activity::Reconfigure,
        Activity::Housekeeping,
        Activity::Sample,
        Activity::Send,
    ];
}

/// Fixed-rate deadlines over an injected millisecond clock.
///
/// Deadlines advance by whole periods, so a late poll never shifts the
/// cadence. Slots that passed entirely between two polls are skipped and
/// counted instead of being run back to back.
#[derive(Debug, Clone)]
pub struct Scheduler {
    plan: SchedulePlan,
    next_due: [u64; 5],
    missed: [u32; 5],
}

impl Scheduler {
    /// Everything but the send activity is due at `start_ms`; the first send
    /// comes one full send period later.
    pub fn new(plan: SchedulePlan, start_ms: u64) -> Result<Self> {
        plan.validate()?;

        let mut next_due = [start_ms; 5];
        next_due[Activity::Send as usize] = start_ms + plan.send_interval_ms;

        Ok(Self {
            plan,
            next_due,
            missed: [0; 5],
        })
    }

    pub fn plan(&self) -> &SchedulePlan {
        &self.plan
    }

    /// Activities due at `now_ms`, in run order.
    pub fn due(&mut self, now_ms: u64) -> Vec<Activity, 5> {
        let mut fired = Vec::new();

        for activity in Activity::ALL {
            let slot = activity as usize;
            if now_ms < self.next_due[slot] {
                continue;
            }

            let period = self.plan.period(activity);
            let skipped = (now_ms - self.next_due[slot]) / period;
            if skipped > 0 {
                log::debug!("{:?} fell behind by {} periods", activity, skipped);
                self.missed[slot] = self.missed[slot].saturating_add(skipped as u32);
            }
            self.next_due[slot] += (skipped + 1) * period;

            let _ = fired.push(activity);
        }

        fired
    }

    /// Earliest instant anything becomes due.
    pub fn next_deadline(&self) -> u64 {
        self.next_due.iter().copied().min().unwrap_or(0)
    }

    pub fn next_due(&self, activity: Activity) -> u64 {
        self.next_due[activity as usize]
    }

    /// Slots of `activity` skipped because polling fell behind.
    pub fn missed(&self, activity: Activity) -> u32 {
        self.missed[activity as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_plan_is_valid() {
        let plan = SchedulePlan::default();

        assert!(plan.validate().is_ok());
        assert_eq!(plan.period(Activity::Sample), 3_000);
        assert_eq!(plan.period(Activity::Send), 60_000);
    }

    #[test]
    fn test_invalid_plans() {
        let plan = SchedulePlan {
            sample_interval_ms: 120_000,
            ..SchedulePlan::default()
        };
        assert_eq!(
            Scheduler::new(plan, 0).map(|_| ()),
            Err(Error::InvalidSchedule(
                "sample interval exceeds send interval"
            ))
        );

        let plan = SchedulePlan {
            control_tick_ms: 0,
            ..SchedulePlan::default()
        };
        assert!(plan.validate().is_err());
    }

    #[test]
    fn test_fire_counts_over_one_send_period() {
        let mut scheduler = Scheduler::new(SchedulePlan::default(), 0).unwrap();
        let mut counts = [0u32; 5];

        let mut now = 0;
        while now <= 60_000 {
            for activity in scheduler.due(now) {
                counts[activity as usize] += 1;
            }
            now += 100;
        }

        assert_eq!(counts[Activity::Control as usize], 201);
        assert_eq!(counts[Activity::Reconfigure as usize], 121);
        assert_eq!(counts[Activity::Housekeeping as usize], 151);
        assert_eq!(counts[Activity::Sample as usize], 21);
        assert_eq!(counts[Activity::Send as usize], 1);
        assert_eq!(scheduler.missed(Activity::Control), 0);
    }

    #[test]
    fn test_simultaneous_activities_run_in_priority_order() {
        let mut scheduler = Scheduler::new(SchedulePlan::default(), 0).unwrap();

        let first = scheduler.due(0);
        assert_eq!(
            first.as_slice(),
            &[
                Activity::Control,
                Activity::Reconfigure,
                Activity::Housekeeping,
                Activity::Sample
            ]
        );

        let at_send = scheduler.due(60_000);
        assert_eq!(at_send.first(), Some(&Activity::Control));
        assert_eq!(at_send.last(), Some(&Activity::Send));
        assert!(at_send.contains(&Activity::Sample));
    }

    #[test]
    fn test_late_poll_skips_missed_slots() {
        let mut scheduler = Scheduler::new(SchedulePlan::default(), 0).unwrap();
        scheduler.due(0);

        let fired = scheduler.due(1_000);
        assert_eq!(
            fired.iter().filter(|a| **a == Activity::Control).count(),
            1
        );
        assert_eq!(scheduler.missed(Activity::Control), 2);
        assert_eq!(scheduler.next_due(Activity::Control), 1_200);

        assert!(scheduler.due(1_100).is_empty());
        assert_eq!(scheduler.next_deadline(), 1_200);
    }

    #[test]
    fn test_offset_start() {
        let mut scheduler = Scheduler::new(SchedulePlan::default(), 5_000).unwrap();

        assert!(scheduler.due(4_999).is_empty());
        assert_eq!(scheduler.due(5_000).len(), 4);
        assert_eq!(scheduler.next_due(Activity::Send), 65_000);
    }
}
