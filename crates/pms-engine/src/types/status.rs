//! Execution status shared by plan and node executions.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Defines the execution status of a plan execution or node execution.
///
/// Statuses are split into *flowing* ones (the work is queued, running, or
/// parked waiting for something) and *final* ones. A final status is never
/// overwritten by the regular status write path.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(Serialize, Deserialize, Display, EnumIter, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    /// Created, not yet picked up by a worker.
    #[default]
    Queued,
    /// Facilitating, executing or advising.
    Running,
    /// Parked until an async callback arrives.
    AsyncWaiting,
    /// Parked until a delegate task reports back.
    TaskWaiting,
    /// Parked until a timer fires (initial wait, retry wait).
    TimedWaiting,
    /// Parked until an operator intervenes.
    InterventionWaiting,
    /// Paused by an operator.
    Paused,
    /// Abort has been requested and is propagating.
    Discontinuing,
    /// Not executed because of its skip configuration.
    Skipped,
    /// Finished successfully.
    Succeeded,
    /// Failed, but an adviser chose to ignore the failure.
    IgnoreFailed,
    /// The step reported a business failure.
    Failed,
    /// The engine hit an invariant violation.
    Errored,
    /// Aborted by an operator.
    Aborted,
    /// Timed out.
    Expired,
}

impl Status {
    /// All final statuses.
    pub const FINAL: &'static [Status] = &[
        Status::Skipped,
        Status::Succeeded,
        Status::IgnoreFailed,
        Status::Failed,
        Status::Errored,
        Status::Aborted,
        Status::Expired,
    ];

    /// All flowing (non-final) statuses.
    pub const FLOWING: &'static [Status] = &[
        Status::Queued,
        Status::Running,
        Status::AsyncWaiting,
        Status::TaskWaiting,
        Status::TimedWaiting,
        Status::InterventionWaiting,
        Status::Paused,
        Status::Discontinuing,
    ];

    /// Broken final statuses, in aggregation precedence order.
    pub const BROKEN: &'static [Status] = &[
        Status::Aborted,
        Status::Errored,
        Status::Failed,
        Status::Expired,
    ];

    /// Final statuses that count as success when rolled up.
    pub const POSITIVE: &'static [Status] =
        &[Status::Succeeded, Status::Skipped, Status::IgnoreFailed];

    /// Statuses a node can be parked in while it waits on something external.
    pub const WAITING: &'static [Status] = &[
        Status::AsyncWaiting,
        Status::TaskWaiting,
        Status::TimedWaiting,
        Status::InterventionWaiting,
    ];

    /// Returns whether the status is final.
    #[inline]
    pub fn is_final(self) -> bool {
        Self::FINAL.contains(&self)
    }

    /// Returns whether the status is still flowing.
    #[inline]
    pub fn is_flowing(self) -> bool {
        !self.is_final()
    }

    /// Returns whether the status is a broken final status.
    #[inline]
    pub fn is_broken(self) -> bool {
        Self::BROKEN.contains(&self)
    }

    /// Returns whether the status is a positive final status.
    #[inline]
    pub fn is_positive(self) -> bool {
        Self::POSITIVE.contains(&self)
    }

    /// Returns whether the status is one of the waiting statuses.
    #[inline]
    pub fn is_waiting(self) -> bool {
        Self::WAITING.contains(&self)
    }

    /// Returns the statuses a record may be in for a write of `self` to be
    /// accepted.
    ///
    /// Flowing targets may be reached from any flowing status; final targets
    /// may be reached from any flowing status as well. Final statuses are
    /// never a valid start for an ordinary write.
    pub fn allowed_from(self) -> &'static [Status] {
        match self {
            Status::Queued => &[Status::Queued],
            _ => Self::FLOWING,
        }
    }

    /// Aggregates a set of statuses into a single rolled-up status.
    ///
    /// Precedence:
    /// 1. any flowing status: `RUNNING`, or `PAUSED` when every flowing
    ///    status is paused;
    /// 2. any broken status: `ABORTED` > `ERRORED` > `FAILED` > `EXPIRED`;
    /// 3. otherwise (including the empty set) `SUCCEEDED`.
    pub fn aggregate<I>(statuses: I) -> Status
    where
        I: IntoIterator<Item = Status>,
    {
        let mut flowing = false;
        let mut all_flowing_paused = true;
        let mut broken: Option<Status> = None;

        for status in statuses {
            if status.is_flowing() {
                flowing = true;
                all_flowing_paused &= status == Status::Paused;
            } else if status.is_broken() {
                broken = Some(match broken {
                    Some(current) if precedence(current) <= precedence(status) => current,
                    _ => status,
                });
            }
        }

        if flowing {
            return if all_flowing_paused {
                Status::Paused
            } else {
                Status::Running
            };
        }

        broken.unwrap_or(Status::Succeeded)
    }
}

/// Position of a broken status in [`Status::BROKEN`]; lower wins.
fn precedence(status: Status) -> usize {
    Status::BROKEN
        .iter()
        .position(|s| *s == status)
        .unwrap_or(usize::MAX)
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn final_and_flowing_partition_every_status() {
        for status in Status::iter() {
            assert_ne!(status.is_final(), Status::FLOWING.contains(&status));
        }
    }

    #[test]
    fn string_forms() {
        assert_eq!(Status::AsyncWaiting.to_string(), "ASYNC_WAITING");
        assert_eq!("IGNORE_FAILED".parse::<Status>().unwrap(), Status::IgnoreFailed);
        assert_eq!(serde_json::to_string(&Status::Succeeded).unwrap(), "\"SUCCEEDED\"");
    }

    #[test]
    fn running_dominates() {
        let status = Status::aggregate([Status::Running, Status::Succeeded]);
        assert_eq!(status, Status::Running);
        assert!(status.is_flowing());
    }

    #[test]
    fn running_dominates_failures() {
        let status = Status::aggregate([Status::Failed, Status::AsyncWaiting]);
        assert_eq!(status, Status::Running);
    }

    #[test]
    fn paused_only_when_all_flowing_are_paused() {
        assert_eq!(
            Status::aggregate([Status::Paused, Status::Succeeded]),
            Status::Paused
        );
        assert_eq!(
            Status::aggregate([Status::Paused, Status::Queued]),
            Status::Running
        );
    }

    #[test]
    fn failure_reflected() {
        assert_eq!(
            Status::aggregate([Status::Failed, Status::Succeeded]),
            Status::Failed
        );
    }

    #[test]
    fn broken_precedence_is_order_independent() {
        let a = Status::aggregate([Status::Failed, Status::Aborted, Status::Errored]);
        let b = Status::aggregate([Status::Errored, Status::Failed, Status::Aborted]);
        assert_eq!(a, Status::Aborted);
        assert_eq!(b, Status::Aborted);
        assert_eq!(
            Status::aggregate([Status::Expired, Status::Failed]),
            Status::Failed
        );
    }

    #[test]
    fn positive_statuses_roll_up_to_success() {
        assert_eq!(
            Status::aggregate([Status::Skipped, Status::IgnoreFailed, Status::Succeeded]),
            Status::Succeeded
        );
        assert_eq!(Status::aggregate([]), Status::Succeeded);
    }

    #[test]
    fn final_statuses_are_not_a_valid_start() {
        for target in Status::iter() {
            for from in target.allowed_from() {
                assert!(from.is_flowing());
            }
        }
    }
}
