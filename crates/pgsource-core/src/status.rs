//! Pipeline status and its condition set.
//!
//! Four constituent conditions track each reconcile stage; `Ready` is always
//! derived from them and never set directly:
//!
//! - `True` iff every constituent is `True`
//! - `False` if any constituent is `False` (mirrors the first such reason)
//! - `Unknown` otherwise
//!
//! A reconcile run starts from [`PipelineStatus::fresh`] rather than the
//! previously persisted status, so a stage that is not reached in a run can
//! never keep a stale `True`.

use serde::{Deserialize, Serialize};

use crate::epoch_secs;

/// Reason used for every condition before its stage has run.
pub const REASON_RECONCILING: &str = "Reconciling";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionType {
    FunctionReady,
    TriggersReady,
    ReceiverReady,
    BindingReady,
    Ready,
}

impl ConditionType {
    /// Constituents of `Ready`, in stage order.
    pub const DEPENDENTS: [ConditionType; 4] = [
        ConditionType::FunctionReady,
        ConditionType::TriggersReady,
        ConditionType::ReceiverReady,
        ConditionType::BindingReady,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: ConditionType,
    pub status: ConditionStatus,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    /// Unix timestamp of the last change of `status`.
    #[serde(default)]
    pub last_transition_time: u64,
}

impl Condition {
    fn unknown(type_: ConditionType, now: u64) -> Self {
        Self {
            type_,
            status: ConditionStatus::Unknown,
            reason: REASON_RECONCILING.to_string(),
            message: String::new(),
            last_transition_time: now,
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// Observed state of a pipeline.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PipelineStatus {
    /// Last spec generation fully processed by a reconcile run.
    #[serde(default)]
    pub observed_generation: u64,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Sink URI resolved by the delivery binding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sink_uri: Option<String>,
    /// Address of the available receiver.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_address: Option<String>,
}

impl PipelineStatus {
    /// A status with every condition `Unknown`, observing `generation`.
    pub fn fresh(generation: u64) -> Self {
        let now = epoch_secs();
        let mut conditions: Vec<Condition> = ConditionType::DEPENDENTS
            .iter()
            .map(|t| Condition::unknown(*t, now))
            .collect();
        conditions.push(Condition::unknown(ConditionType::Ready, now));
        Self {
            observed_generation: generation,
            conditions,
            sink_uri: None,
            receiver_address: None,
        }
    }

    pub fn condition(&self, type_: ConditionType) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    pub fn status_of(&self, type_: ConditionType) -> ConditionStatus {
        self.condition(type_)
            .map(|c| c.status)
            .unwrap_or(ConditionStatus::Unknown)
    }

    pub fn is_ready(&self) -> bool {
        self.status_of(ConditionType::Ready) == ConditionStatus::True
    }

    pub fn mark_true(&mut self, type_: ConditionType) {
        self.set(type_, ConditionStatus::True, "", "");
    }

    pub fn mark_false(&mut self, type_: ConditionType, reason: &str, message: &str) {
        self.set(type_, ConditionStatus::False, reason, message);
    }

    pub fn mark_unknown(&mut self, type_: ConditionType, reason: &str, message: &str) {
        self.set(type_, ConditionStatus::Unknown, reason, message);
    }

    fn set(&mut self, type_: ConditionType, status: ConditionStatus, reason: &str, message: &str) {
        debug_assert!(type_ != ConditionType::Ready, "Ready is derived");
        self.put(type_, status, reason, message);
        self.derive_ready();
    }

    fn put(&mut self, type_: ConditionType, status: ConditionStatus, reason: &str, message: &str) {
        let now = epoch_secs();
        match self.conditions.iter_mut().find(|c| c.type_ == type_) {
            Some(c) => {
                if c.status != status {
                    c.last_transition_time = now;
                }
                c.status = status;
                c.reason = reason.to_string();
                c.message = message.to_string();
            }
            None => self.conditions.push(Condition {
                type_,
                status,
                reason: reason.to_string(),
                message: message.to_string(),
                last_transition_time: now,
            }),
        }
    }

    fn derive_ready(&mut self) {
        let dependents: Vec<Condition> = ConditionType::DEPENDENTS
            .iter()
            .map(|t| {
                self.condition(*t)
                    .cloned()
                    .unwrap_or_else(|| Condition::unknown(*t, 0))
            })
            .collect();

        if dependents.iter().all(Condition::is_true) {
            self.put(ConditionType::Ready, ConditionStatus::True, "", "");
        } else if let Some(c) = dependents
            .iter()
            .find(|c| c.status == ConditionStatus::False)
        {
            self.put(ConditionType::Ready, ConditionStatus::False, &c.reason, &c.message);
        } else if let Some(c) = dependents
            .iter()
            .find(|c| c.status == ConditionStatus::Unknown)
        {
            self.put(ConditionType::Ready, ConditionStatus::Unknown, &c.reason, &c.message);
        }
    }

    /// Keep `previous` transition times for conditions whose status is unchanged.
    pub fn carry_transition_times(&mut self, previous: &PipelineStatus) {
        for c in &mut self.conditions {
            if let Some(old) = previous.condition(c.type_) {
                if old.status == c.status {
                    c.last_transition_time = old.last_transition_time;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_true() -> PipelineStatus {
        let mut s = PipelineStatus::fresh(1);
        for t in ConditionType::DEPENDENTS {
            s.mark_true(t);
        }
        s
    }

    #[test]
    fn fresh_is_all_unknown() {
        let s = PipelineStatus::fresh(3);
        assert_eq!(s.observed_generation, 3);
        assert_eq!(s.conditions.len(), 5);
        assert!(s
            .conditions
            .iter()
            .all(|c| c.status == ConditionStatus::Unknown));
        assert!(!s.is_ready());
    }

    #[test]
    fn ready_iff_all_dependents_true() {
        let mut s = PipelineStatus::fresh(1);
        s.mark_true(ConditionType::FunctionReady);
        s.mark_true(ConditionType::TriggersReady);
        s.mark_true(ConditionType::ReceiverReady);
        assert_eq!(s.status_of(ConditionType::Ready), ConditionStatus::Unknown);

        s.mark_true(ConditionType::BindingReady);
        assert!(s.is_ready());
    }

    #[test]
    fn any_false_makes_ready_false_with_its_reason() {
        let mut s = all_true();
        s.mark_false(
            ConditionType::TriggersReady,
            "MissingDependency",
            "table \"orders\" does not exist",
        );
        let ready = s.condition(ConditionType::Ready).unwrap();
        assert_eq!(ready.status, ConditionStatus::False);
        assert_eq!(ready.reason, "MissingDependency");
        assert!(ready.message.contains("orders"));
    }

    #[test]
    fn unknown_dependent_makes_ready_unknown() {
        let mut s = all_true();
        s.mark_unknown(ConditionType::ReceiverReady, "ReceiverUnavailable", "0 available");
        assert_eq!(s.status_of(ConditionType::Ready), ConditionStatus::Unknown);
    }

    #[test]
    fn transition_time_carried_only_when_status_unchanged() {
        let mut old = all_true();
        for c in &mut old.conditions {
            c.last_transition_time = 42;
        }

        let mut new = PipelineStatus::fresh(2);
        new.mark_true(ConditionType::FunctionReady);
        new.mark_false(ConditionType::TriggersReady, "DdlFailed", "permission denied");
        new.carry_transition_times(&old);

        assert_eq!(
            new.condition(ConditionType::FunctionReady).unwrap().last_transition_time,
            42
        );
        assert_ne!(
            new.condition(ConditionType::TriggersReady).unwrap().last_transition_time,
            42
        );
    }

    #[test]
    fn serializes_type_field() {
        let s = PipelineStatus::fresh(1);
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["conditions"][0]["type"], "FunctionReady");
        assert_eq!(json["conditions"][0]["status"], "Unknown");
    }
}
