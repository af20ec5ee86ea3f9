use std::collections::BTreeSet;

use super::{
    platform::{CourseId, Group, GroupId},
    types::UtcDateTime,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExchangeId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeWindow {
    pub open: UtcDateTime,
    pub close: UtcDateTime,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Availability {
    Open,
    NotOpenYet(UtcDateTime),
    Closed(UtcDateTime),
}

#[derive(Clone, Debug)]
pub struct Exchange {
    pub id: ExchangeId,
    pub course: CourseId,
    pub name: String,
    pub time_window: Option<TimeWindow>,
    pub anonymous: bool,
    pub students_only: bool,
    /// Stored with the exchange settings but not enforced anywhere.
    pub exchange_limit: u32,
    /// Groups that can be traded in this exchange, sorted by name.
    pub available_groups: Vec<Group>,
}

impl Exchange {
    pub fn availability(&self, now: UtcDateTime) -> Availability {
        match self.time_window {
            Some(TimeWindow { open, .. }) if now < open => Availability::NotOpenYet(open),
            Some(TimeWindow { close, .. }) if now > close => Availability::Closed(close),
            _ => Availability::Open,
        }
    }

    pub fn is_group_available(&self, group: GroupId) -> bool {
        self.available_groups.iter().any(|g| g.id == group)
    }

    pub fn group(&self, group: GroupId) -> Option<&Group> {
        self.available_groups.iter().find(|g| g.id == group)
    }
}

#[derive(Clone, Debug)]
pub struct NewExchange {
    pub course: CourseId,
    pub name: String,
    pub time_window: Option<TimeWindow>,
    pub anonymous: bool,
    pub students_only: bool,
    pub exchange_limit: u32,
    pub available_groups: BTreeSet<GroupId>,
}
