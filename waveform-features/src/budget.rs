use serde::Deserialize;
use std::time::{Duration, Instant};

/// Wall-clock limits on crossing-time extraction.
/// Either limit may be absent, in which case only the root finder's
/// iteration cap bounds the work.
#[derive(Default, Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct TimingBudget {
    #[serde(default, rename = "event-timeout-ms", with = "millis")]
    pub event: Option<Duration>,
    #[serde(default, rename = "file-timeout-ms", with = "millis")]
    pub file: Option<Duration>,
}

impl TimingBudget {
    pub fn file_deadline(&self) -> Deadline {
        Deadline::after(self.file)
    }

    /// The deadline for one event, which never outlasts the file's deadline.
    pub fn event_deadline(&self, file_deadline: Deadline) -> Deadline {
        Deadline::after(self.event).earliest(file_deadline)
    }
}

#[derive(Default, Debug, Clone, Copy, PartialEq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    pub fn never() -> Self {
        Self(None)
    }

    pub fn after(budget: Option<Duration>) -> Self {
        Self(budget.map(|budget| Instant::now() + budget))
    }

    pub fn earliest(self, other: Deadline) -> Self {
        match (self.0, other.0) {
            (Some(a), Some(b)) => Self(Some(a.min(b))),
            (a, b) => Self(a.or(b)),
        }
    }

    pub fn has_passed(&self) -> bool {
        self.0.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
