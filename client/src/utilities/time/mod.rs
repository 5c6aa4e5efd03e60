use chrono::{DateTime, Utc};

pub(crate) struct ClientTime;

impl ClientTime {
    pub(crate) fn now() -> DateTime<Utc> {
        Utc::now()
    }

    pub(crate) fn now_millis() -> u64 {
        Utc::now().timestamp_millis() as u64
    }
}
