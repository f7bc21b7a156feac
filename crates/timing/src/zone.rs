use chrono::{DateTime, FixedOffset, Local, Offset, TimeZone, Utc};
use std::time::SystemTime;

/// The local UTC offset in effect at `t`. Pinned to UTC in test mode so
/// that formatted times in tests do not depend on the machine.
pub fn local_offset(t: SystemTime) -> FixedOffset {
    if crate::in_test_mode() {
        return Utc.fix();
    }
    let utc = DateTime::<Utc>::from(t);
    Local.offset_from_utc_datetime(&utc.naive_utc()).fix()
}

/// `t` as a calendar time in the local zone (UTC in test mode).
pub fn local_time(t: SystemTime) -> DateTime<FixedOffset> {
    DateTime::<Utc>::from(t).with_timezone(&local_offset(t))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_mode_uses_utc() {
        crate::test_mode();
        let t = local_time(crate::now());
        assert_eq!(t.offset().local_minus_utc(), 0);
        assert_eq!((t.hour(), t.minute()), (20, 47));
        crate::exit_test_mode();
    }
}
