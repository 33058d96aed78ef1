#[cfg(test)]
mod tests_realtime {
    use crate::{system_time_as_millis, unix_time_as_millis};

    #[test]
    fn real_timestamp_is_monotonic_enough() {
        let now = system_time_as_millis();
        assert!(unix_time_as_millis() >= now);
    }
}
