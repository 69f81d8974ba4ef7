use super::*;

#[test]
fn message_ids_count_up_from_one() {
    let ids = MessageIdAllocator::new();
    assert_eq!(ids.next(), 1);
    assert_eq!(ids.next(), 2);
    assert_eq!(ids.next(), 3);
}

#[test]
fn message_ids_wrap_around_skipping_zero() {
    let ids = MessageIdAllocator::new();
    for _ in 0..65_533 {
        ids.next();
    }
    assert_eq!(ids.next(), 65_534);
    assert_eq!(ids.next(), 65_535);
    // Zero is the protocol's "no id" sentinel and must never be produced.
    assert_eq!(ids.next(), 1);
    assert_eq!(ids.next(), 2);
}

#[test]
fn config_rejects_empty_hostname() {
    let config = SessionConfig::new("", 1883);
    assert_eq!(config.validate(), Err(Error::InvalidArgument));
}

#[test]
fn config_rejects_zero_keepalive() {
    let mut config = SessionConfig::new("broker.example", 1883);
    config.keep_alive_ms = 0;
    assert_eq!(config.validate(), Err(Error::InvalidArgument));
}

#[test]
fn config_defaults_keepalive_to_one_minute() {
    let config = SessionConfig::new("broker.example", 1883);
    assert_eq!(config.keep_alive_ms, DEFAULT_KEEP_ALIVE_MS);
    assert!(config.validate().is_ok());
}
