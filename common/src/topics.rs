pub const TOPIC_SNAPSHOT: &str = "snapshot";
pub const TOPIC_SET_PREFIX: &str = "set";

pub const FIELD_ENABLED: &str = "enabled";
pub const FIELD_SETPOINT: &str = "setpoint";
pub const FIELD_MIN_SETPOINT: &str = "min_setpoint";
pub const FIELD_MAX_SETPOINT: &str = "max_setpoint";
pub const FIELD_MODE: &str = "mode";
pub const FIELD_FAN_SPEED: &str = "fan_speed";

pub fn topic(base: &str, suffix: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), suffix)
}

pub fn snapshot_topic(base: &str) -> String {
    topic(base, TOPIC_SNAPSHOT)
}

pub fn command_filter(base: &str) -> String {
    topic(base, &format!("{TOPIC_SET_PREFIX}/+"))
}

pub fn command_field<'a>(base: &str, topic: &'a str) -> Option<&'a str> {
    let field = topic
        .strip_prefix(base.trim_end_matches('/'))?
        .strip_prefix('/')?
        .strip_prefix(TOPIC_SET_PREFIX)?
        .strip_prefix('/')?;
    (!field.is_empty() && !field.contains('/')).then_some(field)
}
