use solarcharge::logging::{LogContext, get_logger_with_context, parse_log_level};
use tracing::Level;

#[test]
fn parse_levels_case_insensitively() {
    assert_eq!(parse_log_level("trace").unwrap(), Level::TRACE);
    assert_eq!(parse_log_level("Error").unwrap(), Level::ERROR);
    assert!(parse_log_level("chatty").is_err());
}

#[test]
fn context_keeps_vin_tail_and_fields() {
    let ctx = LogContext::new("tesla")
        .with_vehicle("5YJ3E1EA7KF000001")
        .with_field("source", "vehicle".to_string());
    assert_eq!(ctx.vehicle.as_deref(), Some("000001"));
    assert_eq!(ctx.extra_fields.get("source").map(String::as_str), Some("vehicle"));

    let logger = get_logger_with_context(ctx);
    assert_eq!(logger.context().component, "tesla");
}
