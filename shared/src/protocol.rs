/// Path each monitored service serves its health report on
pub const HEALTH_PATH: &str = "/health";

/// Monitor API paths
pub const REGISTER_PATH: &str = "/register";
pub const METRICS_PATH: &str = "/metrics";

/// Values of the `status` field in metrics responses
pub const STATUS_UP: &str = "UP";
pub const STATUS_DOWN: &str = "DOWN";
