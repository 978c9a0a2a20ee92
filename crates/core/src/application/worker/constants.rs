// Worker constants (no magic values)
use std::time::Duration;

/// Default execution slot count
pub const DEFAULT_POOL_SIZE: usize = 8;

/// Default result retention (10 minutes)
pub const DEFAULT_RESULT_TTL: Duration = Duration::from_secs(10 * 60);

/// Default time in-flight tasks get to finish after shutdown is requested (5 seconds)
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
