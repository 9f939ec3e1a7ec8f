// Worker constants (no magic values)
use std::time::Duration;

/// Sleep duration when no deliveries are available (100ms)
pub const IDLE_SLEEP_DURATION: Duration = Duration::from_millis(100);

/// Sleep duration after an infrastructure error before claiming again (1s)
pub const ERROR_RECOVERY_SLEEP_DURATION: Duration = Duration::from_secs(1);

/// Default retry base delay (1000ms = 1s)
pub const DEFAULT_RETRY_BASE_DELAY_MS: i64 = 1000;

/// Default retry budget per job
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default deadline for one solver attempt (5 minutes)
pub const DEFAULT_ATTEMPT_DEADLINE: Duration = Duration::from_secs(300);

/// Default queue visibility timeout for a fresh delivery
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(60);

/// Slack added to the attempt deadline for leases and visibility extensions
pub const DEFAULT_LEASE_GRACE: Duration = Duration::from_secs(30);

/// Pending jobs older than this get their descriptor republished (5 minutes)
pub const DEFAULT_STALE_PENDING_MS: i64 = 5 * 60 * 1000;

/// How often a backing-off worker looks for a cancel request
pub const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Compare-and-set attempts before giving up on a contended record
pub const MAX_CAS_RETRIES: usize = 5;
