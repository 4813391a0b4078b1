//! Hard caps protecting the engine from unbounded input.

/// Maximum users per tenant directory.
pub const MAX_USERS_PER_TENANT: usize = 50_000;

/// Maximum rooms per tenant.
pub const MAX_ROOMS_PER_TENANT: usize = 10_000;

/// Maximum bookings held on a single room (all statuses).
pub const MAX_BOOKINGS_PER_ROOM: usize = 100_000;

pub const MAX_USERNAME_LEN: usize = 150;
pub const MAX_EMAIL_LEN: usize = 255;
pub const MAX_ROOM_NUMBER_LEN: usize = 64;
pub const MAX_PURPOSE_LEN: usize = 255;
pub const MAX_REJECTION_REASON_LEN: usize = 2_000;

pub const MAX_TENANTS: usize = 1_024;
pub const MAX_TENANT_NAME_LEN: usize = 256;

/// Outbound notification queue depth; sends beyond this are dropped and logged.
pub const NOTIFY_QUEUE_CAPACITY: usize = 1_024;
