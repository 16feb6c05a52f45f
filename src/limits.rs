//! Hard caps protecting the engine from unbounded input.
//!
//! Every limit is enforced at the mutation that could cross it and surfaced
//! as `EngineError::LimitExceeded`.

pub const MAX_TENANTS: usize = 1024;
pub const MAX_TENANT_NAME_LEN: usize = 256;

pub const MAX_BUSINESSES_PER_TENANT: usize = 10_000;
pub const MAX_SERVICES_PER_BUSINESS: usize = 500;
pub const MAX_ADDONS_PER_BUSINESS: usize = 500;
pub const MAX_QUESTIONS_PER_BUSINESS: usize = 200;
pub const MAX_BOOKINGS_PER_BUSINESS: usize = 100_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_ANSWER_LEN: usize = 2_000;
pub const MAX_QUESTION_LEN: usize = 1_000;
pub const MAX_ADDONS_PER_BOOKING: usize = 50;

/// Longest service-plus-buffer block the calculator will consider, minutes.
pub const MAX_BLOCK_MINUTES: i64 = 24 * 60;

/// Upper bound on a single WAL event payload; longer frames are treated as
/// corruption during replay.
pub const MAX_EVENT_BYTES: usize = 1 << 20;
