//! Hard input limits. Anything beyond these is rejected as a validation error
//! before the store is touched.

pub const MAX_ACCOUNT_LEN: usize = 64;
pub const MAX_PASSWORD_LEN: usize = 128;
pub const MAX_NAME_LEN: usize = 128;
pub const MAX_PHONE_LEN: usize = 32;
pub const MAX_TEXT_LEN: usize = 1024;

/// Longest accepted request line on the wire (bytes).
pub const MAX_REQUEST_LEN: usize = 64 * 1024;

/// Upper bound on courts per venue; schedule locking walks every court.
pub const MAX_COURTS_PER_VENUE: usize = 64;
