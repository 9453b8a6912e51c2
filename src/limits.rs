use crate::model::{MINUTES_PER_DAY, Minutes};

pub const MAX_TENANTS: usize = 1024;
pub const MAX_TENANT_NAME_LEN: usize = 128;

pub const MAX_ROOMS_PER_TENANT: usize = 1_000;
pub const MAX_ROOM_NAME_LEN: usize = 128;
pub const MAX_EQUIPMENT_LEN: usize = 1_024;

/// Stored bookings (any status) per room.
pub const MAX_BOOKINGS_PER_ROOM: usize = 100_000;

pub const MAX_SETTING_VALUE_LEN: usize = 256;
pub const MAX_SESSION_DURATION: Minutes = MINUTES_PER_DAY;
