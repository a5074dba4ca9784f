/// Hard caps enforced by the engine. Exceeding one is a `LimitExceeded` error.
pub const MAX_ROOMS: usize = 10_000;
pub const MAX_INTERVALS_PER_ROOM: usize = 50_000;
pub const MAX_CONTENT_ENTRIES: usize = 5_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_SLUG_LEN: usize = 128;
pub const MAX_TEXT_LEN: usize = 16 * 1024;
pub const MAX_GUEST_FIELD_LEN: usize = 512;
pub const MAX_IMAGES_PER_ROOM: usize = 64;

/// Longest stay a single booking may cover.
pub const MAX_STAY_NIGHTS: u32 = 90;
/// Longest owner block.
pub const MAX_BLOCK_DAYS: u32 = 732;
/// Widest calendar window a single query may request.
pub const MAX_CALENDAR_WINDOW_DAYS: u32 = 732;
/// Units a single room type may represent.
pub const MAX_ROOM_QUANTITY: u32 = 1_000;
pub const MAX_OCCUPANCY: u32 = 32;
