//! Wire-level building blocks: 7-bit packing, FAT date/time, message IDs,
//! and SysEx frame build/parse. See spec §3/§4.1.

mod fat_time;
mod frame;
mod message_id;
mod pack7;

pub use fat_time::{pack_fat_datetime, Timestamp};
pub use frame::{
    build_frame, parse_frame, Command, Frame, ManufacturerMode, DEVELOPER_MFR_ID,
    SYNTHSTROM_MFR_ID,
};
pub use message_id::{MessageIdGenerator, MsgId};
pub use pack7::{pack7, unpack7};
