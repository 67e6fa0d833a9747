pub mod disk_serialize;
pub mod time_util;
