pub type ByteSize = usize;
pub type Word = usize;

#[cfg(target_pointer_width = "64")]
pub const LOG_POINTER_SIZE : usize = 3;
#[cfg(target_pointer_width = "32")]
pub const LOG_POINTER_SIZE : usize = 2;

pub const POINTER_SIZE     : ByteSize = 1 << LOG_POINTER_SIZE;
pub const WORD_SIZE        : ByteSize = 1 << LOG_POINTER_SIZE;
pub const WORD_BITS        : usize    = WORD_SIZE * 8;

mod address;
pub use address::Address;

pub mod ring;
pub use ring::RingNode;
