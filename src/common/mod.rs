mod ptr;
mod set;

pub use self::ptr::Raw;
pub use self::set::AccessSet;
pub use self::set::Rank;
pub use self::set::RankSet;
pub use self::set::RefSet;
pub use self::set::TraceId;
pub use self::set::TraceSet;
pub use self::set::RANK_LIMIT;
pub use self::set::TRACE_LIMIT;

/// Structure signature, stamped into every long-lived structure on init and
/// overwritten with `SIG_INVALID` on finish. A wrong signature means a
/// dangling or miscast handle and is always a fatal programming error.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Sig(pub u32);

pub const SIG_SEG: Sig = Sig(0x5195E999);
pub const SIG_SEG_GC: Sig = Sig(0x5199C5E9);
pub const SIG_SEG_CLASS: Sig = Sig(0x5195E9C1);
pub const SIG_ARENA: Sig = Sig(0x519A7E4A);
pub const SIG_POOL: Sig = Sig(0x519B0071);
pub const SIG_BUFFER: Sig = Sig(0x519B0FFA);
pub const SIG_INVALID: Sig = Sig(0x51915BAD);
