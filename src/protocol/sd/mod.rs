mod entry;
pub use entry::{ENTRY_SIZE, Entry, EntryKind, OptionsCount};

mod event_group_entry;
pub use event_group_entry::{COUNTER_MASK, EventGroupEntry};

mod service_entry;
pub use service_entry::ServiceEntry;

mod flags;
pub use flags::Flags;

mod header;
pub use header::Header;

mod options;
pub use options::{Options, TransportProtocol};

/// TTL values are 24 bits wide on the wire
pub const TTL_MASK: u32 = 0x00FF_FFFF;
/// TTL meaning "valid until the next reboot of the sender"
pub const TTL_INFINITE: u32 = TTL_MASK;
pub const ANY_SERVICE: u16 = 0xFFFF;
pub const ANY_INSTANCE: u16 = 0xFFFF;
pub const ANY_MAJOR_VERSION: u8 = 0xFF;
pub const ANY_MINOR_VERSION: u32 = 0xFFFF_FFFF;

/// How long an entry with `ttl` stays valid, `None` for [`TTL_INFINITE`].
pub fn ttl_duration(ttl: u32) -> Option<std::time::Duration> {
    let ttl = ttl & TTL_MASK;
    (ttl != TTL_INFINITE).then(|| std::time::Duration::from_secs(u64::from(ttl)))
}
