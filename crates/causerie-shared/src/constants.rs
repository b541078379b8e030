/// Application name
pub const APP_NAME: &str = "Causerie";

/// Default history page size when the client omits `limit`
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Upper clamp for client-requested history page sizes
pub const MAX_PAGE_SIZE: u32 = 100;

/// Outbound event queue depth per connection; a connection that falls this
/// far behind is treated as disconnected
pub const CONNECTION_QUEUE_DEPTH: usize = 64;

/// Shard count for the connection registry's lock table
pub const REGISTRY_SHARDS: usize = 16;

/// Default HTTP port
pub const DEFAULT_HTTP_PORT: u16 = 5000;

/// Maximum inbound frame size accepted on the realtime channel (256 KiB)
pub const MAX_FRAME_SIZE: usize = 262_144;
