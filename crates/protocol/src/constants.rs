/// Default per-message size ceiling (50 MiB, the bot upload limit).
pub const DEFAULT_CEILING: u64 = 50 * 1024 * 1024;

/// Default chunk size for oversize payloads.
///
/// Equal to the ceiling so every part can be delivered as a direct unit.
pub const DEFAULT_CHUNK_SIZE: u64 = DEFAULT_CEILING;

/// Relay route accepting `POST {UPLOAD_ROUTE}/{name}`.
pub const UPLOAD_ROUTE: &str = "/upload";

/// Relay route serving `GET {FILES_ROUTE}/{name}`.
pub const FILES_ROUTE: &str = "/files";

/// Relay liveness route.
pub const HEALTH_ROUTE: &str = "/health";

/// Separator between the original name and the part index.
pub const PART_SUFFIX: &str = ".part";

/// Default port of the relay server.
pub const DEFAULT_RELAY_PORT: u16 = 8000;
