//! Crate-wide constants for rift.
//!
//! This module centralizes the magic numbers and protocol strings shared by
//! the codec, bridge, detector and embedder. Constants are grouped by domain.
//!
//! # Categories
//!
//! - **Protocol**: Scheme and wire namespace defaults
//! - **Timeouts**: Handshake, request and viewer load deadlines
//! - **Detection**: Rescan throttling and skipped containers
//! - **Presentation**: Viewer heights for the `height` hint

use std::time::Duration;

// ============================================================================
// Protocol
// ============================================================================

/// Default identifier scheme (`rift://host/path`).
pub const DEFAULT_SCHEME: &str = "rift";

/// Default wire namespace prefixed onto every message `type` (`rift:intent`).
pub const DEFAULT_NAMESPACE: &str = "rift";

/// Hosts that count as local development targets unless configured otherwise.
pub const DEFAULT_LOCAL_HOSTS: &[&str] = &["localhost", "127.0.0.1"];

/// Host suffix that always counts as local development.
pub const DEFAULT_LOCAL_TLD: &str = ".local";

// ============================================================================
// Timeouts
// ============================================================================

/// How long `connect()` waits for the counterpart's context message.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a `query`/`mutate` waits for its correlated reply.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Delay before the single handshake resend when no counterpart is attached.
pub const HANDSHAKE_RETRY_DELAY: Duration = Duration::from_millis(100);

/// How long a content viewer may take to report load or error.
pub const VIEWER_LOAD_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Detection
// ============================================================================

/// Quiet period for mutation-triggered rescans.
///
/// The first mutation scans immediately; further mutations inside the
/// window collapse into a single trailing rescan.
pub const RESCAN_THROTTLE: Duration = Duration::from_millis(500);

/// Element tags whose text is never scanned.
pub const DEFAULT_SKIP_TAGS: &[&str] = &["script", "style"];

// ============================================================================
// Presentation
// ============================================================================

/// Viewer height for `height=compact`.
pub const VIEWER_HEIGHT_COMPACT: u32 = 200;

/// Viewer height when no (or an unknown) `height` hint is given.
pub const VIEWER_HEIGHT_STANDARD: u32 = 350;

/// Viewer height for `height=tall`.
pub const VIEWER_HEIGHT_TALL: u32 = 500;
