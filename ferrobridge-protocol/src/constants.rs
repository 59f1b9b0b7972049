//! Protocol constants

/// Bytes of the connectivity probe sent before the version check
pub const PROBE_LEN: usize = 3;

/// Length of a verify key (hex MD5) presented by a client
pub const VERIFY_KEY_LEN: usize = 32;

/// Length of a secret / P2P token
pub const TOKEN_LEN: usize = 32;

/// Length of every flag
pub const FLAG_LEN: usize = 4;

/// Written when the verify key is rejected
pub const VERIFY_ERROR: &[u8; FLAG_LEN] = b"vkey";

/// Written when the verify key is accepted
pub const VERIFY_SUCCESS: &[u8; FLAG_LEN] = b"sucs";

/// Close notice sent on a superseded signal connection
pub const RES_CLOSE: &[u8; FLAG_LEN] = b"clse";

/// Signal notice announcing a P2P rendezvous
pub const NEW_UDP_CONN: &[u8; FLAG_LEN] = b"udpc";

/// Delimiter between fields of a textual message
pub const CONN_DATA_SEQ: &str = "*#*";

/// Maximum multiplexer frame size (16MB)
pub const MAX_MUX_FRAME_SIZE: u32 = 16 * 1024 * 1024;
