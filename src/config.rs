//! Fixed timing constants and SSH algorithm profiles.
//!
//! The timing values mirror what interactive network-device shells need in
//! practice: a short connection bound, short settle pauses after each input
//! and a long ceiling for slow `show` commands. The algorithm lists keep older
//! devices reachable when the legacy profile is selected.

use std::time::Duration;

use russh::keys::{Algorithm, EcdsaCurve, HashAlg};
use russh::{cipher, compression, kex, mac};

/// Bound on TCP connect plus authentication.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Initial window for the login banner and first prompt.
pub const BANNER_WINDOW: Duration = Duration::from_secs(3);

/// Initial window for `enable`, the privileged password and paging commands.
pub const STEP_WINDOW: Duration = Duration::from_secs(2);

/// Initial window for a user command to start producing output.
pub const COMMAND_WINDOW: Duration = Duration::from_secs(120);

/// Window used to drain remaining output after `exit`.
pub const DRAIN_WINDOW: Duration = Duration::from_secs(2);

/// Settle delay after `enable`, the privileged password and `exit`.
pub const LONG_SETTLE: Duration = Duration::from_millis(500);

/// Settle delay after paging commands and user commands.
pub const SHORT_SETTLE: Duration = Duration::from_millis(300);

/// Smallest accepted inactivity window.
pub const MIN_CHUNK_TIMEOUT: Duration = Duration::from_secs(1);

/// Marker printed by the device pager when more output is pending.
pub const MORE_MARKER: &str = "--More--";

/// Keystroke sent to the pager to continue output.
pub const MORE_CONTINUE: &[u8] = b" ";

pub const ENABLE_COMMAND: &str = "enable";
pub const DISABLE_PAGING_COMMAND: &str = "terminal length 0";
pub const RESTORE_PAGING_COMMAND: &str = "terminal length 24";
pub const EXIT_COMMAND: &str = "exit";

/// Default SSH port when the device address carries none.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Longest single sleep of the scheduler timer before it re-reads the clock.
pub const SCHEDULER_RECHECK: Duration = Duration::from_secs(60);

/// Key exchange algorithms accepted by the secure profile.
pub const SECURE_KEX_ORDER: &[kex::Name] = &[
    kex::CURVE25519,
    kex::CURVE25519_PRE_RFC_8731,
    kex::ECDH_SHA2_NISTP256,
    kex::ECDH_SHA2_NISTP384,
    kex::ECDH_SHA2_NISTP521,
    kex::DH_G14_SHA256,
    kex::DH_G16_SHA512,
];

/// Key exchange algorithms for older IOS images, including group1/group14 SHA-1.
pub const LEGACY_KEX_ORDER: &[kex::Name] = &[
    kex::CURVE25519,
    kex::CURVE25519_PRE_RFC_8731,
    kex::ECDH_SHA2_NISTP256,
    kex::ECDH_SHA2_NISTP384,
    kex::ECDH_SHA2_NISTP521,
    kex::DH_G14_SHA256,
    kex::DH_G14_SHA1,
    kex::DH_G1_SHA1,
    kex::DH_GEX_SHA1,
    kex::DH_GEX_SHA256,
];

pub const SECURE_CIPHERS: &[cipher::Name] = &[
    cipher::CHACHA20_POLY1305,
    cipher::AES_256_GCM,
    cipher::AES_256_CTR,
    cipher::AES_192_CTR,
    cipher::AES_128_CTR,
];

/// Ciphers for older devices. CBC modes are kept because many IOS 12.x images offer nothing else.
pub const LEGACY_CIPHERS: &[cipher::Name] = &[
    cipher::AES_256_GCM,
    cipher::CHACHA20_POLY1305,
    cipher::AES_128_CTR,
    cipher::AES_192_CTR,
    cipher::AES_256_CTR,
    cipher::AES_128_CBC,
    cipher::AES_192_CBC,
    cipher::AES_256_CBC,
];

pub const SECURE_MAC_ALGORITHMS: &[mac::Name] = &[
    mac::HMAC_SHA512_ETM,
    mac::HMAC_SHA256_ETM,
    mac::HMAC_SHA512,
    mac::HMAC_SHA256,
];

pub const LEGACY_MAC_ALGORITHMS: &[mac::Name] = &[
    mac::HMAC_SHA256_ETM,
    mac::HMAC_SHA512_ETM,
    mac::HMAC_SHA256,
    mac::HMAC_SHA512,
    mac::HMAC_SHA1_ETM,
    mac::HMAC_SHA1,
];

pub const DEFAULT_COMPRESSION_ALGORITHMS: &[compression::Name] = &[
    compression::NONE,
    compression::ZLIB,
    compression::ZLIB_LEGACY,
];

pub const SECURE_KEY_TYPES: &[Algorithm] = &[
    Algorithm::Ed25519,
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP256,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP384,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP521,
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha512),
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha256),
    },
];

/// Host key types for older devices, including `ssh-rsa` (SHA-1) and DSA.
pub const LEGACY_KEY_TYPES: &[Algorithm] = &[
    Algorithm::Ed25519,
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP256,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP384,
    },
    Algorithm::Ecdsa {
        curve: EcdsaCurve::NistP521,
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha512),
    },
    Algorithm::Rsa {
        hash: Some(HashAlg::Sha256),
    },
    Algorithm::Rsa { hash: None },
    Algorithm::Dsa,
];
