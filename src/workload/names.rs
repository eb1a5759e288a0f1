//! # Generated Names
//!
//! Deterministic, length-bounded names for the containers, volumes and
//! annotations the operator creates.
//!
//! A name that fits in a DNS label is used as-is (lowercased). Longer names keep
//! the head and tail of the raw input and append an FNV-1a hash of the full
//! input, so two distinct long inputs still produce distinct names.

use crate::constants::{API_GROUP, GENERATED_NAME_PREFIX, MAX_NAME_LENGTH};

const HASH_HEX_LEN: usize = 8;
const SEPARATOR_CHARS: usize = 2;

const FNV_OFFSET_BASIS: u32 = 2_166_136_261;
const FNV_PRIME: u32 = 16_777_619;

/// Mount type discriminator for the emptyDir holding unix sockets
pub const MOUNT_TYPE_UNIX: &str = "unix";
/// Mount type discriminator for the credentials secret volume
pub const MOUNT_TYPE_CREDENTIALS: &str = "creds";

/// 32-bit FNV-1a over the UTF-8 bytes of `input`
#[must_use]
pub fn fnv1a_32(input: &str) -> u32 {
    input.bytes().fold(FNV_OFFSET_BASIS, |hash, byte| {
        (hash ^ u32::from(byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Build a name of at most 63 characters from `prefix` and `raw_name`
///
/// ```
/// use cloudsql_proxy_operator::workload::names::safe_name;
///
/// assert_eq!(safe_name("csql-", "Hello"), "csql-hello");
/// assert!(safe_name("csql-", &"x".repeat(80)).len() <= 63);
/// ```
#[must_use]
pub fn safe_name(prefix: &str, raw_name: &str) -> String {
    let prefix_len = prefix.chars().count();
    let raw_len = raw_name.chars().count();
    if prefix_len + raw_len <= MAX_NAME_LENGTH {
        return format!("{prefix}{raw_name}").to_lowercase();
    }

    let truncate_len =
        MAX_NAME_LENGTH.saturating_sub(prefix_len + HASH_HEX_LEN + SEPARATOR_CHARS) / 2;
    let head: String = raw_name.chars().take(truncate_len).collect();
    let tail: String = raw_name.chars().skip(raw_len - truncate_len).collect();
    format!("{prefix}{head}-{tail}-{:08x}", fnv1a_32(raw_name)).to_lowercase()
}

/// Name of the proxy container generated for a resource
#[must_use]
pub fn container_name(resource_name: &str) -> String {
    safe_name(GENERATED_NAME_PREFIX, resource_name)
}

/// Name of the emptyDir volume holding the unix sockets of one directory
///
/// Every proxy placing sockets in the same directory shares this volume, so
/// the name depends on the directory alone.
#[must_use]
pub fn socket_volume_name(dir: &str) -> String {
    let sanitized = sanitize(dir);
    let dir = match sanitized.trim_matches('-') {
        "" => "root",
        trimmed => trimmed,
    };
    safe_name(GENERATED_NAME_PREFIX, &format!("{MOUNT_TYPE_UNIX}-{dir}"))
}

/// Name of the credentials volume of a resource
#[must_use]
pub fn credentials_volume_name(resource_name: &str) -> String {
    safe_name(
        GENERATED_NAME_PREFIX,
        &format!("{resource_name}-{MOUNT_TYPE_CREDENTIALS}"),
    )
}

/// Template annotation recording the generation requested for a resource
#[must_use]
pub fn request_annotation(resource_name: &str) -> String {
    format!("{API_GROUP}/{}", safe_name("", &format!("{resource_name}-request")))
}

/// Template annotation recording the generation applied for a resource
#[must_use]
pub fn applied_annotation(resource_name: &str) -> String {
    format!("{API_GROUP}/{}", safe_name("", &format!("{resource_name}-applied")))
}

/// Whether a container or volume name is reserved for the operator
#[must_use]
pub fn is_operator_owned(name: &str) -> bool {
    name.starts_with(GENERATED_NAME_PREFIX)
}

/// Lowercase and replace anything that is not valid in a DNS label with `-`
fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}
