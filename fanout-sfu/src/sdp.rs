//! SDP credential normalization
//!
//! Some signaling paths form-decode payloads, turning `+` in ICE credentials
//! into spaces. Credentials never legitimately contain spaces, so every remote
//! description is repaired before it reaches the engine.

use regex::{Captures, Regex};
use std::sync::LazyLock;

static ICE_CREDENTIAL_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)a=(ice-pwd:|ice-ufrag:)([^\r\n]*)")
        .expect("ice credential regex is a compile-time constant and always valid")
});

/// Replace spaces with `+` in every `a=ice-pwd:` / `a=ice-ufrag:` value.
///
/// Idempotent: a repaired description contains no spaces to rewrite.
#[must_use]
pub fn modify_ice_attributes(sdp: &str) -> String {
    ICE_CREDENTIAL_LINE
        .replace_all(sdp, |caps: &Captures<'_>| {
            format!("a={}{}", &caps[1], caps[2].replace(' ', "+"))
        })
        .into_owned()
}
