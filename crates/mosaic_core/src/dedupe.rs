use std::collections::HashSet;

/// Generic host prefixes that do not distinguish sites for dedup
/// purposes. Order matters: only the first matching prefix is stripped.
const GENERIC_PREFIXES: [&str; 4] = ["m.", "mobile.", "edition.", "www."];

/// Strips the first matching generic prefix from `host`, if any. A
/// prefix only counts when what remains is still a dotted domain, so
/// `mobile.de` stays intact while `m.bbc.co.uk` reduces to
/// `bbc.co.uk`.
fn strip_first_generic_prefix(host: &str) -> &str {
    for prefix in GENERIC_PREFIXES {
        if let Some(stripped) = host.strip_prefix(prefix) {
            if stripped.contains('.') {
                return stripped;
            }
        }
    }
    host
}

/// Returns true when `host` collides with one of `used_hosts` under
/// generic-prefix stripping: the candidate is reduced to its bare form,
/// then every prefixed variant of that bare form (and the bare form
/// itself) is tested against the used set.
///
/// `www.mobile.de` collides with `mobile.de`, `m.bbc.co.uk` with
/// `www.bbc.co.uk`, `edition.cnn.com` with `mobile.cnn.com`.
pub fn is_host_or_mobile_page_known(used_hosts: &HashSet<String>, host: &str) -> bool {
    let bare = strip_first_generic_prefix(host);
    if used_hosts.contains(bare) {
        return true;
    }
    GENERIC_PREFIXES
        .iter()
        .any(|prefix| used_hosts.contains(&format!("{prefix}{bare}")))
}
