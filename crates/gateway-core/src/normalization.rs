//! Canonical chat-network addressing.

/// Domain suffix of a personal chat address.
pub const CONTACT_SUFFIX: &str = "@c.us";
/// Domain suffix of a group chat address.
pub const GROUP_SUFFIX: &str = "@g.us";

/// Convert a free-form phone number into its canonical chat address.
///
/// Input that already ends with [`CONTACT_SUFFIX`] is returned unchanged.
/// Anything else is reduced to its digits and suffixed.
pub fn normalize_phone_number(input: &str) -> String {
    if input.ends_with(CONTACT_SUFFIX) {
        return input.to_owned();
    }

    let digits: String = input.chars().filter(char::is_ascii_digit).collect();
    format!("{digits}{CONTACT_SUFFIX}")
}

/// Convert a group id into its canonical chat address.
///
/// Group ids may contain a `-` separator, so only surrounding whitespace is
/// stripped before suffixing.
pub fn normalize_group_id(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.ends_with(GROUP_SUFFIX) {
        return trimmed.to_owned();
    }
    format!("{trimmed}{GROUP_SUFFIX}")
}
