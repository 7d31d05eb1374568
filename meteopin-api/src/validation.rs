use core::fmt;
use core::net::Ipv4Addr;

/// Longest network identity accepted (IEEE 802.11 SSID limit)
pub const MAX_IDENTITY_LEN: usize = 32;

/// Longest secret accepted (WPA2 passphrase limit)
pub const MAX_SECRET_LEN: usize = 63;

/// Minimum WPA2 passphrase length
pub const MIN_NETWORK_SECRET_LEN: usize = 8;

/// Longest operator account identity or secret accepted
pub const MAX_ACCOUNT_LEN: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    /// Required field is empty
    Empty(&'static str),
    /// Field exceeds its length limit
    TooLong(&'static str),
    /// Field is shorter than its minimum length
    TooShort(&'static str),
    /// Field contains control characters
    ControlCharacters(&'static str),
    /// Field is not a dotted-quad IPv4 address
    MalformedAddress(&'static str),
    /// Subnet mask bits are not contiguous
    NonContiguousMask,
    /// Static addressing needs address, gateway and mask together
    IncompleteAddressing,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty(field) => write!(f, "{} must not be empty", field),
            Self::TooLong(field) => write!(f, "{} is too long", field),
            Self::TooShort(field) => write!(f, "{} is too short", field),
            Self::ControlCharacters(field) => write!(f, "{} contains control characters", field),
            Self::MalformedAddress(field) => write!(f, "{} is not a valid IPv4 address", field),
            Self::NonContiguousMask => write!(f, "Subnet mask is not contiguous"),
            Self::IncompleteAddressing => {
                write!(f, "Static addressing needs address, gateway and mask")
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ValidationError {}

/// Checks a required text field: non-empty, bounded, printable.
pub fn validate_text(
    field: &'static str,
    value: &str,
    max_len: usize,
) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::Empty(field));
    }
    if value.len() > max_len {
        return Err(ValidationError::TooLong(field));
    }
    if value.chars().any(char::is_control) {
        return Err(ValidationError::ControlCharacters(field));
    }
    Ok(())
}

/// Checks a network secret. Open networks (empty secret) are not accepted.
pub fn validate_network_secret(field: &'static str, value: &str) -> Result<(), ValidationError> {
    validate_text(field, value, MAX_SECRET_LEN)?;
    if value.len() < MIN_NETWORK_SECRET_LEN {
        return Err(ValidationError::TooShort(field));
    }
    Ok(())
}

pub fn parse_address(field: &'static str, value: &str) -> Result<Ipv4Addr, ValidationError> {
    value
        .trim()
        .parse::<Ipv4Addr>()
        .map_err(|_| ValidationError::MalformedAddress(field))
}

pub fn parse_mask(field: &'static str, value: &str) -> Result<Ipv4Addr, ValidationError> {
    let mask = parse_address(field, value)?;
    let bits = u32::from(mask);
    // Contiguous masks are a run of ones followed by a run of zeros.
    if bits.leading_ones() + bits.trailing_zeros() != 32 {
        return Err(ValidationError::NonContiguousMask);
    }
    Ok(mask)
}
