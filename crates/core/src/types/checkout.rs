//! Guest checkout contact and shipping data.
//!
//! Attached to an anonymous cart only at checkout time and never persisted by
//! the client.

use serde::{Deserialize, Serialize};

use super::email::Email;

/// Postal address for shipping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingAddress {
    pub line1: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line2: Option<String>,
    pub city: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    pub postal_code: String,
    /// ISO 3166-1 alpha-2 country code.
    pub country: String,
}

/// Contact and shipping data required to check out without an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestCheckoutInfo {
    pub name: String,
    /// Also the verification contact for guest order tracking.
    pub email: Email,
    pub phone: String,
    pub shipping_address: ShippingAddress,
}

impl GuestCheckoutInfo {
    /// Name of the first required field that is blank, if any.
    ///
    /// The email is validated on construction, so only free-text fields are
    /// checked here.
    #[must_use]
    pub fn first_blank_field(&self) -> Option<&'static str> {
        let address = &self.shipping_address;
        [
            ("name", self.name.as_str()),
            ("phone", self.phone.as_str()),
            ("shipping_address.line1", address.line1.as_str()),
            ("shipping_address.city", address.city.as_str()),
            ("shipping_address.postal_code", address.postal_code.as_str()),
            ("shipping_address.country", address.country.as_str()),
        ]
        .into_iter()
        .find(|(_, value)| value.trim().is_empty())
        .map(|(field, _)| field)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn info() -> GuestCheckoutInfo {
        GuestCheckoutInfo {
            name: "Ada Buyer".to_string(),
            email: Email::parse("ada@example.com").unwrap(),
            phone: "+1 555 0100".to_string(),
            shipping_address: ShippingAddress {
                line1: "1 Market St".to_string(),
                line2: None,
                city: "Springfield".to_string(),
                region: None,
                postal_code: "12345".to_string(),
                country: "US".to_string(),
            },
        }
    }

    #[test]
    fn test_complete_info_has_no_blank_field() {
        assert_eq!(info().first_blank_field(), None);
    }

    #[test]
    fn test_blank_field_reported() {
        let mut guest = info();
        guest.shipping_address.city = "  ".to_string();
        assert_eq!(guest.first_blank_field(), Some("shipping_address.city"));
    }
}
