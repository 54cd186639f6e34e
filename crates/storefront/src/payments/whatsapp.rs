//! Chat orders over WhatsApp.
//!
//! No money moves here. The customer is sent to a `wa.me` link with the order
//! summary pre-filled, and an operator settles payment by hand. Chat orders
//! are never reconciled automatically.

use std::fmt::Write as _;

use kelp_core::{Money, PaymentMethod};

use super::{GatewayError, PaymentGateway, PaymentInitiation};
use crate::models::Order;

/// Number used when `WHATSAPP_NUMBER` is not set.
pub const DEFAULT_WHATSAPP_NUMBER: &str = "+27719363070";

pub struct WhatsAppGateway {
    /// Digits only, as `wa.me` expects.
    number: String,
    shop_name: String,
}

impl WhatsAppGateway {
    #[must_use]
    pub fn new(number: Option<&str>, shop_name: &str) -> Self {
        let number = number.unwrap_or(DEFAULT_WHATSAPP_NUMBER);
        Self {
            number: number.chars().filter(char::is_ascii_digit).collect(),
            shop_name: shop_name.to_owned(),
        }
    }

    /// `https://wa.me/<digits>?text=<message>`.
    #[must_use]
    pub fn chat_url(&self, order: &Order) -> String {
        format!(
            "https://wa.me/{}?text={}",
            self.number,
            urlencoding::encode(&self.order_message(order))
        )
    }

    /// Human-readable order summary in WhatsApp markup.
    #[must_use]
    pub fn order_message(&self, order: &Order) -> String {
        let money = |amount| Money::new(amount, order.currency);
        let address = &order.shipping_address;
        let mut message = String::new();

        // Writing to a String cannot fail.
        let _ = writeln!(message, "*New Order from {}*", self.shop_name);
        let _ = writeln!(message);
        let _ = writeln!(message, "*Order Number:* {}", order.order_number);
        let _ = writeln!(message);
        let _ = writeln!(message, "*Customer Details:*");
        let _ = writeln!(message, "Name: {}", address.full_name());
        let _ = writeln!(message, "Email: {}", order.email);
        let _ = writeln!(message, "Phone: {}", order.phone);
        let _ = writeln!(message);
        let _ = writeln!(message, "*Shipping Address:*");
        for line in address.lines().into_iter().skip(1) {
            let _ = writeln!(message, "{line}");
        }
        let _ = writeln!(message);
        let _ = writeln!(message, "*Order Items:*");
        for item in &order.items {
            let _ = writeln!(
                message,
                "- {} x{} - {}",
                item.display_name(),
                item.quantity,
                money(item.total)
            );
        }
        let _ = writeln!(message);
        let _ = writeln!(message, "*Order Summary:*");
        let _ = writeln!(message, "Subtotal: {}", money(order.subtotal));
        if !order.discount.is_zero() {
            let _ = writeln!(message, "Discount: -{}", money(order.discount));
        }
        let _ = writeln!(message, "Shipping: {}", money(order.shipping_cost));
        let _ = writeln!(message, "VAT: {}", money(order.tax));
        let _ = writeln!(message, "*Total: {}*", money(order.total));

        if let Some(notes) = order
            .customer_notes
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
        {
            let _ = writeln!(message);
            let _ = writeln!(message, "*Notes:* {notes}");
        }

        let _ = writeln!(message);
        message.push_str("Please confirm this order and provide payment details.");
        message
    }
}

impl PaymentGateway for WhatsAppGateway {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::WhatsApp
    }

    async fn initiate(&self, order: &Order) -> Result<PaymentInitiation, GatewayError> {
        Ok(PaymentInitiation {
            payment_url: None,
            chat_url: Some(self.chat_url(order)),
        })
    }
}
