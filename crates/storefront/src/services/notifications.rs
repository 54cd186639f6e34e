//! Customer notifications for paid orders.
//!
//! The confirmation is a multipart (text + HTML) email with the invoice
//! attached as `Invoice-<orderNumber>.html`. Delivery uses SMTP via lettre,
//! bodies are rendered with Askama templates.

use std::future::Future;

use askama::Template;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Attachment, MultiPart, SinglePart, header::ContentType},
    transport::smtp::{Error as SmtpError, authentication::Credentials},
};
use secrecy::ExposeSecret;
use thiserror::Error;

use crate::config::{EmailConfig, ShopConfig};
use crate::models::{FormattedTotals, Order};

/// Errors that can occur when sending a notification.
#[derive(Debug, Error)]
pub enum NotificationError {
    /// No delivery channel is configured.
    #[error("email delivery is not configured")]
    NotConfigured,

    /// SMTP transport error.
    #[error("SMTP error: {0}")]
    Smtp(#[from] SmtpError),

    /// Failed to build email message.
    #[error("Failed to build message: {0}")]
    MessageBuild(#[from] lettre::error::Error),

    /// Invalid email address.
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    /// Template rendering error.
    #[error("Template error: {0}")]
    Template(#[from] askama::Error),
}

/// Something that tells the customer their order is paid.
pub trait Notifier: Send + Sync {
    fn notify_order_paid(
        &self,
        order: &Order,
    ) -> impl Future<Output = Result<(), NotificationError>> + Send;
}

/// One invoice/email table row.
pub struct InvoiceLine {
    pub name: String,
    pub quantity: u32,
    pub price: String,
    pub total: String,
}

/// Printable invoice.
#[derive(Template)]
#[template(path = "invoice.html")]
pub struct InvoiceTemplate<'a> {
    pub shop: &'a ShopConfig,
    pub order_number: &'a str,
    pub date: String,
    pub customer_name: String,
    pub email: &'a str,
    pub phone: &'a str,
    pub billing_lines: Vec<String>,
    pub shipping_lines: Vec<String>,
    pub lines: Vec<InvoiceLine>,
    pub totals: FormattedTotals,
    pub has_discount: bool,
    pub payment_method: &'static str,
    pub notes: Option<&'a str>,
}

#[derive(Template)]
#[template(path = "email/order_confirmation.html")]
struct ConfirmationHtml<'a> {
    shop_name: &'a str,
    customer_name: String,
    order_number: &'a str,
    lines: &'a [InvoiceLine],
    totals: &'a FormattedTotals,
    has_discount: bool,
    shipping_lines: &'a [String],
}

#[derive(Template)]
#[template(path = "email/order_confirmation.txt")]
struct ConfirmationText<'a> {
    shop_name: &'a str,
    customer_name: String,
    order_number: &'a str,
    lines: &'a [InvoiceLine],
    totals: &'a FormattedTotals,
    has_discount: bool,
    shipping_lines: &'a [String],
}

/// Rendered confirmation, ready to hand to a transport.
pub struct Confirmation {
    pub subject: String,
    pub text: String,
    pub html: String,
    pub invoice_filename: String,
    pub invoice: String,
}

fn invoice_lines(order: &Order) -> Vec<InvoiceLine> {
    order
        .items
        .iter()
        .map(|item| InvoiceLine {
            name: item.display_name(),
            quantity: item.quantity,
            price: order.money(item.price).to_string(),
            total: order.money(item.total).to_string(),
        })
        .collect()
}

/// Render the invoice and confirmation bodies for `order`.
///
/// # Errors
///
/// Returns `askama::Error` if a template fails to render.
pub fn render_confirmation(order: &Order, shop: &ShopConfig) -> Result<Confirmation, askama::Error> {
    let lines = invoice_lines(order);
    let totals = order.formatted();
    let has_discount = !order.discount.is_zero();
    let shipping_lines = order.shipping_address.lines();
    let number = order.order_number.as_str();

    let invoice = InvoiceTemplate {
        shop,
        order_number: number,
        date: order.created_at.format("%d %B %Y").to_string(),
        customer_name: order.billing_address.full_name(),
        email: order.email.as_str(),
        phone: &order.phone,
        billing_lines: order.billing_address.lines(),
        shipping_lines: shipping_lines.clone(),
        lines: invoice_lines(order),
        totals: totals.clone(),
        has_discount,
        payment_method: order.payment_method.label(),
        notes: order.customer_notes.as_deref(),
    }
    .render()?;

    let html = ConfirmationHtml {
        shop_name: &shop.name,
        customer_name: order.customer_name(),
        order_number: number,
        lines: &lines,
        totals: &totals,
        has_discount,
        shipping_lines: &shipping_lines,
    }
    .render()?;
    let text = ConfirmationText {
        shop_name: &shop.name,
        customer_name: order.customer_name(),
        order_number: number,
        lines: &lines,
        totals: &totals,
        has_discount,
        shipping_lines: &shipping_lines,
    }
    .render()?;

    Ok(Confirmation {
        subject: format!("Order Confirmation - {number}"),
        text,
        html,
        invoice_filename: format!("Invoice-{number}.html"),
        invoice,
    })
}

/// SMTP delivery.
#[derive(Clone)]
pub struct EmailNotifier {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from_address: String,
    shop: ShopConfig,
}

impl EmailNotifier {
    /// Create a new email notifier from configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the SMTP relay cannot be configured.
    pub fn new(config: &EmailConfig, shop: ShopConfig) -> Result<Self, SmtpError> {
        let credentials = Credentials::new(
            config.smtp_username.clone(),
            config.smtp_password.expose_secret().to_owned(),
        );

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?
            .port(config.smtp_port)
            .credentials(credentials)
            .build();

        Ok(Self {
            mailer,
            from_address: config.from_address.clone(),
            shop,
        })
    }

    fn build_message(&self, order: &Order) -> Result<Message, NotificationError> {
        let confirmation = render_confirmation(order, &self.shop)?;
        let to = order.email.as_str();

        let message = Message::builder()
            .from(
                self.from_address
                    .parse()
                    .map_err(|_| NotificationError::InvalidAddress(self.from_address.clone()))?,
            )
            .to(to
                .parse()
                .map_err(|_| NotificationError::InvalidAddress(to.to_owned()))?)
            .subject(confirmation.subject)
            .multipart(
                MultiPart::mixed()
                    .multipart(
                        MultiPart::alternative()
                            .singlepart(
                                SinglePart::builder()
                                    .header(ContentType::TEXT_PLAIN)
                                    .body(confirmation.text),
                            )
                            .singlepart(
                                SinglePart::builder()
                                    .header(ContentType::TEXT_HTML)
                                    .body(confirmation.html),
                            ),
                    )
                    .singlepart(
                        Attachment::new(confirmation.invoice_filename)
                            .body(confirmation.invoice, ContentType::TEXT_HTML),
                    ),
            )?;
        Ok(message)
    }
}

impl Notifier for EmailNotifier {
    async fn notify_order_paid(&self, order: &Order) -> Result<(), NotificationError> {
        let message = self.build_message(order)?;
        self.mailer.send(message).await?;

        tracing::info!(
            to = %order.email,
            order_number = %order.order_number,
            "Order confirmation sent"
        );
        Ok(())
    }
}

/// The notifier the running service uses.
#[derive(Clone)]
pub enum NotificationDispatcher {
    Email(EmailNotifier),
    /// Email is not configured; every send fails with
    /// [`NotificationError::NotConfigured`].
    Disabled,
}

impl NotificationDispatcher {
    /// Build from optional email settings.
    ///
    /// # Errors
    ///
    /// Returns error if the SMTP relay cannot be configured.
    pub fn from_config(email: Option<&EmailConfig>, shop: &ShopConfig) -> Result<Self, SmtpError> {
        match email {
            Some(config) => Ok(Self::Email(EmailNotifier::new(config, shop.clone())?)),
            None => {
                tracing::warn!("SMTP not configured, order confirmations are disabled");
                Ok(Self::Disabled)
            }
        }
    }
}

impl Notifier for NotificationDispatcher {
    async fn notify_order_paid(&self, order: &Order) -> Result<(), NotificationError> {
        match self {
            Self::Email(email) => email.notify_order_paid(order).await,
            Self::Disabled => Err(NotificationError::NotConfigured),
        }
    }
}

#[cfg(any(test, feature = "test-util"))]
pub use recording::RecordingNotifier;

#[cfg(any(test, feature = "test-util"))]
mod recording {
    use std::sync::{Mutex, PoisonError};

    use kelp_core::OrderNumber;

    use super::{NotificationError, Notifier};
    use crate::models::Order;

    /// Notifier that records order numbers instead of sending anything. Used by
    /// tests to count notifications.
    #[derive(Default)]
    pub struct RecordingNotifier {
        sent: Mutex<Vec<OrderNumber>>,
        fail: bool,
    }

    impl RecordingNotifier {
        /// A notifier whose every send fails.
        #[must_use]
        pub fn failing() -> Self {
            Self {
                sent: Mutex::default(),
                fail: true,
            }
        }

        /// Order numbers notified so far, in order.
        #[must_use]
        pub fn sent(&self) -> Vec<OrderNumber> {
            self.sent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }
    }

    impl Notifier for RecordingNotifier {
        async fn notify_order_paid(&self, order: &Order) -> Result<(), NotificationError> {
            if self.fail {
                return Err(NotificationError::InvalidAddress(order.email.to_string()));
            }
            self.sent
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(order.order_number.clone());
            Ok(())
        }
    }
}
