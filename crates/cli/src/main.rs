//! Kelp CLI - Database migrations and order management.
//!
//! # Usage
//!
//! ```bash
//! # Run storefront database migrations
//! kelp-cli migrate
//!
//! # Inspect an order
//! kelp-cli order show KBB-M5X2K1Q0-7F3A9C
//!
//! # Settle a chat order by hand
//! kelp-cli order set-status KBB-M5X2K1Q0-7F3A9C --payment-status PAID --status PROCESSING
//!
//! # Resend the confirmation email
//! kelp-cli order resend-confirmation KBB-M5X2K1Q0-7F3A9C
//! ```
//!
//! # Commands
//!
//! - `migrate` - Run database migrations
//! - `order show` - Print an order
//! - `order set-status` - Operator status override
//! - `order resend-confirmation` - Send the confirmation email again

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};

use kelp_core::{OrderStatus, PaymentStatus};

mod commands;

#[derive(Parser)]
#[command(name = "kelp-cli")]
#[command(author, version, about = "Kelp Commerce CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run storefront database migrations
    Migrate,
    /// Inspect and manage orders
    Order {
        #[command(subcommand)]
        action: OrderAction,
    },
}

#[derive(Subcommand)]
enum OrderAction {
    /// Print an order with its items and totals
    Show {
        /// Order number, e.g. KBB-M5X2K1Q0-7F3A9C
        number: String,
    },
    /// Override the order status and/or payment status
    SetStatus {
        /// Order number
        number: String,

        /// New order status (PENDING, PROCESSING, SHIPPED, DELIVERED, CANCELLED, REFUNDED)
        #[arg(short, long)]
        status: Option<OrderStatus>,

        /// New payment status (PENDING, PAID, FAILED, REFUNDED)
        #[arg(short, long)]
        payment_status: Option<PaymentStatus>,
    },
    /// Send the order confirmation email again
    ResendConfirmation {
        /// Order number
        number: String,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), commands::CliError> {
    match cli.command {
        Commands::Migrate => commands::migrate::run().await?,
        Commands::Order { action } => match action {
            OrderAction::Show { number } => commands::order::show(&number).await?,
            OrderAction::SetStatus {
                number,
                status,
                payment_status,
            } => commands::order::set_status(&number, status, payment_status).await?,
            OrderAction::ResendConfirmation { number } => {
                commands::order::resend_confirmation(&number).await?;
            }
        },
    }
    Ok(())
}
