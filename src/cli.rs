use anyhow::Result;
use clap::{Parser, Subcommand};

use nexachat_api::client::{PaymentClient, PollState};

#[derive(Parser)]
#[command(name = "nexachat-pay", about = "Send an STK push through a NexaChat server")]
struct Args {
    #[command(subcommand)]
    command: Commands,
    /// Server base URL
    #[arg(short, long, default_value = "http://localhost:5001")]
    url: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Initiate a payment and poll until it settles
    Pay {
        /// Payer phone number (07... or 2547...)
        #[arg(short, long)]
        phone: String,
        #[arg(short, long)]
        amount: f64,
        #[arg(short, long)]
        description: String,
        #[arg(short, long)]
        sender: String,
        #[arg(short, long)]
        recipient: String,
    },
    /// Check the status of an earlier payment
    Status {
        /// CheckoutRequestID returned by `pay`
        #[arg(short, long)]
        checkout_request_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .init();

    let args = Args::parse();
    let client = PaymentClient::new(&args.url);

    match args.command {
        Commands::Pay {
            phone,
            amount,
            description,
            sender,
            recipient,
        } => {
            let data = client
                .initiate(&phone, amount, &description, &sender, &recipient)
                .await?;
            let checkout_request_id = data["checkoutRequestID"]
                .as_str()
                .unwrap_or_default()
                .to_string();
            println!("STK push sent, checkout request {checkout_request_id}");
            println!("Check your phone and enter your M-Pesa PIN...");

            match client.poll_until_settled(&checkout_request_id).await {
                PollState::Completed { receipt } => match receipt {
                    Some(receipt) => println!("Payment completed, receipt {receipt}"),
                    None => println!("Payment completed"),
                },
                PollState::Failed { reason } => println!("Payment failed: {reason}"),
                PollState::Unknown { message } => println!("{message}"),
                PollState::Pending { .. } => {}
            }
        }
        Commands::Status {
            checkout_request_id,
        } => {
            let response = client.status(&checkout_request_id).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
    }

    Ok(())
}
