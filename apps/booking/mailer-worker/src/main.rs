//! Mailer Worker Service - Entry Point
//!
//! Background worker that delivers queued transactional email.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    booking_mailer_worker::run().await
}
