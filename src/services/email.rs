use lettre::{
    Message, SmtpTransport, Transport,
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
};
use log::{info, error, warn};

use crate::config::Config;

/// Transactional mail delivered through the Resend SMTP relay.
pub struct EmailService;

impl EmailService {
    pub async fn send_welcome_email(email: &str, name: &str, role: &str) -> bool {
        let display_name = if name.trim().is_empty() { "there" } else { name };
        let body = welcome_body(display_name, role);
        Self::deliver(email, "Welcome to Freelance Marketplace!", body, "welcome").await
    }

    pub async fn send_password_reset_email(email: &str, code: &str) -> bool {
        let body = reset_body(code);
        Self::deliver(email, "Your password reset code", body, "password reset").await
    }

    pub async fn send_payment_receipt(email: &str, order_id: &str, amount: f64, item: &str) -> bool {
        let body = receipt_body(order_id, amount, item);
        Self::deliver(email, "Payment received", body, "payment receipt").await
    }

    async fn deliver(to: &str, subject: &str, html: String, kind: &str) -> bool {
        if !Config::is_mail_enabled() {
            warn!("Email not configured. Skipping {} email to {}", kind, to);
            return false;
        }

        let to = to.to_string();
        let subject = subject.to_string();
        let result = tokio::task::spawn_blocking(move || Self::try_send(&to, &subject, html).map(|_| to)).await;

        match result {
            Ok(Ok(to)) => {
                info!("{} email sent to {}", kind, to);
                true
            }
            Ok(Err(e)) => {
                error!("Failed to send {} email: {}", kind, e);
                false
            }
            Err(e) => {
                error!("Email task for {} panicked: {}", kind, e);
                false
            }
        }
    }

    fn try_send(to: &str, subject: &str, html: String) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let api_key = Config::resend_api_key().ok_or("Email not configured")?;

        let from_mailbox: Mailbox = Config::mail_from().parse()?;
        let to_mailbox: Mailbox = to.parse()?;

        let message = Message::builder()
            .from(from_mailbox)
            .to(to_mailbox)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html)?;

        let creds = Credentials::new(Config::mail_user(), api_key);
        let mailer = SmtpTransport::relay(&Config::mail_host())?
            .credentials(creds)
            .build();

        mailer.send(&message)?;
        Ok(())
    }
}

fn welcome_body(name: &str, role: &str) -> String {
    let pitch = if role == "freelancer" {
        "Publish your first service and start receiving projects from clients."
    } else {
        "Post your first project or browse services offered by our freelancers."
    };

    format!(
        r#"
        <!DOCTYPE html>
        <html>
        <body style="font-family: Arial, sans-serif; color: #333;">
            <h1>Welcome aboard, {}!</h1>
            <p>{}</p>
            <p>Best regards,<br><strong>Freelance Marketplace Team</strong></p>
        </body>
        </html>
        "#,
        html_escape(name),
        pitch
    )
}

fn reset_body(code: &str) -> String {
    format!(
        r#"
        <!DOCTYPE html>
        <html>
        <body style="font-family: Arial, sans-serif; color: #333;">
            <p>Use the code below to reset your password:</p>
            <div style="font-size: 32px; font-weight: bold; letter-spacing: 5px;">{}</div>
            <p style="color: #666;">Valid for 15 minutes. If you didn't request this, ignore this email.</p>
        </body>
        </html>
        "#,
        code
    )
}

fn receipt_body(order_id: &str, amount: f64, item: &str) -> String {
    format!(
        r#"
        <!DOCTYPE html>
        <html>
        <body style="font-family: Arial, sans-serif; color: #333;">
            <h2>Payment received</h2>
            <p>Order <strong>{}</strong> for <strong>{}</strong> was paid successfully.</p>
            <p>Amount: <strong>Rp {:.0}</strong></p>
        </body>
        </html>
        "#,
        html_escape(order_id),
        html_escape(item),
        amount
    )
}

fn html_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_escaped_in_templates() {
        let body = welcome_body("<script>", "client");
        assert!(body.contains("&lt;script&gt;"));
        assert!(body.contains("Post your first project"));
    }

    #[test]
    fn receipt_shows_whole_rupiah() {
        let body = receipt_body("ORDER-1", 150000.0, "Logo design");
        assert!(body.contains("Rp 150000"));
        assert!(body.contains("Logo design"));
    }
}
