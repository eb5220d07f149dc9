use anyhow::Context;
use async_trait::async_trait;

use super::NotificationSender;

pub struct MailgunSender {
    api_key: String,
    domain: String,
    from_address: String,
    client: reqwest::Client,
}

impl MailgunSender {
    pub fn new(api_key: String, domain: String, from_address: String) -> Self {
        Self {
            api_key,
            domain,
            from_address,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl NotificationSender for MailgunSender {
    async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()> {
        let url = format!("https://api.mailgun.net/v3/{}/messages", self.domain);

        self.client
            .post(&url)
            .basic_auth("api", Some(&self.api_key))
            .form(&[
                ("from", self.from_address.as_str()),
                ("to", to),
                ("subject", subject),
                ("text", body),
            ])
            .send()
            .await
            .context("failed to send Mailgun message")?
            .error_for_status()
            .context("Mailgun API returned error")?;

        Ok(())
    }
}
