use aws_sdk_sesv2::{
    types::{Body, Content, Destination, EmailContent, Message},
    Client as SesClient,
};
use chrono::{DateTime, Utc};

/// A voting link ready to be emailed to a member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VotingLinkEmail {
    pub to: String,
    pub name: String,
    pub election_title: String,
    pub vote_url: String,
    pub expires_at: DateTime<Utc>,
}

impl VotingLinkEmail {
    pub fn subject(&self) -> String {
        format!("Your voting link for {}", self.election_title)
    }

    pub fn text(&self) -> String {
        format!(
            "Hello {},\n\n\
             You are eligible to vote in {}.\n\
             Cast your vote here: {}\n\n\
             This link is personal to you, can only be used once and expires at {}.\n",
            self.name,
            self.election_title,
            self.vote_url,
            self.expires_at.format("%Y-%m-%d %H:%M UTC"),
        )
    }
}

/// Sends voting links. Returns whether the message was accepted for
/// delivery; failures are logged, never raised.
#[rocket::async_trait]
pub trait Mailer: Send + Sync {
    async fn send_voting_link(&self, email: &VotingLinkEmail) -> bool;
}

/// Sends through Amazon SES.
pub struct SesMailer {
    client: SesClient,
    from: String,
}

impl SesMailer {
    pub fn new(client: SesClient, from: String) -> Self {
        Self { client, from }
    }
}

#[rocket::async_trait]
impl Mailer for SesMailer {
    async fn send_voting_link(&self, email: &VotingLinkEmail) -> bool {
        let subject = Content::builder().data(email.subject()).charset("UTF-8").build();
        let text = Content::builder().data(email.text()).charset("UTF-8").build();
        let (subject, text) = match (subject, text) {
            (Ok(subject), Ok(text)) => (subject, text),
            (Err(e), _) | (_, Err(e)) => {
                warn!("Could not build voting link email: {e}");
                return false;
            }
        };
        let message = Message::builder()
            .subject(subject)
            .body(Body::builder().text(text).build())
            .build();

        let result = self
            .client
            .send_email()
            .from_email_address(&self.from)
            .destination(Destination::builder().to_addresses(&email.to).build())
            .content(EmailContent::builder().simple(message).build())
            .send()
            .await;
        match result {
            Ok(_) => {
                debug!("Sent voting link to {}", email.to);
                true
            }
            Err(e) => {
                warn!("Failed to send voting link to {}: {e}", email.to);
                false
            }
        }
    }
}

/// Writes links to the log instead of sending them. For development.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMailer;

#[rocket::async_trait]
impl Mailer for LogMailer {
    async fn send_voting_link(&self, email: &VotingLinkEmail) -> bool {
        info!("Voting link for {} <{}>: {}", email.name, email.to, email.vote_url);
        true
    }
}
