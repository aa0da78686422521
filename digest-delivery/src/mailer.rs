use anyhow::{Context, Result};
use async_trait::async_trait;
use interfaces::MailTransport;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use std::path::Path;
use tracing::{debug, info};
use url::Url;

pub const DEFAULT_SMTP_PORT: u16 = 587;

#[derive(Clone)]
pub struct SmtpConfig {
    pub server: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Address the edition is sent from.
    pub sender: String,
    pub use_tls: bool,
}

impl std::fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***")
            .field("sender", &self.sender)
            .field("use_tls", &self.use_tls)
            .finish()
    }
}

impl SmtpConfig {
    /// Parse SMTP settings from a URI plus the account password.
    /// Expected URI format: smtp://username@server:port?tls=true&from=me@example.com
    pub fn from_uri(uri: &str, password: &str) -> Result<Self> {
        let parsed_uri = Url::parse(uri).map_err(|e| anyhow::anyhow!("Invalid SMTP URI '{}': {}", uri, e))?;

        if parsed_uri.scheme() != "smtp" {
            return Err(anyhow::anyhow!(
                "URI must use 'smtp://' scheme, got: {}",
                parsed_uri.scheme()
            ));
        }

        let server = parsed_uri
            .host_str()
            .ok_or_else(|| anyhow::anyhow!("No server specified in URI: {}", uri))?
            .to_string();

        let port = parsed_uri.port().unwrap_or(DEFAULT_SMTP_PORT);

        // user%40example.com in the URI
        let username = urlencoding::decode(parsed_uri.username())
            .map_err(|e| anyhow::anyhow!("Username in URI is not UTF-8: {}", e))?
            .into_owned();
        if username.is_empty() {
            return Err(anyhow::anyhow!("No username in URI: {}", uri));
        }

        let use_tls = parsed_uri
            .query_pairs()
            .find(|(key, _)| key == "tls")
            .map(|(_, value)| value.parse().unwrap_or(true))
            .unwrap_or(true);

        let sender = parsed_uri
            .query_pairs()
            .find(|(key, _)| key == "from")
            .map(|(_, value)| value.into_owned())
            .unwrap_or_else(|| username.clone());

        Ok(Self {
            server,
            port,
            username,
            password: password.to_string(),
            sender,
            use_tls,
        })
    }
}

/// Mails finished editions as attachments over SMTP (STARTTLS by default).
pub struct SmtpMailer {
    config: SmtpConfig,
}

impl SmtpMailer {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SmtpConfig {
        &self.config
    }

    /// The message sent for `artifact`: a short text part plus the file.
    pub fn build_message(&self, artifact: &Path, destination: &str) -> Result<Message> {
        let file_name = artifact
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| anyhow::anyhow!("Artifact has no file name: {}", artifact.display()))?
            .to_string();
        let bytes = std::fs::read(artifact).with_context(|| format!("Cannot read {}", artifact.display()))?;

        let from: Mailbox = self
            .config
            .sender
            .parse()
            .with_context(|| format!("Invalid sender address: {}", self.config.sender))?;
        let to: Mailbox = destination
            .parse()
            .with_context(|| format!("Invalid destination address: {}", destination))?;
        let content_type = ContentType::parse(mime_guess::from_path(artifact).first_or_octet_stream().as_ref())?;

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(format!("News Digest: {}", file_name))
            .multipart(
                MultiPart::mixed()
                    .singlepart(SinglePart::plain(format!("Your news digest is attached ({}).", file_name)))
                    .singlepart(Attachment::new(file_name).body(bytes, content_type)),
            )?;
        Ok(message)
    }

    fn transport(&self) -> Result<SmtpTransport> {
        let credentials = Credentials::new(self.config.username.clone(), self.config.password.clone());
        let builder = if self.config.use_tls {
            SmtpTransport::starttls_relay(&self.config.server)?
        } else {
            // Local test servers only
            SmtpTransport::builder_dangerous(&self.config.server)
        };
        Ok(builder.port(self.config.port).credentials(credentials).build())
    }
}

#[async_trait]
impl MailTransport for SmtpMailer {
    async fn send(&self, artifact: &Path, destination: &str) -> Result<()> {
        let message = self.build_message(artifact, destination)?;
        let transport = self.transport()?;

        debug!(
            "Sending {} via {}:{}",
            artifact.display(),
            self.config.server,
            self.config.port
        );
        tokio::task::spawn_blocking(move || transport.send(&message))
            .await
            .context("SMTP task panicked")?
            .context("SMTP delivery failed")?;

        info!("Delivered {} to {}", artifact.display(), destination);
        Ok(())
    }
}
