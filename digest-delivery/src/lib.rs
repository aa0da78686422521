pub mod mailer;

pub use mailer::{SmtpConfig, SmtpMailer};
