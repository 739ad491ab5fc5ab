pub mod email;

pub use email::{EmailEventHandler, EmailSender, LoggingEmailSender};
