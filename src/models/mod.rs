pub mod delivery;
pub mod mail;

pub use delivery::{DeliveryState, DeliveryStatus};
pub use mail::{Address, Attachment, MailBody, MailRequest};
