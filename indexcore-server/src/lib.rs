mod imap_provider;
mod search;

pub use imap_provider::{EmailMessage, ImapProvider, MessageSource};
pub use search::{search, search_shared};
