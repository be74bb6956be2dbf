//! Best-effort side effects of the voting core. Nothing here can fail a vote
//! or a link generation run.

mod broadcast;
mod email;

pub use broadcast::{Broadcaster, VoteUpdate};
pub use email::{LogMailer, Mailer, SesMailer, VotingLinkEmail};
