mod token;
mod voting_link;

pub use token::{GeneratedToken, HmacSha256, TokenCodec, TokenPayload};
pub use voting_link::{LinkStatus, VotingLink};
