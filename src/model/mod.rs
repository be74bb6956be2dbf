pub mod api;
pub mod audit;
pub mod election;
pub mod link;
pub mod member;
pub mod mongodb;
pub mod vote;
