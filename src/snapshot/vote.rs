use ethereum_types::Address;
use serde::Serialize;

/// A single signer's standing vote on whether `target` should be authorized.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct AuthorityVote {
    pub voter: Address,
    pub target: Address,
    pub authorize: bool,
}
